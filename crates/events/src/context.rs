use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tracing metadata carried explicitly with every command.
///
/// - `correlation_id` groups everything that happened because of one external
///   trigger (an operator action, a saga run). It is set once at the edge and
///   copied unchanged onto every event written downstream.
/// - `causation_id` points at the immediate predecessor (usually the event or
///   saga step that made this command happen), forming a parent chain inside
///   the correlation group.
///
/// The context travels as an argument, never as ambient state, so a reader can
/// see at each call site where the identifiers come from.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandContext {
    correlation_id: Uuid,
    causation_id: Option<Uuid>,
}

impl CommandContext {
    /// Start a fresh correlation group (new external trigger).
    pub fn new() -> Self {
        Self {
            correlation_id: Uuid::now_v7(),
            causation_id: None,
        }
    }

    /// Join an existing correlation group.
    pub fn with_correlation(correlation_id: Uuid) -> Self {
        Self {
            correlation_id,
            causation_id: None,
        }
    }

    /// Derive a context for work caused by `predecessor` (an event id or a
    /// saga id), keeping the same correlation group.
    pub fn caused_by(&self, predecessor: Uuid) -> Self {
        Self {
            correlation_id: self.correlation_id,
            causation_id: Some(predecessor),
        }
    }

    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    pub fn causation_id(&self) -> Option<Uuid> {
        self.causation_id
    }
}

impl Default for CommandContext {
    fn default() -> Self {
        Self::new()
    }
}
