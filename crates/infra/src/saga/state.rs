//! Durable saga state.
//!
//! A saga survives process restarts by checkpointing this state after every
//! step transition. The checkpoint is the single source of truth for where a
//! crashed run should pick up.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use voltfleet_core::SagaId;

/// Saga type identifier for battery replacements.
pub const BATTERY_REPLACEMENT_SAGA: &str = "saga.battery_replacement";

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SagaStatus {
    Running,
    Completed,
    Failed,
    Compensating,
    Compensated,
}

impl SagaStatus {
    /// Terminal states are never left again; resuming a terminal saga is a
    /// no-op.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SagaStatus::Completed | SagaStatus::Failed | SagaStatus::Compensated
        )
    }
}

/// Checkpointed position in the replacement workflow.
///
/// A step name records what has already been *made durable*: a saga resumed
/// at `OldDecommissioned` knows the old pack's decommissioning is in the
/// event store, whatever else was in flight when the process died.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplacementStep {
    Initiated,
    OldDecommissioned,
    NewInstalled,
    Verified,
    Completed,
}

/// Serializable state of one saga instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaState {
    pub saga_id: SagaId,
    pub saga_type: String,
    pub status: SagaStatus,
    pub current_step: ReplacementStep,
    /// Business parameters and accumulated markers, as strings so the
    /// checkpoint schema never chases domain types.
    pub payload: BTreeMap<String, String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl SagaState {
    pub fn new(saga_id: SagaId, saga_type: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            saga_id,
            saga_type: saga_type.into(),
            status: SagaStatus::Running,
            current_step: ReplacementStep::Initiated,
            payload: BTreeMap::new(),
            started_at,
            completed_at: None,
            error: None,
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.payload.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.payload.get(key).map(String::as_str)
    }

    pub fn advance(&mut self, step: ReplacementStep) {
        self.current_step = step;
    }

    pub fn complete(&mut self, at: DateTime<Utc>) {
        self.status = SagaStatus::Completed;
        self.current_step = ReplacementStep::Completed;
        self.completed_at = Some(at);
    }

    pub fn fail(&mut self, error: impl Into<String>, at: DateTime<Utc>) {
        self.status = SagaStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(at);
    }

    pub fn begin_compensation(&mut self, error: impl Into<String>) {
        self.status = SagaStatus::Compensating;
        self.error = Some(error.into());
    }

    pub fn mark_compensated(&mut self, at: DateTime<Utc>) {
        self.status = SagaStatus::Compensated;
        self.completed_at = Some(at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_running_and_compensating_are_non_terminal() {
        assert!(!SagaStatus::Running.is_terminal());
        assert!(!SagaStatus::Compensating.is_terminal());
        assert!(SagaStatus::Completed.is_terminal());
        assert!(SagaStatus::Failed.is_terminal());
        assert!(SagaStatus::Compensated.is_terminal());
    }

    #[test]
    fn lifecycle_transitions_stamp_the_state() {
        let started = Utc::now();
        let mut state = SagaState::new(SagaId::new(), BATTERY_REPLACEMENT_SAGA, started);
        assert_eq!(state.status, SagaStatus::Running);
        assert_eq!(state.current_step, ReplacementStep::Initiated);

        state.advance(ReplacementStep::OldDecommissioned);
        state.begin_compensation("new pack missing");
        assert_eq!(state.status, SagaStatus::Compensating);
        assert!(state.completed_at.is_none());

        let finished = Utc::now();
        state.mark_compensated(finished);
        assert_eq!(state.status, SagaStatus::Compensated);
        assert_eq!(state.completed_at, Some(finished));
        assert_eq!(state.error.as_deref(), Some("new pack missing"));
    }

    #[test]
    fn state_round_trips_through_json() {
        let mut state = SagaState::new(SagaId::new(), BATTERY_REPLACEMENT_SAGA, Utc::now());
        state.insert("old_battery_id", "b-1");
        state.advance(ReplacementStep::NewInstalled);

        let json = serde_json::to_string(&state).unwrap();
        let back: SagaState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
