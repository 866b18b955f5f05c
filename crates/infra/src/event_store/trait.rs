use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use std::sync::Arc;
use voltfleet_core::{AggregateId, ExpectedVersion};
use voltfleet_events::CommandContext;

/// An event ready to be appended to a stream (not yet assigned a sequence
/// number).
///
/// Lifecycle: a typed domain event comes out of an aggregate's `handle()`,
/// gets wrapped here with stream and tracing metadata, becomes a
/// [`StoredEvent`] once the store assigns it a sequence number, and is then
/// published as an envelope.
///
/// Use [`UncommittedEvent::from_typed`] to build one: it serializes the
/// variant payload and lifts the event's own metadata (type, schema version,
/// business time) alongside the command's correlation chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncommittedEvent {
    pub event_id: Uuid,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub correlation_id: Uuid,
    pub causation_id: Option<Uuid>,

    pub payload: JsonValue,
}

/// A stored event in an append-only stream (assigned a sequence number).
///
/// Sequence numbers are assigned by the store during append, start at 1 and
/// increase by exactly 1 per event within a stream. They never change once
/// assigned, which is what makes them usable both for replay ordering and for
/// the optimistic concurrency check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub event_id: Uuid,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,

    /// Monotonically increasing position in the aggregate stream.
    pub sequence_number: u64,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub correlation_id: Uuid,
    pub causation_id: Option<Uuid>,

    pub payload: JsonValue,
}

impl StoredEvent {
    pub fn stream_version(&self) -> u64 {
        self.sequence_number
    }

    /// Convert a stored event into an event envelope for publication.
    pub fn to_envelope(&self) -> voltfleet_events::EventEnvelope<JsonValue> {
        voltfleet_events::EventEnvelope::new(
            self.event_id,
            self.aggregate_id,
            self.aggregate_type.clone(),
            self.event_type.clone(),
            self.sequence_number,
            self.correlation_id,
            self.causation_id,
            self.occurred_at,
            self.payload.clone(),
        )
    }
}

/// Event store operation error.
///
/// These are **infrastructure errors** (storage, concurrency) as opposed to
/// domain errors (validation, invariants).
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// Optimistic concurrency check failed: the stream moved underneath the
    /// writer. The command must be retried against the current stream.
    #[error("optimistic concurrency check failed: expected version {expected}, found {actual}")]
    Concurrency { expected: u64, actual: u64 },

    /// The stream already belongs to a different aggregate type.
    #[error("aggregate type mismatch: {0}")]
    AggregateTypeMismatch(String),

    /// Invalid event data or batch shape.
    #[error("invalid append: {0}")]
    InvalidAppend(String),

    /// The backing storage cannot currently serve requests.
    #[error("event store unavailable: {0}")]
    Unavailable(String),
}

/// Append-only event store.
///
/// Events are organized into **streams**, one stream per aggregate instance,
/// keyed by `AggregateId`. Within a stream, sequence numbers are contiguous
/// starting at 1.
///
/// Implementations must:
/// - enforce optimistic concurrency against the current stream version
/// - assign sequence numbers monotonically (no gaps, no duplicates)
/// - persist a batch atomically (all events or none)
/// - never modify or delete stored events
pub trait EventStore: Send + Sync {
    /// Append events to an aggregate stream (append-only).
    ///
    /// All events in the batch must target the same aggregate. Sequence
    /// numbers are assigned starting at `current_version + 1`.
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Load the full stream for an aggregate, in sequence order.
    ///
    /// Returns an empty vector for a stream that does not exist yet.
    fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Load the events of a stream with sequence numbers greater than
    /// `after_sequence`, in sequence order.
    fn load_stream_from(
        &self,
        aggregate_id: AggregateId,
        after_sequence: u64,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// All aggregate ids that have at least one event of the given aggregate
    /// type, in stable (sorted) order.
    fn list_aggregate_ids(
        &self,
        aggregate_type: &str,
    ) -> Result<Vec<AggregateId>, EventStoreError>;

    /// Number of events in an aggregate's stream (0 for a missing stream).
    fn count(&self, aggregate_id: AggregateId) -> Result<u64, EventStoreError>;

    /// Whether the aggregate has any recorded events.
    fn exists(&self, aggregate_id: AggregateId) -> Result<bool, EventStoreError>;
}

impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).append(events, expected_version)
    }

    fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).load_stream(aggregate_id)
    }

    fn load_stream_from(
        &self,
        aggregate_id: AggregateId,
        after_sequence: u64,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).load_stream_from(aggregate_id, after_sequence)
    }

    fn list_aggregate_ids(
        &self,
        aggregate_type: &str,
    ) -> Result<Vec<AggregateId>, EventStoreError> {
        (**self).list_aggregate_ids(aggregate_type)
    }

    fn count(&self, aggregate_id: AggregateId) -> Result<u64, EventStoreError> {
        (**self).count(aggregate_id)
    }

    fn exists(&self, aggregate_id: AggregateId) -> Result<bool, EventStoreError> {
        (**self).exists(aggregate_id)
    }
}

impl UncommittedEvent {
    /// Convenience constructor from a typed event.
    ///
    /// Keeps infra decoupled from business, while still capturing the event
    /// metadata needed for deserialization later.
    pub fn from_typed<E>(
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        ctx: &CommandContext,
        event: &E,
    ) -> Result<Self, EventStoreError>
    where
        E: voltfleet_events::Event,
    {
        let payload = event.payload().map_err(|e| {
            EventStoreError::InvalidAppend(format!("payload serialization failed: {e}"))
        })?;

        Ok(Self {
            event_id: Uuid::now_v7(),
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            event_type: event.event_type().to_string(),
            event_version: event.version(),
            occurred_at: event.occurred_at(),
            correlation_id: ctx.correlation_id(),
            causation_id: ctx.causation_id(),
            payload,
        })
    }
}
