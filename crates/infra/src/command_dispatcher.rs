//! Command execution pipeline (application-level orchestration).
//!
//! The `CommandDispatcher` implements the full event-sourcing pipeline:
//!
//! ```text
//! Command
//!   ↓
//! 1. Load events from store
//!   ↓
//! 2. Rehydrate aggregate (replay history into an EventSourced runtime)
//!   ↓
//! 3. Execute command (pure decision logic, events buffered)
//!   ↓
//! 4. Persist buffered events (append-only, optimistic concurrency check)
//!   ↓
//! 5. Publish committed events to the bus
//! ```
//!
//! Append happens strictly before publish: a subscriber never observes an
//! event that was not durably recorded. If the append fails, the runtime's
//! uncommitted buffer is left intact, so the caller can retry [`persist`]
//! without re-running the command.
//!
//! This module contains no IO itself; it composes the store and bus traits,
//! which keeps it testable against in-memory implementations.
//!
//! [`persist`]: CommandDispatcher::persist

use serde_json::Value as JsonValue;

use voltfleet_core::{Aggregate, AggregateId, DomainError, EventSourced, ExpectedVersion};
use voltfleet_events::{Command, CommandContext, DecodeEvent, Event, EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug)]
pub enum DispatchError {
    /// Optimistic concurrency failure: the stream moved after our load.
    /// Reload and re-dispatch; the command itself may still be valid.
    Concurrency(String),
    /// Domain validation failure (deterministic).
    Validation(String),
    /// Operation not permitted in the aggregate's current state.
    InvalidOperation(String),
    /// Deterministic business conflict (e.g. the action was already taken).
    /// Unlike `Concurrency`, retrying against fresh state fails the same way.
    Conflict(String),
    /// Domain-level not found.
    NotFound,
    /// A known stored event type whose payload no longer deserializes.
    Deserialize(String),
    /// Persisting to the event store failed.
    Store(EventStoreError),
    /// Publication failed after a successful append (at-least-once; retry may
    /// duplicate).
    Publish(String),
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match &value {
            EventStoreError::Concurrency { expected, actual } => DispatchError::Concurrency(
                format!("expected version {expected}, found {actual}"),
            ),
            _ => DispatchError::Store(value),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => DispatchError::Validation(msg),
            DomainError::InvalidOperation(msg) => DispatchError::InvalidOperation(msg),
            DomainError::Conflict(msg) => DispatchError::Conflict(msg),
            DomainError::NotFound => DispatchError::NotFound,
            DomainError::InvalidId(msg) => DispatchError::Validation(msg),
        }
    }
}

/// Reusable command execution engine for event-sourced aggregates.
///
/// Generic over the store and bus so tests run against the in-memory
/// implementations and production can swap in durable backends without
/// touching domain code.
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_parts(self) -> (S, B) {
        (self.store, self.bus)
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Dispatch a command through the full pipeline.
    ///
    /// The target stream comes from the command itself
    /// (`Command::target_aggregate_id`); `make_aggregate` constructs the empty
    /// aggregate for rehydration (e.g. `Battery::empty`).
    ///
    /// Returns the committed `StoredEvent`s with their assigned sequence
    /// numbers. A command that decides no events returns an empty vector and
    /// touches neither store nor bus.
    ///
    /// On a concurrency conflict the stream moved after our load; callers
    /// should reload and re-dispatch (the command is still valid, the decision
    /// basis was stale).
    pub fn dispatch<A>(
        &self,
        ctx: &CommandContext,
        aggregate_type: &str,
        command: A::Command,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Command: Command,
        A::Event: Event + DecodeEvent,
    {
        let aggregate_id = command.target_aggregate_id();
        let mut runtime = self.load(aggregate_id, make_aggregate)?;
        runtime.execute(&command).map_err(DispatchError::from)?;
        self.persist(ctx, aggregate_id, aggregate_type, &mut runtime)
    }

    /// Load and rehydrate an aggregate runtime from its stream.
    ///
    /// Stored events whose type this build does not recognize are skipped
    /// with a warning; their sequence numbers are still accounted for so the
    /// concurrency expectation lines up with the stream.
    pub fn load<A>(
        &self,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<EventSourced<A>, DispatchError>
    where
        A: Aggregate,
        A::Event: DecodeEvent,
    {
        let history = self.store.load_stream(aggregate_id)?;
        validate_loaded_stream(aggregate_id, &history)?;

        let mut runtime = EventSourced::new(make_aggregate(aggregate_id));
        let (events, skipped) = decode_history::<A>(&history)?;
        runtime.load_from_history(events);
        if skipped > 0 {
            runtime.fast_forward(skipped);
        }
        Ok(runtime)
    }

    /// Append the runtime's uncommitted events and publish them.
    ///
    /// The buffer is only cleared after a successful append; a failed append
    /// leaves it intact so this call can be retried as-is.
    pub fn persist<A>(
        &self,
        ctx: &CommandContext,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        runtime: &mut EventSourced<A>,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate,
        A::Event: Event,
    {
        if !runtime.has_uncommitted() {
            return Ok(vec![]);
        }

        let expected = ExpectedVersion::Exact(runtime.base_version());
        let uncommitted = runtime
            .uncommitted()
            .iter()
            .map(|ev| UncommittedEvent::from_typed(aggregate_id, aggregate_type, ctx, ev))
            .collect::<Result<Vec<_>, _>>()?;

        let committed = self.store.append(uncommitted, expected)?;
        runtime.mark_committed();

        // Publish only after the append succeeded.
        for stored in &committed {
            self.bus
                .publish(stored.to_envelope())
                .map_err(|e| DispatchError::Publish(format!("{e:?}")))?;
        }

        Ok(committed)
    }
}

fn validate_loaded_stream(
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    // Reject streams from a buggy backend: wrong aggregate, gaps, or
    // non-monotonic sequence numbers.
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(
                format!("loaded stream contains wrong aggregate_id at index {idx}"),
            )));
        }
        if e.sequence_number != last + 1 {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(
                format!(
                    "non-contiguous sequence_number in loaded stream (last={last}, found={})",
                    e.sequence_number
                ),
            )));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn decode_history<A>(history: &[StoredEvent]) -> Result<(Vec<A::Event>, u64), DispatchError>
where
    A: Aggregate,
    A::Event: DecodeEvent,
{
    let mut events = Vec::with_capacity(history.len());
    let mut skipped = 0u64;

    for stored in history {
        match A::Event::decode(&stored.event_type, &stored.payload) {
            Ok(Some(event)) => events.push(event),
            Ok(None) => {
                skipped += 1;
                tracing::warn!(
                    aggregate_id = %stored.aggregate_id,
                    event_type = %stored.event_type,
                    sequence = stored.sequence_number,
                    "skipping stored event of unrecognized type during replay"
                );
            }
            Err(e) => {
                return Err(DispatchError::Deserialize(format!(
                    "event '{}' at sequence {}: {e}",
                    stored.event_type, stored.sequence_number
                )));
            }
        }
    }

    Ok((events, skipped))
}
