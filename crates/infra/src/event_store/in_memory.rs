use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use voltfleet_core::{AggregateId, ExpectedVersion};

use super::r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

/// In-memory append-only event store.
///
/// Intended for tests/dev. Keeps a secondary index from aggregate type to
/// aggregate ids so fleet-wide queries don't scan every stream.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    streams: RwLock<HashMap<AggregateId, Vec<StoredEvent>>>,
    by_type: RwLock<HashMap<String, BTreeSet<AggregateId>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_version(stream: &[StoredEvent]) -> u64 {
        stream.last().map(|e| e.sequence_number).unwrap_or(0)
    }
}

fn poisoned(_: impl core::fmt::Debug) -> EventStoreError {
    EventStoreError::Unavailable("lock poisoned".to_string())
}

impl EventStore for InMemoryEventStore {
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        if events.is_empty() {
            return Ok(vec![]);
        }

        // All events must target the same aggregate stream.
        let aggregate_id = events[0].aggregate_id;
        let aggregate_type = events[0].aggregate_type.clone();

        for (idx, e) in events.iter().enumerate() {
            if e.aggregate_id != aggregate_id {
                return Err(EventStoreError::InvalidAppend(format!(
                    "batch contains multiple aggregate_ids (index {idx})"
                )));
            }
            if e.aggregate_type != aggregate_type {
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "batch contains multiple aggregate_types (index {idx})"
                )));
            }
        }

        let mut streams = self.streams.write().map_err(poisoned)?;

        let stream = streams.entry(aggregate_id).or_default();
        let current = Self::current_version(stream);

        if let ExpectedVersion::Exact(expected) = expected_version {
            if expected != current {
                return Err(EventStoreError::Concurrency {
                    expected,
                    actual: current,
                });
            }
        }

        // Enforce aggregate type stability across the stream.
        if let Some(existing) = stream.first() {
            if existing.aggregate_type != aggregate_type {
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "stream aggregate_type is '{}', attempted append with '{}'",
                    existing.aggregate_type, aggregate_type
                )));
            }
        }

        // Assign sequence numbers and append (append-only).
        let mut next = current + 1;
        let mut committed = Vec::with_capacity(events.len());
        for e in events {
            let stored = StoredEvent {
                event_id: e.event_id,
                aggregate_id: e.aggregate_id,
                aggregate_type: e.aggregate_type,
                sequence_number: next,
                event_type: e.event_type,
                event_version: e.event_version,
                occurred_at: e.occurred_at,
                correlation_id: e.correlation_id,
                causation_id: e.causation_id,
                payload: e.payload,
            };
            next += 1;
            stream.push(stored.clone());
            committed.push(stored);
        }

        self.by_type
            .write()
            .map_err(poisoned)?
            .entry(aggregate_type)
            .or_default()
            .insert(aggregate_id);

        Ok(committed)
    }

    fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError> {
        let streams = self.streams.read().map_err(poisoned)?;
        Ok(streams.get(&aggregate_id).cloned().unwrap_or_default())
    }

    fn load_stream_from(
        &self,
        aggregate_id: AggregateId,
        after_sequence: u64,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let streams = self.streams.read().map_err(poisoned)?;
        Ok(streams
            .get(&aggregate_id)
            .map(|stream| {
                stream
                    .iter()
                    .filter(|e| e.sequence_number > after_sequence)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn list_aggregate_ids(
        &self,
        aggregate_type: &str,
    ) -> Result<Vec<AggregateId>, EventStoreError> {
        let by_type = self.by_type.read().map_err(poisoned)?;
        Ok(by_type
            .get(aggregate_type)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default())
    }

    fn count(&self, aggregate_id: AggregateId) -> Result<u64, EventStoreError> {
        let streams = self.streams.read().map_err(poisoned)?;
        Ok(streams.get(&aggregate_id).map(|s| s.len() as u64).unwrap_or(0))
    }

    fn exists(&self, aggregate_id: AggregateId) -> Result<bool, EventStoreError> {
        Ok(self.count(aggregate_id)? > 0)
    }
}
