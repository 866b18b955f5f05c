//! Event-sourced execution runtime.
//!
//! [`EventSourced`] wraps a pure [`Aggregate`] and owns everything that is not
//! decision logic: version tracking, the uncommitted-event buffer, and replay
//! from history. Aggregates stay free of persistence bookkeeping.

use crate::aggregate::Aggregate;

/// Runtime wrapper around an aggregate: current state plus the events raised
/// against it that have not yet been persisted.
///
/// Lifecycle:
/// 1. Rehydrate with [`load_from_history`](Self::load_from_history) (or start
///    from an empty state for a new stream).
/// 2. [`execute`](Self::execute) commands; produced events are applied to the
///    state and buffered.
/// 3. Persist [`uncommitted`](Self::uncommitted), then
///    [`mark_committed`](Self::mark_committed).
///
/// If persistence fails, the buffer is untouched and the append can be retried
/// without re-running the command.
#[derive(Debug, Clone)]
pub struct EventSourced<A: Aggregate> {
    state: A,
    version: u64,
    base_version: u64,
    uncommitted: Vec<A::Event>,
    history: Vec<A::Event>,
}

impl<A: Aggregate> EventSourced<A> {
    /// Wrap a freshly constructed (empty) aggregate at version 0.
    pub fn new(state: A) -> Self {
        Self {
            state,
            version: 0,
            base_version: 0,
            uncommitted: Vec::new(),
            history: Vec::new(),
        }
    }

    /// Read-only view of the current state.
    pub fn state(&self) -> &A {
        &self.state
    }

    /// Number of events applied to the state so far (persisted or not).
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Version the underlying stream was at when this runtime was loaded.
    ///
    /// Used as the optimistic-concurrency expectation when appending.
    pub fn base_version(&self) -> u64 {
        self.base_version
    }

    /// Events raised since the last commit, oldest first.
    ///
    /// Non-destructive: inspecting the buffer does not drain it.
    pub fn uncommitted(&self) -> &[A::Event] {
        &self.uncommitted
    }

    pub fn has_uncommitted(&self) -> bool {
        !self.uncommitted.is_empty()
    }

    /// Events this runtime was rehydrated from, oldest first.
    ///
    /// Populated only by [`load_from_history`](Self::load_from_history); live
    /// commands never touch it.
    pub fn history(&self) -> &[A::Event] {
        &self.history
    }

    /// Apply an event to the state and buffer it for persistence.
    pub fn raise(&mut self, event: A::Event) {
        self.state.apply(&event);
        self.version += 1;
        self.uncommitted.push(event);
    }

    /// Run a command through the aggregate's decision logic and raise every
    /// produced event.
    ///
    /// A rejected command leaves state, version and buffer untouched.
    pub fn execute(&mut self, command: &A::Command) -> Result<(), A::Error> {
        let events = self.state.handle(command)?;
        for event in events {
            self.raise(event);
        }
        Ok(())
    }

    /// Drop the buffer and advance the base version after a successful append.
    pub fn mark_committed(&mut self) {
        self.uncommitted.clear();
        self.base_version = self.version;
    }

    /// Rebuild state by replaying persisted events in order.
    ///
    /// Replay only evolves state; nothing is buffered. Must not be interleaved
    /// with [`raise`](Self::raise): rehydration happens before new commands.
    pub fn load_from_history<I>(&mut self, events: I)
    where
        I: IntoIterator<Item = A::Event>,
    {
        debug_assert!(
            self.uncommitted.is_empty(),
            "history replay with a non-empty uncommitted buffer"
        );
        for event in events {
            self.state.apply(&event);
            self.version += 1;
            self.history.push(event);
        }
        self.base_version = self.version;
    }

    /// Account for persisted events that were skipped during decoding.
    ///
    /// Skipped events still occupy sequence numbers in the stream, so the
    /// version must cover them for the concurrency check to line up.
    pub fn fast_forward(&mut self, skipped: u64) {
        debug_assert!(
            self.uncommitted.is_empty(),
            "fast-forward with a non-empty uncommitted buffer"
        );
        self.version += skipped;
        self.base_version = self.version;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::AggregateRoot;
    use crate::error::DomainError;
    use crate::id::AggregateId;
    use proptest::prelude::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Meter {
        id: AggregateId,
        total: i64,
    }

    impl Meter {
        fn empty(id: AggregateId) -> Self {
            Self { id, total: 0 }
        }
    }

    #[derive(Debug, Clone)]
    enum MeterCommand {
        Add(i64),
        Reject,
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Added(i64);

    impl AggregateRoot for Meter {
        type Id = AggregateId;

        fn id(&self) -> &Self::Id {
            &self.id
        }
    }

    impl Aggregate for Meter {
        type Command = MeterCommand;
        type Event = Added;
        type Error = DomainError;

        fn apply(&mut self, event: &Self::Event) {
            self.total += event.0;
        }

        fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
            match command {
                MeterCommand::Add(n) => Ok(vec![Added(*n)]),
                MeterCommand::Reject => Err(DomainError::invalid_operation("rejected")),
            }
        }
    }

    fn runtime() -> EventSourced<Meter> {
        EventSourced::new(Meter::empty(AggregateId::new()))
    }

    #[test]
    fn raise_applies_and_buffers() {
        let mut rt = runtime();
        rt.raise(Added(5));
        rt.raise(Added(7));

        assert_eq!(rt.state().total, 12);
        assert_eq!(rt.version(), 2);
        assert_eq!(rt.base_version(), 0);
        assert_eq!(rt.uncommitted(), &[Added(5), Added(7)]);
    }

    #[test]
    fn peeking_the_buffer_does_not_drain_it() {
        let mut rt = runtime();
        rt.raise(Added(1));

        assert_eq!(rt.uncommitted().len(), 1);
        assert_eq!(rt.uncommitted().len(), 1);
        assert!(rt.has_uncommitted());
    }

    #[test]
    fn mark_committed_clears_buffer_and_advances_base() {
        let mut rt = runtime();
        rt.raise(Added(3));
        rt.mark_committed();

        assert!(!rt.has_uncommitted());
        assert_eq!(rt.base_version(), 1);
        assert_eq!(rt.version(), 1);
        // State survives the commit.
        assert_eq!(rt.state().total, 3);
    }

    #[test]
    fn rejected_command_leaves_runtime_untouched() {
        let mut rt = runtime();
        rt.raise(Added(2));
        let before = rt.state().clone();

        let err = rt.execute(&MeterCommand::Reject).unwrap_err();
        assert!(matches!(err, DomainError::InvalidOperation(_)));
        assert_eq!(rt.state(), &before);
        assert_eq!(rt.version(), 1);
        assert_eq!(rt.uncommitted().len(), 1);
    }

    #[test]
    fn load_from_history_buffers_nothing() {
        let mut rt = runtime();
        rt.load_from_history(vec![Added(1), Added(2), Added(3)]);

        assert_eq!(rt.state().total, 6);
        assert_eq!(rt.version(), 3);
        assert_eq!(rt.base_version(), 3);
        assert!(!rt.has_uncommitted());
        assert_eq!(rt.history(), &[Added(1), Added(2), Added(3)]);
    }

    #[test]
    fn fast_forward_covers_skipped_sequence_numbers() {
        let mut rt = runtime();
        rt.load_from_history(vec![Added(1)]);
        rt.fast_forward(2);

        assert_eq!(rt.version(), 3);
        assert_eq!(rt.base_version(), 3);
        assert_eq!(rt.state().total, 1);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        /// Replaying the same history always yields the same state and version.
        #[test]
        fn replay_is_deterministic(deltas in prop::collection::vec(-1000i64..1000, 0..64)) {
            let id = AggregateId::new();
            let history: Vec<Added> = deltas.iter().copied().map(Added).collect();

            let mut a = EventSourced::new(Meter::empty(id));
            a.load_from_history(history.clone());
            let mut b = EventSourced::new(Meter::empty(id));
            b.load_from_history(history);

            prop_assert_eq!(a.state(), b.state());
            prop_assert_eq!(a.version(), b.version());
            prop_assert_eq!(a.version(), deltas.len() as u64);
        }

        /// One full replay is equivalent to the same history split into two
        /// sequential batch loads.
        #[test]
        fn split_replay_is_equivalent(
            deltas in prop::collection::vec(-1000i64..1000, 0..64),
            split in 0usize..64,
        ) {
            let id = AggregateId::new();
            let history: Vec<Added> = deltas.iter().copied().map(Added).collect();
            let mid = split % (history.len() + 1);

            let mut whole = EventSourced::new(Meter::empty(id));
            whole.load_from_history(history.clone());

            let mut batched = EventSourced::new(Meter::empty(id));
            batched.load_from_history(history[..mid].to_vec());
            batched.load_from_history(history[mid..].to_vec());

            prop_assert_eq!(whole.state(), batched.state());
            prop_assert_eq!(whole.version(), batched.version());
            prop_assert_eq!(whole.history(), batched.history());
        }

        /// Raising events then replaying them from scratch reaches the same state.
        #[test]
        fn replay_matches_live_application(deltas in prop::collection::vec(-1000i64..1000, 0..64)) {
            let id = AggregateId::new();

            let mut live = EventSourced::new(Meter::empty(id));
            for d in &deltas {
                live.execute(&MeterCommand::Add(*d)).unwrap();
            }
            let history: Vec<Added> = live.uncommitted().to_vec();
            live.mark_committed();

            let mut replayed = EventSourced::new(Meter::empty(id));
            replayed.load_from_history(history);

            prop_assert_eq!(live.state(), replayed.state());
            prop_assert_eq!(live.base_version(), replayed.base_version());
        }
    }
}
