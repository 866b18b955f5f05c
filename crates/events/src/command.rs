use voltfleet_core::AggregateId;

/// A command targets a specific aggregate.
///
/// Commands represent **intent** - a request to perform an action on an
/// aggregate. They are **transient** (not persisted) and are transformed into
/// events (which are persisted). A command is rejected if invalid; events
/// represent accepted changes.
///
/// `target_aggregate_id()` lets infrastructure route the command to the right
/// stream without inspecting the concrete command type. Each command operates
/// on exactly one aggregate (the transaction boundary).
///
/// Commands must be `Clone + Send + Sync + 'static` so they can be retried,
/// logged and moved across threads.
pub trait Command: Clone + core::fmt::Debug + Send + Sync + 'static {
    fn target_aggregate_id(&self) -> AggregateId;
}
