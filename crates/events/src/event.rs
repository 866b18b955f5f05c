use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

/// A domain-agnostic event.
///
/// Events are:
/// - **immutable** (treat them as facts)
/// - **versioned** (schema evolution)
/// - designed to be **append-only**
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name/type identifier (e.g. "battery.telemetry_recorded").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// When the event occurred (business time).
    fn occurred_at(&self) -> DateTime<Utc>;

    /// Serialize the variant payload for persistence.
    ///
    /// The payload carries the variant's fields only; the type identifier is
    /// stored beside it in the envelope. That split is what lets decoding skip
    /// types it does not recognize.
    fn payload(&self) -> serde_json::Result<JsonValue>;
}

/// Decoding of persisted events back into a typed event enum.
///
/// Returns `Ok(None)` for an `event_type` this build does not know, so that
/// replay can skip events written by newer software instead of failing. A
/// known type with a payload that no longer deserializes is an error: that is
/// corruption, not evolution.
pub trait DecodeEvent: Sized {
    fn decode(event_type: &str, payload: &JsonValue) -> serde_json::Result<Option<Self>>;
}
