//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are immutable domain objects defined entirely by their
/// attribute values. Two value objects with the same values are equal; to
/// "modify" one, construct a new one. A telemetry reading is a value object;
/// a battery pack (which keeps its identity across readings) is an entity.
///
/// The trait requires:
/// - **Clone**: values are copied, not referenced
/// - **PartialEq**: compared by attribute values
/// - **Debug**: loggable in traces and test failures
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
