//! `voltfleet-battery` — event-sourced battery pack aggregate.
//!
//! Models the lifecycle of one EV battery pack: registration, telemetry
//! ingestion with safety monitoring, charging session detection, and the
//! irreversible decommissioning that ends the pack's service life.

pub mod battery;
pub mod telemetry;

pub use battery::{
    BATTERY_AGGREGATE_TYPE, Battery, BatteryCommand, BatteryEvent, BatteryId, ChargingSession,
    HealthStatus, ReplacementId, TemperatureExtreme,
};
pub use telemetry::{BatterySpecification, TelemetryReading, thresholds};
