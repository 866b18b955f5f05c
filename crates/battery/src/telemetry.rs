//! Battery telemetry value objects and safety thresholds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use voltfleet_core::{DomainError, DomainResult, ValueObject};

/// Safety and lifecycle thresholds for pack monitoring.
///
/// Charge levels are percent of usable capacity, temperatures are degrees
/// Celsius, cell voltages are volts.
pub mod thresholds {
    /// Below this charge the pack risks deep discharge damage.
    pub const CRITICAL_LOW_CHARGE: f64 = 10.0;
    /// Below this charge the pack should be scheduled for charging.
    pub const LOW_CHARGE: f64 = 20.0;
    /// At or above this charge a charging session counts as completed.
    pub const FULL_CHARGE: f64 = 95.0;

    /// Hottest cell temperature the pack may safely reach.
    pub const CRITICAL_TEMP_HIGH_C: f64 = 60.0;
    /// Coldest cell temperature the pack may safely reach.
    pub const CRITICAL_TEMP_LOW_C: f64 = -20.0;
    /// Margin inside the temperature limits that degrades health to Warning.
    pub const TEMP_WARNING_MARGIN_C: f64 = 5.0;

    /// Cell voltage spread indicating a failing cell group.
    pub const CRITICAL_CELL_IMBALANCE_V: f64 = 0.05;
    /// Cell voltage spread worth flagging before it becomes critical.
    pub const WARNING_CELL_IMBALANCE_V: f64 = 0.03;
}

/// Immutable manufacturing data for a pack, fixed at registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatterySpecification {
    /// Cell chemistry, e.g. "NMC811" or "LFP".
    pub chemistry: String,
    pub capacity_kwh: f64,
    pub nominal_voltage: f64,
    pub cell_count: u32,
    pub manufacturer: String,
}

impl BatterySpecification {
    pub fn validate(&self) -> DomainResult<()> {
        if self.chemistry.trim().is_empty() {
            return Err(DomainError::validation("chemistry must not be empty"));
        }
        if self.manufacturer.trim().is_empty() {
            return Err(DomainError::validation("manufacturer must not be empty"));
        }
        if self.cell_count == 0 {
            return Err(DomainError::validation("cell_count must be positive"));
        }
        if !self.capacity_kwh.is_finite() || self.capacity_kwh <= 0.0 {
            return Err(DomainError::validation("capacity_kwh must be positive"));
        }
        if !self.nominal_voltage.is_finite() || self.nominal_voltage <= 0.0 {
            return Err(DomainError::validation("nominal_voltage must be positive"));
        }
        Ok(())
    }
}

impl ValueObject for BatterySpecification {}

/// One telemetry sample from the battery management system.
///
/// Sign convention for `pack_current`: negative amperes flow **into** the pack
/// (charging), positive amperes flow out of it (discharging).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryReading {
    /// State of charge, percent of usable capacity (0..=100).
    pub charge_level: f64,
    pub pack_voltage: f64,
    pub pack_current: f64,
    /// Coldest cell group temperature in this sample.
    pub temp_min_c: f64,
    /// Mean temperature across cell groups.
    pub temp_avg_c: f64,
    /// Hottest cell group temperature in this sample.
    pub temp_max_c: f64,
    /// Per-cell-group voltages, in wiring order. Length must match the
    /// specification's `cell_count`.
    pub cell_voltages: Vec<f64>,
    pub recorded_at: DateTime<Utc>,
}

impl TelemetryReading {
    pub fn validate(&self) -> DomainResult<()> {
        if !self.charge_level.is_finite() || !(0.0..=100.0).contains(&self.charge_level) {
            return Err(DomainError::validation(
                "charge_level must be between 0 and 100",
            ));
        }
        if !self.pack_voltage.is_finite() || self.pack_voltage < 0.0 {
            return Err(DomainError::validation("pack_voltage must be non-negative"));
        }
        if !self.pack_current.is_finite() {
            return Err(DomainError::validation("pack_current must be finite"));
        }
        if !self.temp_min_c.is_finite() || !self.temp_avg_c.is_finite() || !self.temp_max_c.is_finite()
        {
            return Err(DomainError::validation("temperatures must be finite"));
        }
        if self.temp_min_c > self.temp_max_c {
            return Err(DomainError::validation(
                "temp_min_c must not exceed temp_max_c",
            ));
        }
        if self.temp_avg_c < self.temp_min_c || self.temp_avg_c > self.temp_max_c {
            return Err(DomainError::validation(
                "temp_avg_c must lie between temp_min_c and temp_max_c",
            ));
        }
        if self.cell_voltages.is_empty() {
            return Err(DomainError::validation("cell_voltages must not be empty"));
        }
        if self.cell_voltages.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(DomainError::validation(
                "cell voltages must be finite and non-negative",
            ));
        }
        Ok(())
    }

    /// Voltage spread between the strongest and weakest cell group.
    pub fn cell_imbalance(&self) -> f64 {
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for v in &self.cell_voltages {
            min = min.min(*v);
            max = max.max(*v);
        }
        if min.is_finite() && max.is_finite() {
            max - min
        } else {
            0.0
        }
    }

    /// True when current is flowing into the pack.
    pub fn is_charging_draw(&self) -> bool {
        self.pack_current < 0.0
    }
}

impl ValueObject for TelemetryReading {}
