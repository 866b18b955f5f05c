use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use voltfleet_core::{Aggregate, AggregateId, AggregateRoot, DomainError};
use voltfleet_events::{Command, DecodeEvent, Event};

use crate::telemetry::{BatterySpecification, TelemetryReading, thresholds};

/// Stream type identifier for battery aggregates.
pub const BATTERY_AGGREGATE_TYPE: &str = "battery";

/// Battery pack identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatteryId(pub AggregateId);

impl BatteryId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for BatteryId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Identifier correlating one physical pack replacement across both the old
/// and the new battery's streams.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReplacementId(Uuid);

impl ReplacementId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ReplacementId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for ReplacementId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Derived health classification, computed from replayed state.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    /// Below the low-charge threshold but otherwise sound.
    LowCharge,
    Warning,
    Critical,
    Decommissioned,
    /// No measurement recorded yet.
    Unknown,
}

/// Which temperature limit a reading breached.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureExtreme {
    High,
    Low,
}

/// An open charging session, detected from current-draw sign changes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargingSession {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
}

/// Aggregate root: one physical battery pack.
#[derive(Debug, Clone, PartialEq)]
pub struct Battery {
    id: BatteryId,
    specification: Option<BatterySpecification>,
    charge_level: Option<f64>,
    last_reading: Option<TelemetryReading>,
    charging_session: Option<ChargingSession>,
    pending_replacement: Option<ReplacementId>,
    decommissioned: bool,
    registered: bool,
}

impl Battery {
    /// Create an empty, not-yet-registered aggregate instance for rehydration.
    pub fn empty(id: BatteryId) -> Self {
        Self {
            id,
            specification: None,
            charge_level: None,
            last_reading: None,
            charging_session: None,
            pending_replacement: None,
            decommissioned: false,
            registered: false,
        }
    }

    pub fn id_typed(&self) -> BatteryId {
        self.id
    }

    pub fn specification(&self) -> Option<&BatterySpecification> {
        self.specification.as_ref()
    }

    pub fn charge_level(&self) -> Option<f64> {
        self.charge_level
    }

    pub fn last_reading(&self) -> Option<&TelemetryReading> {
        self.last_reading.as_ref()
    }

    pub fn charging_session(&self) -> Option<&ChargingSession> {
        self.charging_session.as_ref()
    }

    pub fn pending_replacement(&self) -> Option<ReplacementId> {
        self.pending_replacement
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    pub fn is_decommissioned(&self) -> bool {
        self.decommissioned
    }

    /// Classify current health. Critical conditions dominate warnings.
    pub fn health(&self) -> HealthStatus {
        if self.decommissioned {
            return HealthStatus::Decommissioned;
        }
        let Some(charge) = self.charge_level else {
            return HealthStatus::Unknown;
        };

        if charge < thresholds::CRITICAL_LOW_CHARGE
            || self.temperature_breach().is_some()
            || self.imbalance_exceeds(thresholds::CRITICAL_CELL_IMBALANCE_V)
        {
            return HealthStatus::Critical;
        }

        if charge < thresholds::LOW_CHARGE {
            return HealthStatus::LowCharge;
        }
        if self.temperature_near_limit() || self.imbalance_exceeds(thresholds::WARNING_CELL_IMBALANCE_V)
        {
            return HealthStatus::Warning;
        }

        HealthStatus::Healthy
    }

    /// Whether a charger should be allowed to open a session against this pack.
    pub fn can_accept_charge(&self) -> bool {
        if self.decommissioned || !self.registered {
            return false;
        }
        if self.temperature_breach().is_some() {
            return false;
        }
        match self.charge_level {
            Some(charge) => charge < thresholds::FULL_CHARGE,
            None => false,
        }
    }

    pub fn requires_immediate_attention(&self) -> bool {
        matches!(self.health(), HealthStatus::Critical)
    }

    fn temperature_breach(&self) -> Option<TemperatureExtreme> {
        let reading = self.last_reading.as_ref()?;
        if reading.temp_max_c > thresholds::CRITICAL_TEMP_HIGH_C {
            Some(TemperatureExtreme::High)
        } else if reading.temp_min_c < thresholds::CRITICAL_TEMP_LOW_C {
            Some(TemperatureExtreme::Low)
        } else {
            None
        }
    }

    fn temperature_near_limit(&self) -> bool {
        match self.last_reading.as_ref() {
            Some(r) => {
                r.temp_max_c > thresholds::CRITICAL_TEMP_HIGH_C - thresholds::TEMP_WARNING_MARGIN_C
                    || r.temp_min_c
                        < thresholds::CRITICAL_TEMP_LOW_C + thresholds::TEMP_WARNING_MARGIN_C
            }
            None => false,
        }
    }

    fn imbalance_exceeds(&self, threshold: f64) -> bool {
        self.last_reading
            .as_ref()
            .is_some_and(|r| r.cell_imbalance() > threshold)
    }
}

impl AggregateRoot for Battery {
    type Id = BatteryId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Command: RegisterBattery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterBattery {
    pub battery_id: BatteryId,
    pub specification: BatterySpecification,
    /// State of charge at installation, percent.
    pub initial_charge_level: f64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordTelemetry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordTelemetry {
    pub battery_id: BatteryId,
    pub reading: TelemetryReading,
}

/// Command: InitiateReplacement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitiateReplacement {
    pub battery_id: BatteryId,
    pub replacement_id: ReplacementId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Decommission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decommission {
    pub battery_id: BatteryId,
    pub reason: String,
    /// Present when the decommissioning is part of a replacement.
    pub replacement_id: Option<ReplacementId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BatteryCommand {
    RegisterBattery(RegisterBattery),
    RecordTelemetry(RecordTelemetry),
    InitiateReplacement(InitiateReplacement),
    Decommission(Decommission),
}

impl BatteryCommand {
    pub fn battery_id(&self) -> BatteryId {
        match self {
            BatteryCommand::RegisterBattery(c) => c.battery_id,
            BatteryCommand::RecordTelemetry(c) => c.battery_id,
            BatteryCommand::InitiateReplacement(c) => c.battery_id,
            BatteryCommand::Decommission(c) => c.battery_id,
        }
    }
}

impl Command for BatteryCommand {
    fn target_aggregate_id(&self) -> AggregateId {
        self.battery_id().0
    }
}

/// Event: BatteryRegistered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatteryRegistered {
    pub battery_id: BatteryId,
    pub specification: BatterySpecification,
    pub initial_charge_level: f64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TelemetryRecorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecorded {
    pub battery_id: BatteryId,
    pub reading: TelemetryReading,
}

/// Event: DepletionAlertRaised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepletionAlertRaised {
    pub battery_id: BatteryId,
    pub charge_level: f64,
    pub threshold: f64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TemperatureAlertRaised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemperatureAlertRaised {
    pub battery_id: BatteryId,
    pub extreme: TemperatureExtreme,
    pub observed_c: f64,
    pub limit_c: f64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CellImbalanceDetected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellImbalanceDetected {
    pub battery_id: BatteryId,
    pub spread_v: f64,
    pub threshold_v: f64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ChargingStarted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargingStarted {
    pub battery_id: BatteryId,
    pub session_id: Uuid,
    pub charge_level: f64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ChargingCompleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargingCompleted {
    pub battery_id: BatteryId,
    pub session_id: Uuid,
    pub duration_secs: u64,
    pub charge_level: f64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ChargingInterrupted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargingInterrupted {
    pub battery_id: BatteryId,
    pub session_id: Uuid,
    pub duration_secs: u64,
    pub charge_level: f64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReplacementInitiated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplacementInitiated {
    pub battery_id: BatteryId,
    pub replacement_id: ReplacementId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: BatteryDecommissioned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatteryDecommissioned {
    pub battery_id: BatteryId,
    pub reason: String,
    pub replacement_id: Option<ReplacementId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BatteryEvent {
    BatteryRegistered(BatteryRegistered),
    TelemetryRecorded(TelemetryRecorded),
    DepletionAlertRaised(DepletionAlertRaised),
    TemperatureAlertRaised(TemperatureAlertRaised),
    CellImbalanceDetected(CellImbalanceDetected),
    ChargingStarted(ChargingStarted),
    ChargingCompleted(ChargingCompleted),
    ChargingInterrupted(ChargingInterrupted),
    ReplacementInitiated(ReplacementInitiated),
    BatteryDecommissioned(BatteryDecommissioned),
}

impl Event for BatteryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            BatteryEvent::BatteryRegistered(_) => "battery.registered",
            BatteryEvent::TelemetryRecorded(_) => "battery.telemetry_recorded",
            BatteryEvent::DepletionAlertRaised(_) => "battery.depletion_alert_raised",
            BatteryEvent::TemperatureAlertRaised(_) => "battery.temperature_alert_raised",
            BatteryEvent::CellImbalanceDetected(_) => "battery.cell_imbalance_detected",
            BatteryEvent::ChargingStarted(_) => "battery.charging_started",
            BatteryEvent::ChargingCompleted(_) => "battery.charging_completed",
            BatteryEvent::ChargingInterrupted(_) => "battery.charging_interrupted",
            BatteryEvent::ReplacementInitiated(_) => "battery.replacement_initiated",
            BatteryEvent::BatteryDecommissioned(_) => "battery.decommissioned",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            BatteryEvent::BatteryRegistered(e) => e.occurred_at,
            BatteryEvent::TelemetryRecorded(e) => e.reading.recorded_at,
            BatteryEvent::DepletionAlertRaised(e) => e.occurred_at,
            BatteryEvent::TemperatureAlertRaised(e) => e.occurred_at,
            BatteryEvent::CellImbalanceDetected(e) => e.occurred_at,
            BatteryEvent::ChargingStarted(e) => e.occurred_at,
            BatteryEvent::ChargingCompleted(e) => e.occurred_at,
            BatteryEvent::ChargingInterrupted(e) => e.occurred_at,
            BatteryEvent::ReplacementInitiated(e) => e.occurred_at,
            BatteryEvent::BatteryDecommissioned(e) => e.occurred_at,
        }
    }

    fn payload(&self) -> serde_json::Result<JsonValue> {
        match self {
            BatteryEvent::BatteryRegistered(e) => serde_json::to_value(e),
            BatteryEvent::TelemetryRecorded(e) => serde_json::to_value(e),
            BatteryEvent::DepletionAlertRaised(e) => serde_json::to_value(e),
            BatteryEvent::TemperatureAlertRaised(e) => serde_json::to_value(e),
            BatteryEvent::CellImbalanceDetected(e) => serde_json::to_value(e),
            BatteryEvent::ChargingStarted(e) => serde_json::to_value(e),
            BatteryEvent::ChargingCompleted(e) => serde_json::to_value(e),
            BatteryEvent::ChargingInterrupted(e) => serde_json::to_value(e),
            BatteryEvent::ReplacementInitiated(e) => serde_json::to_value(e),
            BatteryEvent::BatteryDecommissioned(e) => serde_json::to_value(e),
        }
    }
}

impl DecodeEvent for BatteryEvent {
    fn decode(event_type: &str, payload: &JsonValue) -> serde_json::Result<Option<Self>> {
        let event = match event_type {
            "battery.registered" => {
                BatteryEvent::BatteryRegistered(serde_json::from_value(payload.clone())?)
            }
            "battery.telemetry_recorded" => {
                BatteryEvent::TelemetryRecorded(serde_json::from_value(payload.clone())?)
            }
            "battery.depletion_alert_raised" => {
                BatteryEvent::DepletionAlertRaised(serde_json::from_value(payload.clone())?)
            }
            "battery.temperature_alert_raised" => {
                BatteryEvent::TemperatureAlertRaised(serde_json::from_value(payload.clone())?)
            }
            "battery.cell_imbalance_detected" => {
                BatteryEvent::CellImbalanceDetected(serde_json::from_value(payload.clone())?)
            }
            "battery.charging_started" => {
                BatteryEvent::ChargingStarted(serde_json::from_value(payload.clone())?)
            }
            "battery.charging_completed" => {
                BatteryEvent::ChargingCompleted(serde_json::from_value(payload.clone())?)
            }
            "battery.charging_interrupted" => {
                BatteryEvent::ChargingInterrupted(serde_json::from_value(payload.clone())?)
            }
            "battery.replacement_initiated" => {
                BatteryEvent::ReplacementInitiated(serde_json::from_value(payload.clone())?)
            }
            "battery.decommissioned" => {
                BatteryEvent::BatteryDecommissioned(serde_json::from_value(payload.clone())?)
            }
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

impl Aggregate for Battery {
    type Command = BatteryCommand;
    type Event = BatteryEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            BatteryEvent::BatteryRegistered(e) => {
                self.id = e.battery_id;
                self.specification = Some(e.specification.clone());
                self.charge_level = Some(e.initial_charge_level);
                self.registered = true;
            }
            BatteryEvent::TelemetryRecorded(e) => {
                self.charge_level = Some(e.reading.charge_level);
                self.last_reading = Some(e.reading.clone());
            }
            BatteryEvent::ChargingStarted(e) => {
                self.charging_session = Some(ChargingSession {
                    session_id: e.session_id,
                    started_at: e.occurred_at,
                });
            }
            BatteryEvent::ChargingCompleted(_) | BatteryEvent::ChargingInterrupted(_) => {
                self.charging_session = None;
            }
            BatteryEvent::ReplacementInitiated(e) => {
                self.pending_replacement = Some(e.replacement_id);
            }
            BatteryEvent::BatteryDecommissioned(_) => {
                self.decommissioned = true;
                self.charging_session = None;
            }
            // Alerts are derived facts; they carry no state beyond the reading
            // that produced them.
            BatteryEvent::DepletionAlertRaised(_)
            | BatteryEvent::TemperatureAlertRaised(_)
            | BatteryEvent::CellImbalanceDetected(_) => {}
        }
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            BatteryCommand::RegisterBattery(cmd) => self.handle_register(cmd),
            BatteryCommand::RecordTelemetry(cmd) => self.handle_record_telemetry(cmd),
            BatteryCommand::InitiateReplacement(cmd) => self.handle_initiate_replacement(cmd),
            BatteryCommand::Decommission(cmd) => self.handle_decommission(cmd),
        }
    }
}

impl Battery {
    fn ensure_battery_id(&self, battery_id: BatteryId) -> Result<(), DomainError> {
        if self.id != battery_id {
            return Err(DomainError::invalid_operation("battery_id mismatch"));
        }
        Ok(())
    }

    fn ensure_in_service(&self) -> Result<(), DomainError> {
        if !self.registered {
            return Err(DomainError::not_found());
        }
        if self.decommissioned {
            return Err(DomainError::invalid_operation(
                "battery has been decommissioned",
            ));
        }
        Ok(())
    }

    fn handle_register(&self, cmd: &RegisterBattery) -> Result<Vec<BatteryEvent>, DomainError> {
        if self.registered {
            return Err(DomainError::conflict("battery already registered"));
        }
        cmd.specification.validate()?;
        if !cmd.initial_charge_level.is_finite()
            || !(0.0..=100.0).contains(&cmd.initial_charge_level)
        {
            return Err(DomainError::validation(
                "initial_charge_level must be between 0 and 100",
            ));
        }

        Ok(vec![BatteryEvent::BatteryRegistered(BatteryRegistered {
            battery_id: cmd.battery_id,
            specification: cmd.specification.clone(),
            initial_charge_level: cmd.initial_charge_level,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_record_telemetry(
        &self,
        cmd: &RecordTelemetry,
    ) -> Result<Vec<BatteryEvent>, DomainError> {
        self.ensure_in_service()?;
        self.ensure_battery_id(cmd.battery_id)?;
        cmd.reading.validate()?;

        let spec = self
            .specification
            .as_ref()
            .ok_or_else(DomainError::not_found)?;
        if cmd.reading.cell_voltages.len() != spec.cell_count as usize {
            return Err(DomainError::validation(format!(
                "expected {} cell voltages, got {}",
                spec.cell_count,
                cmd.reading.cell_voltages.len()
            )));
        }

        let reading = &cmd.reading;
        let at = reading.recorded_at;
        let mut events = vec![BatteryEvent::TelemetryRecorded(TelemetryRecorded {
            battery_id: cmd.battery_id,
            reading: reading.clone(),
        })];

        if reading.charge_level < thresholds::CRITICAL_LOW_CHARGE {
            events.push(BatteryEvent::DepletionAlertRaised(DepletionAlertRaised {
                battery_id: cmd.battery_id,
                charge_level: reading.charge_level,
                threshold: thresholds::CRITICAL_LOW_CHARGE,
                occurred_at: at,
            }));
        }

        if reading.temp_max_c > thresholds::CRITICAL_TEMP_HIGH_C {
            events.push(BatteryEvent::TemperatureAlertRaised(
                TemperatureAlertRaised {
                    battery_id: cmd.battery_id,
                    extreme: TemperatureExtreme::High,
                    observed_c: reading.temp_max_c,
                    limit_c: thresholds::CRITICAL_TEMP_HIGH_C,
                    occurred_at: at,
                },
            ));
        }
        if reading.temp_min_c < thresholds::CRITICAL_TEMP_LOW_C {
            events.push(BatteryEvent::TemperatureAlertRaised(
                TemperatureAlertRaised {
                    battery_id: cmd.battery_id,
                    extreme: TemperatureExtreme::Low,
                    observed_c: reading.temp_min_c,
                    limit_c: thresholds::CRITICAL_TEMP_LOW_C,
                    occurred_at: at,
                },
            ));
        }

        let spread = reading.cell_imbalance();
        if spread > thresholds::CRITICAL_CELL_IMBALANCE_V {
            events.push(BatteryEvent::CellImbalanceDetected(CellImbalanceDetected {
                battery_id: cmd.battery_id,
                spread_v: spread,
                threshold_v: thresholds::CRITICAL_CELL_IMBALANCE_V,
                occurred_at: at,
            }));
        }

        events.extend(self.charging_transition(cmd.battery_id, reading));

        Ok(events)
    }

    /// Detect charging-session boundaries by comparing the reading's current
    /// draw against the session state from *before* this reading.
    fn charging_transition(
        &self,
        battery_id: BatteryId,
        reading: &TelemetryReading,
    ) -> Option<BatteryEvent> {
        match (&self.charging_session, reading.is_charging_draw()) {
            (None, true) => Some(BatteryEvent::ChargingStarted(ChargingStarted {
                battery_id,
                session_id: Uuid::now_v7(),
                charge_level: reading.charge_level,
                occurred_at: reading.recorded_at,
            })),
            (Some(session), false) => {
                let duration_secs = (reading.recorded_at - session.started_at)
                    .num_seconds()
                    .max(0) as u64;
                if reading.charge_level >= thresholds::FULL_CHARGE {
                    Some(BatteryEvent::ChargingCompleted(ChargingCompleted {
                        battery_id,
                        session_id: session.session_id,
                        duration_secs,
                        charge_level: reading.charge_level,
                        occurred_at: reading.recorded_at,
                    }))
                } else {
                    Some(BatteryEvent::ChargingInterrupted(ChargingInterrupted {
                        battery_id,
                        session_id: session.session_id,
                        duration_secs,
                        charge_level: reading.charge_level,
                        occurred_at: reading.recorded_at,
                    }))
                }
            }
            _ => None,
        }
    }

    fn handle_initiate_replacement(
        &self,
        cmd: &InitiateReplacement,
    ) -> Result<Vec<BatteryEvent>, DomainError> {
        self.ensure_in_service()?;
        self.ensure_battery_id(cmd.battery_id)?;
        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("reason must not be empty"));
        }
        if self.pending_replacement.is_some() {
            return Err(DomainError::conflict("replacement already initiated"));
        }

        Ok(vec![BatteryEvent::ReplacementInitiated(
            ReplacementInitiated {
                battery_id: cmd.battery_id,
                replacement_id: cmd.replacement_id,
                reason: cmd.reason.clone(),
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_decommission(&self, cmd: &Decommission) -> Result<Vec<BatteryEvent>, DomainError> {
        self.ensure_in_service()?;
        self.ensure_battery_id(cmd.battery_id)?;
        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("reason must not be empty"));
        }

        Ok(vec![BatteryEvent::BatteryDecommissioned(
            BatteryDecommissioned {
                battery_id: cmd.battery_id,
                reason: cmd.reason.clone(),
                replacement_id: cmd.replacement_id,
                occurred_at: cmd.occurred_at,
            },
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voltfleet_core::EventSourced;

    fn test_battery_id() -> BatteryId {
        BatteryId::new(AggregateId::new())
    }

    fn test_spec(cell_count: u32) -> BatterySpecification {
        BatterySpecification {
            chemistry: "NMC811".to_string(),
            capacity_kwh: 82.0,
            nominal_voltage: 400.0,
            cell_count,
            manufacturer: "Voltaic Cells GmbH".to_string(),
        }
    }

    fn test_reading(charge: f64, current: f64, cells: usize) -> TelemetryReading {
        TelemetryReading {
            charge_level: charge,
            pack_voltage: 398.0,
            pack_current: current,
            temp_min_c: 18.0,
            temp_avg_c: 21.5,
            temp_max_c: 25.0,
            cell_voltages: vec![3.7; cells],
            recorded_at: Utc::now(),
        }
    }

    fn registered_battery(id: BatteryId, initial_charge: f64, cell_count: u32) -> Battery {
        let mut battery = Battery::empty(id);
        battery.apply(&BatteryEvent::BatteryRegistered(BatteryRegistered {
            battery_id: id,
            specification: test_spec(cell_count),
            initial_charge_level: initial_charge,
            occurred_at: Utc::now(),
        }));
        battery
    }

    fn record(battery: &Battery, id: BatteryId, reading: TelemetryReading) -> Vec<BatteryEvent> {
        battery
            .handle(&BatteryCommand::RecordTelemetry(RecordTelemetry {
                battery_id: id,
                reading,
            }))
            .unwrap()
    }

    #[test]
    fn register_emits_battery_registered() {
        let id = test_battery_id();
        let battery = Battery::empty(id);
        let events = battery
            .handle(&BatteryCommand::RegisterBattery(RegisterBattery {
                battery_id: id,
                specification: test_spec(96),
                initial_charge_level: 80.0,
                occurred_at: Utc::now(),
            }))
            .unwrap();

        assert_eq!(events.len(), 1);
        match &events[0] {
            BatteryEvent::BatteryRegistered(e) => {
                assert_eq!(e.battery_id, id);
                assert_eq!(e.initial_charge_level, 80.0);
                assert_eq!(e.specification.cell_count, 96);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn register_twice_is_a_conflict() {
        let id = test_battery_id();
        let battery = registered_battery(id, 80.0, 96);
        let err = battery
            .handle(&BatteryCommand::RegisterBattery(RegisterBattery {
                battery_id: id,
                specification: test_spec(96),
                initial_charge_level: 50.0,
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn register_rejects_invalid_initial_charge() {
        let id = test_battery_id();
        let battery = Battery::empty(id);
        let err = battery
            .handle(&BatteryCommand::RegisterBattery(RegisterBattery {
                battery_id: id,
                specification: test_spec(96),
                initial_charge_level: 120.0,
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn telemetry_before_registration_is_not_found() {
        let id = test_battery_id();
        let battery = Battery::empty(id);
        let err = battery
            .handle(&BatteryCommand::RecordTelemetry(RecordTelemetry {
                battery_id: id,
                reading: test_reading(50.0, 10.0, 96),
            }))
            .unwrap_err();
        assert_eq!(err, DomainError::NotFound);
    }

    #[test]
    fn telemetry_rejects_cell_count_mismatch() {
        let id = test_battery_id();
        let battery = registered_battery(id, 80.0, 96);
        let err = battery
            .handle(&BatteryCommand::RecordTelemetry(RecordTelemetry {
                battery_id: id,
                reading: test_reading(50.0, 10.0, 95),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn depletion_alert_below_critical_charge_only() {
        let id = test_battery_id();
        let battery = registered_battery(id, 80.0, 96);

        let events = record(&battery, id, test_reading(9.9, 5.0, 96));
        assert!(
            events
                .iter()
                .any(|e| matches!(e, BatteryEvent::DepletionAlertRaised(a) if a.threshold == thresholds::CRITICAL_LOW_CHARGE))
        );

        // Exactly at the threshold is not yet an alert.
        let events = record(&battery, id, test_reading(10.0, 5.0, 96));
        assert!(
            !events
                .iter()
                .any(|e| matches!(e, BatteryEvent::DepletionAlertRaised(_)))
        );
    }

    #[test]
    fn overheating_raises_high_temperature_alert() {
        let id = test_battery_id();
        let battery = registered_battery(id, 80.0, 96);

        let mut reading = test_reading(60.0, 5.0, 96);
        reading.temp_max_c = 61.5;
        let events = record(&battery, id, reading);

        match events
            .iter()
            .find(|e| matches!(e, BatteryEvent::TemperatureAlertRaised(_)))
        {
            Some(BatteryEvent::TemperatureAlertRaised(a)) => {
                assert_eq!(a.extreme, TemperatureExtreme::High);
                assert_eq!(a.observed_c, 61.5);
                assert_eq!(a.limit_c, thresholds::CRITICAL_TEMP_HIGH_C);
            }
            other => panic!("expected temperature alert, got {other:?}"),
        }
    }

    #[test]
    fn freezing_raises_low_temperature_alert() {
        let id = test_battery_id();
        let battery = registered_battery(id, 80.0, 96);

        let mut reading = test_reading(60.0, 5.0, 96);
        reading.temp_min_c = -25.0;
        let events = record(&battery, id, reading);

        assert!(events.iter().any(|e| matches!(
            e,
            BatteryEvent::TemperatureAlertRaised(a) if a.extreme == TemperatureExtreme::Low
        )));
    }

    #[test]
    fn large_pack_cell_imbalance_is_detected() {
        // 114-cell commercial pack with one weak cell group: spread of 0.06 V
        // against the 0.05 V critical threshold.
        let id = test_battery_id();
        let battery = registered_battery(id, 72.0, 114);

        let mut reading = test_reading(72.0, 15.0, 114);
        reading.cell_voltages = vec![3.66; 114];
        reading.cell_voltages[57] = 3.60;

        let events = record(&battery, id, reading);
        match events
            .iter()
            .find(|e| matches!(e, BatteryEvent::CellImbalanceDetected(_)))
        {
            Some(BatteryEvent::CellImbalanceDetected(e)) => {
                assert!((e.spread_v - 0.06).abs() < 1e-9);
                assert_eq!(e.threshold_v, thresholds::CRITICAL_CELL_IMBALANCE_V);
            }
            other => panic!("expected imbalance detection, got {other:?}"),
        }
    }

    #[test]
    fn imbalanced_pack_reports_critical_health() {
        let id = test_battery_id();
        let mut battery = registered_battery(id, 72.0, 114);

        let mut reading = test_reading(72.0, 15.0, 114);
        reading.cell_voltages = vec![3.66; 114];
        reading.cell_voltages[0] = 3.60;
        for event in record(&battery.clone(), id, reading) {
            battery.apply(&event);
        }

        assert_eq!(battery.health(), HealthStatus::Critical);
        assert!(battery.requires_immediate_attention());
    }

    #[test]
    fn charging_draw_opens_a_session_even_when_charge_dropped() {
        // Pack registered at 80%, first sample arrives at 50% but with current
        // flowing in: the session opens off the current sign, not the charge
        // delta.
        let id = test_battery_id();
        let battery = registered_battery(id, 80.0, 96);

        let events = record(&battery, id, test_reading(50.0, -32.0, 96));
        match events
            .iter()
            .find(|e| matches!(e, BatteryEvent::ChargingStarted(_)))
        {
            Some(BatteryEvent::ChargingStarted(e)) => assert_eq!(e.charge_level, 50.0),
            other => panic!("expected charging start, got {other:?}"),
        }
    }

    #[test]
    fn continued_charging_does_not_reopen_the_session() {
        let id = test_battery_id();
        let mut battery = registered_battery(id, 40.0, 96);
        for event in record(&battery.clone(), id, test_reading(41.0, -30.0, 96)) {
            battery.apply(&event);
        }

        let events = record(&battery, id, test_reading(55.0, -30.0, 96));
        assert!(
            !events
                .iter()
                .any(|e| matches!(e, BatteryEvent::ChargingStarted(_)))
        );
    }

    #[test]
    fn session_completes_when_full_and_interrupts_otherwise() {
        let id = test_battery_id();
        let mut battery = registered_battery(id, 40.0, 96);
        for event in record(&battery.clone(), id, test_reading(41.0, -30.0, 96)) {
            battery.apply(&event);
        }
        let session_id = battery.charging_session().unwrap().session_id;

        // Unplugged at 60%: interrupted, not completed.
        let events = record(&battery, id, test_reading(60.0, 4.0, 96));
        match events
            .iter()
            .find(|e| matches!(e, BatteryEvent::ChargingInterrupted(_)))
        {
            Some(BatteryEvent::ChargingInterrupted(e)) => {
                assert_eq!(e.session_id, session_id);
                assert_eq!(e.charge_level, 60.0);
            }
            other => panic!("expected interruption, got {other:?}"),
        }

        // Unplugged at 97%: completed.
        let events = record(&battery, id, test_reading(97.0, 0.0, 96));
        assert!(events.iter().any(|e| matches!(
            e,
            BatteryEvent::ChargingCompleted(c) if c.session_id == session_id
        )));
    }

    #[test]
    fn interruption_carries_the_elapsed_session_time() {
        let id = test_battery_id();
        let mut battery = registered_battery(id, 40.0, 96);

        let plugged_in_at = Utc::now();
        let mut start = test_reading(41.0, -30.0, 96);
        start.recorded_at = plugged_in_at;
        for event in record(&battery.clone(), id, start) {
            battery.apply(&event);
        }

        // Unplugged 35 minutes into the session, still below full charge.
        let mut stop = test_reading(58.0, 2.0, 96);
        stop.recorded_at = plugged_in_at + chrono::Duration::minutes(35);
        let events = record(&battery, id, stop);
        match events
            .iter()
            .find(|e| matches!(e, BatteryEvent::ChargingInterrupted(_)))
        {
            Some(BatteryEvent::ChargingInterrupted(e)) => {
                assert_eq!(e.duration_secs, 35 * 60);
            }
            other => panic!("expected interruption, got {other:?}"),
        }
    }

    #[test]
    fn decommission_is_irreversible() {
        let id = test_battery_id();
        let mut battery = registered_battery(id, 30.0, 96);
        for event in battery
            .handle(&BatteryCommand::Decommission(Decommission {
                battery_id: id,
                reason: "end of service life".to_string(),
                replacement_id: None,
                occurred_at: Utc::now(),
            }))
            .unwrap()
        {
            battery.apply(&event);
        }

        assert!(battery.is_decommissioned());
        assert_eq!(battery.health(), HealthStatus::Decommissioned);

        let err = battery
            .handle(&BatteryCommand::Decommission(Decommission {
                battery_id: id,
                reason: "again".to_string(),
                replacement_id: None,
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidOperation(_)));

        let err = battery
            .handle(&BatteryCommand::RecordTelemetry(RecordTelemetry {
                battery_id: id,
                reading: test_reading(30.0, 5.0, 96),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidOperation(_)));
    }

    #[test]
    fn replacement_can_only_be_initiated_once() {
        let id = test_battery_id();
        let mut battery = registered_battery(id, 30.0, 96);
        let replacement_id = ReplacementId::new();

        for event in battery
            .handle(&BatteryCommand::InitiateReplacement(InitiateReplacement {
                battery_id: id,
                replacement_id,
                reason: "capacity fade".to_string(),
                occurred_at: Utc::now(),
            }))
            .unwrap()
        {
            battery.apply(&event);
        }
        assert_eq!(battery.pending_replacement(), Some(replacement_id));

        let err = battery
            .handle(&BatteryCommand::InitiateReplacement(InitiateReplacement {
                battery_id: id,
                replacement_id: ReplacementId::new(),
                reason: "capacity fade".to_string(),
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn health_and_charge_queries() {
        let id = test_battery_id();
        assert_eq!(Battery::empty(id).health(), HealthStatus::Unknown);

        let battery = registered_battery(id, 15.0, 96);
        assert_eq!(battery.health(), HealthStatus::LowCharge);
        assert!(battery.can_accept_charge());

        let battery = registered_battery(id, 5.0, 96);
        assert_eq!(battery.health(), HealthStatus::Critical);

        let battery = registered_battery(id, 96.0, 96);
        assert_eq!(battery.health(), HealthStatus::Healthy);
        assert!(!battery.can_accept_charge());

        // Warm but not breached yet: within the warning margin of the limit.
        let mut battery = registered_battery(id, 70.0, 96);
        let mut warm = test_reading(70.0, 12.0, 96);
        warm.temp_max_c = thresholds::CRITICAL_TEMP_HIGH_C - 2.0;
        battery.apply(&BatteryEvent::TelemetryRecorded(TelemetryRecorded {
            battery_id: id,
            reading: warm,
        }));
        assert_eq!(battery.health(), HealthStatus::Warning);
    }

    #[test]
    fn handle_does_not_mutate_state() {
        let id = test_battery_id();
        let battery = registered_battery(id, 80.0, 96);
        let before = battery.clone();

        let _ = battery.handle(&BatteryCommand::RecordTelemetry(RecordTelemetry {
            battery_id: id,
            reading: test_reading(50.0, -20.0, 96),
        }));

        assert_eq!(battery, before);
    }

    #[test]
    fn replay_reaches_the_same_state_as_live_execution() {
        let id = test_battery_id();
        let mut live = EventSourced::new(Battery::empty(id));
        live.execute(&BatteryCommand::RegisterBattery(RegisterBattery {
            battery_id: id,
            specification: test_spec(96),
            initial_charge_level: 80.0,
            occurred_at: Utc::now(),
        }))
        .unwrap();
        live.execute(&BatteryCommand::RecordTelemetry(RecordTelemetry {
            battery_id: id,
            reading: test_reading(50.0, -32.0, 96),
        }))
        .unwrap();
        live.execute(&BatteryCommand::RecordTelemetry(RecordTelemetry {
            battery_id: id,
            reading: test_reading(60.0, 4.0, 96),
        }))
        .unwrap();

        let history = live.uncommitted().to_vec();
        let mut replayed = EventSourced::new(Battery::empty(id));
        replayed.load_from_history(history);

        assert_eq!(replayed.state(), live.state());
        assert_eq!(replayed.version(), live.version());
    }

    #[test]
    fn events_round_trip_through_payload_and_decode() {
        let id = test_battery_id();
        let live = registered_battery(id, 80.0, 96);

        let mut reading = test_reading(8.0, -12.0, 96);
        reading.cell_voltages[10] = 3.63;
        let events = record(&live, id, reading);
        assert!(events.len() >= 3);

        for event in events {
            let payload = event.payload().unwrap();
            let decoded = BatteryEvent::decode(event.event_type(), &payload)
                .unwrap()
                .unwrap();
            assert_eq!(decoded, event);
        }
    }

    #[test]
    fn unknown_event_types_decode_to_none() {
        let payload = serde_json::json!({ "anything": true });
        assert_eq!(
            BatteryEvent::decode("battery.firmware_updated", &payload).unwrap(),
            None
        );
    }

    #[test]
    fn corrupt_known_payload_is_a_decode_error() {
        let payload = serde_json::json!({ "battery_id": "not-a-uuid" });
        assert!(BatteryEvent::decode("battery.registered", &payload).is_err());
    }
}
