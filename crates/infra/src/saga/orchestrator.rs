//! Battery replacement saga orchestrator.
//!
//! Drives the multi-aggregate replacement workflow as a linear step machine:
//!
//! ```text
//! Initiated → OldDecommissioned → NewInstalled → Verified → Completed
//! ```
//!
//! Each completed step is checkpointed before the next one starts, so a crash
//! resumes from the last durable step instead of replaying side effects. The
//! steps themselves are idempotent on re-drive: initiating or decommissioning
//! a pack that is already in that state is treated as work that was done
//! before the crash.
//!
//! Decommissioning is irreversible, so a failure after the old pack went out
//! of service cannot be undone. Compensation records that fact and flags the
//! saga for manual intervention rather than pretending to roll back.

use std::time::Duration;

use chrono::Utc;
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use voltfleet_battery::battery::{Decommission, InitiateReplacement};
use voltfleet_battery::{
    BATTERY_AGGREGATE_TYPE, Battery, BatteryCommand, BatteryId, ReplacementId,
};
use voltfleet_core::{AggregateId, SagaId};
use voltfleet_events::{CommandContext, EventBus, EventEnvelope};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::EventStore;

use super::state::{BATTERY_REPLACEMENT_SAGA, ReplacementStep, SagaState, SagaStatus};
use super::store::{SagaStateStore, SagaStoreError};

const KEY_OLD_BATTERY: &str = "old_battery_id";
const KEY_NEW_BATTERY: &str = "new_battery_id";
const KEY_REPLACEMENT: &str = "replacement_id";
const KEY_VEHICLE: &str = "vehicle_ref";
const KEY_REASON: &str = "reason";
const KEY_MANUAL_INTERVENTION: &str = "requires_manual_intervention";

/// Reloads attempted when another writer races the saga on a battery stream.
const STREAM_CONFLICT_RETRIES: u32 = 3;

/// Tunables for the orchestrator.
#[derive(Debug, Clone)]
pub struct SagaConfig {
    /// Upper bound for one checkpoint write. A slow checkpoint must not stall
    /// the workflow; on timeout the state is logged and the saga continues.
    pub checkpoint_timeout: Duration,
    /// Pacing for the physical swap and BMS handshake during installation.
    pub install_delay: Duration,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            checkpoint_timeout: Duration::from_secs(2),
            install_delay: Duration::from_millis(250),
        }
    }
}

#[derive(Debug, Error)]
pub enum SagaError {
    #[error("no checkpoint recorded for saga {0}")]
    UnknownSaga(SagaId),

    #[error("checkpoint for saga {saga_id} is unreadable: {detail}")]
    CorruptCheckpoint { saga_id: SagaId, detail: String },

    #[error(transparent)]
    Store(#[from] SagaStoreError),
}

/// Parameters for one replacement run.
#[derive(Debug, Clone)]
pub struct ReplacementRequest {
    pub old_battery: BatteryId,
    pub new_battery: BatteryId,
    pub replacement_id: ReplacementId,
    /// Fleet reference of the vehicle the packs are swapped in.
    pub vehicle_ref: String,
    pub reason: String,
}

/// Orchestrates battery replacement sagas over a command dispatcher and a
/// checkpoint store.
pub struct ReplacementOrchestrator<S, B, K> {
    dispatcher: CommandDispatcher<S, B>,
    checkpoints: K,
    config: SagaConfig,
}

/// Step parameters parsed back out of the checkpoint payload.
struct SagaParams {
    old: BatteryId,
    new: BatteryId,
    replacement_id: ReplacementId,
    reason: String,
    ctx: CommandContext,
}

impl SagaParams {
    fn from_state(state: &SagaState) -> Result<Self, String> {
        let parse_uuid = |key: &str| -> Result<Uuid, String> {
            let raw = state
                .get(key)
                .ok_or_else(|| format!("checkpoint payload is missing '{key}'"))?;
            Uuid::parse_str(raw).map_err(|e| format!("checkpoint payload '{key}' is invalid: {e}"))
        };

        let replacement_id = ReplacementId::from_uuid(parse_uuid(KEY_REPLACEMENT)?);
        let ctx = CommandContext::with_correlation(*replacement_id.as_uuid())
            .caused_by(*state.saga_id.as_uuid());

        Ok(Self {
            old: BatteryId::new(AggregateId::from_uuid(parse_uuid(KEY_OLD_BATTERY)?)),
            new: BatteryId::new(AggregateId::from_uuid(parse_uuid(KEY_NEW_BATTERY)?)),
            replacement_id,
            reason: state.get(KEY_REASON).unwrap_or_default().to_string(),
            ctx,
        })
    }
}

fn make_battery(id: AggregateId) -> Battery {
    Battery::empty(BatteryId::new(id))
}

impl<S, B, K> ReplacementOrchestrator<S, B, K>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
    K: SagaStateStore,
{
    pub fn new(dispatcher: CommandDispatcher<S, B>, checkpoints: K, config: SagaConfig) -> Self {
        Self {
            dispatcher,
            checkpoints,
            config,
        }
    }

    /// Start a new replacement saga and drive it to a terminal state.
    ///
    /// Always returns the terminal state: a failed replacement is a normal
    /// outcome (`Failed` or `Compensated`), not an `Err`.
    pub async fn run(&self, request: ReplacementRequest) -> SagaState {
        let saga_id = SagaId::new();
        let mut state = SagaState::new(saga_id, BATTERY_REPLACEMENT_SAGA, Utc::now());
        state.insert(KEY_OLD_BATTERY, request.old_battery.to_string());
        state.insert(KEY_NEW_BATTERY, request.new_battery.to_string());
        state.insert(KEY_REPLACEMENT, request.replacement_id.to_string());
        state.insert(KEY_VEHICLE, request.vehicle_ref);
        state.insert(KEY_REASON, request.reason);

        tracing::info!(
            %saga_id,
            old_battery = %request.old_battery,
            new_battery = %request.new_battery,
            "starting battery replacement saga"
        );
        self.checkpoint(&state).await;
        self.drive(&mut state).await;
        state
    }

    /// Pick up a crashed saga from its last checkpoint.
    ///
    /// Terminal sagas are returned as-is. A missing checkpoint or one that no
    /// longer decodes is an error; the latter needs manual intervention and
    /// is logged as such.
    pub async fn resume(&self, saga_id: SagaId) -> Result<SagaState, SagaError> {
        let mut state = match self.checkpoints.load(saga_id).await {
            Ok(Some(state)) => state,
            Ok(None) => return Err(SagaError::UnknownSaga(saga_id)),
            Err(SagaStoreError::Serialization(detail)) => {
                tracing::error!(
                    %saga_id,
                    error = %detail,
                    "saga checkpoint is unreadable; manual intervention required"
                );
                return Err(SagaError::CorruptCheckpoint { saga_id, detail });
            }
            Err(err) => return Err(SagaError::Store(err)),
        };

        if state.status.is_terminal() {
            return Ok(state);
        }

        tracing::info!(%saga_id, step = ?state.current_step, "resuming battery replacement saga");
        if state.status == SagaStatus::Compensating {
            // Crashed mid-compensation; finish that instead of the workflow.
            self.compensate(&mut state).await;
        } else {
            self.drive(&mut state).await;
        }
        Ok(state)
    }

    async fn drive(&self, state: &mut SagaState) {
        let params = match SagaParams::from_state(state) {
            Ok(params) => params,
            Err(reason) => {
                self.handle_failure(state, reason).await;
                return;
            }
        };

        loop {
            let result = match state.current_step {
                ReplacementStep::Initiated => self.decommission_old(&params),
                ReplacementStep::OldDecommissioned => self.install_new(&params).await,
                ReplacementStep::NewInstalled => self.verify_new(&params),
                ReplacementStep::Verified => {
                    state.complete(Utc::now());
                    self.checkpoint(state).await;
                    tracing::info!(saga_id = %state.saga_id, "battery replacement completed");
                    return;
                }
                ReplacementStep::Completed => return,
            };

            match result {
                Ok(next) => {
                    state.advance(next);
                    self.checkpoint(state).await;
                }
                Err(reason) => {
                    self.handle_failure(state, reason).await;
                    return;
                }
            }
        }
    }

    /// Dispatch a battery command, reloading and retrying when another writer
    /// (telemetry ingestion shares these streams) wins the version race.
    ///
    /// A version conflict only means the decision basis went stale; the
    /// command is re-run against a fresh load so its events still land.
    fn dispatch_retrying(
        &self,
        ctx: &CommandContext,
        command: BatteryCommand,
    ) -> Result<(), DispatchError> {
        let mut attempt = 0u32;
        loop {
            match self.dispatcher.dispatch(
                ctx,
                BATTERY_AGGREGATE_TYPE,
                command.clone(),
                make_battery,
            ) {
                Ok(_) => return Ok(()),
                Err(DispatchError::Concurrency(detail)) if attempt < STREAM_CONFLICT_RETRIES => {
                    attempt += 1;
                    tracing::debug!(
                        %detail,
                        attempt,
                        "battery stream moved under the saga; reloading and retrying"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Step 1: take the old pack out of service.
    fn decommission_old(&self, params: &SagaParams) -> Result<ReplacementStep, String> {
        let initiate = BatteryCommand::InitiateReplacement(InitiateReplacement {
            battery_id: params.old,
            replacement_id: params.replacement_id,
            reason: params.reason.clone(),
            occurred_at: Utc::now(),
        });
        match self.dispatch_retrying(&params.ctx, initiate) {
            Ok(()) => {}
            // Re-drive after a crash: the initiation, or even the whole
            // decommissioning, is already in the stream.
            Err(DispatchError::Conflict(_)) | Err(DispatchError::InvalidOperation(_)) => {
                tracing::debug!(battery_id = %params.old, "replacement already initiated");
            }
            Err(e) => return Err(format!("initiating replacement on old pack failed: {e:?}")),
        }

        let decommission = BatteryCommand::Decommission(Decommission {
            battery_id: params.old,
            reason: params.reason.clone(),
            replacement_id: Some(params.replacement_id),
            occurred_at: Utc::now(),
        });
        match self.dispatch_retrying(&params.ctx, decommission) {
            Ok(()) => Ok(ReplacementStep::OldDecommissioned),
            Err(DispatchError::InvalidOperation(_)) => {
                tracing::debug!(battery_id = %params.old, "old pack already decommissioned");
                Ok(ReplacementStep::OldDecommissioned)
            }
            Err(e) => Err(format!("decommissioning old pack failed: {e:?}")),
        }
    }

    /// Step 2: install the new pack into the vehicle slot.
    async fn install_new(&self, params: &SagaParams) -> Result<ReplacementStep, String> {
        let registered = self
            .dispatcher
            .store()
            .exists(params.new.0)
            .map_err(|e| format!("checking new pack failed: {e}"))?;
        if !registered {
            return Err(format!("new pack {} is not registered", params.new));
        }

        tokio::time::sleep(self.config.install_delay).await;
        Ok(ReplacementStep::NewInstalled)
    }

    /// Step 3: verify the installed pack is serviceable.
    fn verify_new(&self, params: &SagaParams) -> Result<ReplacementStep, String> {
        let runtime = self
            .dispatcher
            .load(params.new.0, make_battery)
            .map_err(|e| format!("loading new pack failed: {e:?}"))?;
        let battery = runtime.state();

        if !battery.is_registered() {
            return Err(format!("new pack {} is not registered", params.new));
        }
        if battery.is_decommissioned() {
            return Err(format!("new pack {} is decommissioned", params.new));
        }
        if battery.requires_immediate_attention() {
            return Err(format!("new pack {} is in critical condition", params.new));
        }
        Ok(ReplacementStep::Verified)
    }

    async fn handle_failure(&self, state: &mut SagaState, reason: String) {
        tracing::warn!(
            saga_id = %state.saga_id,
            step = ?state.current_step,
            %reason,
            "replacement saga step failed"
        );

        if state.current_step == ReplacementStep::Initiated {
            // Nothing durable happened yet; fail outright.
            state.fail(reason, Utc::now());
            self.checkpoint(state).await;
            return;
        }

        state.begin_compensation(reason);
        self.checkpoint(state).await;
        self.compensate(state).await;
    }

    /// The old pack is already out of service and decommissioning does not
    /// reverse. Record the stranded vehicle for manual intervention instead
    /// of pretending to roll back.
    async fn compensate(&self, state: &mut SagaState) {
        state.insert(KEY_MANUAL_INTERVENTION, "true");
        tracing::error!(
            saga_id = %state.saga_id,
            "replacement could not finish after the old pack was decommissioned; flagged for manual intervention"
        );
        state.mark_compensated(Utc::now());
        self.checkpoint(state).await;
    }

    /// Write a checkpoint, bounded by the configured timeout.
    ///
    /// Checkpointing never stops the saga: on failure or timeout the full
    /// state is logged so an operator can reconstruct it.
    async fn checkpoint(&self, state: &SagaState) {
        let write = self.checkpoints.save(state);
        match tokio::time::timeout(self.config.checkpoint_timeout, write).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(
                    saga_id = %state.saga_id,
                    error = %e,
                    state = %snapshot(state),
                    "saga checkpoint write failed; continuing"
                );
            }
            Err(_) => {
                tracing::error!(
                    saga_id = %state.saga_id,
                    state = %snapshot(state),
                    "saga checkpoint write timed out; continuing"
                );
            }
        }
    }
}

fn snapshot(state: &SagaState) -> String {
    serde_json::to_string(state).unwrap_or_else(|e| format!("<unserializable saga state: {e}>"))
}
