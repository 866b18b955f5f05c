//! Saga infrastructure: durable state, checkpoint storage and the battery
//! replacement orchestrator.

pub mod orchestrator;
pub mod state;
pub mod store;

pub use orchestrator::{ReplacementOrchestrator, ReplacementRequest, SagaConfig, SagaError};
pub use state::{BATTERY_REPLACEMENT_SAGA, ReplacementStep, SagaState, SagaStatus};
pub use store::{InMemorySagaStateStore, SagaStateStore, SagaStoreError};
