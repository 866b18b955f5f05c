//! Infrastructure layer: event persistence, command dispatch, saga orchestration.

pub mod command_dispatcher;
pub mod event_store;
pub mod saga;
