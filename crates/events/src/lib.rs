//! `voltfleet-events` — event and messaging abstractions.
//!
//! Domain-agnostic contracts shared by every aggregate and the persistence
//! layer: the [`Event`] trait, the persisted [`EventEnvelope`], command
//! metadata ([`CommandContext`]) and the pub/sub [`EventBus`].

pub mod bus;
pub mod command;
pub mod context;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use command::Command;
pub use context::CommandContext;
pub use envelope::EventEnvelope;
pub use event::{DecodeEvent, Event};
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
