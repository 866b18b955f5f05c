//! Event publishing/subscription abstraction (mechanics only).
//!
//! A pub/sub mechanism for distributing events to consumers after they have
//! been persisted. The bus is intentionally lightweight:
//!
//! - **Transport-agnostic**: in-memory channels today, a broker tomorrow.
//! - **At-least-once**: events may arrive more than once; consumers must be
//!   idempotent. The event store is the source of truth, so redelivery (or a
//!   failed publish followed by republishing) never loses data.
//! - **No persistence**: the bus distributes, the store stores.
//!
//! Events are appended to the store *before* they are published. A subscriber
//! therefore never observes an event that was not durably recorded.

use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::Duration;

/// A subscription to an event stream.
///
/// Each subscription gets a copy of every message published after it was
/// created (broadcast semantics). Designed for single-threaded consumption;
/// hand the subscription to one worker thread.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, std::sync::mpsc::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, std::sync::mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, std::sync::mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

/// Domain-agnostic event bus (pub/sub abstraction).
///
/// `publish()` can fail (bus full, transport error). Failures surface to the
/// caller, typically the command dispatcher. Since the events were already
/// appended, retrying publication is safe.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
