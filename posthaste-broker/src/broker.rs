//! The capabilities the hand-off pipeline needs from a message broker.

use crate::client::Result;
use async_trait::async_trait;
use bytes::Bytes;
use posthaste_common::queue::QueueOptions;

#[async_trait]
pub trait Broker: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Connection>>;
}

#[async_trait]
pub trait Connection: Send + Sync {
    async fn channel(&mut self) -> Result<Box<dyn Channel>>;

    /// Whether the connection can still be handed out again.
    fn is_open(&self) -> bool;

    async fn close(self: Box<Self>) -> Result<()>;
}

#[async_trait]
pub trait Channel: Send {
    async fn declare_queue(&mut self, queue: &str, options: QueueOptions) -> Result<()>;

    async fn publish(&mut self, queue: &str, payload: Bytes) -> Result<()>;

    /// Reads the next message of this channel's snapshot of `queue`.
    ///
    /// The first call on a queue fixes the snapshot: it covers every message retained at
    /// that moment and nothing published afterwards. Reading never acknowledges or removes
    /// a message, so other channels see the same backlog. `None` means the snapshot is
    /// exhausted.
    async fn retrieve_next(&mut self, queue: &str) -> Result<Option<Bytes>>;

    async fn close(self: Box<Self>) -> Result<()>;
}
