//! MessageBus port - 永続メッセージストリームの抽象化
//!
//! NATS JetStream が本番実装（`impls::nats`）、テストでは `impls::memory` を使う。
//!
//! # 設計原則
//! - pull 型: consumer 側が件数と待ち時間を指定して取りに行く
//! - 取得したメッセージは [`Delivery`] として所有し、必ず ack か nak で手放す
//! - 再配送の判断（max_deliver）はバス側が持つ

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{BusError, ConsumerDescriptor, StreamDescriptor, TaskMessage};

/// A fetched message that must be settled exactly once.
///
/// `ack` / `nak` consume the box so a delivery cannot be settled twice.
#[async_trait]
pub trait Delivery: Send {
    fn message(&self) -> &TaskMessage;

    /// Remove the message from the redelivery set.
    async fn ack(self: Box<Self>) -> Result<(), BusError>;

    /// Ask the bus to redeliver after `delay`.
    async fn nak(self: Box<Self>, delay: Duration) -> Result<(), BusError>;
}

#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Create the stream if it does not exist yet.
    async fn ensure_stream(&self, stream: &StreamDescriptor) -> Result<(), BusError>;

    /// Create a durable pull consumer.
    ///
    /// Returns [`BusError::ConsumerExists`] when a consumer with that name is
    /// already registered.
    async fn create_consumer(&self, consumer: &ConsumerDescriptor) -> Result<(), BusError>;

    /// Pull up to `max_messages`, waiting at most `expires`.
    /// An empty vector means nothing arrived in time.
    async fn fetch(
        &self,
        consumer: &ConsumerDescriptor,
        max_messages: usize,
        expires: Duration,
    ) -> Result<Vec<Box<dyn Delivery>>, BusError>;

    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), BusError>;

    /// `true` once the connection is closed for good (not merely reconnecting).
    fn is_closed(&self) -> bool;
}
