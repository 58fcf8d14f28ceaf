//! Queue transport for the two work channels
//!
//! The pipeline needs at-least-once delivery, one unacknowledged message per
//! consumer, explicit ack, reject-with-requeue and reject-to-dead-letter.
//! [`QueueTransport`] captures exactly that; [`memory::InMemoryQueue`] backs
//! tests and single-process runs and [`mqtt::MqttQueue`] talks to a broker.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod memory;
pub mod mqtt;

pub use memory::InMemoryQueue;
pub use mqtt::{MqttError, MqttQueue};

/// The two durable work channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueChannel {
    MenuParsing,
    ProductStatus,
}

impl QueueChannel {
    pub const ALL: [QueueChannel; 2] = [QueueChannel::MenuParsing, QueueChannel::ProductStatus];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueChannel::MenuParsing => "menu_parsing",
            QueueChannel::ProductStatus => "product_status",
        }
    }
}

impl std::fmt::Display for QueueChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one outstanding delivery for ack/reject
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeliveryHandle {
    pub channel: QueueChannel,
    pub tag: u64,
}

/// A message handed to a consumer, unacknowledged until settled
#[derive(Debug, Clone)]
pub struct Delivery {
    pub payload: Bytes,
    pub handle: DeliveryHandle,
    /// Set when the broker delivered this message before and it was requeued
    pub redelivered: bool,
}

pub type DeliveryStream = mpsc::UnboundedReceiver<Delivery>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("queue transport is not connected")]
    NotConnected,
    #[error("unknown delivery tag {0}")]
    UnknownDelivery(u64),
    #[error("channel {0} already has a consumer")]
    AlreadyConsuming(QueueChannel),
    #[error("channel {0} is not consumed by this transport")]
    NotConsuming(QueueChannel),
    #[error("queue channel closed")]
    ChannelClosed,
    #[error("publish failed: {0}")]
    Publish(String),
    #[error(transparent)]
    Mqtt(#[from] MqttError),
}

/// At-least-once work queue
///
/// Every delivery must be settled exactly once with [`ack`](Self::ack) or
/// [`reject`](Self::reject). A consumer gets at most one unsettled delivery
/// per channel at a time.
#[async_trait]
pub trait QueueTransport: Send + Sync {
    async fn publish(&self, channel: QueueChannel, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Start consuming a channel; one consumer per channel per transport
    async fn consume(&self, channel: QueueChannel) -> Result<DeliveryStream, TransportError>;

    async fn ack(&self, handle: DeliveryHandle) -> Result<(), TransportError>;

    /// `requeue = true` puts the message back on its channel, `false` moves it
    /// to the dead-letter channel
    async fn reject(&self, handle: DeliveryHandle, requeue: bool) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;
}
