//! MQTT v5 backend for the work queue
//!
//! Pure pieces are kept apart from I/O so they can be tested without a
//! broker:
//!
//! - [`connection`] - client options, reconnect backoff and channel topics
//! - [`message_handler`] - routing of MQTT events and incoming publishes
//! - [`client`] - the event loop and the [`QueueTransport`](crate::transport::QueueTransport) impl
//!
//! # Usage
//!
//! ```rust,no_run
//! use menu_pipeline::config::QueueSection;
//! use menu_pipeline::transport::{MqttQueue, QueueChannel, QueueTransport};
//!
//! # tokio_test::block_on(async {
//! let queue = MqttQueue::consumer(&QueueSection::default())?;
//! queue.connect().await?;
//! let mut deliveries = queue.consume(QueueChannel::MenuParsing).await?;
//! if let Some(delivery) = deliveries.recv().await {
//!     queue.ack(delivery.handle).await?;
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::MqttQueue;
pub use connection::{ConnectionRole, ConnectionState, MqttError, QueueTopics, ReconnectConfig};
pub use message_handler::{EventRoute, MessageHandler, PublishDecision};
