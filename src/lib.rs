//! Menu Pipeline - Rust Implementation
//!
//! Ingests restaurant menus from spreadsheets and tracks product
//! availability, with all heavy work running behind a durable work queue.
//!
//! # Overview
//!
//! This crate provides:
//! - Parsing tasks with a guarded state machine and bounded retries
//! - A spreadsheet parser that turns a semi-structured grid into menu entities
//! - Product status change events with an append-only audit trail
//! - A queue worker with ack / requeue / dead-letter dispositions
//! - MQTT and in-memory queue transports, SQLite and in-memory stores
//! - A small HTTP API over the orchestrators
//!
//! # Quick Start
//!
//! ```rust
//! use menu_pipeline::sheets::parse_rows;
//! use serde_json::json;
//!
//! let rows = vec![
//!     vec![json!(""), json!("Burger"), json!(""), json!("9.99"), json!("12.99"),
//!          json!(""), json!(""), json!("Spicy")],
//! ];
//!
//! let menu = parse_rows(&rows).into_menu("Burger House");
//! assert_eq!(menu.restaurant_id, "Burger House");
//! assert_eq!(menu.products[0].ext_id, "1001000");
//! assert_eq!(menu.products[0].attributes.options, vec!["Spicy".to_string()]);
//! ```

pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod observability;
pub mod orchestrator;
pub mod protocol;
pub mod sheets;
pub mod store;
pub mod testing;
pub mod transport;
pub mod worker;

pub use config::PipelineConfig;
pub use domain::*;
pub use error::{ErrorKind, PipelineError, PipelineResult};
pub use orchestrator::{MenuOrchestrator, ProductOrchestrator};
pub use store::{InMemoryStore, SqliteStore};
pub use transport::{InMemoryQueue, MqttQueue, QueueChannel, QueueTransport};
pub use worker::{Disposition, PipelineWorker, RetryPolicy};
