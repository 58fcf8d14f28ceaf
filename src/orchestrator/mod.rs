//! Business logic between the API, the worker and the stores
//!
//! Orchestrators report success or failure and nothing else. Whether a
//! failed message is retried, requeued or dead-lettered is decided by the
//! worker.

pub mod menu;
pub mod product;

pub use menu::MenuOrchestrator;
pub use product::ProductOrchestrator;
