//! Entities owned by the task and menu stores

pub mod audit;
pub mod menu;
pub mod task;

pub use audit::{ProductEventType, ProductStatusAudit, ProductStatusChangeEvent};
pub use menu::{Attribute, AttributeGroup, Menu, Product, ProductAttributes, ProductStatus};
pub use task::{ParsingTask, TaskStatus, MAX_RETRIES_EXCEEDED};
