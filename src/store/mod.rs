//! Persistence contracts for tasks, menus and the status audit log
//!
//! Implementations own their records outright. Callers never cache what they
//! read; every operation goes back to the store.

pub mod memory;
pub mod sqlite;

use crate::domain::{Menu, ParsingTask, ProductStatus, ProductStatusAudit, TaskStatus};
use crate::error::PipelineResult;
use async_trait::async_trait;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create_task(&self, task: &ParsingTask) -> PipelineResult<()>;

    /// `NotFound` when no task has this id
    async fn get_task(&self, task_id: &str) -> PipelineResult<ParsingTask>;

    /// Move a task to `status`, replacing its menu id and error message
    async fn update_task_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        menu_id: Option<&str>,
        error: Option<&str>,
    ) -> PipelineResult<()>;

    async fn increment_retry_count(&self, task_id: &str) -> PipelineResult<()>;
}

#[async_trait]
pub trait MenuStore: Send + Sync {
    /// Persist a whole menu in one write and return it with its id assigned
    async fn create_menu(&self, menu: Menu) -> PipelineResult<Menu>;

    async fn get_menu(&self, menu_id: &str) -> PipelineResult<Menu>;

    /// Status of `product_id` in the newest menu of `restaurant_id` that has it
    async fn get_product_status(
        &self,
        restaurant_id: &str,
        product_id: &str,
    ) -> PipelineResult<ProductStatus>;

    /// Overwrite the status atomically and return the value it replaced
    async fn update_product_status(
        &self,
        restaurant_id: &str,
        product_id: &str,
        new_status: ProductStatus,
    ) -> PipelineResult<ProductStatus>;
}

/// Append-only status change log
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append_audit(&self, audit: &ProductStatusAudit) -> PipelineResult<()>;

    async fn audits_for_product(&self, product_id: &str) -> PipelineResult<Vec<ProductStatusAudit>>;
}

fn product_key(restaurant_id: &str, product_id: &str) -> String {
    format!("{restaurant_id}/{product_id}")
}
