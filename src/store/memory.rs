//! Process-local store for development runs and tests

use super::{product_key, AuditStore, MenuStore, TaskStore};
use crate::domain::{Menu, ParsingTask, ProductStatus, ProductStatusAudit, TaskStatus};
use crate::error::{PipelineError, PipelineResult};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    tasks: HashMap<String, ParsingTask>,
    /// Insertion order; later entries are newer
    menus: Vec<Menu>,
    audits: Vec<ProductStatusAudit>,
}

/// All three stores behind one lock
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn task_count(&self) -> usize {
        self.inner.read().await.tasks.len()
    }

    pub async fn menu_count(&self) -> usize {
        self.inner.read().await.menus.len()
    }

    pub async fn all_audits(&self) -> Vec<ProductStatusAudit> {
        self.inner.read().await.audits.clone()
    }
}

#[async_trait]
impl TaskStore for InMemoryStore {
    async fn create_task(&self, task: &ParsingTask) -> PipelineResult<()> {
        let mut inner = self.inner.write().await;
        if inner.tasks.contains_key(&task.task_id) {
            return Err(PipelineError::validation(format!(
                "task {} already exists",
                task.task_id
            )));
        }
        inner.tasks.insert(task.task_id.clone(), task.clone());
        Ok(())
    }

    async fn get_task(&self, task_id: &str) -> PipelineResult<ParsingTask> {
        self.inner
            .read()
            .await
            .tasks
            .get(task_id)
            .cloned()
            .ok_or_else(|| PipelineError::not_found("task", task_id))
    }

    async fn update_task_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        menu_id: Option<&str>,
        error: Option<&str>,
    ) -> PipelineResult<()> {
        let mut inner = self.inner.write().await;
        let task = inner
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| PipelineError::not_found("task", task_id))?;
        task.apply_status(status, menu_id, error)
    }

    async fn increment_retry_count(&self, task_id: &str) -> PipelineResult<()> {
        let mut inner = self.inner.write().await;
        let task = inner
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| PipelineError::not_found("task", task_id))?;
        task.increment_retry();
        Ok(())
    }
}

#[async_trait]
impl MenuStore for InMemoryStore {
    async fn create_menu(&self, mut menu: Menu) -> PipelineResult<Menu> {
        menu.id = Some(Uuid::new_v4().simple().to_string());
        self.inner.write().await.menus.push(menu.clone());
        Ok(menu)
    }

    async fn get_menu(&self, menu_id: &str) -> PipelineResult<Menu> {
        self.inner
            .read()
            .await
            .menus
            .iter()
            .find(|menu| menu.id.as_deref() == Some(menu_id))
            .cloned()
            .ok_or_else(|| PipelineError::not_found("menu", menu_id))
    }

    async fn get_product_status(
        &self,
        restaurant_id: &str,
        product_id: &str,
    ) -> PipelineResult<ProductStatus> {
        self.inner
            .read()
            .await
            .menus
            .iter()
            .rev()
            .filter(|menu| menu.restaurant_id == restaurant_id)
            .find_map(|menu| menu.product(product_id).map(|p| p.status))
            .ok_or_else(|| {
                PipelineError::not_found("product", product_key(restaurant_id, product_id))
            })
    }

    async fn update_product_status(
        &self,
        restaurant_id: &str,
        product_id: &str,
        new_status: ProductStatus,
    ) -> PipelineResult<ProductStatus> {
        self.inner
            .write()
            .await
            .menus
            .iter_mut()
            .rev()
            .filter(|menu| menu.restaurant_id == restaurant_id)
            .find_map(|menu| menu.set_product_status(product_id, new_status))
            .ok_or_else(|| {
                PipelineError::not_found("product", product_key(restaurant_id, product_id))
            })
    }
}

#[async_trait]
impl AuditStore for InMemoryStore {
    async fn append_audit(&self, audit: &ProductStatusAudit) -> PipelineResult<()> {
        self.inner.write().await.audits.push(audit.clone());
        Ok(())
    }

    async fn audits_for_product(&self, product_id: &str) -> PipelineResult<Vec<ProductStatusAudit>> {
        Ok(self
            .inner
            .read()
            .await
            .audits
            .iter()
            .filter(|audit| audit.product_id == product_id)
            .cloned()
            .collect())
    }
}
