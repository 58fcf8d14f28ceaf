//! Parsing task submission and the parse-and-persist sequence

use crate::domain::{Menu, ParsingTask, TaskStatus};
use crate::error::{PipelineError, PipelineResult};
use crate::observability::metrics;
use crate::protocol::MenuParsingMessage;
use crate::sheets::{parse_rows, SheetSource};
use crate::store::{MenuStore, TaskStore};
use crate::transport::{QueueChannel, QueueTransport};
use std::sync::Arc;
use tracing::{debug, info};

pub struct MenuOrchestrator {
    tasks: Arc<dyn TaskStore>,
    menus: Arc<dyn MenuStore>,
    source: Arc<dyn SheetSource>,
    transport: Arc<dyn QueueTransport>,
}

impl MenuOrchestrator {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        menus: Arc<dyn MenuStore>,
        source: Arc<dyn SheetSource>,
        transport: Arc<dyn QueueTransport>,
    ) -> Self {
        Self {
            tasks,
            menus,
            source,
            transport,
        }
    }

    /// Create a queued task and publish its id on the menu-parsing channel
    ///
    /// The task is persisted before it is published so a worker can never
    /// receive an id the store does not know. If the publish fails the task
    /// stays queued and the error is returned.
    pub async fn create_parsing_task(
        &self,
        spreadsheet_id: &str,
        restaurant_name: &str,
    ) -> PipelineResult<ParsingTask> {
        let spreadsheet_id = spreadsheet_id.trim();
        let restaurant_name = restaurant_name.trim();
        if spreadsheet_id.is_empty() {
            return Err(PipelineError::validation("spreadsheet_id is required"));
        }
        if restaurant_name.is_empty() {
            return Err(PipelineError::validation("restaurant_name is required"));
        }

        let task = ParsingTask::new(spreadsheet_id, restaurant_name);
        self.tasks.create_task(&task).await?;

        let payload = MenuParsingMessage::new(&task.task_id).encode()?;
        self.transport
            .publish(QueueChannel::MenuParsing, payload)
            .await?;

        metrics().task_submitted();
        info!(
            task_id = %task.task_id,
            spreadsheet_id = %task.spreadsheet_id,
            "Parsing task queued"
        );
        Ok(task)
    }

    pub async fn get_task(&self, task_id: &str) -> PipelineResult<ParsingTask> {
        self.tasks.get_task(task_id).await
    }

    pub async fn get_menu(&self, menu_id: &str) -> PipelineResult<Menu> {
        self.menus.get_menu(menu_id).await
    }

    /// Terminal failure; the task keeps `error` as its message
    pub async fn mark_task_failed(&self, task_id: &str, error: &str) -> PipelineResult<()> {
        self.tasks
            .update_task_status(task_id, TaskStatus::Failed, None, Some(error))
            .await?;
        metrics().task_failed();
        info!(task_id, error, "Parsing task failed");
        Ok(())
    }

    /// Count a failed attempt and put the task back to queued with `error`
    pub async fn return_task_to_queue(&self, task_id: &str, error: &str) -> PipelineResult<()> {
        self.tasks.increment_retry_count(task_id).await?;
        self.tasks
            .update_task_status(task_id, TaskStatus::Queued, None, Some(error))
            .await
    }

    /// Fetch, parse and persist the spreadsheet behind `task_id`
    ///
    /// Moves the task to processing first and to completed last; returns the
    /// new menu id. On error the task is left in processing for the caller to
    /// settle.
    pub async fn process_menu_parsing(&self, task_id: &str) -> PipelineResult<String> {
        let task = self.tasks.get_task(task_id).await?;

        self.tasks
            .update_task_status(task_id, TaskStatus::Processing, None, None)
            .await?;

        let rows = self.source.fetch_rows(&task.spreadsheet_id).await?;
        if rows.is_empty() {
            return Err(PipelineError::parse_failure("no data found in spreadsheet"));
        }
        debug!(task_id, rows = rows.len(), "Fetched spreadsheet rows");

        let parsed = parse_rows(&rows);
        let product_count = parsed.products.len();
        let menu = self
            .menus
            .create_menu(parsed.into_menu(&task.restaurant_name))
            .await?;
        let menu_id = menu
            .id
            .ok_or_else(|| PipelineError::store("menu store returned a menu without an id"))?;

        self.tasks
            .update_task_status(task_id, TaskStatus::Completed, Some(&menu_id), None)
            .await?;

        info!(task_id, menu_id = %menu_id, products = product_count, "Menu parsed");
        Ok(menu_id)
    }
}
