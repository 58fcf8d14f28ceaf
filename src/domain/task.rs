//! Parsing task record and its status machine
//!
//! ```text
//! queued -> processing -> completed
//!    ^          |
//!    +----------+  (failed attempt, retry budget left)
//! queued | processing -> failed  (retry budget spent)
//! ```

use crate::error::{PipelineError, PipelineResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Error recorded on a task whose retry budget is spent
pub const MAX_RETRIES_EXCEEDED: &str = "max retries exceeded";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Whether the worker may move a task from `self` to `next`.
    ///
    /// `processing -> processing` covers a redelivery after a worker died
    /// mid-parse, `queued -> queued` an attempt that failed before it got to
    /// processing, and `failed -> failed` a duplicate of an exhausted task.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Queued, Queued)
                | (Queued, Processing)
                | (Queued, Failed)
                | (Processing, Processing)
                | (Processing, Queued)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Failed, Failed)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One spreadsheet-to-menu parse request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsingTask {
    pub task_id: String,
    pub status: TaskStatus,
    pub spreadsheet_id: String,
    pub restaurant_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub menu_id: Option<String>,
    #[serde(default, rename = "error", skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ParsingTask {
    /// New queued task with a freshly generated id
    pub fn new(spreadsheet_id: impl Into<String>, restaurant_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            task_id: Uuid::new_v4().to_string(),
            status: TaskStatus::Queued,
            spreadsheet_id: spreadsheet_id.into(),
            restaurant_name: restaurant_name.into(),
            menu_id: None,
            error_message: None,
            retry_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a status change as the store does it.
    ///
    /// `menu_id` and `error` replace the previous values, so a task carries a
    /// menu id only once completed and an error only while its last attempt
    /// failed.
    pub fn apply_status(
        &mut self,
        status: TaskStatus,
        menu_id: Option<&str>,
        error: Option<&str>,
    ) -> PipelineResult<()> {
        if !self.status.can_transition_to(status) {
            return Err(PipelineError::validation(format!(
                "task {} cannot move from {} to {}",
                self.task_id, self.status, status
            )));
        }
        if status == TaskStatus::Completed && menu_id.is_none() {
            return Err(PipelineError::validation(format!(
                "task {} cannot complete without a menu id",
                self.task_id
            )));
        }
        if status == TaskStatus::Failed && error.map_or(true, str::is_empty) {
            return Err(PipelineError::validation(format!(
                "task {} cannot fail without an error message",
                self.task_id
            )));
        }

        self.status = status;
        self.menu_id = menu_id
            .filter(|_| status == TaskStatus::Completed)
            .map(str::to_string);
        self.error_message = error.filter(|e| !e.is_empty()).map(str::to_string);
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn increment_retry(&mut self) {
        self.retry_count = self.retry_count.saturating_add(1);
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_task_is_queued() {
        let task = ParsingTask::new("sheet-1", "Cafe");
        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(task.retry_count, 0);
        assert!(task.menu_id.is_none());
        assert!(task.error_message.is_none());
        assert!(Uuid::parse_str(&task.task_id).is_ok());
    }

    #[test]
    fn test_task_ids_are_unique() {
        let a = ParsingTask::new("sheet-1", "Cafe");
        let b = ParsingTask::new("sheet-1", "Cafe");
        assert_ne!(a.task_id, b.task_id);
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut task = ParsingTask::new("sheet-1", "Cafe");
        task.apply_status(TaskStatus::Processing, None, None).unwrap();
        task.apply_status(TaskStatus::Completed, Some("menu-1"), None)
            .unwrap();
        assert_eq!(task.menu_id.as_deref(), Some("menu-1"));
        assert!(task.error_message.is_none());
    }

    #[test]
    fn test_retry_loop_records_latest_error() {
        let mut task = ParsingTask::new("sheet-1", "Cafe");
        task.apply_status(TaskStatus::Processing, None, None).unwrap();
        task.increment_retry();
        task.apply_status(TaskStatus::Queued, None, Some("sheets timeout"))
            .unwrap();
        assert_eq!(task.error_message.as_deref(), Some("sheets timeout"));
        assert_eq!(task.retry_count, 1);

        task.apply_status(TaskStatus::Processing, None, None).unwrap();
        task.apply_status(TaskStatus::Completed, Some("menu-1"), None)
            .unwrap();
        assert!(task.error_message.is_none());
        assert_eq!(task.retry_count, 1);
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut task = ParsingTask::new("sheet-1", "Cafe");
        task.apply_status(TaskStatus::Processing, None, None).unwrap();
        task.apply_status(TaskStatus::Completed, Some("menu-1"), None)
            .unwrap();
        assert!(task.apply_status(TaskStatus::Processing, None, None).is_err());
        assert!(task.apply_status(TaskStatus::Queued, None, None).is_err());
    }

    #[test]
    fn test_completed_requires_menu_id() {
        let mut task = ParsingTask::new("sheet-1", "Cafe");
        task.apply_status(TaskStatus::Processing, None, None).unwrap();
        assert!(task.apply_status(TaskStatus::Completed, None, None).is_err());
        assert_eq!(task.status, TaskStatus::Processing);
    }

    #[test]
    fn test_failed_requires_error() {
        let mut task = ParsingTask::new("sheet-1", "Cafe");
        assert!(task.apply_status(TaskStatus::Failed, None, Some("")).is_err());
        task.apply_status(TaskStatus::Failed, None, Some(MAX_RETRIES_EXCEEDED))
            .unwrap();
        assert_eq!(task.error_message.as_deref(), Some(MAX_RETRIES_EXCEEDED));
    }

    #[test]
    fn test_menu_id_ignored_unless_completed() {
        let mut task = ParsingTask::new("sheet-1", "Cafe");
        task.apply_status(TaskStatus::Processing, Some("menu-x"), None)
            .unwrap();
        assert!(task.menu_id.is_none());
    }

    #[test]
    fn test_wire_format() {
        let mut task = ParsingTask::new("sheet-1", "Cafe");
        task.error_message = Some("boom".to_string());
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["status"], "queued");
        assert_eq!(json["error"], "boom");
        assert_eq!(json["retry_count"], 0);
        assert!(json.get("menu_id").is_none());
    }
}
