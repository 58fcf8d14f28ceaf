//! Mock implementations for testing

use crate::domain::{Menu, ParsingTask, ProductStatus, ProductStatusAudit, TaskStatus};
use crate::error::{PipelineError, PipelineResult};
use crate::sheets::{Row, SheetSource};
use crate::store::{AuditStore, InMemoryStore, MenuStore, TaskStore};
use crate::transport::{
    DeliveryHandle, DeliveryStream, QueueChannel, QueueTransport, TransportError,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Sheet source returning fixed rows, optionally failing first
#[derive(Debug, Default)]
pub struct MockSheetSource {
    rows: Vec<Row>,
    scripted_failures: Mutex<VecDeque<PipelineError>>,
    calls: AtomicUsize,
    requested: Mutex<Vec<String>>,
}

impl MockSheetSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(mut self, rows: Vec<Row>) -> Self {
        self.rows = rows;
        self
    }

    /// Fail the next `times` fetches with a parse failure before serving rows
    pub fn with_failures(self, times: usize) -> Self {
        let failures = (0..times)
            .map(|attempt| {
                PipelineError::parse_failure(format!("sheet unavailable (attempt {})", attempt + 1))
            })
            .collect();
        Self {
            scripted_failures: Mutex::new(failures),
            ..self
        }
    }

    pub async fn push_failure(&self, error: PipelineError) {
        self.scripted_failures.lock().await.push_back(error);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn requested_spreadsheets(&self) -> Vec<String> {
        self.requested.lock().await.clone()
    }
}

#[async_trait]
impl SheetSource for MockSheetSource {
    async fn fetch_rows(&self, spreadsheet_id: &str) -> PipelineResult<Vec<Row>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requested.lock().await.push(spreadsheet_id.to_string());
        if let Some(error) = self.scripted_failures.lock().await.pop_front() {
            return Err(error);
        }
        Ok(self.rows.clone())
    }
}

/// [`InMemoryStore`] that fails on demand
///
/// `fail_next(n)` makes the next `n` store calls of any kind return a
/// transient store error. `fail_audit_appends(n)` only affects audit writes.
#[derive(Default)]
pub struct FlakyStore {
    inner: InMemoryStore,
    failures: AtomicU32,
    audit_failures: AtomicU32,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &InMemoryStore {
        &self.inner
    }

    pub fn fail_next(&self, times: u32) {
        self.failures.store(times, Ordering::SeqCst);
    }

    pub fn fail_audit_appends(&self, times: u32) {
        self.audit_failures.store(times, Ordering::SeqCst);
    }

    fn check(&self, counter: &AtomicU32) -> PipelineResult<()> {
        let consumed = counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if consumed {
            Err(PipelineError::store("injected store failure"))
        } else {
            Ok(())
        }
    }

    fn maybe_fail(&self) -> PipelineResult<()> {
        self.check(&self.failures)
    }
}

#[async_trait]
impl TaskStore for FlakyStore {
    async fn create_task(&self, task: &ParsingTask) -> PipelineResult<()> {
        self.maybe_fail()?;
        self.inner.create_task(task).await
    }

    async fn get_task(&self, task_id: &str) -> PipelineResult<ParsingTask> {
        self.maybe_fail()?;
        self.inner.get_task(task_id).await
    }

    async fn update_task_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        menu_id: Option<&str>,
        error: Option<&str>,
    ) -> PipelineResult<()> {
        self.maybe_fail()?;
        self.inner
            .update_task_status(task_id, status, menu_id, error)
            .await
    }

    async fn increment_retry_count(&self, task_id: &str) -> PipelineResult<()> {
        self.maybe_fail()?;
        self.inner.increment_retry_count(task_id).await
    }
}

#[async_trait]
impl MenuStore for FlakyStore {
    async fn create_menu(&self, menu: Menu) -> PipelineResult<Menu> {
        self.maybe_fail()?;
        self.inner.create_menu(menu).await
    }

    async fn get_menu(&self, menu_id: &str) -> PipelineResult<Menu> {
        self.maybe_fail()?;
        self.inner.get_menu(menu_id).await
    }

    async fn get_product_status(
        &self,
        restaurant_id: &str,
        product_id: &str,
    ) -> PipelineResult<ProductStatus> {
        self.maybe_fail()?;
        self.inner.get_product_status(restaurant_id, product_id).await
    }

    async fn update_product_status(
        &self,
        restaurant_id: &str,
        product_id: &str,
        new_status: ProductStatus,
    ) -> PipelineResult<ProductStatus> {
        self.maybe_fail()?;
        self.inner
            .update_product_status(restaurant_id, product_id, new_status)
            .await
    }
}

#[async_trait]
impl AuditStore for FlakyStore {
    async fn append_audit(&self, audit: &ProductStatusAudit) -> PipelineResult<()> {
        self.maybe_fail()?;
        self.check(&self.audit_failures)?;
        self.inner.append_audit(audit).await
    }

    async fn audits_for_product(&self, product_id: &str) -> PipelineResult<Vec<ProductStatusAudit>> {
        self.maybe_fail()?;
        self.inner.audits_for_product(product_id).await
    }
}

/// Queue whose publishes always fail
#[derive(Debug, Default)]
pub struct FailingQueue {
    pub publish_attempts: Arc<AtomicUsize>,
}

impl FailingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> usize {
        self.publish_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueueTransport for FailingQueue {
    async fn publish(&self, _channel: QueueChannel, _payload: Vec<u8>) -> Result<(), TransportError> {
        self.publish_attempts.fetch_add(1, Ordering::SeqCst);
        Err(TransportError::NotConnected)
    }

    async fn consume(&self, _channel: QueueChannel) -> Result<DeliveryStream, TransportError> {
        Err(TransportError::NotConnected)
    }

    async fn ack(&self, handle: DeliveryHandle) -> Result<(), TransportError> {
        Err(TransportError::UnknownDelivery(handle.tag))
    }

    async fn reject(&self, handle: DeliveryHandle, _requeue: bool) -> Result<(), TransportError> {
        Err(TransportError::UnknownDelivery(handle.tag))
    }

    fn is_connected(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_sheet_source_scripted_failures() {
        let source = MockSheetSource::new()
            .with_rows(vec![vec![serde_json::json!("a")]])
            .with_failures(2);

        assert!(source.fetch_rows("s").await.is_err());
        assert!(source.fetch_rows("s").await.is_err());
        assert_eq!(source.fetch_rows("s").await.unwrap().len(), 1);
        assert_eq!(source.call_count(), 3);
        assert_eq!(source.requested_spreadsheets().await, vec!["s", "s", "s"]);
    }

    #[tokio::test]
    async fn test_flaky_store_fails_then_recovers() {
        let store = FlakyStore::new();
        let task = ParsingTask::new("sheet", "Cafe");
        store.create_task(&task).await.unwrap();

        store.fail_next(1);
        let error = store.get_task(&task.task_id).await.unwrap_err();
        assert!(error.is_transient());
        assert!(store.get_task(&task.task_id).await.is_ok());
    }

    #[tokio::test]
    async fn test_failing_queue() {
        let queue = FailingQueue::new();
        assert!(queue
            .publish(QueueChannel::MenuParsing, Vec::new())
            .await
            .is_err());
        assert_eq!(queue.attempts(), 1);
        assert!(!queue.is_connected());
    }
}
