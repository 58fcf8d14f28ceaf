//! The two consumption loops and their message handlers
//!
//! Each channel gets its own loop. A loop handles one delivery completely,
//! settles it, and only then pulls the next, which keeps a single message in
//! flight per channel. This is the only place that decides between ack,
//! requeue and dead-letter.

use super::retry::{Disposition, RetryPolicy};
use crate::config::WorkerSection;
use crate::domain::TaskStatus;
use crate::error::{ErrorKind, PipelineError, PipelineResult};
use crate::observability::{event_span, metrics, queue_span, task_span};
use crate::orchestrator::{MenuOrchestrator, ProductOrchestrator};
use crate::protocol::{decode_status_event, MenuParsingMessage};
use crate::transport::{Delivery, DeliveryHandle, DeliveryStream, QueueChannel, QueueTransport};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub retry: RetryPolicy,
    /// Upper bound on handling one menu-parsing message
    pub task_timeout: Duration,
    /// Upper bound on handling one status event
    pub event_timeout: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            task_timeout: Duration::from_secs(30),
            event_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&WorkerSection> for WorkerOptions {
    fn from(section: &WorkerSection) -> Self {
        Self {
            retry: RetryPolicy {
                max_retries: section.max_retries,
                backoff_unit: Duration::from_millis(section.backoff_unit_ms),
                status_event_max_requeues: section.status_event_max_requeues,
            },
            task_timeout: Duration::from_secs(section.task_timeout_secs),
            event_timeout: Duration::from_secs(section.event_timeout_secs),
        }
    }
}

pub struct PipelineWorker {
    menus: Arc<MenuOrchestrator>,
    products: Arc<ProductOrchestrator>,
    transport: Arc<dyn QueueTransport>,
    options: WorkerOptions,
    /// Requeues per status event payload, only tracked when a cap is set
    status_requeues: Mutex<HashMap<u64, u32>>,
}

impl PipelineWorker {
    pub fn new(
        menus: Arc<MenuOrchestrator>,
        products: Arc<ProductOrchestrator>,
        transport: Arc<dyn QueueTransport>,
        options: WorkerOptions,
    ) -> Self {
        Self {
            menus,
            products,
            transport,
            options,
            status_requeues: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe to both channels and spawn one loop per channel
    ///
    /// Both loops stop pulling once `cancel` fires; see
    /// [`WorkerHandle::shutdown`] for the bounded wait on in-flight work.
    pub async fn start(self: Arc<Self>, cancel: CancellationToken) -> PipelineResult<WorkerHandle> {
        let mut handles = Vec::with_capacity(QueueChannel::ALL.len());
        for channel in QueueChannel::ALL {
            let stream = self.transport.consume(channel).await?;
            let worker = Arc::clone(&self);
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                worker.run_loop(channel, stream, cancel).await;
            }));
        }

        info!("Pipeline worker started");
        Ok(WorkerHandle { cancel, handles })
    }

    async fn run_loop(&self, channel: QueueChannel, mut stream: DeliveryStream, cancel: CancellationToken) {
        info!(channel = %channel, "Consuming channel");
        loop {
            let delivery = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                delivery = stream.recv() => match delivery {
                    Some(delivery) => delivery,
                    None => {
                        warn!(channel = %channel, "Delivery stream closed");
                        break;
                    }
                },
            };
            self.handle_delivery(delivery, &cancel).await;
        }
        info!(channel = %channel, "Stopped consuming channel");
    }

    async fn handle_delivery(&self, delivery: Delivery, cancel: &CancellationToken) {
        let handle = delivery.handle;
        if delivery.redelivered {
            debug!(channel = %handle.channel, tag = handle.tag, "Redelivered message");
        }

        let disposition = match handle.channel {
            QueueChannel::MenuParsing => self.handle_menu_parsing_message(&delivery.payload).await,
            QueueChannel::ProductStatus => {
                self.handle_product_status_message(&delivery.payload).await
            }
        };

        self.settle(handle, disposition, cancel)
            .instrument(queue_span!(channel = %handle.channel, tag = handle.tag))
            .await;
    }

    /// Decide the fate of one menu-parsing message
    ///
    /// Exhaustion is checked before anything else, so a task at the retry
    /// limit fails even if the sheet would now parse.
    pub async fn handle_menu_parsing_message(&self, payload: &[u8]) -> Disposition {
        let message = match MenuParsingMessage::decode(payload) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dead-lettering undecodable menu parsing message: {}", e);
                return Disposition::DeadLetter;
            }
        };

        let task_id = message.task_id;
        self.process_task_message(&task_id)
            .instrument(task_span!(task_id = %task_id))
            .await
    }

    async fn process_task_message(&self, task_id: &str) -> Disposition {
        let policy = &self.options.retry;

        let task = match self.menus.get_task(task_id).await {
            Ok(task) => task,
            Err(e) if e.is_transient() => {
                warn!("Could not load task, requeueing: {}", e);
                return Disposition::Requeue {
                    delay: policy.backoff_delay(0),
                };
            }
            Err(e) => {
                warn!("Dead-lettering message for unusable task: {}", e);
                return Disposition::DeadLetter;
            }
        };

        if let Err(exhausted) = policy.check_budget(task.retry_count) {
            if task.status == TaskStatus::Failed {
                warn!("Task already failed, dead-lettering redelivery");
                return Disposition::DeadLetter;
            }
            warn!(retry_count = task.retry_count, "{}", exhausted);
            return match self
                .menus
                .mark_task_failed(task_id, &exhausted.task_error_message())
                .await
            {
                Ok(()) => Disposition::DeadLetter,
                Err(e) if e.is_transient() => {
                    error!("Could not mark task failed, requeueing: {}", e);
                    Disposition::Requeue {
                        delay: policy.backoff_delay(0),
                    }
                }
                Err(e) => {
                    error!("Could not mark task failed: {}", e);
                    Disposition::DeadLetter
                }
            };
        }

        match task.status {
            TaskStatus::Completed => {
                info!("Task already completed, acknowledging duplicate delivery");
                metrics().duplicate_delivery();
                return Disposition::Ack;
            }
            TaskStatus::Failed => {
                warn!("Task already failed, dead-lettering");
                return Disposition::DeadLetter;
            }
            TaskStatus::Queued | TaskStatus::Processing => {}
        }

        let started = Instant::now();
        let result = with_timeout(
            self.options.task_timeout,
            self.menus.process_menu_parsing(task_id),
        )
        .await;

        match result {
            Ok(_menu_id) => {
                metrics().task_completed(started.elapsed());
                Disposition::Ack
            }
            Err(failure) => {
                let delay = policy.backoff_delay(task.retry_count);
                warn!(
                    retry_count = task.retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "Menu parsing failed: {}",
                    failure
                );
                if let Err(e) = self
                    .menus
                    .return_task_to_queue(task_id, &failure.task_error_message())
                    .await
                {
                    error!("Could not record failed attempt: {}", e);
                }
                metrics().task_retried(delay);
                Disposition::Requeue { delay }
            }
        }
    }

    /// Decide the fate of one product-status event
    pub async fn handle_product_status_message(&self, payload: &[u8]) -> Disposition {
        let event = match decode_status_event(payload) {
            Ok(event) => event,
            Err(e) => {
                warn!("Dead-lettering undecodable status event: {}", e);
                return Disposition::DeadLetter;
            }
        };

        let span = event_span!(
            restaurant_id = %event.restaurant_id,
            product_id = %event.product_id,
            new_status = %event.new_status
        );

        async {
            let result = with_timeout(
                self.options.event_timeout,
                self.products.apply_status_event(&event),
            )
            .await;

            match result {
                Ok(_) => {
                    self.forget_requeues(payload).await;
                    metrics().status_event_applied();
                    Disposition::Ack
                }
                Err(e) => match e.kind() {
                    ErrorKind::TransientIo => self.requeue_status_event(payload, &e).await,
                    _ => {
                        warn!("Dead-lettering status event: {}", e);
                        self.forget_requeues(payload).await;
                        Disposition::DeadLetter
                    }
                },
            }
        }
        .instrument(span)
        .await
    }

    async fn requeue_status_event(&self, payload: &[u8], error: &PipelineError) -> Disposition {
        let policy = &self.options.retry;
        if policy.status_event_max_requeues.is_some() {
            let mut requeues = self.status_requeues.lock().await;
            let count = requeues.entry(payload_key(payload)).or_insert(0);
            if !policy.may_requeue_status_event(*count) {
                warn!(requeues = *count, "Status event requeue cap reached: {}", error);
                requeues.remove(&payload_key(payload));
                return Disposition::DeadLetter;
            }
            *count += 1;
        }

        warn!("Applying status event failed, requeueing: {}", error);
        metrics().status_event_requeued();
        Disposition::requeue_now()
    }

    async fn forget_requeues(&self, payload: &[u8]) {
        if self.options.retry.status_event_max_requeues.is_some() {
            self.status_requeues.lock().await.remove(&payload_key(payload));
        }
    }

    async fn settle(&self, handle: DeliveryHandle, disposition: Disposition, cancel: &CancellationToken) {
        let result = match disposition {
            Disposition::Ack => self.transport.ack(handle).await,
            Disposition::Requeue { delay } => {
                if !delay.is_zero() {
                    tokio::select! {
                        _ = cancel.cancelled() => debug!("Shutdown during backoff, requeueing now"),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                self.transport.reject(handle, true).await
            }
            Disposition::DeadLetter => self.transport.reject(handle, false).await,
        };

        match result {
            Ok(()) => debug!(?disposition, "Delivery settled"),
            Err(e) => error!(?disposition, "Failed to settle delivery: {}", e),
        }
    }
}

async fn with_timeout<T>(
    limit: Duration,
    operation: impl Future<Output = PipelineResult<T>>,
) -> PipelineResult<T> {
    tokio::time::timeout(limit, operation)
        .await
        .unwrap_or_else(|_| Err(PipelineError::Timeout(limit)))
}

fn payload_key(payload: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    payload.hash(&mut hasher);
    hasher.finish()
}

/// Running consumption loops
pub struct WorkerHandle {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop pulling new messages and wait up to `grace` for in-flight
    /// handling. Loops still running after that are aborted; their
    /// unsettled deliveries stay on the queue.
    pub async fn shutdown(mut self, grace: Duration) {
        self.cancel.cancel();

        let finished = tokio::time::timeout(grace, async {
            for handle in self.handles.iter_mut() {
                if let Err(e) = handle.await {
                    if !e.is_cancelled() {
                        error!("Worker loop ended with error: {}", e);
                    }
                }
            }
        })
        .await;

        if finished.is_err() {
            warn!(
                grace_ms = grace.as_millis() as u64,
                "Worker loops did not stop within the grace period, aborting"
            );
            for handle in &self.handles {
                handle.abort();
            }
        }
        info!("Pipeline worker stopped");
    }

    /// Wait for both loops to end on their own
    pub async fn join(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}
