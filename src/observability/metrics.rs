//! Process-wide pipeline counters
//!
//! Atomic counters for the two worker loops and the queue transport, plus a
//! bounded window of task processing times for latency percentiles.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const MAX_TIMING_SAMPLES: usize = 1000;

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

/// Thread-safe metrics collector
pub struct MetricsCollector {
    tasks_submitted: AtomicU64,
    tasks_completed: AtomicU64,
    tasks_failed: AtomicU64,
    task_retries: AtomicU64,
    duplicate_deliveries: AtomicU64,

    status_updates_requested: AtomicU64,
    status_events_applied: AtomicU64,
    status_events_requeued: AtomicU64,

    queue_connected: AtomicBool,
    messages_published: AtomicU64,
    messages_received: AtomicU64,
    messages_acked: AtomicU64,
    messages_requeued: AtomicU64,
    messages_dead_lettered: AtomicU64,

    processing_times: Mutex<Vec<u64>>,
    started_at: AtomicU64,
}

/// Serializable view of the counters
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MetricsSnapshot {
    pub timestamp: u64,
    pub uptime_seconds: u64,
    pub tasks: TaskMetrics,
    pub status_events: StatusEventMetrics,
    pub queue: QueueMetrics,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TaskMetrics {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub retries: u64,
    pub duplicate_deliveries: u64,
    pub avg_processing_time_ms: f64,
    pub processing_time_p50_ms: f64,
    pub processing_time_p95_ms: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatusEventMetrics {
    pub requested: u64,
    pub applied: u64,
    pub requeued: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct QueueMetrics {
    pub connected: bool,
    pub published: u64,
    pub received: u64,
    pub acked: u64,
    pub requeued: u64,
    pub dead_lettered: u64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            tasks_submitted: AtomicU64::new(0),
            tasks_completed: AtomicU64::new(0),
            tasks_failed: AtomicU64::new(0),
            task_retries: AtomicU64::new(0),
            duplicate_deliveries: AtomicU64::new(0),
            status_updates_requested: AtomicU64::new(0),
            status_events_applied: AtomicU64::new(0),
            status_events_requeued: AtomicU64::new(0),
            queue_connected: AtomicBool::new(false),
            messages_published: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            messages_acked: AtomicU64::new(0),
            messages_requeued: AtomicU64::new(0),
            messages_dead_lettered: AtomicU64::new(0),
            processing_times: Mutex::new(Vec::new()),
            started_at: AtomicU64::new(current_timestamp()),
        }
    }

    // Menu-parsing tasks
    pub fn task_submitted(&self) {
        self.tasks_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_completed(&self, duration: Duration) {
        self.tasks_completed.fetch_add(1, Ordering::Relaxed);
        self.record_processing_time(duration);
    }

    pub fn task_failed(&self) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_retried(&self, duration: Duration) {
        self.task_retries.fetch_add(1, Ordering::Relaxed);
        self.record_processing_time(duration);
    }

    pub fn duplicate_delivery(&self) {
        self.duplicate_deliveries.fetch_add(1, Ordering::Relaxed);
    }

    // Product status events
    pub fn status_update_requested(&self) {
        self.status_updates_requested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn status_event_applied(&self) {
        self.status_events_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn status_event_requeued(&self) {
        self.status_events_requeued.fetch_add(1, Ordering::Relaxed);
    }

    // Queue transport
    pub fn queue_connection_changed(&self, connected: bool) {
        self.queue_connected.store(connected, Ordering::Relaxed);
    }

    pub fn message_published(&self) {
        self.messages_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_acked(&self) {
        self.messages_acked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_requeued(&self) {
        self.messages_requeued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_dead_lettered(&self) {
        self.messages_dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    fn record_processing_time(&self, duration: Duration) {
        if let Ok(mut times) = self.processing_times.lock() {
            times.push(duration.as_millis() as u64);
            if times.len() > MAX_TIMING_SAMPLES {
                times.remove(0);
            }
        }
    }

    /// (avg, p50, p95) over the retained samples
    fn processing_time_statistics(&self) -> (f64, f64, f64) {
        let Ok(times) = self.processing_times.lock() else {
            return (0.0, 0.0, 0.0);
        };
        if times.is_empty() {
            return (0.0, 0.0, 0.0);
        }

        let mut sorted = times.clone();
        sorted.sort_unstable();
        let avg = sorted.iter().sum::<u64>() as f64 / sorted.len() as f64;
        (avg, percentile(&sorted, 50.0), percentile(&sorted, 95.0))
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let (avg, p50, p95) = self.processing_time_statistics();

        MetricsSnapshot {
            timestamp: now,
            uptime_seconds: now.saturating_sub(self.started_at.load(Ordering::Relaxed)),
            tasks: TaskMetrics {
                submitted: self.tasks_submitted.load(Ordering::Relaxed),
                completed: self.tasks_completed.load(Ordering::Relaxed),
                failed: self.tasks_failed.load(Ordering::Relaxed),
                retries: self.task_retries.load(Ordering::Relaxed),
                duplicate_deliveries: self.duplicate_deliveries.load(Ordering::Relaxed),
                avg_processing_time_ms: avg,
                processing_time_p50_ms: p50,
                processing_time_p95_ms: p95,
            },
            status_events: StatusEventMetrics {
                requested: self.status_updates_requested.load(Ordering::Relaxed),
                applied: self.status_events_applied.load(Ordering::Relaxed),
                requeued: self.status_events_requeued.load(Ordering::Relaxed),
            },
            queue: QueueMetrics {
                connected: self.queue_connected.load(Ordering::Relaxed),
                published: self.messages_published.load(Ordering::Relaxed),
                received: self.messages_received.load(Ordering::Relaxed),
                acked: self.messages_acked.load(Ordering::Relaxed),
                requeued: self.messages_requeued.load(Ordering::Relaxed),
                dead_lettered: self.messages_dead_lettered.load(Ordering::Relaxed),
            },
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn percentile(sorted_data: &[u64], percentile: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }

    let index = (percentile / 100.0) * (sorted_data.len() - 1) as f64;
    let lower = sorted_data[index.floor() as usize] as f64;
    let upper = sorted_data[index.ceil() as usize] as f64;
    lower + (upper - lower) * index.fract()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_counters() {
        let collector = MetricsCollector::new();
        collector.task_submitted();
        collector.task_submitted();
        collector.task_retried(Duration::from_millis(10));
        collector.task_completed(Duration::from_millis(30));
        collector.task_failed();

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.tasks.submitted, 2);
        assert_eq!(snapshot.tasks.retries, 1);
        assert_eq!(snapshot.tasks.completed, 1);
        assert_eq!(snapshot.tasks.failed, 1);
        assert_eq!(snapshot.tasks.avg_processing_time_ms, 20.0);
    }

    #[test]
    fn test_queue_counters() {
        let collector = MetricsCollector::new();
        collector.queue_connection_changed(true);
        collector.message_received();
        collector.message_acked();
        collector.message_requeued();
        collector.message_dead_lettered();

        let queue = collector.snapshot().queue;
        assert!(queue.connected);
        assert_eq!(queue.received, 1);
        assert_eq!(queue.acked, 1);
        assert_eq!(queue.requeued, 1);
        assert_eq!(queue.dead_lettered, 1);
    }

    #[test]
    fn test_percentile_interpolates() {
        assert_eq!(percentile(&[], 50.0), 0.0);
        assert_eq!(percentile(&[10], 95.0), 10.0);
        assert_eq!(percentile(&[10, 20, 30], 50.0), 20.0);
        assert_eq!(percentile(&[0, 100], 50.0), 50.0);
    }

    #[test]
    fn test_timing_window_is_bounded() {
        let collector = MetricsCollector::new();
        for _ in 0..(MAX_TIMING_SAMPLES + 10) {
            collector.task_completed(Duration::from_millis(1));
        }
        let retained = collector.processing_times.lock().map(|t| t.len()).unwrap();
        assert_eq!(retained, MAX_TIMING_SAMPLES);
    }

    #[test]
    fn test_snapshot_serializes() {
        let json = serde_json::to_value(MetricsCollector::new().snapshot()).unwrap();
        assert!(json["tasks"]["submitted"].is_u64());
        assert!(json["queue"]["connected"].is_boolean());
    }
}
