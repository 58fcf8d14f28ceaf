//! Retry, backoff and dead-letter decisions

use crate::error::{PipelineError, PipelineResult};
use std::time::Duration;

/// What to do with a delivery once it has been handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    /// Wait `delay`, then reject back onto the channel
    Requeue { delay: Duration },
    /// Reject without requeue so the broker moves it to the dead-letter channel
    DeadLetter,
}

impl Disposition {
    pub fn requeue_now() -> Self {
        Disposition::Requeue {
            delay: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts a parsing task gets before it is failed
    pub max_retries: u32,
    /// One backoff time unit
    pub backoff_unit: Duration,
    /// Cap on requeues of a single status event; `None` requeues forever
    pub status_event_max_requeues: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_unit: Duration::from_secs(1),
            status_event_max_requeues: None,
        }
    }
}

impl RetryPolicy {
    pub fn is_exhausted(&self, retry_count: u32) -> bool {
        retry_count >= self.max_retries
    }

    /// `RetryExhausted` once `retry_count` has used up the budget
    pub fn check_budget(&self, retry_count: u32) -> PipelineResult<()> {
        if self.is_exhausted(retry_count) {
            Err(PipelineError::retry_exhausted(retry_count))
        } else {
            Ok(())
        }
    }

    /// `2^retry_count` units, where `retry_count` is read before the failed
    /// attempt is counted
    pub fn backoff_delay(&self, retry_count: u32) -> Duration {
        let factor = 1u32.checked_shl(retry_count).unwrap_or(u32::MAX);
        self.backoff_unit.saturating_mul(factor)
    }

    /// Whether a status event requeued `requeues` times already may go round again
    pub fn may_requeue_status_event(&self, requeues: u32) -> bool {
        self.status_event_max_requeues
            .map_or(true, |cap| requeues < cap)
    }
}
