//! Queue consumers and the retry policy they apply

pub mod consumer;
pub mod retry;

pub use consumer::{PipelineWorker, WorkerHandle, WorkerOptions};
pub use retry::{Disposition, RetryPolicy};
