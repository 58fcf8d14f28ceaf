//! Error types for the menu pipeline
//!
//! Every failure in the crate is a [`PipelineError`]. The worker only looks at
//! [`PipelineError::kind`] when deciding between ack, requeue and dead-letter.

use crate::domain::MAX_RETRIES_EXCEEDED;
use crate::transport::TransportError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;
use thiserror::Error;

const MAX_ERROR_MESSAGE_LEN: usize = 500;
const TRUNCATE_SUFFIX: &str = "...[truncated]";

static SECRET_ASSIGNMENT: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+").ok());

static SECRET_PATH: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"/[a-zA-Z0-9._/-]+/(secrets?|\.ssh|\.aws|\.config)/[a-zA-Z0-9._/-]+").ok()
});

/// Main error type for pipeline operations
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Store error: {message}")]
    Store { message: String },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Parse failure: {message}")]
    ParseFailure { message: String },

    #[error("Retry budget exhausted after {retries} attempts")]
    RetryExhausted { retries: u32 },

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure classes the worker's retry policy distinguishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Task, menu or product absent; never retried
    NotFound,
    /// Malformed request or payload; never retried
    Validation,
    /// Store or transport unavailable; retried
    TransientIo,
    /// Spreadsheet extraction or shape problem; counts against the retry budget
    ParseFailure,
    /// Terminal after the retry budget is spent
    RetryExhausted,
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::NotFound { .. } => ErrorKind::NotFound,
            PipelineError::Validation { .. } | PipelineError::Serialization(_) => {
                ErrorKind::Validation
            }
            PipelineError::Store { .. }
            | PipelineError::Transport(_)
            | PipelineError::Timeout(_) => ErrorKind::TransientIo,
            PipelineError::ParseFailure { .. } => ErrorKind::ParseFailure,
            PipelineError::RetryExhausted { .. } => ErrorKind::RetryExhausted,
        }
    }

    /// Whether requeueing the message that produced this error can help
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::TransientIo
    }

    /// Error text safe to persist on a task or return to a caller
    pub fn public_message(&self) -> String {
        sanitize_error_message(&self.to_string())
    }

    /// Error recorded on a parsing task when this error ends an attempt
    pub fn task_error_message(&self) -> String {
        match self {
            PipelineError::RetryExhausted { .. } => MAX_RETRIES_EXCEEDED.to_string(),
            other => other.public_message(),
        }
    }

    pub fn not_found<S: Into<String>>(entity: &'static str, id: S) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn store<S: Into<String>>(message: S) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    pub fn parse_failure<S: Into<String>>(message: S) -> Self {
        Self::ParseFailure {
            message: message.into(),
        }
    }

    pub fn retry_exhausted(retries: u32) -> Self {
        Self::RetryExhausted { retries }
    }
}

/// Redact credentials and secret-looking paths, then cap the length.
pub fn sanitize_error_message(message: &str) -> String {
    let mut sanitized = message.to_string();

    if let Some(pattern) = SECRET_ASSIGNMENT.as_ref() {
        sanitized = pattern.replace_all(&sanitized, "${1}=***").to_string();
    }
    if let Some(pattern) = SECRET_PATH.as_ref() {
        sanitized = pattern
            .replace_all(&sanitized, "/***REDACTED***/")
            .to_string();
    }

    if sanitized.len() > MAX_ERROR_MESSAGE_LEN {
        let mut cut = MAX_ERROR_MESSAGE_LEN - TRUNCATE_SUFFIX.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized.truncate(cut);
        sanitized.push_str(TRUNCATE_SUFFIX);
    }

    sanitized
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;
