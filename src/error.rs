//! Typed error taxonomy shared across the pipeline components.
//!
//! Each variant corresponds to one of the error classes a component is
//! allowed to surface; callers match on the class to decide whether to
//! retry, degrade, or abort. Display text is the human-readable reason
//! that ends up in `analysis:failed` events and admin-facing responses.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Missing API key, absent watch path, malformed URL — fatal at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Storage/queue/bus connectivity — recoverable via reconnection.
    #[error("transient I/O error: {0}")]
    TransientIo(String),

    /// 429-class response or message containing a rate-limit marker.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// 529-class response or message containing an overload marker.
    #[error("overloaded: {0}")]
    Overloaded(String),

    /// A `withTimeout`-wrapped operation exceeded its deadline.
    #[error("timed out after {0}: {1}")]
    Timeout(u64, String),

    /// Bad directory, not a project, oversized file — the job fails, neighbors unaffected.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The external analyzer produced unparseable content.
    #[error("parse failed: {0}")]
    Parse(String),

    /// Unique-path race, or delete-while-active on a queue job.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl PipelineError {
    /// Whether this error class is retryable per the rate/overload/timeout taxonomy.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::TransientIo(_)
                | PipelineError::RateLimited(_)
                | PipelineError::Overloaded(_)
                | PipelineError::Timeout(_, _)
        )
    }

    /// Classify a transport-level error by status code and message content,
    /// per the retry classification shared by the executor, analyzer, and queue.
    pub fn classify(status: Option<u16>, message: &str) -> Self {
        let lower = message.to_lowercase();
        match status {
            Some(429) => PipelineError::RateLimited(message.to_string()),
            Some(529) => PipelineError::Overloaded(message.to_string()),
            _ if lower.contains("rate_limit") => PipelineError::RateLimited(message.to_string()),
            _ if lower.contains("overloaded") => PipelineError::Overloaded(message.to_string()),
            _ if lower.contains("aborted") || lower.contains("timed out") => {
                PipelineError::Timeout(0, message.to_string())
            }
            _ => PipelineError::TransientIo(message.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
