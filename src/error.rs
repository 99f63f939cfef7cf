//! Error types for the admission service.

use thiserror::Error;

/// Main error type for limiter construction, lifecycle and configuration.
///
/// Rejection and cancellation are not errors; they are reported as
/// [`Admission`](crate::ratelimit::Admission) values.
#[derive(Error, Debug)]
pub enum LimiterError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unexpected failures unrelated to admission logic
    #[error("Internal error: {0}")]
    Internal(String),

    /// A background task ended abnormally
    #[error("Background task {task} failed: {reason}")]
    TaskFailed { task: String, reason: String },

    /// The limiter has already been stopped
    #[error("Limiter has been stopped")]
    Stopped,

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for admission operations.
pub type Result<T> = std::result::Result<T, LimiterError>;
