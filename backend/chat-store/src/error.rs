use crate::models::ConversationId;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

/// Distinguishes between retryable and permanent errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Retryable,
    Permanent,
}

#[derive(Debug, Error, Clone)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    /// Entity absent, or a partition key too malformed to address any partition
    #[error("not found: {0}")]
    NotFound(String),

    /// Non-positive limit, malformed cursor, invalid message payload
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Index write failed after the message write succeeded.
    /// Queued for repair, never surfaced as a send failure.
    #[error("index write failed for conversation {conversation_id}: {reason}")]
    TransientWriteFailure {
        conversation_id: ConversationId,
        reason: String,
    },

    /// Two rows claimed the same clustering key in one partition
    #[error("consistency violation: {0}")]
    ConsistencyViolation(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn not_found(entity: &str, id: impl std::fmt::Display) -> Self {
        AppError::NotFound(format!("{entity} {id}"))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Storage(_) | AppError::TransientWriteFailure { .. } => ErrorKind::Retryable,
            _ => ErrorKind::Permanent,
        }
    }

    /// Returns whether this error is retryable (e.g., a replica timing out)
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Retryable
    }

    /// Short label used for metrics and log fields
    pub fn label(&self) -> &'static str {
        match self {
            AppError::Config(_) => "config",
            AppError::NotFound(_) => "not_found",
            AppError::InvalidArgument(_) => "invalid_argument",
            AppError::TransientWriteFailure { .. } => "transient_write_failure",
            AppError::ConsistencyViolation(_) => "consistency_violation",
            AppError::Storage(_) => "storage",
            AppError::Internal(_) => "internal",
        }
    }
}
