//! Error types for queue operations.

use thiserror::Error;

/// Comprehensive error type for all queue operations
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue not found: {queue_name}")]
    QueueNotFound { queue_name: String },

    #[error("Message not found or receipt expired: {receipt}")]
    MessageNotFound { receipt: String },

    #[error("Queue '{queue_name}' already exists: {message}")]
    Conflict { queue_name: String, message: String },

    #[error("Transport failure: {message}")]
    Transport { message: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Service error: {code} - {message}")]
    Service { code: String, message: String },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Poller task terminated abnormally: {message}")]
    PollerTerminated { message: String },
}

impl QueueError {
    /// Check if error signals an absent queue or message handle
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::QueueNotFound { .. } | Self::MessageNotFound { .. }
        )
    }

    /// Check if error is transient and the caller may reasonably try again
    pub fn is_transient(&self) -> bool {
        match self {
            Self::QueueNotFound { .. } => false,
            Self::MessageNotFound { .. } => false,
            Self::Conflict { .. } => false,
            Self::Transport { .. } => true,
            Self::AuthenticationFailed { .. } => false,
            Self::Service { .. } => true,
            Self::Validation(_) => false,
            Self::Configuration(_) => false,
            Self::Serialization(_) => false,
            Self::PollerTerminated { .. } => false,
        }
    }
}

/// Errors during message body serialization/deserialization
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("JSON serialization failed: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Message attribute '{key}' has invalid value")]
    InvalidAttribute { key: String },
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {key}")]
    Missing { key: String },

    #[error("Configuration parsing failed: {message}")]
    Parsing { message: String },
}

impl From<config::ConfigError> for ConfigurationError {
    fn from(err: config::ConfigError) -> Self {
        match err {
            config::ConfigError::NotFound(key) => Self::Missing { key },
            other => Self::Parsing {
                message: other.to_string(),
            },
        }
    }
}

/// Validation errors, raised before any request reaches the queue service
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    Required { field: String },

    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },

    #[error("Batch size {size} exceeds maximum {max_size}")]
    BatchTooLarge { size: usize, max_size: usize },

    #[error("Batch entry id '{id}' is not unique within the batch")]
    DuplicateBatchId { id: String },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
