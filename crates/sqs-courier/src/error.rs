//! Error types for signing, transport and queue operations.

use crate::batch::BatchResult;
use thiserror::Error;

/// Comprehensive error type for all queue operations
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Action(#[from] ActionError),

    #[error("Queue not found: {queue}")]
    QueueNotFound { queue: String },

    #[error("Message body checksum mismatch: expected {expected}, got {got}")]
    Integrity {
        body: String,
        expected: String,
        got: String,
    },

    #[error("Request to {url} was already sent; prepare a new request instead")]
    RequestAlreadySent { url: String },

    #[error("Transport failure: {0}")]
    Transport(#[from] TransportError),

    #[error("XML parsing failed: {message}")]
    Xml { message: String },

    #[error("Response is missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("Payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Batch send stopped with {} bodies unsent: {source}", unsent.len())]
    BatchInterrupted {
        delivered: BatchResult,
        unsent: Vec<String>,
        source: Box<QueueError>,
    },
}

impl QueueError {
    /// Check if the error is a server-side failure worth retrying.
    ///
    /// Only service responses in the 5xx range qualify. Request defects
    /// (4xx), local failures and integrity errors are never retried here.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Action(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// The service-reported error code, when the error came from the service
    pub fn service_code(&self) -> Option<&str> {
        match self {
            Self::Action(e) => Some(&e.code),
            _ => None,
        }
    }
}

/// Error reported by the service for a named action.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{error_type} error {code} (HTTP {status}): {message}")]
pub struct ActionError {
    pub error_type: String,
    pub code: String,
    pub message: String,
    pub status: u16,
}

impl ActionError {
    /// Service error codes meaning the addressed queue does not exist.
    pub const QUEUE_MISSING_CODES: [&'static str; 2] =
        ["AWS.SimpleQueueService.NonExistentQueue", "QueueDoesNotExist"];

    pub fn is_retryable(&self) -> bool {
        (500..=599).contains(&self.status)
    }

    pub fn is_queue_missing(&self) -> bool {
        Self::QUEUE_MISSING_CODES.contains(&self.code.as_str())
    }
}

/// Failures of the underlying HTTP transport
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Request timed out: {message}")]
    Timeout { message: String },

    #[error("Connection failed: {message}")]
    Connection { message: String },

    #[error("HTTP request failed: {message}")]
    Request { message: String },
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

/// Validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    Required { field: String },

    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
