//! Error types and result handling for the mend pipeline core

use thiserror::Error;

/// Result type alias for mend operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for pipeline core operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Authorization error: {0}")]
    Authorization(String),

    #[error("Resource exhausted: {0}")]
    Resource(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Data error: {0}")]
    Data(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Dependency error: {0}")]
    Dependency(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Circuit breaker '{0}' is open - requests are being rejected")]
    CircuitOpen(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("Healing queue full for pipeline {0}")]
    QueueFull(String),

    #[error("Duplicate healing in flight for {0}")]
    DuplicateInFlight(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if the error is retryable at the transport level
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Connection(_)
                | Error::Timeout(_)
                | Error::RateLimit(_)
                | Error::Resource(_)
                | Error::ServiceUnavailable(_)
        )
    }

    /// Get error category label for metrics and logs
    pub fn category_label(&self) -> &'static str {
        match self {
            Error::Connection(_) => "connection",
            Error::Timeout(_) => "timeout",
            Error::Authentication(_) => "authentication",
            Error::Authorization(_) => "authorization",
            Error::Resource(_) => "resource",
            Error::RateLimit(_) => "rate_limit",
            Error::Data(_) => "data",
            Error::Schema(_) => "schema",
            Error::ServiceUnavailable(_) => "service_unavailable",
            Error::Configuration(_) => "configuration",
            Error::Dependency(_) => "dependency",
            Error::Validation(_) => "validation",
            Error::CircuitOpen(_) => "circuit_open",
            Error::Store(_) => "store",
            Error::NotFound(_) => "not_found",
            Error::InvalidTransition(_) => "invalid_transition",
            Error::QueueFull(_) => "queue_full",
            Error::DuplicateInFlight(_) => "duplicate_in_flight",
            Error::Serialization(_) => "serialization",
            Error::Internal(_) => "internal",
        }
    }
}
