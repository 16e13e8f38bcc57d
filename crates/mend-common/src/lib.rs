//! Shared foundation for the mend self-healing pipeline
//!
//! This crate provides the error taxonomy, failure classification, retry
//! policy, circuit breaker and configuration used by every other component
//! of the system.

pub mod breaker;
pub mod classify;
pub mod config;
pub mod error;
pub mod retry;
pub mod types;

pub use breaker::{BreakerConfig, BreakerRegistry, BreakerState, CircuitBreaker};
pub use classify::{classify_error, ErrorCategory, ErrorClassification, ErrorContext, Recoverability};
pub use config::{HealingConfig, HealingMode};
pub use error::{Error, Result};
pub use retry::{compute_backoff, with_deadline, RetryExecutor, RetryStrategy};
pub use types::*;
