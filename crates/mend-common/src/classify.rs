//! Failure classification: category, severity and recoverability
//!
//! Turns a raw error plus its retry context into a structured classification
//! the recovery orchestrator can act on.

use crate::retry::RetryStrategy;
use crate::types::{ActionKind, Severity};
use crate::Error;
use once_cell::sync::Lazy;
use regex::RegexSet;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Closed set of failure categories
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Connection,
    Timeout,
    Authentication,
    Authorization,
    Resource,
    RateLimit,
    Data,
    Schema,
    ServiceUnavailable,
    Configuration,
    Dependency,
    Validation,
    Unknown,
}

/// How a failure can be recovered from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Recoverability {
    AutoRecoverable,
    ManualRecoverable,
    NonRecoverable,
}

/// Context the classifier needs beyond the error itself
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    pub retry_count: u32,
    pub max_retry_attempts: u32,
    pub is_critical: bool,
    pub timeout: Option<Duration>,
    /// Named service the failure was observed against, for breaker lookup
    pub service: Option<String>,
}

impl ErrorContext {
    pub fn new(max_retry_attempts: u32) -> Self {
        ErrorContext {
            max_retry_attempts,
            ..Default::default()
        }
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn critical(mut self) -> Self {
        self.is_critical = true;
        self
    }
}

/// Structured diagnosis of a failure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorClassification {
    pub category: ErrorCategory,
    pub severity: Severity,
    pub recoverability: Recoverability,
    pub retryable: bool,
    pub suggested_actions: Vec<ActionKind>,
    pub details: HashMap<String, serde_json::Value>,
}

impl ErrorClassification {
    /// Whether the healing core may attempt autonomous remediation
    pub fn is_self_healable(&self) -> bool {
        self.recoverability == Recoverability::AutoRecoverable
    }

    pub fn requires_manual_intervention(&self) -> bool {
        matches!(
            self.recoverability,
            Recoverability::ManualRecoverable | Recoverability::NonRecoverable
        )
    }

    /// Retry strategy for this classification, if retrying makes sense
    pub fn retry_strategy(&self) -> Option<RetryStrategy> {
        if !self.retryable {
            return None;
        }
        let strategy = match self.category {
            ErrorCategory::RateLimit => RetryStrategy {
                max_retries: 5,
                backoff_factor: 2.0,
                max_delay: Duration::from_secs(300),
                jitter_factor: 0.1,
            },
            ErrorCategory::ServiceUnavailable => RetryStrategy {
                max_delay: Duration::from_secs(600),
                ..RetryStrategy::default()
            },
            _ => RetryStrategy::default(),
        };
        Some(strategy)
    }
}

/// Message fragments that mark an error as transient regardless of category
static TRANSIENT_PATTERNS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)connection reset",
        r"(?i)connection refused",
        r"(?i)timed? ?out",
        r"(?i)temporarily unavailable",
        r"(?i)too many requests",
        r"(?i)try again",
        r"(?i)quota exceeded",
        r"(?i)deadline exceeded",
        r"(?i)broken pipe",
        r"(?i)service unavailable",
    ])
    .expect("transient patterns are valid regexes")
});

/// Categories whose failures are transient by nature
const TRANSIENT_CATEGORIES: [ErrorCategory; 4] = [
    ErrorCategory::Connection,
    ErrorCategory::Timeout,
    ErrorCategory::RateLimit,
    ErrorCategory::ServiceUnavailable,
];

/// Classify an error given its retry context
pub fn classify_error(error: &Error, context: &ErrorContext) -> ErrorClassification {
    let category = determine_category(error);
    let severity = determine_severity(category, context);
    let recoverability = determine_recoverability(error, category, context);
    let retryable = recoverability == Recoverability::AutoRecoverable
        && context.retry_count < context.max_retry_attempts;

    let mut details = HashMap::new();
    details.insert(
        "message".to_string(),
        serde_json::Value::String(error.to_string()),
    );
    details.insert(
        "retry_count".to_string(),
        serde_json::Value::from(context.retry_count),
    );
    if let Some(service) = &context.service {
        details.insert(
            "service".to_string(),
            serde_json::Value::String(service.clone()),
        );
    }

    let classification = ErrorClassification {
        category,
        severity,
        recoverability,
        retryable,
        suggested_actions: suggest_actions(category),
        details,
    };
    debug!(
        category = ?classification.category,
        severity = ?classification.severity,
        recoverability = ?classification.recoverability,
        retryable = classification.retryable,
        "classified error"
    );
    classification
}

fn determine_category(error: &Error) -> ErrorCategory {
    match error {
        Error::Connection(_) => ErrorCategory::Connection,
        Error::Timeout(_) => ErrorCategory::Timeout,
        Error::Authentication(_) => ErrorCategory::Authentication,
        Error::Authorization(_) => ErrorCategory::Authorization,
        Error::Resource(_) => ErrorCategory::Resource,
        Error::RateLimit(_) => ErrorCategory::RateLimit,
        Error::Data(_) => ErrorCategory::Data,
        Error::Schema(_) | Error::Serialization(_) => ErrorCategory::Schema,
        Error::ServiceUnavailable(_) => ErrorCategory::ServiceUnavailable,
        Error::Configuration(_) => ErrorCategory::Configuration,
        Error::Dependency(_) => ErrorCategory::Dependency,
        Error::Validation(_) => ErrorCategory::Validation,
        Error::CircuitOpen(_) => ErrorCategory::ServiceUnavailable,
        Error::Store(msg) | Error::Internal(msg) => {
            // Store and internal errors are categorized by message content
            match_message_category(msg)
        }
        _ => ErrorCategory::Unknown,
    }
}

fn match_message_category(message: &str) -> ErrorCategory {
    let lower = message.to_lowercase();
    if lower.contains("connect") {
        ErrorCategory::Connection
    } else if lower.contains("timeout") || lower.contains("timed out") {
        ErrorCategory::Timeout
    } else if lower.contains("unavailable") {
        ErrorCategory::ServiceUnavailable
    } else if lower.contains("quota") || lower.contains("rate") {
        ErrorCategory::RateLimit
    } else {
        ErrorCategory::Unknown
    }
}

/// Severity table: auth-style failures are high, transient ones medium,
/// validation low. Critical context or retry exhaustion bumps one level.
fn determine_severity(category: ErrorCategory, context: &ErrorContext) -> Severity {
    let base = match category {
        ErrorCategory::Authentication
        | ErrorCategory::Authorization
        | ErrorCategory::Configuration
        | ErrorCategory::Dependency => Severity::High,
        ErrorCategory::Connection
        | ErrorCategory::Timeout
        | ErrorCategory::RateLimit
        | ErrorCategory::Resource
        | ErrorCategory::ServiceUnavailable
        | ErrorCategory::Data
        | ErrorCategory::Schema => Severity::Medium,
        ErrorCategory::Validation => Severity::Low,
        ErrorCategory::Unknown => Severity::Medium,
    };

    if context.is_critical || context.retry_count >= context.max_retry_attempts {
        base.bump()
    } else {
        base
    }
}

fn determine_recoverability(
    error: &Error,
    category: ErrorCategory,
    context: &ErrorContext,
) -> Recoverability {
    // A fast-failed request against an open breaker must not be retried
    if matches!(error, Error::CircuitOpen(_)) {
        return Recoverability::NonRecoverable;
    }

    let transient = TRANSIENT_CATEGORIES.contains(&category)
        || TRANSIENT_PATTERNS.is_match(&error.to_string());

    let recoverability = if transient {
        Recoverability::AutoRecoverable
    } else {
        match category {
            ErrorCategory::Data | ErrorCategory::Schema | ErrorCategory::Resource => {
                Recoverability::AutoRecoverable
            }
            ErrorCategory::Authentication
            | ErrorCategory::Authorization
            | ErrorCategory::Configuration
            | ErrorCategory::Dependency
            | ErrorCategory::Validation => Recoverability::ManualRecoverable,
            ErrorCategory::Unknown => Recoverability::ManualRecoverable,
            _ => Recoverability::AutoRecoverable,
        }
    };

    // Exhausted retries escalate automatic recovery to a human
    if context.retry_count >= context.max_retry_attempts
        && recoverability == Recoverability::AutoRecoverable
    {
        return Recoverability::ManualRecoverable;
    }
    recoverability
}

fn suggest_actions(category: ErrorCategory) -> Vec<ActionKind> {
    match category {
        ErrorCategory::Connection | ErrorCategory::Timeout | ErrorCategory::ServiceUnavailable => {
            vec![ActionKind::PipelineRetry, ActionKind::ParameterAdjustment]
        }
        ErrorCategory::RateLimit => vec![ActionKind::PipelineRetry],
        ErrorCategory::Resource => vec![ActionKind::ResourceScaling, ActionKind::ParameterAdjustment],
        ErrorCategory::Data | ErrorCategory::Validation => vec![ActionKind::DataCorrection],
        ErrorCategory::Schema => vec![ActionKind::SchemaEvolution, ActionKind::DataCorrection],
        ErrorCategory::Configuration => vec![ActionKind::ParameterAdjustment],
        ErrorCategory::Dependency => vec![ActionKind::DependencyResolution, ActionKind::PipelineRetry],
        ErrorCategory::Authentication | ErrorCategory::Authorization | ErrorCategory::Unknown => {
            Vec::new()
        }
    }
}
