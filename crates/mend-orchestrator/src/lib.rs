//! Recovery orchestration for the mend pipeline core
//!
//! Drives the healing state machine per attempt: classify, match patterns,
//! analyze root cause, select a strategy, run the correction engine behind
//! the approval gate, and atomically record the outcome back into pattern
//! and action statistics, metadata and lineage.

pub mod execution;
pub mod operators;
pub mod orchestrator;
pub mod repository;
pub mod sweep;

pub use execution::HealingExecution;
pub use operators::{PipelineOperators, QualityRule, ValidationResult};
pub use orchestrator::{RecoveryOrchestrator, RecoveryOutcome};
pub use repository::HealingRepository;
