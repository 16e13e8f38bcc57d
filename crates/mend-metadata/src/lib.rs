//! Metadata store for the mend pipeline core
//!
//! Records every tracked event (source registration, pipeline definitions,
//! executions, tasks, schema/quality/healing events) as a typed document in
//! the document store, and batch-exports derived rows to the analytical
//! store.

pub mod masking;
pub mod records;
pub mod tracker;

pub use masking::mask_sensitive_values;
pub use records::{
    PipelineDefinition, PipelineExecution, QualityEvent, RecordType, SourceSystem, TaskExecution,
};
pub use tracker::MetadataTracker;
