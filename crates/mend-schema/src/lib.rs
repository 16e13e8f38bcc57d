//! Schema registry for the mend pipeline core
//!
//! Versioned, fingerprinted schema records with compatibility checking,
//! drift detection against live data samples, and an evolution planner that
//! emits migration scripts for external SQL systems.

pub mod compat;
pub mod drift;
pub mod evolution;
pub mod fingerprint;
pub mod registry;
pub mod types;

pub use compat::{check_compatibility, compare_schemas, CompatibilityMode, CompatibilityReport, SchemaDiff};
pub use drift::{detect_drift, infer_schema, DriftReport, DriftSeverity};
pub use evolution::{EvolutionPlan, SchemaChange};
pub use fingerprint::fingerprint;
pub use registry::SchemaRegistry;
pub use types::{FieldDef, FieldMode, SchemaDefinition, SchemaFormat, SchemaRecord};
