//! Versioned schema registry over the document store

use crate::compat::{check_compatibility, compare_schemas, CompatibilityMode, CompatibilityReport};
use crate::evolution::{self, EvolutionPlan, SchemaChange};
use crate::fingerprint::fingerprint;
use crate::types::{SchemaDefinition, SchemaFormat, SchemaRecord};
use chrono::Utc;
use mend_common::{Error, Result};
use mend_store::{Criteria, DocumentStore};
use semver::Version;
use std::sync::Arc;
use tracing::{info, warn};

const COLLECTION: &str = "schemas";

/// Registry of immutable, versioned schema records.
///
/// Registration is idempotent on the content fingerprint; otherwise the new
/// version is chosen by diffing against the latest existing version:
/// breaking changes bump major, additions or modifications bump minor,
/// anything else bumps patch.
pub struct SchemaRegistry {
    store: Arc<dyn DocumentStore>,
}

impl SchemaRegistry {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        SchemaRegistry { store }
    }

    /// Register a schema, returning the existing record when the
    /// fingerprint is already known
    pub async fn register_schema(
        &self,
        schema_name: &str,
        definition: SchemaDefinition,
        format: SchemaFormat,
        source_id: Option<String>,
    ) -> Result<SchemaRecord> {
        let fp = fingerprint(&definition);
        let existing = self.versions(schema_name).await?;

        if let Some(record) = existing.iter().find(|r| r.fingerprint == fp) {
            // A fingerprint hit with differing content means the registry
            // is corrupt; that is fatal, not recoverable
            if compare_schemas(&record.definition, &definition).change_count() != 0 {
                return Err(Error::Internal(format!(
                    "schema registry corruption: fingerprint {fp} maps to differing content for '{schema_name}'"
                )));
            }
            return Ok(record.clone());
        }

        let version = match existing.last() {
            None => Version::new(1, 0, 0),
            Some(latest) => {
                let diff = compare_schemas(&latest.definition, &definition);
                let mut v = latest.version.clone();
                if diff.has_breaking_changes() {
                    v = Version::new(v.major + 1, 0, 0);
                } else if diff.change_count() > 0 {
                    v = Version::new(v.major, v.minor + 1, 0);
                } else {
                    v = Version::new(v.major, v.minor, v.patch + 1);
                }
                v
            }
        };

        let record = SchemaRecord {
            schema_id: uuid::Uuid::new_v4().to_string(),
            schema_name: schema_name.to_string(),
            definition,
            format,
            version: version.clone(),
            fingerprint: fp,
            source_id,
            registered_at: Utc::now(),
        };
        self.store
            .set(COLLECTION, &record.schema_id, serde_json::to_value(&record)?)
            .await?;
        info!(schema = schema_name, version = %version, "registered schema version");
        Ok(record)
    }

    /// All versions of a schema, ascending by semver
    pub async fn versions(&self, schema_name: &str) -> Result<Vec<SchemaRecord>> {
        let docs = self
            .store
            .query(
                COLLECTION,
                &Criteria::new().eq("schema_name", schema_name),
                None,
            )
            .await?;
        let mut records = Vec::with_capacity(docs.len());
        for doc in docs {
            records.push(serde_json::from_value::<SchemaRecord>(doc)?);
        }
        records.sort_by(|a, b| a.version.cmp(&b.version));
        Ok(records)
    }

    /// Latest version of a schema
    pub async fn get_schema(&self, schema_name: &str) -> Result<Option<SchemaRecord>> {
        Ok(self.versions(schema_name).await?.into_iter().last())
    }

    /// A specific version of a schema
    pub async fn get_schema_version(
        &self,
        schema_name: &str,
        version: &Version,
    ) -> Result<Option<SchemaRecord>> {
        Ok(self
            .versions(schema_name)
            .await?
            .into_iter()
            .find(|r| &r.version == version))
    }

    /// Check a proposed definition against the latest registered version
    pub async fn check_compatibility(
        &self,
        schema_name: &str,
        proposed: &SchemaDefinition,
        mode: CompatibilityMode,
    ) -> Result<CompatibilityReport> {
        let latest = self.get_schema(schema_name).await?.ok_or_else(|| {
            Error::NotFound(format!("schema '{schema_name}' has no registered versions"))
        })?;
        Ok(check_compatibility(&latest.definition, proposed, mode))
    }

    /// Plan an evolution of the latest version
    pub async fn plan_evolution(
        &self,
        schema_name: &str,
        changes: Vec<SchemaChange>,
        mode: CompatibilityMode,
    ) -> Result<EvolutionPlan> {
        let latest = self.get_schema(schema_name).await?.ok_or_else(|| {
            Error::NotFound(format!("schema '{schema_name}' has no registered versions"))
        })?;
        evolution::plan(schema_name, latest.version, &latest.definition, changes, mode)
    }

    /// Execute an evolution plan: always registers a new version; prior
    /// versions remain queryable
    pub async fn execute_evolution(&self, plan: &EvolutionPlan) -> Result<SchemaRecord> {
        if !plan.compatibility.compatible {
            warn!(
                schema = %plan.schema_name,
                reason = %plan.compatibility.reason,
                "executing evolution that violates its compatibility mode"
            );
        }
        let latest = self.get_schema(&plan.schema_name).await?.ok_or_else(|| {
            Error::NotFound(format!(
                "schema '{}' has no registered versions",
                plan.schema_name
            ))
        })?;
        if latest.version != plan.base_version {
            return Err(Error::Schema(format!(
                "evolution plan for '{}' is stale: planned against {}, latest is {}",
                plan.schema_name, plan.base_version, latest.version
            )));
        }
        self.register_schema(
            &plan.schema_name,
            plan.evolved.clone(),
            latest.format,
            latest.source_id.clone(),
        )
        .await
    }
}
