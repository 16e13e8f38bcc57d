//! Metadata tracker over the abstract document store

use crate::masking::mask_sensitive_values;
use crate::records::{
    PipelineDefinition, PipelineExecution, QualityEvent, RecordType, SourceSystem, TaskExecution,
};
use chrono::{DateTime, Utc};
use mend_common::{Error, ExecutionStatus, Result};
use mend_store::{AnalyticalStore, ColumnSpec, Criteria, DocumentStore, TableSpec};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

const EXPORT_TABLE: &str = "metadata_records";

/// Records every tracked event as a typed document and serves the query
/// surface over them. All writes stamp the standard envelope fields
/// (`metadata_id`, `record_type`, `created_at`, `updated_at`,
/// `environment`).
pub struct MetadataTracker {
    store: Arc<dyn DocumentStore>,
    warehouse: Arc<dyn AnalyticalStore>,
    environment: String,
}

impl MetadataTracker {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        warehouse: Arc<dyn AnalyticalStore>,
        environment: impl Into<String>,
    ) -> Self {
        MetadataTracker {
            store,
            warehouse,
            environment: environment.into(),
        }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    fn envelope(&self, record_type: RecordType, mut payload: Value) -> (String, Value) {
        let metadata_id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        if let Value::Object(map) = &mut payload {
            map.insert("metadata_id".into(), json!(metadata_id));
            map.insert("record_type".into(), json!(record_type.label()));
            map.insert("created_at".into(), json!(now));
            map.insert("updated_at".into(), json!(now));
            map.insert("environment".into(), json!(self.environment));
        }
        (metadata_id, payload)
    }

    /// Register or replace a source system; sensitive connection values are
    /// masked before the record is persisted.
    pub async fn track_source_system(&self, source: &SourceSystem) -> Result<String> {
        let mut payload = serde_json::to_value(source)?;
        mask_sensitive_values(&mut payload);
        let (metadata_id, doc) = self.envelope(RecordType::SourceSystem, payload);
        self.store
            .set(RecordType::SourceSystem.collection(), &source.source_id, doc)
            .await?;
        debug!(source_id = %source.source_id, "tracked source system");
        Ok(metadata_id)
    }

    pub async fn track_pipeline_definition(&self, def: &PipelineDefinition) -> Result<String> {
        let payload = serde_json::to_value(def)?;
        let (metadata_id, doc) = self.envelope(RecordType::PipelineDefinition, payload);
        self.store
            .set(RecordType::PipelineDefinition.collection(), &def.pipeline_id, doc)
            .await?;
        debug!(pipeline_id = %def.pipeline_id, "tracked pipeline definition");
        Ok(metadata_id)
    }

    pub async fn track_pipeline_execution(&self, execution: &PipelineExecution) -> Result<String> {
        let payload = serde_json::to_value(execution)?;
        let (metadata_id, doc) = self.envelope(RecordType::PipelineExecution, payload);
        self.store
            .set(
                RecordType::PipelineExecution.collection(),
                &execution.execution_id,
                doc,
            )
            .await?;
        info!(
            execution_id = %execution.execution_id,
            pipeline_id = %execution.pipeline_id,
            status = %execution.status,
            "tracked pipeline execution"
        );
        Ok(metadata_id)
    }

    /// Update a pipeline execution's status. Terminal statuses are sticky:
    /// once SUCCESS or FAILED the only way out is `reset_pipeline_execution`.
    /// A terminal transition sets `end_time` and computes
    /// `duration_seconds`.
    pub async fn update_pipeline_execution(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
        metrics: Option<HashMap<String, Value>>,
        error_details: Option<Value>,
    ) -> Result<Value> {
        let result = self
            .store
            .update(
                RecordType::PipelineExecution.collection(),
                execution_id,
                Box::new(move |doc| apply_status_update(doc, status, metrics, error_details)),
            )
            .await;
        if let Err(e) = &result {
            warn!(execution_id, %e, "pipeline execution update rejected");
        }
        result
    }

    /// Manual reset of a terminal execution back to PENDING
    pub async fn reset_pipeline_execution(&self, execution_id: &str) -> Result<Value> {
        self.store
            .update(
                RecordType::PipelineExecution.collection(),
                execution_id,
                Box::new(|doc| {
                    doc["status"] = json!(ExecutionStatus::Pending);
                    doc["end_time"] = Value::Null;
                    doc["duration_seconds"] = Value::Null;
                    doc["error_details"] = Value::Null;
                    doc["updated_at"] = json!(Utc::now().to_rfc3339());
                    Ok(())
                }),
            )
            .await
    }

    pub async fn track_task_execution(&self, task: &TaskExecution) -> Result<String> {
        let payload = serde_json::to_value(task)?;
        let (metadata_id, doc) = self.envelope(RecordType::TaskExecution, payload);
        let key = task_key(&task.execution_id, &task.task_id);
        self.store
            .set(RecordType::TaskExecution.collection(), &key, doc)
            .await?;
        Ok(metadata_id)
    }

    pub async fn update_task_execution(
        &self,
        execution_id: &str,
        task_id: &str,
        status: ExecutionStatus,
        metrics: Option<HashMap<String, Value>>,
        error_details: Option<Value>,
    ) -> Result<Value> {
        self.store
            .update(
                RecordType::TaskExecution.collection(),
                &task_key(execution_id, task_id),
                Box::new(move |doc| apply_status_update(doc, status, metrics, error_details)),
            )
            .await
    }

    /// Track a registered schema version (keyed by schema id)
    pub async fn track_schema_metadata(&self, schema_id: &str, payload: Value) -> Result<String> {
        let (metadata_id, doc) = self.envelope(RecordType::SchemaMetadata, payload);
        self.store
            .set(RecordType::SchemaMetadata.collection(), schema_id, doc)
            .await?;
        Ok(metadata_id)
    }

    pub async fn track_data_quality_metadata(&self, event: &QualityEvent) -> Result<String> {
        let payload = serde_json::to_value(event)?;
        let (metadata_id, doc) = self.envelope(RecordType::QualityMetadata, payload);
        self.store
            .set(RecordType::QualityMetadata.collection(), &event.validation_id, doc)
            .await?;
        Ok(metadata_id)
    }

    /// Track a self-healing event (keyed by healing id)
    pub async fn track_self_healing_metadata(
        &self,
        healing_id: &str,
        payload: Value,
    ) -> Result<String> {
        let (metadata_id, doc) = self.envelope(RecordType::HealingMetadata, payload);
        self.store
            .set(RecordType::HealingMetadata.collection(), healing_id, doc)
            .await?;
        Ok(metadata_id)
    }

    /// Fetch a record by document key or metadata id, searching every
    /// collection
    pub async fn get_metadata_record(&self, id: &str) -> Result<Option<Value>> {
        for record_type in RecordType::ALL {
            if let Some(doc) = self.store.get(record_type.collection(), id).await? {
                return Ok(Some(doc));
            }
        }
        for record_type in RecordType::ALL {
            let found = self
                .store
                .query(
                    record_type.collection(),
                    &Criteria::new().eq("metadata_id", id),
                    Some(1),
                )
                .await?;
            if let Some(doc) = found.into_iter().next() {
                return Ok(Some(doc));
            }
        }
        Ok(None)
    }

    /// Pipeline definition plus its most recent executions (newest first)
    pub async fn get_pipeline_metadata(
        &self,
        pipeline_id: &str,
        recent_limit: usize,
    ) -> Result<Option<Value>> {
        let Some(definition) = self
            .store
            .get(RecordType::PipelineDefinition.collection(), pipeline_id)
            .await?
        else {
            return Ok(None);
        };
        let mut executions = self
            .store
            .query(
                RecordType::PipelineExecution.collection(),
                &Criteria::new().eq("pipeline_id", pipeline_id),
                None,
            )
            .await?;
        executions.sort_by(|a, b| {
            field_str(b, "created_at").cmp(&field_str(a, "created_at"))
        });
        executions.truncate(recent_limit);
        Ok(Some(json!({
            "definition": definition,
            "recent_executions": executions,
        })))
    }

    /// Execution record with optionally attached tasks, quality events and
    /// healing events
    pub async fn get_execution_metadata(
        &self,
        execution_id: &str,
        include_tasks: bool,
        include_quality: bool,
        include_healing: bool,
    ) -> Result<Option<Value>> {
        let Some(execution) = self
            .store
            .get(RecordType::PipelineExecution.collection(), execution_id)
            .await?
        else {
            return Ok(None);
        };
        let mut result = json!({ "execution": execution });
        let by_execution = Criteria::new().eq("execution_id", execution_id);
        if include_tasks {
            result["tasks"] = Value::Array(
                self.store
                    .query(RecordType::TaskExecution.collection(), &by_execution, None)
                    .await?,
            );
        }
        if include_quality {
            result["quality"] = Value::Array(
                self.store
                    .query(RecordType::QualityMetadata.collection(), &by_execution, None)
                    .await?,
            );
        }
        if include_healing {
            result["healing"] = Value::Array(
                self.store
                    .query(RecordType::HealingMetadata.collection(), &by_execution, None)
                    .await?,
            );
        }
        Ok(Some(result))
    }

    /// Search one record type, or all of them when `record_type` is `None`
    pub async fn search_metadata(
        &self,
        criteria: &Criteria,
        record_type: Option<RecordType>,
        limit: usize,
    ) -> Result<Vec<Value>> {
        match record_type {
            Some(rt) => self.store.query(rt.collection(), criteria, Some(limit)).await,
            None => {
                let mut results = Vec::new();
                for rt in RecordType::ALL {
                    if results.len() >= limit {
                        break;
                    }
                    let remaining = limit - results.len();
                    let mut found = self
                        .store
                        .query(rt.collection(), criteria, Some(remaining))
                        .await?;
                    results.append(&mut found);
                }
                Ok(results)
            }
        }
    }

    /// Batch-export records updated within `[start, end]` to the analytical
    /// store. The warehouse rows are derived from the document store and
    /// carry the full record as a payload column.
    pub async fn export_metadata(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<usize> {
        self.warehouse
            .create_table(&TableSpec {
                name: EXPORT_TABLE.into(),
                columns: vec![
                    column("metadata_id", "STRING", false),
                    column("record_type", "STRING", false),
                    column("created_at", "TIMESTAMP", false),
                    column("updated_at", "TIMESTAMP", false),
                    column("environment", "STRING", false),
                    column("payload", "JSON", true),
                ],
            })
            .await?;

        let window = Criteria::new()
            .gte("updated_at", start.to_rfc3339())
            .lte("updated_at", end.to_rfc3339());
        let mut exported = 0usize;
        for record_type in RecordType::ALL {
            let docs = self
                .store
                .query(record_type.collection(), &window, None)
                .await?;
            if docs.is_empty() {
                continue;
            }
            let rows: Vec<Value> = docs
                .into_iter()
                .map(|doc| {
                    json!({
                        "metadata_id": doc["metadata_id"],
                        "record_type": doc["record_type"],
                        "created_at": doc["created_at"],
                        "updated_at": doc["updated_at"],
                        "environment": doc["environment"],
                        "payload": doc,
                    })
                })
                .collect();
            exported += rows.len();
            self.warehouse.insert_rows(EXPORT_TABLE, rows).await?;
        }
        info!(exported, "exported metadata records to warehouse");
        Ok(exported)
    }
}

fn task_key(execution_id: &str, task_id: &str) -> String {
    format!("{execution_id}/{task_id}")
}

fn column(name: &str, column_type: &str, nullable: bool) -> ColumnSpec {
    ColumnSpec {
        name: name.into(),
        column_type: column_type.into(),
        nullable,
    }
}

fn field_str(doc: &Value, field: &str) -> String {
    doc[field].as_str().unwrap_or_default().to_string()
}

/// Shared status-update rule for pipeline and task executions
fn apply_status_update(
    doc: &mut Value,
    status: ExecutionStatus,
    metrics: Option<HashMap<String, Value>>,
    error_details: Option<Value>,
) -> Result<()> {
    let current: ExecutionStatus = serde_json::from_value(doc["status"].clone())?;
    if current.is_terminal() && current != status {
        return Err(Error::InvalidTransition(format!(
            "execution already {current}, cannot transition to {status}"
        )));
    }

    doc["status"] = serde_json::to_value(status)?;
    if status.is_terminal() {
        let end = Utc::now();
        doc["end_time"] = json!(end.to_rfc3339());
        if let Some(start) = doc["start_time"]
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        {
            let duration = (end - start.with_timezone(&Utc)).num_milliseconds() as f64 / 1000.0;
            doc["duration_seconds"] = json!(duration.max(0.0));
        }
    }
    if let Some(metrics) = metrics {
        let entry = doc["metrics"].as_object_mut();
        if let Some(map) = entry {
            for (k, v) in metrics {
                map.insert(k, v);
            }
        } else {
            doc["metrics"] = json!(metrics);
        }
    }
    if let Some(details) = error_details {
        doc["error_details"] = details;
    }
    doc["updated_at"] = json!(Utc::now().to_rfc3339());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use mend_common::SourceKind;
    use mend_store::{MemoryAnalyticalStore, MemoryDocumentStore};

    fn tracker() -> (MetadataTracker, Arc<MemoryAnalyticalStore>) {
        let warehouse = Arc::new(MemoryAnalyticalStore::new());
        let tracker = MetadataTracker::new(
            Arc::new(MemoryDocumentStore::new()),
            warehouse.clone(),
            "test",
        );
        (tracker, warehouse)
    }

    fn execution(id: &str) -> PipelineExecution {
        PipelineExecution::started(id, "p1")
    }

    #[tokio::test]
    async fn source_connection_secrets_are_masked_at_rest() {
        let (tracker, _) = tracker();
        let source = SourceSystem {
            source_id: "s1".into(),
            name: "orders db".into(),
            kind: SourceKind::RelationalDb,
            connection_details: json!({"host": "db", "password": "hunter42"}),
            schema_version: None,
            retired: false,
        };
        tracker.track_source_system(&source).await.unwrap();
        let doc = tracker.get_metadata_record("s1").await.unwrap().unwrap();
        assert_eq!(doc["connection_details"]["password"], "h******2");
        assert_eq!(doc["environment"], "test");
        assert_eq!(doc["record_type"], "source_system");
    }

    #[tokio::test]
    async fn terminal_update_sets_end_time_and_duration() {
        let (tracker, _) = tracker();
        tracker.track_pipeline_execution(&execution("e1")).await.unwrap();
        let doc = tracker
            .update_pipeline_execution("e1", ExecutionStatus::Success, None, None)
            .await
            .unwrap();
        assert_eq!(doc["status"], "SUCCESS");
        assert!(doc["end_time"].is_string());
        assert!(doc["duration_seconds"].as_f64().unwrap() >= 0.0);
    }

    #[tokio::test]
    async fn terminal_status_is_sticky_until_reset() {
        let (tracker, _) = tracker();
        tracker.track_pipeline_execution(&execution("e1")).await.unwrap();
        tracker
            .update_pipeline_execution("e1", ExecutionStatus::Failed, None, None)
            .await
            .unwrap();
        let rejected = tracker
            .update_pipeline_execution("e1", ExecutionStatus::Running, None, None)
            .await;
        assert_matches!(rejected, Err(Error::InvalidTransition(_)));

        tracker.reset_pipeline_execution("e1").await.unwrap();
        let doc = tracker
            .update_pipeline_execution("e1", ExecutionStatus::Running, None, None)
            .await
            .unwrap();
        assert_eq!(doc["status"], "RUNNING");
    }

    #[tokio::test]
    async fn update_preserves_created_at_and_advances_updated_at() {
        let (tracker, _) = tracker();
        tracker.track_pipeline_execution(&execution("e1")).await.unwrap();
        let before = tracker.get_metadata_record("e1").await.unwrap().unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let after = tracker
            .update_pipeline_execution("e1", ExecutionStatus::Success, None, None)
            .await
            .unwrap();
        assert_eq!(before["created_at"], after["created_at"]);
        assert!(field_str(&after, "updated_at") > field_str(&before, "updated_at"));
    }

    #[tokio::test]
    async fn execution_metadata_attaches_children() {
        let (tracker, _) = tracker();
        tracker.track_pipeline_execution(&execution("e1")).await.unwrap();
        let task = TaskExecution {
            task_id: "extract".into(),
            execution_id: "e1".into(),
            task_kind: "extract".into(),
            status: ExecutionStatus::Running,
            start_time: Utc::now(),
            end_time: None,
            duration_seconds: None,
            parameters: HashMap::new(),
            metrics: HashMap::new(),
            error_details: None,
        };
        tracker.track_task_execution(&task).await.unwrap();
        tracker
            .track_self_healing_metadata("h1", json!({"execution_id": "e1", "status": "SUCCESS"}))
            .await
            .unwrap();

        let full = tracker
            .get_execution_metadata("e1", true, true, true)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(full["tasks"].as_array().unwrap().len(), 1);
        assert_eq!(full["quality"].as_array().unwrap().len(), 0);
        assert_eq!(full["healing"].as_array().unwrap().len(), 1);

        let bare = tracker
            .get_execution_metadata("e1", false, false, false)
            .await
            .unwrap()
            .unwrap();
        assert!(bare.get("tasks").is_none());
    }

    #[tokio::test]
    async fn search_supports_nested_paths_and_operators() {
        let (tracker, _) = tracker();
        let mut exec = execution("e1");
        exec.metrics.insert("rows_loaded".into(), json!(500));
        tracker.track_pipeline_execution(&exec).await.unwrap();
        tracker.track_pipeline_execution(&execution("e2")).await.unwrap();

        let hits = tracker
            .search_metadata(
                &Criteria::new().gte("metrics.rows_loaded", 100),
                Some(RecordType::PipelineExecution),
                10,
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0]["execution_id"], "e1");
    }

    #[tokio::test]
    async fn export_writes_derived_rows() {
        let (tracker, warehouse) = tracker();
        tracker.track_pipeline_execution(&execution("e1")).await.unwrap();
        tracker.track_pipeline_execution(&execution("e2")).await.unwrap();

        let exported = tracker
            .export_metadata(Utc::now() - chrono::Duration::hours(1), Utc::now())
            .await
            .unwrap();
        assert_eq!(exported, 2);
        assert_eq!(warehouse.row_count(EXPORT_TABLE).await, 2);
    }

    #[tokio::test]
    async fn pipeline_metadata_lists_recent_executions_newest_first() {
        let (tracker, _) = tracker();
        let def = PipelineDefinition {
            pipeline_id: "p1".into(),
            name: "orders".into(),
            source_id: "s1".into(),
            target_dataset: "analytics".into(),
            target_table: "orders".into(),
            dag_id: "orders_daily".into(),
            config: json!({}),
        };
        tracker.track_pipeline_definition(&def).await.unwrap();
        for id in ["e1", "e2", "e3"] {
            tracker.track_pipeline_execution(&execution(id)).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(3)).await;
        }
        let meta = tracker.get_pipeline_metadata("p1", 2).await.unwrap().unwrap();
        let recent = meta["recent_executions"].as_array().unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0]["execution_id"], "e3");
        assert_eq!(recent[1]["execution_id"], "e2");
    }
}
