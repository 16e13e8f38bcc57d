//! Durable lineage recording and graph reconstruction

use crate::graph::{LineageEdge, LineageGraph, NodeInfo};
use crate::node::LineageNode;
use crate::visualize::{render, VisualizationFormat};
use chrono::Utc;
use mend_common::Result;
use mend_store::{Criteria, DocumentStore};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

const COLLECTION: &str = "lineage_records";

/// Category of a lineage record
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LineageRecordType {
    Extraction,
    Transformation,
    Load,
    Validation,
    Healing,
}

impl LineageRecordType {
    pub fn label(&self) -> &'static str {
        match self {
            LineageRecordType::Extraction => "extraction",
            LineageRecordType::Transformation => "transformation",
            LineageRecordType::Load => "load",
            LineageRecordType::Validation => "validation",
            LineageRecordType::Healing => "healing",
        }
    }
}

/// Records lineage events durably and mirrors them into the in-memory
/// graph. Each recorder appends one lineage record and its edges in a
/// single step under the graph write lock; the stored record set can
/// rebuild the identical graph on cold start.
pub struct LineageTracker {
    store: Arc<dyn DocumentStore>,
    graph: RwLock<LineageGraph>,
}

impl LineageTracker {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        LineageTracker {
            store,
            graph: RwLock::new(LineageGraph::new()),
        }
    }

    /// source → dataset
    pub async fn record_extraction(
        &self,
        source_id: &str,
        dataset: &str,
        table: &str,
        details: Value,
    ) -> Result<String> {
        let from = LineageNode::source(source_id);
        let to = LineageNode::dataset(dataset, table);
        self.record(LineageRecordType::Extraction, vec![(from, to)], details)
            .await
    }

    /// datasets → datasets (fan-in / fan-out transformation)
    pub async fn record_transformation(
        &self,
        inputs: &[(&str, &str)],
        outputs: &[(&str, &str)],
        details: Value,
    ) -> Result<String> {
        let mut edges = Vec::new();
        for (in_ds, in_tbl) in inputs {
            for (out_ds, out_tbl) in outputs {
                edges.push((
                    LineageNode::dataset(*in_ds, *in_tbl),
                    LineageNode::dataset(*out_ds, *out_tbl),
                ));
            }
        }
        self.record(LineageRecordType::Transformation, edges, details)
            .await
    }

    /// dataset → dataset load
    pub async fn record_load(
        &self,
        from: (&str, &str),
        to: (&str, &str),
        details: Value,
    ) -> Result<String> {
        self.record(
            LineageRecordType::Load,
            vec![(
                LineageNode::dataset(from.0, from.1),
                LineageNode::dataset(to.0, to.1),
            )],
            details,
        )
        .await
    }

    /// dataset → validation node
    pub async fn record_validation(
        &self,
        dataset: &str,
        table: &str,
        validation_id: &str,
        details: Value,
    ) -> Result<String> {
        self.record(
            LineageRecordType::Validation,
            vec![(
                LineageNode::dataset(dataset, table),
                LineageNode::validation(validation_id),
            )],
            details,
        )
        .await
    }

    /// dataset → healing node → healed dataset
    pub async fn record_healing(
        &self,
        dataset: &str,
        table: &str,
        healing_id: &str,
        details: Value,
    ) -> Result<String> {
        let source = LineageNode::dataset(dataset, table);
        let healing = LineageNode::healing(healing_id);
        let healed = LineageNode::healed_dataset(dataset, table);
        self.record(
            LineageRecordType::Healing,
            vec![(source, healing.clone()), (healing, healed)],
            details,
        )
        .await
    }

    async fn record(
        &self,
        record_type: LineageRecordType,
        edges: Vec<(LineageNode, LineageNode)>,
        details: Value,
    ) -> Result<String> {
        let lineage_id = uuid::Uuid::new_v4().to_string();
        let timestamp = Utc::now();
        let record = json!({
            "lineage_id": lineage_id,
            "record_type": record_type.label(),
            "timestamp": timestamp.to_rfc3339(),
            "edges": edges
                .iter()
                .map(|(from, to)| json!({"from": from, "to": to}))
                .collect::<Vec<_>>(),
            "details": details,
        });

        // Hold the write lock across validation, persistence and graph
        // application so the record and its edges land atomically
        let mut graph = self.graph.write().await;
        for (from, to) in &edges {
            // Validate before persisting so a rejected edge leaves no record
            if graph.would_create_cycle(from, to) {
                return Err(mend_common::Error::Data(format!(
                    "lineage edge {} -> {} would create a dataset cycle",
                    from.key(),
                    to.key()
                )));
            }
        }
        self.store.set(COLLECTION, &lineage_id, record.clone()).await?;
        for (from, to) in edges {
            graph.add_edge(
                &from,
                &to,
                LineageEdge {
                    operation: record_type.label().into(),
                    timestamp,
                    details: record["details"].clone(),
                },
            )?;
        }
        debug!(lineage_id = %lineage_id, record_type = record_type.label(), "recorded lineage");
        Ok(lineage_id)
    }

    /// Rebuild the graph from stored records. Produces the same graph for
    /// the same record set regardless of how often it runs.
    pub async fn rebuild(&self) -> Result<()> {
        let mut records = self.store.query(COLLECTION, &Criteria::new(), None).await?;
        records.sort_by(|a, b| {
            a["timestamp"]
                .as_str()
                .unwrap_or_default()
                .cmp(b["timestamp"].as_str().unwrap_or_default())
        });

        let mut graph = self.graph.write().await;
        graph.clear();
        let mut applied = 0usize;
        for record in &records {
            let timestamp = record["timestamp"]
                .as_str()
                .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(Utc::now);
            let operation = record["record_type"].as_str().unwrap_or("unknown").to_string();
            for pair in record["edges"].as_array().into_iter().flatten() {
                let from: LineageNode = serde_json::from_value(pair["from"].clone())?;
                let to: LineageNode = serde_json::from_value(pair["to"].clone())?;
                graph.add_edge(
                    &from,
                    &to,
                    LineageEdge {
                        operation: operation.clone(),
                        timestamp,
                        details: record["details"].clone(),
                    },
                )?;
                applied += 1;
            }
        }
        info!(records = records.len(), edges = applied, "rebuilt lineage graph");
        Ok(())
    }

    /// Upstream and/or downstream view of a dataset, bounded by depth
    pub async fn get_dataset_lineage(
        &self,
        dataset: &str,
        table: &str,
        upstream: bool,
        downstream: bool,
        depth: Option<usize>,
    ) -> Result<Value> {
        let node = LineageNode::dataset(dataset, table);
        let graph = self.graph.read().await;
        let mut result = json!({ "root": node });
        if upstream {
            let nodes: Vec<NodeInfo> = graph
                .walk(&node, Direction::Incoming, depth)
                .into_iter()
                .skip(1)
                .collect();
            result["upstream"] = serde_json::to_value(nodes)?;
        }
        if downstream {
            let nodes: Vec<NodeInfo> = graph
                .walk(&node, Direction::Outgoing, depth)
                .into_iter()
                .skip(1)
                .collect();
            result["downstream"] = serde_json::to_value(nodes)?;
        }
        Ok(result)
    }

    /// Downstream dataset nodes with shortest-path distances
    pub async fn analyze_impact(&self, dataset: &str, table: &str) -> Result<Vec<(LineageNode, usize)>> {
        Ok(self.graph.read().await.impact(dataset, table))
    }

    /// Most recent common upstream node of two datasets
    pub async fn find_common_ancestor(
        &self,
        ds1: &str,
        tbl1: &str,
        ds2: &str,
        tbl2: &str,
    ) -> Result<Option<LineageNode>> {
        Ok(self.graph.read().await.common_ancestor(ds1, tbl1, ds2, tbl2))
    }

    /// Lineage records attached to one pipeline execution, grouped by stage
    pub async fn get_execution_lineage(&self, execution_id: &str) -> Result<Value> {
        let records = self
            .store
            .query(
                COLLECTION,
                &Criteria::new().eq("details.execution_id", execution_id),
                None,
            )
            .await?;
        let mut grouped: BTreeMap<String, Vec<Value>> = BTreeMap::new();
        for record in records {
            let stage = record["record_type"].as_str().unwrap_or("unknown").to_string();
            grouped.entry(stage).or_default().push(record);
        }
        Ok(serde_json::to_value(grouped)?)
    }

    /// Best-effort column-level trace: transformation records over the
    /// dataset whose details mention the column
    pub async fn trace_data_element(
        &self,
        dataset: &str,
        table: &str,
        column: &str,
    ) -> Result<Vec<Value>> {
        let records = self
            .store
            .query(
                COLLECTION,
                &Criteria::new().eq("record_type", "transformation"),
                None,
            )
            .await?;
        let node_key = LineageNode::dataset(dataset, table).key();
        let hits = records
            .into_iter()
            .filter(|record| {
                let touches_dataset = record["edges"]
                    .as_array()
                    .into_iter()
                    .flatten()
                    .any(|pair| {
                        [&pair["from"], &pair["to"]].iter().any(|side| {
                            serde_json::from_value::<LineageNode>((*side).clone())
                                .map(|n| n.key() == node_key)
                                .unwrap_or(false)
                        })
                    });
                let mentions_column = record["details"]["columns"]
                    .as_array()
                    .map(|cols| cols.iter().any(|c| c.as_str() == Some(column)))
                    .unwrap_or_else(|| record["details"].to_string().contains(column));
                touches_dataset && mentions_column
            })
            .collect();
        Ok(hits)
    }

    /// Render the neighborhood of a dataset in the requested format
    pub async fn visualize_lineage(
        &self,
        dataset: &str,
        table: &str,
        depth: Option<usize>,
        format: VisualizationFormat,
    ) -> Result<String> {
        let graph = self.graph.read().await;
        render(&graph, &LineageNode::dataset(dataset, table), depth, format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mend_store::MemoryDocumentStore;
    use serde_json::json;

    async fn seeded_tracker() -> LineageTracker {
        let tracker = LineageTracker::new(Arc::new(MemoryDocumentStore::new()));
        tracker
            .record_extraction("src", "d1", "t1", json!({"execution_id": "e1"}))
            .await
            .unwrap();
        tracker
            .record_transformation(
                &[("d1", "t1")],
                &[("d2", "t2")],
                json!({"execution_id": "e1", "columns": ["amount", "currency"]}),
            )
            .await
            .unwrap();
        tracker
            .record_load(("d2", "t2"), ("d3", "t3"), json!({"execution_id": "e1"}))
            .await
            .unwrap();
        tracker
    }

    #[tokio::test]
    async fn impact_and_ancestor_queries() {
        let tracker = seeded_tracker().await;
        let impacted = tracker.analyze_impact("d1", "t1").await.unwrap();
        assert_eq!(
            impacted,
            vec![
                (LineageNode::dataset("d2", "t2"), 1),
                (LineageNode::dataset("d3", "t3"), 2),
            ]
        );
        let ancestor = tracker
            .find_common_ancestor("d2", "t2", "d3", "t3")
            .await
            .unwrap();
        assert_eq!(ancestor, Some(LineageNode::dataset("d1", "t1")));
    }

    #[tokio::test]
    async fn rebuild_is_idempotent() {
        let tracker = seeded_tracker().await;
        let before = {
            let g = tracker.graph.read().await;
            (g.node_count(), g.edge_count())
        };
        tracker.rebuild().await.unwrap();
        tracker.rebuild().await.unwrap();
        let after = {
            let g = tracker.graph.read().await;
            (g.node_count(), g.edge_count())
        };
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn execution_lineage_groups_by_stage() {
        let tracker = seeded_tracker().await;
        let grouped = tracker.get_execution_lineage("e1").await.unwrap();
        assert_eq!(grouped["extraction"].as_array().unwrap().len(), 1);
        assert_eq!(grouped["transformation"].as_array().unwrap().len(), 1);
        assert_eq!(grouped["load"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn element_trace_finds_column_transformations() {
        let tracker = seeded_tracker().await;
        let hits = tracker.trace_data_element("d2", "t2", "amount").await.unwrap();
        assert_eq!(hits.len(), 1);
        let misses = tracker.trace_data_element("d2", "t2", "missing_col").await.unwrap();
        assert!(misses.is_empty());
    }

    #[tokio::test]
    async fn healing_records_use_distinct_healed_node() {
        let tracker = seeded_tracker().await;
        tracker
            .record_healing("d2", "t2", "h1", json!({"execution_id": "e1"}))
            .await
            .unwrap();
        let graph = tracker.graph.read().await;
        assert!(graph.contains(&LineageNode::healed_dataset("d2", "t2")));
        // The healed node does not loop back into the original dataset
        let impacted = graph.impact("d2", "t2");
        assert!(impacted
            .iter()
            .any(|(n, _)| *n == LineageNode::healed_dataset("d2", "t2")));
    }

    #[tokio::test]
    async fn dataset_lineage_respects_direction_flags() {
        let tracker = seeded_tracker().await;
        let view = tracker
            .get_dataset_lineage("d2", "t2", true, false, None)
            .await
            .unwrap();
        assert!(view.get("upstream").is_some());
        assert!(view.get("downstream").is_none());
        let upstream = view["upstream"].as_array().unwrap();
        assert_eq!(upstream.len(), 2); // d1.t1 and source:src
    }
}
