//! Root-cause analysis over a bounded causality graph

use crate::issue::{IssueClassification, IssueDescriptor};
use chrono::{DateTime, Duration, Utc};
use mend_common::{ActionKind, HealingConfig, IssueCategory, Result};
use mend_metadata::MetadataTracker;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

const ANALYSIS_COLLECTION: &str = "root_cause_analyses";

/// Causes below this confidence are retained but flagged
const CAUSE_CONFIDENCE_THRESHOLD: f64 = 0.75;

/// Minimum correlation strength for an edge to enter the graph
const MIN_EDGE_STRENGTH: f64 = 0.2;

/// One ranked candidate cause
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootCause {
    pub cause_id: String,
    pub category: IssueCategory,
    pub cause_type: String,
    pub description: String,
    pub confidence: f64,
    pub evidence: Vec<Value>,
    pub recommended_action: ActionKind,
    pub related_causes: Vec<String>,
    /// True when the cause scored below the confidence threshold
    pub below_threshold: bool,
}

/// Full analysis result for one issue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootCauseAnalysis {
    pub analysis_id: String,
    pub issue_id: String,
    /// Sorted by confidence descending
    pub root_causes: Vec<RootCause>,
    /// Serialized causality graph: `{nodes, edges}`
    pub causality_graph: Value,
    pub context: HashMap<String, Value>,
}

impl RootCauseAnalysis {
    /// Highest-confidence cause
    pub fn primary_cause(&self) -> Option<&RootCause> {
        self.root_causes.first()
    }

    /// Recommended actions in cause order, deduplicated
    pub fn recommended_actions(&self) -> Vec<ActionKind> {
        let mut actions = Vec::new();
        for cause in &self.root_causes {
            if !actions.contains(&cause.recommended_action) {
                actions.push(cause.recommended_action);
            }
        }
        actions
    }
}

#[derive(Debug, Clone)]
struct CauseNode {
    label: String,
    record: Value,
    timestamp: DateTime<Utc>,
    component: String,
}

/// Builds a depth-bounded causality graph around an issue and ranks
/// candidate causes by edge-strength-weighted connectivity.
pub struct RootCauseAnalyzer {
    metadata: Arc<MetadataTracker>,
    config: HealingConfig,
}

impl RootCauseAnalyzer {
    pub fn new(metadata: Arc<MetadataTracker>, config: HealingConfig) -> Self {
        RootCauseAnalyzer { metadata, config }
    }

    /// Analyze one issue
    pub async fn analyze_issue(
        &self,
        descriptor: &IssueDescriptor,
        classification: &IssueClassification,
    ) -> Result<RootCauseAnalysis> {
        let window = Duration::minutes(self.config.correlation_window_minutes);
        let events = self.related_events(descriptor, window).await?;
        debug!(
            issue_id = %classification.issue_id,
            events = events.len(),
            "building causality graph"
        );

        let (graph, issue_idx) = build_causality_graph(
            descriptor,
            classification,
            &events,
            window,
            self.config.causality_graph_depth,
        );

        let mut causes = score_causes(&graph, issue_idx, classification);
        if causes.is_empty() {
            causes.push(fallback_cause(descriptor, classification));
        }
        causes.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        link_related_causes(&mut causes);

        let analysis = RootCauseAnalysis {
            analysis_id: uuid::Uuid::new_v4().to_string(),
            issue_id: classification.issue_id.clone(),
            root_causes: causes,
            causality_graph: serialize_graph(&graph),
            context: HashMap::from([
                ("component".to_string(), json!(descriptor.component)),
                (
                    "window_minutes".to_string(),
                    json!(self.config.correlation_window_minutes),
                ),
                ("related_events".to_string(), json!(events.len())),
            ]),
        };
        self.metadata
            .store()
            .set(
                ANALYSIS_COLLECTION,
                &analysis.analysis_id,
                serde_json::to_value(&analysis)?,
            )
            .await?;
        info!(
            analysis_id = %analysis.analysis_id,
            causes = analysis.root_causes.len(),
            primary = analysis.primary_cause().map(|c| c.cause_type.as_str()).unwrap_or("none"),
            "root-cause analysis complete"
        );
        Ok(analysis)
    }

    /// Cross-issue mode: analyze each issue, then promote the causes common
    /// to every one of them into a shared analysis.
    pub async fn analyze_related_issues(
        &self,
        issues: &[(IssueDescriptor, IssueClassification)],
    ) -> Result<RootCauseAnalysis> {
        let mut analyses = Vec::with_capacity(issues.len());
        for (descriptor, classification) in issues {
            analyses.push(self.analyze_issue(descriptor, classification).await?);
        }

        let mut shared: Vec<RootCause> = Vec::new();
        if let Some((first, rest)) = analyses.split_first() {
            for cause in &first.root_causes {
                let everywhere = rest.iter().all(|a| {
                    a.root_causes.iter().any(|c| c.cause_type == cause.cause_type)
                });
                if everywhere {
                    let mean_confidence = analyses
                        .iter()
                        .flat_map(|a| {
                            a.root_causes
                                .iter()
                                .filter(|c| c.cause_type == cause.cause_type)
                                .map(|c| c.confidence)
                        })
                        .sum::<f64>()
                        / analyses.len() as f64;
                    let mut promoted = cause.clone();
                    promoted.cause_id = uuid::Uuid::new_v4().to_string();
                    promoted.confidence = mean_confidence.clamp(0.0, 1.0);
                    promoted.below_threshold = promoted.confidence < CAUSE_CONFIDENCE_THRESHOLD;
                    shared.push(promoted);
                }
            }
        }
        shared.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let analysis = RootCauseAnalysis {
            analysis_id: uuid::Uuid::new_v4().to_string(),
            issue_id: issues
                .first()
                .map(|(_, c)| c.issue_id.clone())
                .unwrap_or_default(),
            root_causes: shared,
            causality_graph: json!({
                "combined_from": analyses.iter().map(|a| &a.analysis_id).collect::<Vec<_>>(),
            }),
            context: HashMap::from([(
                "issue_count".to_string(),
                json!(issues.len()),
            )]),
        };
        self.metadata
            .store()
            .set(
                ANALYSIS_COLLECTION,
                &analysis.analysis_id,
                serde_json::to_value(&analysis)?,
            )
            .await?;
        Ok(analysis)
    }

    pub async fn get_analysis(&self, analysis_id: &str) -> Result<Option<RootCauseAnalysis>> {
        match self.metadata.store().get(ANALYSIS_COLLECTION, analysis_id).await? {
            Some(doc) => Ok(Some(serde_json::from_value(doc)?)),
            None => Ok(None),
        }
    }

    /// Metadata records within the correlation window around the issue
    async fn related_events(
        &self,
        descriptor: &IssueDescriptor,
        window: Duration,
    ) -> Result<Vec<Value>> {
        let start = descriptor.observed_at - window;
        let end = descriptor.observed_at + window;
        let criteria = mend_store::Criteria::new()
            .gte("created_at", start.to_rfc3339())
            .lte("created_at", end.to_rfc3339());
        self.metadata.search_metadata(&criteria, None, 200).await
    }
}

fn event_component(record: &Value) -> String {
    for key in ["component", "task_kind", "task_id", "pipeline_id", "source_id"] {
        if let Some(s) = record[key].as_str() {
            return s.to_string();
        }
    }
    record["record_type"].as_str().unwrap_or("unknown").to_string()
}

fn event_timestamp(record: &Value) -> DateTime<Utc> {
    record["created_at"]
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

fn event_label(record: &Value) -> String {
    let record_type = record["record_type"].as_str().unwrap_or("event");
    match record["status"].as_str() {
        Some(status) => format!("{record_type}:{}", status.to_lowercase()),
        None => record_type.to_string(),
    }
}

/// Correlation rules: temporal proximity, component adjacency and known
/// precedence between record kinds.
fn correlation_strength(
    node: &CauseNode,
    issue_component: &str,
    issue_time: DateTime<Utc>,
    issue_category: IssueCategory,
    window: Duration,
) -> f64 {
    let delta = (issue_time - node.timestamp).num_seconds().abs() as f64;
    let window_secs = window.num_seconds().max(1) as f64;
    let temporal = (1.0 - delta / window_secs).max(0.0) * 0.5;

    let adjacency = if node.component == issue_component { 0.3 } else { 0.0 };

    let precedence = match (node.record["record_type"].as_str(), issue_category) {
        (Some("task_execution"), IssueCategory::Pipeline) => 0.2,
        (Some("quality_metadata"), IssueCategory::DataQuality) => 0.2,
        (Some("schema_metadata"), IssueCategory::DataQuality) => 0.2,
        (Some("healing_metadata"), _) => 0.1,
        (Some("pipeline_execution"), IssueCategory::Pipeline) => 0.1,
        _ => 0.0,
    };

    (temporal + adjacency + precedence).clamp(0.0, 1.0)
}

fn build_causality_graph(
    descriptor: &IssueDescriptor,
    classification: &IssueClassification,
    events: &[Value],
    window: Duration,
    max_depth: usize,
) -> (DiGraph<CauseNode, f64>, NodeIndex) {
    let mut graph = DiGraph::new();
    let issue_idx = graph.add_node(CauseNode {
        label: format!("issue:{}", classification.issue_type),
        record: json!({"issue_id": classification.issue_id}),
        timestamp: descriptor.observed_at,
        component: descriptor.component.clone(),
    });

    // Depth 1: events correlated directly with the issue
    let mut event_indices = Vec::new();
    for record in events {
        let node = CauseNode {
            label: event_label(record),
            record: record.clone(),
            timestamp: event_timestamp(record),
            component: event_component(record),
        };
        let strength = correlation_strength(
            &node,
            &descriptor.component,
            descriptor.observed_at,
            classification.category,
            window,
        );
        if strength >= MIN_EDGE_STRENGTH {
            let idx = graph.add_node(node);
            graph.add_edge(idx, issue_idx, strength);
            event_indices.push(idx);
        }
    }

    // Deeper levels: earlier events feed later events on the same component
    if max_depth > 1 {
        let mut sorted = event_indices.clone();
        sorted.sort_by_key(|&idx| graph[idx].timestamp);
        for (i, &earlier) in sorted.iter().enumerate() {
            for &later in sorted.iter().skip(i + 1) {
                if graph[earlier].component == graph[later].component {
                    let delta =
                        (graph[later].timestamp - graph[earlier].timestamp).num_seconds() as f64;
                    let window_secs = window.num_seconds().max(1) as f64;
                    let strength = ((1.0 - delta / window_secs).max(0.0)) * 0.5;
                    if strength >= MIN_EDGE_STRENGTH {
                        graph.add_edge(earlier, later, strength);
                    }
                }
            }
        }
    }

    (graph, issue_idx)
}

/// Candidate causes scored by their edge strength into the issue plus half
/// the strength of their own supporting in-edges, scaled by the
/// classification confidence.
fn score_causes(
    graph: &DiGraph<CauseNode, f64>,
    issue_idx: NodeIndex,
    classification: &IssueClassification,
) -> Vec<RootCause> {
    let mut causes = Vec::new();
    for edge in graph.edges_directed(issue_idx, Direction::Incoming) {
        let candidate = edge.source();
        let direct = *edge.weight();
        let support: f64 = graph
            .edges_directed(candidate, Direction::Incoming)
            .map(|e| *e.weight())
            .sum::<f64>()
            * 0.5;
        let confidence = ((direct + support) * classification.confidence).clamp(0.0, 1.0);
        let node = &graph[candidate];
        let category = cause_category(&node.record, classification.category);
        causes.push(RootCause {
            cause_id: uuid::Uuid::new_v4().to_string(),
            category,
            cause_type: node.label.clone(),
            description: format!(
                "{} on {} correlates with the issue",
                node.label, node.component
            ),
            confidence,
            evidence: vec![node.record.clone()],
            recommended_action: action_for_cause(&node.label, category),
            related_causes: Vec::new(),
            below_threshold: confidence < CAUSE_CONFIDENCE_THRESHOLD,
        });
    }
    causes
}

fn cause_category(record: &Value, issue_category: IssueCategory) -> IssueCategory {
    match record["record_type"].as_str() {
        Some("quality_metadata") | Some("schema_metadata") => IssueCategory::DataQuality,
        Some("task_execution") | Some("pipeline_execution") => IssueCategory::Pipeline,
        Some("source_system") => IssueCategory::System,
        _ => issue_category,
    }
}

fn action_for_cause(cause_type: &str, category: IssueCategory) -> ActionKind {
    if cause_type.contains("schema") {
        return ActionKind::SchemaEvolution;
    }
    match category {
        IssueCategory::DataQuality => ActionKind::DataCorrection,
        IssueCategory::Pipeline => ActionKind::PipelineRetry,
        IssueCategory::Resource => ActionKind::ResourceScaling,
        IssueCategory::System => ActionKind::DependencyResolution,
    }
}

/// When no correlated events exist the classification itself is the best
/// available cause hypothesis.
fn fallback_cause(
    descriptor: &IssueDescriptor,
    classification: &IssueClassification,
) -> RootCause {
    let confidence = (classification.confidence * 0.8).clamp(0.0, 1.0);
    RootCause {
        cause_id: uuid::Uuid::new_v4().to_string(),
        category: classification.category,
        cause_type: classification.issue_type.clone(),
        description: format!(
            "no correlated events; direct hypothesis from classification in {}",
            descriptor.component
        ),
        confidence,
        evidence: vec![json!({"error_message": descriptor.error_message})],
        recommended_action: classification.recommended_action,
        related_causes: Vec::new(),
        below_threshold: confidence < CAUSE_CONFIDENCE_THRESHOLD,
    }
}

fn link_related_causes(causes: &mut [RootCause]) {
    let by_category: Vec<(String, IssueCategory)> = causes
        .iter()
        .map(|c| (c.cause_id.clone(), c.category))
        .collect();
    for cause in causes.iter_mut() {
        cause.related_causes = by_category
            .iter()
            .filter(|(id, category)| *category == cause.category && *id != cause.cause_id)
            .map(|(id, _)| id.clone())
            .collect();
    }
}

fn serialize_graph(graph: &DiGraph<CauseNode, f64>) -> Value {
    json!({
        "nodes": graph
            .node_indices()
            .map(|idx| json!({
                "index": idx.index(),
                "label": graph[idx].label,
                "component": graph[idx].component,
                "timestamp": graph[idx].timestamp.to_rfc3339(),
            }))
            .collect::<Vec<_>>(),
        "edges": graph
            .edge_references()
            .map(|e| json!({
                "from": e.source().index(),
                "to": e.target().index(),
                "strength": e.weight(),
            }))
            .collect::<Vec<_>>(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::IssueClassifier;
    use mend_common::ExecutionStatus;
    use mend_metadata::PipelineExecution;
    use mend_store::{MemoryAnalyticalStore, MemoryDocumentStore};

    async fn setup() -> (RootCauseAnalyzer, Arc<MetadataTracker>, IssueClassifier) {
        let metadata = Arc::new(MetadataTracker::new(
            Arc::new(MemoryDocumentStore::new()),
            Arc::new(MemoryAnalyticalStore::new()),
            "test",
        ));
        let analyzer = RootCauseAnalyzer::new(metadata.clone(), HealingConfig::default());
        let classifier = IssueClassifier::local(HealingConfig::default());
        (analyzer, metadata, classifier)
    }

    #[tokio::test]
    async fn correlated_task_failure_becomes_primary_cause() {
        let (analyzer, metadata, classifier) = setup().await;
        // A failed execution recorded moments before the issue
        let mut execution = PipelineExecution::started("e1", "p1");
        execution.status = ExecutionStatus::Failed;
        metadata.track_pipeline_execution(&execution).await.unwrap();

        let descriptor = IssueDescriptor::new("query timed out after 300s", "p1")
            .with_execution("p1", "e1");
        let classification = classifier.classify(&descriptor).await.unwrap();
        let analysis = analyzer.analyze_issue(&descriptor, &classification).await.unwrap();

        let primary = analysis.primary_cause().unwrap();
        assert!(primary.cause_type.starts_with("pipeline_execution"));
        assert!(primary.confidence > 0.5);
        assert!(!analysis.causality_graph["edges"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn no_events_falls_back_to_classification_hypothesis() {
        let (analyzer, _metadata, classifier) = setup().await;
        let descriptor = IssueDescriptor::new("query timed out", "lonely-component");
        let classification = classifier.classify(&descriptor).await.unwrap();
        let analysis = analyzer.analyze_issue(&descriptor, &classification).await.unwrap();
        assert_eq!(analysis.root_causes.len(), 1);
        assert_eq!(analysis.root_causes[0].cause_type, "timeout");
    }

    #[tokio::test]
    async fn analyses_are_persisted_and_retrievable() {
        let (analyzer, _metadata, classifier) = setup().await;
        let descriptor = IssueDescriptor::new("connection refused", "extract");
        let classification = classifier.classify(&descriptor).await.unwrap();
        let analysis = analyzer.analyze_issue(&descriptor, &classification).await.unwrap();
        let loaded = analyzer.get_analysis(&analysis.analysis_id).await.unwrap().unwrap();
        assert_eq!(loaded.issue_id, analysis.issue_id);
    }

    #[tokio::test]
    async fn cross_issue_mode_promotes_common_causes() {
        let (analyzer, _metadata, classifier) = setup().await;
        let mut issues = Vec::new();
        for component in ["extract", "transform"] {
            let descriptor = IssueDescriptor::new("query timed out", component);
            let classification = classifier.classify(&descriptor).await.unwrap();
            issues.push((descriptor, classification));
        }
        let shared = analyzer.analyze_related_issues(&issues).await.unwrap();
        // Both issues fall back to the same timeout hypothesis
        assert_eq!(shared.root_causes.len(), 1);
        assert_eq!(shared.root_causes[0].cause_type, "timeout");
        assert_eq!(shared.context["issue_count"], 2);
    }
}
