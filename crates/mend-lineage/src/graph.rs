//! In-memory lineage graph over petgraph

use crate::node::LineageNode;
use chrono::{DateTime, Utc};
use mend_common::{Error, Result};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};

/// Metadata carried by every lineage edge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineageEdge {
    pub operation: String,
    pub timestamp: DateTime<Utc>,
    pub details: Value,
}

/// A traversal result entry: node plus its distance from the start and the
/// edge that reached it
#[derive(Debug, Clone, Serialize)]
pub struct NodeInfo {
    pub node: LineageNode,
    pub depth: usize,
    pub edge: Option<LineageEdge>,
}

/// Directed lineage graph with nodes keyed by their typed identifier.
///
/// The edge set is append-only; views derived from it are monotonic.
#[derive(Default)]
pub struct LineageGraph {
    graph: DiGraph<LineageNode, LineageEdge>,
    index: HashMap<String, NodeIndex>,
    /// Most recent edge timestamp touching each node
    last_seen: HashMap<String, DateTime<Utc>>,
}

impl LineageGraph {
    pub fn new() -> Self {
        LineageGraph::default()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn contains(&self, node: &LineageNode) -> bool {
        self.index.contains_key(&node.key())
    }

    fn intern(&mut self, node: &LineageNode) -> NodeIndex {
        let key = node.key();
        if let Some(&idx) = self.index.get(&key) {
            return idx;
        }
        let idx = self.graph.add_node(node.clone());
        self.index.insert(key, idx);
        idx
    }

    /// Append a directed edge. An edge between two dataset nodes that would
    /// close a cycle in the dataset subgraph is rejected.
    pub fn add_edge(&mut self, from: &LineageNode, to: &LineageNode, edge: LineageEdge) -> Result<()> {
        if from.is_dataset() && to.is_dataset() && self.dataset_path_exists(to, from) {
            return Err(Error::Data(format!(
                "lineage edge {} -> {} would create a dataset cycle",
                from.key(),
                to.key()
            )));
        }
        let from_idx = self.intern(from);
        let to_idx = self.intern(to);
        let ts = edge.timestamp;
        self.graph.add_edge(from_idx, to_idx, edge);
        for node in [from, to] {
            let entry = self.last_seen.entry(node.key()).or_insert(ts);
            if ts > *entry {
                *entry = ts;
            }
        }
        Ok(())
    }

    /// Whether appending `from -> to` would close a cycle in the dataset
    /// subgraph
    pub fn would_create_cycle(&self, from: &LineageNode, to: &LineageNode) -> bool {
        from.is_dataset() && to.is_dataset() && self.dataset_path_exists(to, from)
    }

    /// Whether `to` is reachable from `from` following only dataset→dataset
    /// edges
    fn dataset_path_exists(&self, from: &LineageNode, to: &LineageNode) -> bool {
        let (Some(&start), Some(&goal)) = (
            self.index.get(&from.key()),
            self.index.get(&to.key()),
        ) else {
            return false;
        };
        let mut queue = VecDeque::from([start]);
        let mut visited = HashSet::from([start]);
        while let Some(current) = queue.pop_front() {
            if current == goal {
                return true;
            }
            for neighbor in self.graph.neighbors_directed(current, Direction::Outgoing) {
                if self.graph[neighbor].is_dataset() && visited.insert(neighbor) {
                    queue.push_back(neighbor);
                }
            }
        }
        false
    }

    /// Breadth-first walk from a node. `depth` of `None` is unbounded;
    /// depth 0 returns the starting node only.
    pub fn walk(
        &self,
        start: &LineageNode,
        direction: Direction,
        depth: Option<usize>,
    ) -> Vec<NodeInfo> {
        let Some(&start_idx) = self.index.get(&start.key()) else {
            return Vec::new();
        };
        let mut results = vec![NodeInfo {
            node: self.graph[start_idx].clone(),
            depth: 0,
            edge: None,
        }];
        let mut visited = HashSet::from([start_idx]);
        let mut queue = VecDeque::from([(start_idx, 0usize)]);

        while let Some((current, dist)) = queue.pop_front() {
            if depth.is_some_and(|d| dist >= d) {
                continue;
            }
            for edge in self.graph.edges_directed(current, direction) {
                let neighbor = match direction {
                    Direction::Outgoing => edge.target(),
                    Direction::Incoming => edge.source(),
                };
                if visited.insert(neighbor) {
                    results.push(NodeInfo {
                        node: self.graph[neighbor].clone(),
                        depth: dist + 1,
                        edge: Some(edge.weight().clone()),
                    });
                    queue.push_back((neighbor, dist + 1));
                }
            }
        }
        results
    }

    /// All downstream dataset nodes with their shortest-path distance
    pub fn impact(&self, dataset: &str, table: &str) -> Vec<(LineageNode, usize)> {
        let start = LineageNode::dataset(dataset, table);
        let mut impacted: Vec<(LineageNode, usize)> = self
            .walk(&start, Direction::Outgoing, None)
            .into_iter()
            .skip(1)
            .filter(|info| info.node.is_dataset())
            .map(|info| (info.node, info.depth))
            .collect();
        impacted.sort_by_key(|(node, distance)| (*distance, node.key()));
        impacted
    }

    /// Upstream node keys reachable from a dataset
    pub fn upstream_set(&self, node: &LineageNode) -> HashSet<String> {
        self.walk(node, Direction::Incoming, None)
            .into_iter()
            .skip(1)
            .map(|info| info.node.key())
            .collect()
    }

    /// Most recently seen common upstream node of two datasets
    pub fn common_ancestor(
        &self,
        ds1: &str,
        tbl1: &str,
        ds2: &str,
        tbl2: &str,
    ) -> Option<LineageNode> {
        let a = self.upstream_set(&LineageNode::dataset(ds1, tbl1));
        let b = self.upstream_set(&LineageNode::dataset(ds2, tbl2));
        a.intersection(&b)
            .max_by_key(|key| self.last_seen.get(*key).copied())
            .and_then(|key| self.index.get(key))
            .map(|&idx| self.graph[idx].clone())
    }

    /// All nodes, for rendering
    pub fn nodes(&self) -> impl Iterator<Item = &LineageNode> {
        self.graph.node_weights()
    }

    /// All edges as (from, to, edge), for rendering
    pub fn edges(&self) -> impl Iterator<Item = (&LineageNode, &LineageNode, &LineageEdge)> {
        self.graph.edge_references().map(|e| {
            (
                &self.graph[e.source()],
                &self.graph[e.target()],
                e.weight(),
            )
        })
    }

    pub fn clear(&mut self) {
        self.graph.clear();
        self.index.clear();
        self.last_seen.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn edge(operation: &str) -> LineageEdge {
        LineageEdge {
            operation: operation.into(),
            timestamp: Utc::now(),
            details: json!({}),
        }
    }

    fn graph() -> LineageGraph {
        // source:src -> d1.t1 -> d2.t2 -> d3.t3
        let mut g = LineageGraph::new();
        g.add_edge(
            &LineageNode::source("src"),
            &LineageNode::dataset("d1", "t1"),
            edge("extraction"),
        )
        .unwrap();
        g.add_edge(
            &LineageNode::dataset("d1", "t1"),
            &LineageNode::dataset("d2", "t2"),
            edge("transformation"),
        )
        .unwrap();
        g.add_edge(
            &LineageNode::dataset("d2", "t2"),
            &LineageNode::dataset("d3", "t3"),
            edge("load"),
        )
        .unwrap();
        g
    }

    #[test]
    fn impact_returns_downstream_with_distances() {
        let g = graph();
        let impacted = g.impact("d1", "t1");
        assert_eq!(
            impacted,
            vec![
                (LineageNode::dataset("d2", "t2"), 1),
                (LineageNode::dataset("d3", "t3"), 2),
            ]
        );
    }

    #[test]
    fn downstream_nodes_see_their_ancestor_upstream() {
        let g = graph();
        for (ds, tbl) in [("d2", "t2"), ("d3", "t3")] {
            let upstream = g.upstream_set(&LineageNode::dataset(ds, tbl));
            assert!(upstream.contains("dataset:d1.t1"), "{ds}.{tbl}");
        }
    }

    #[test]
    fn common_ancestor_of_siblings() {
        let g = graph();
        let ancestor = g.common_ancestor("d2", "t2", "d3", "t3");
        assert_eq!(ancestor, Some(LineageNode::dataset("d1", "t1")));
    }

    #[test]
    fn depth_zero_returns_start_only() {
        let g = graph();
        let walked = g.walk(&LineageNode::dataset("d1", "t1"), Direction::Outgoing, Some(0));
        assert_eq!(walked.len(), 1);
        assert_eq!(walked[0].node, LineageNode::dataset("d1", "t1"));
    }

    #[test]
    fn depth_bound_limits_traversal() {
        let g = graph();
        let walked = g.walk(&LineageNode::dataset("d1", "t1"), Direction::Outgoing, Some(1));
        assert_eq!(walked.len(), 2);
    }

    #[test]
    fn dataset_cycles_are_rejected() {
        let mut g = graph();
        let err = g.add_edge(
            &LineageNode::dataset("d3", "t3"),
            &LineageNode::dataset("d1", "t1"),
            edge("load"),
        );
        assert!(err.is_err());
    }

    #[test]
    fn healed_node_keeps_the_dataset_subgraph_acyclic() {
        let mut g = graph();
        // Healing of d1.t1 feeds a distinct healed node, not the original
        g.add_edge(
            &LineageNode::dataset("d1", "t1"),
            &LineageNode::healing("h1"),
            edge("healing"),
        )
        .unwrap();
        g.add_edge(
            &LineageNode::healing("h1"),
            &LineageNode::healed_dataset("d1", "t1"),
            edge("healing"),
        )
        .unwrap();
        assert!(g.contains(&LineageNode::healed_dataset("d1", "t1")));
    }
}
