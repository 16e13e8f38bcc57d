//! Lineage tracking for the mend pipeline core
//!
//! Maintains an append-only directed graph relating sources, datasets,
//! validations and healing events, rebuilt on demand from durable lineage
//! records. Supplies impact and ancestry queries to the diagnosis layer.

pub mod graph;
pub mod node;
pub mod tracker;
pub mod visualize;

pub use graph::{LineageEdge, LineageGraph, NodeInfo};
pub use node::LineageNode;
pub use tracker::{LineageRecordType, LineageTracker};
pub use visualize::VisualizationFormat;
