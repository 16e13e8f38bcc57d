//! Typed lineage node identifiers

use serde::{Deserialize, Serialize};
use std::fmt;

/// A node in the lineage graph, keyed by a typed identifier string
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LineageNode {
    Source {
        source_id: String,
    },
    Dataset {
        dataset: String,
        table: String,
        /// Healed outputs get a distinct node so the dataset subgraph
        /// stays acyclic
        #[serde(default)]
        healed: bool,
    },
    Validation {
        validation_id: String,
    },
    Healing {
        healing_id: String,
    },
}

impl LineageNode {
    pub fn source(source_id: impl Into<String>) -> Self {
        LineageNode::Source {
            source_id: source_id.into(),
        }
    }

    pub fn dataset(dataset: impl Into<String>, table: impl Into<String>) -> Self {
        LineageNode::Dataset {
            dataset: dataset.into(),
            table: table.into(),
            healed: false,
        }
    }

    pub fn healed_dataset(dataset: impl Into<String>, table: impl Into<String>) -> Self {
        LineageNode::Dataset {
            dataset: dataset.into(),
            table: table.into(),
            healed: true,
        }
    }

    pub fn validation(validation_id: impl Into<String>) -> Self {
        LineageNode::Validation {
            validation_id: validation_id.into(),
        }
    }

    pub fn healing(healing_id: impl Into<String>) -> Self {
        LineageNode::Healing {
            healing_id: healing_id.into(),
        }
    }

    /// The typed identifier string used as the graph key
    pub fn key(&self) -> String {
        match self {
            LineageNode::Source { source_id } => format!("source:{source_id}"),
            LineageNode::Dataset {
                dataset,
                table,
                healed: false,
            } => format!("dataset:{dataset}.{table}"),
            LineageNode::Dataset {
                dataset,
                table,
                healed: true,
            } => format!("dataset:{dataset}.{table}:healed"),
            LineageNode::Validation { validation_id } => format!("validation:{validation_id}"),
            LineageNode::Healing { healing_id } => format!("healing:{healing_id}"),
        }
    }

    pub fn is_dataset(&self) -> bool {
        matches!(self, LineageNode::Dataset { .. })
    }
}

impl fmt::Display for LineageNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}
