//! Lineage rendering in dot, json and html formats

use crate::graph::{LineageGraph, NodeInfo};
use crate::node::LineageNode;
use mend_common::Result;
use petgraph::Direction;
use serde_json::json;
use std::collections::HashSet;
use std::fmt::Write;

/// Supported output formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisualizationFormat {
    Dot,
    Json,
    Html,
}

/// Render the neighborhood of a node (both directions, bounded by depth)
pub fn render(
    graph: &LineageGraph,
    root: &LineageNode,
    depth: Option<usize>,
    format: VisualizationFormat,
) -> Result<String> {
    let upstream = graph.walk(root, Direction::Incoming, depth);
    let downstream = graph.walk(root, Direction::Outgoing, depth);
    let mut keys: HashSet<String> = HashSet::new();
    for info in upstream.iter().chain(downstream.iter()) {
        keys.insert(info.node.key());
    }

    match format {
        VisualizationFormat::Json => render_json(root, &upstream, &downstream),
        VisualizationFormat::Dot => Ok(render_dot(graph, &keys)),
        VisualizationFormat::Html => {
            let dot = render_dot(graph, &keys);
            Ok(render_html(root, &dot))
        }
    }
}

fn render_json(
    root: &LineageNode,
    upstream: &[NodeInfo],
    downstream: &[NodeInfo],
) -> Result<String> {
    let doc = json!({
        "root": root,
        "upstream": upstream.iter().skip(1).collect::<Vec<_>>(),
        "downstream": downstream.iter().skip(1).collect::<Vec<_>>(),
    });
    Ok(serde_json::to_string_pretty(&doc)?)
}

fn render_dot(graph: &LineageGraph, keys: &HashSet<String>) -> String {
    let mut out = String::from("digraph lineage {\n  rankdir=LR;\n");
    for node in graph.nodes().filter(|n| keys.contains(&n.key())) {
        let shape = match node {
            LineageNode::Source { .. } => "cylinder",
            LineageNode::Dataset { .. } => "box",
            LineageNode::Validation { .. } => "diamond",
            LineageNode::Healing { .. } => "ellipse",
        };
        let _ = writeln!(out, "  \"{}\" [shape={shape}];", node.key());
    }
    for (from, to, edge) in graph.edges() {
        if keys.contains(&from.key()) && keys.contains(&to.key()) {
            let _ = writeln!(
                out,
                "  \"{}\" -> \"{}\" [label=\"{}\"];",
                from.key(),
                to.key(),
                edge.operation
            );
        }
    }
    out.push_str("}\n");
    out
}

fn render_html(root: &LineageNode, dot: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head><title>Lineage: {root}</title></head>\n\
         <body>\n<h1>Lineage for {root}</h1>\n<pre class=\"dot\">\n{dot}</pre>\n</body>\n</html>\n"
    )
}
