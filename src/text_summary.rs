//! Text summary builder for CLI output.
//!
//! Formats the result of a completed run, or a converted graph representation, into
//! human-readable lines for text mode and the TUI.

use crate::metrics;
use crate::model::{AlgorithmOutcome, Representation, RunRecord};

/// Edge list rows shown before the rest is summarised.
const EDGE_LIST_ROWS: usize = 50;

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

fn join_ids(ids: &[String]) -> String {
    if ids.is_empty() {
        "-".to_string()
    } else {
        ids.join(" → ")
    }
}

/// Build a text summary from a completed run.
pub(crate) fn build_text_summary(record: &RunRecord) -> TextSummary {
    let mut lines = Vec::new();

    lines.push(format!(
        "{}: {} entities, {} relations",
        record.algorithm.label(),
        record.entity_count,
        record.relation_count
    ));
    match (record.start.as_deref(), record.end.as_deref()) {
        (Some(s), Some(e)) => lines.push(format!("Start/End: {s} / {e}")),
        (Some(s), None) => lines.push(format!("Start: {s}")),
        _ => {}
    }

    match &record.outcome {
        AlgorithmOutcome::Traversal {
            order,
            visited_count,
        } => {
            lines.push(format!("Traversal order: {}", join_ids(order)));
            lines.push(format!("Visited: {visited_count} entities"));
        }
        AlgorithmOutcome::ShortestPath { path, distance } => {
            if path.is_empty() {
                lines.push("Path: no path found".to_string());
            } else {
                lines.push(format!("Path: {}", join_ids(path)));
                lines.push(format!("Total distance: {distance:.2} meters"));
            }
        }
        AlgorithmOutcome::Bipartite {
            is_bipartite,
            set_a,
            set_b,
        } => {
            if *is_bipartite {
                lines.push(format!(
                    "Bipartite: yes (set A: {} entities, set B: {} entities)",
                    set_a.len(),
                    set_b.len()
                ));
            } else {
                lines.push("Bipartite: no".to_string());
            }
        }
    }

    let played = record.steps.len();
    if record.malformed_steps > 0 {
        lines.push(format!(
            "Steps: {played}/{} played, {} malformed skipped",
            record.total_steps, record.malformed_steps
        ));
    } else {
        lines.push(format!("Steps: {played}/{} played", record.total_steps));
    }

    if let Some((mean, median, p25, p75)) = metrics::compute_metrics(&record.step_gaps_ms) {
        lines.push(format!(
            "Pacing: avg {mean:.0} med {median:.0} p25 {p25:.0} p75 {p75:.0} ms (target {} ms)",
            record.interval_ms
        ));
    }

    TextSummary { lines }
}

/// Lines for a converted representation, headed by the format name.
pub(crate) fn build_representation_lines(repr: &Representation) -> Vec<String> {
    let mut lines = vec![repr.format().label().to_uppercase()];
    match repr {
        Representation::AdjacencyMatrix { nodes, matrix } => {
            if !nodes.is_empty() {
                lines.push(format!("Order: {}", nodes.join(", ")));
            }
            for row in matrix {
                let cells: Vec<String> = row.iter().map(|v| format!("{v:>3.0}")).collect();
                lines.push(cells.join(" "));
            }
        }
        Representation::AdjacencyList { adjacency_list } => {
            for (node, neighbors) in adjacency_list {
                let names: Vec<&str> = neighbors.iter().map(|n| n.node.as_str()).collect();
                lines.push(format!("{node}: {}", names.join(", ")));
            }
        }
        Representation::EdgeList { edges } => {
            lines.push(format!("Total edges: {}", edges.len()));
            for edge in edges.iter().take(EDGE_LIST_ROWS) {
                lines.push(format!(
                    "{} -- {} ({:.2})",
                    edge.source, edge.target, edge.weight
                ));
            }
            if edges.len() > EDGE_LIST_ROWS {
                lines.push(format!("... and {} more edges", edges.len() - EDGE_LIST_ROWS));
            }
        }
    }
    lines
}
