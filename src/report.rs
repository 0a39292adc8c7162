//! Traceability artifacts derived from a graph analysis.
//!
//! Files are regenerated in full on every run and never read back:
//!
//! - `traceability.csv` - one row per node: `id,layer,forward,backward,orphan`
//! - `dependency-graph.json` - nodes and directed parent → child edges
//! - `dependency-graph.dot` - the same graph for Graphviz

use crate::models::graph::{DependencyGraph, GraphIndex, TraceabilityRow};
use crate::Result;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const MATRIX_FILE: &str = "traceability.csv";
pub const GRAPH_JSON_FILE: &str = "dependency-graph.json";
pub const GRAPH_DOT_FILE: &str = "dependency-graph.dot";

/// Paths of the written artifacts.
#[derive(Debug, Clone, Serialize)]
pub struct ReportPaths {
    pub matrix: PathBuf,
    pub graph_json: PathBuf,
    pub graph_dot: PathBuf,
}

/// Write every artifact for `index` into `out_dir`, creating it if needed.
pub fn write_reports(index: &GraphIndex, out_dir: &Path) -> Result<ReportPaths> {
    fs::create_dir_all(out_dir)?;
    let paths = ReportPaths {
        matrix: out_dir.join(MATRIX_FILE),
        graph_json: out_dir.join(GRAPH_JSON_FILE),
        graph_dot: out_dir.join(GRAPH_DOT_FILE),
    };

    let graph = index.dependency_graph();
    fs::write(&paths.matrix, matrix_csv(&index.traceability_matrix()))?;
    fs::write(&paths.graph_json, serde_json::to_string_pretty(&graph)?)?;
    fs::write(&paths.graph_dot, graph_dot(&graph))?;

    tracing::info!(dir = %out_dir.display(), nodes = graph.nodes.len(), "wrote traceability reports");
    Ok(paths)
}

/// Render the traceability matrix as CSV.
pub fn matrix_csv(rows: &[TraceabilityRow]) -> String {
    let mut csv = String::from("id,layer,forward,backward,orphan\n");
    for row in rows {
        csv.push_str(&format!(
            "{},{},{},{},{}\n",
            csv_field(&row.id),
            row.layer,
            row.forward,
            row.backward,
            row.orphan
        ));
    }
    csv
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Render the dependency graph in Graphviz DOT, ranked top to bottom.
pub fn graph_dot(graph: &DependencyGraph) -> String {
    let mut dot = String::from(
        "digraph tracegraph {\n\
         rankdir=TB;\n\
         node [shape=box,style=rounded,fontname=\"Helvetica\",fontsize=10];\n",
    );
    for node in &graph.nodes {
        dot.push_str(&format!(
            "\"{}\" [label=\"{}\\n{}\",tooltip=\"{}\"];\n",
            dot_escape(&node.id),
            dot_escape(&node.id),
            dot_escape(&node.title),
            node.layer
        ));
    }
    for edge in &graph.edges {
        dot.push_str(&format!(
            "\"{}\" -> \"{}\";\n",
            dot_escape(&edge.source),
            dot_escape(&edge.target)
        ));
    }
    dot.push_str("}\n");
    dot
}

fn dot_escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Layer, Node};
    use tempfile::TempDir;

    fn sample() -> GraphIndex {
        let goal = Node::new("GOAL-A", Layer::Goal, "Ship \"it\"");
        let mut strat = Node::new("STRAT-A", Layer::Strategy, "Plan");
        strat.links.parents.insert("GOAL-A".to_string());
        let orphan = Node::new("TASK-LOST", Layer::Task, "Lost, alone");
        GraphIndex::build(&[goal, strat, orphan])
    }

    #[test]
    fn test_matrix_csv() {
        let csv = matrix_csv(&sample().traceability_matrix());
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "id,layer,forward,backward,orphan");
        assert!(lines.contains(&"GOAL-A,goal,1,0,false"));
        assert!(lines.contains(&"STRAT-A,strategy,0,1,false"));
        assert!(lines.contains(&"TASK-LOST,task,0,0,true"));
    }

    #[test]
    fn test_csv_field_quotes_when_needed() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_graph_dot_escapes_titles() {
        let dot = graph_dot(&sample().dependency_graph());
        assert!(dot.starts_with("digraph tracegraph {"));
        assert!(dot.contains("\"GOAL-A\" -> \"STRAT-A\";"));
        assert!(dot.contains("Ship \\\"it\\\""));
    }

    #[test]
    fn test_write_reports_creates_all_files() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("reports");
        let paths = write_reports(&sample(), &out).unwrap();
        assert!(paths.matrix.exists());
        assert!(paths.graph_dot.exists());

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&paths.graph_json).unwrap()).unwrap();
        assert_eq!(json["nodes"].as_array().unwrap().len(), 3);
        assert_eq!(json["edges"].as_array().unwrap().len(), 1);
    }
}
