//! Structural-integrity pass separating declarative nodes from executable ones.
//!
//! Only terminal-layer nodes may carry executable content, and they must carry
//! a well-formed command payload. Every other layer must stay purely
//! declarative: no `command` payload, and no text that looks like a shell
//! script or a process spawn.

use super::validation::{ValidationReport, Violation, id_regex};
use super::{Layer, Node};
use regex::RegexSet;
use std::sync::OnceLock;

/// Patterns that mark a string as executable content.
const EXECUTABLE_PATTERNS: &[&str] = &[
    r"(?m)^\s*#!",
    r"\bsubprocess\.",
    r"\bos\.system\s*\(",
    r"\bos\.popen\s*\(",
    r"\bpopen\s*\(",
    r"\bexec\s*\(",
    r"\bspawn\s*\(",
    r"Command::new\s*\(",
    r"\$\([^)]*\)",
    r"`[^`\n]+`",
];

fn executable_patterns() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| RegexSet::new(EXECUTABLE_PATTERNS).expect("executable patterns are valid"))
}

/// True when `text` matches any executable-content pattern.
pub fn looks_executable(text: &str) -> bool {
    executable_patterns().is_match(text)
}

/// Check every node and return all separation violations at once.
pub fn check_separation(nodes: &[Node]) -> ValidationReport {
    let mut report = ValidationReport::default();
    for node in nodes {
        if node.layer.is_terminal() {
            check_terminal(node, &mut report);
        } else {
            check_declarative(node, &mut report);
        }
    }
    report
}

fn check_terminal(node: &Node, report: &mut ValidationReport) {
    let Some(ref command) = node.command else {
        report.push(Violation::new(
            &node.id,
            "command",
            "terminal node is missing its command payload",
        ));
        return;
    };

    if command.run.shell.trim().is_empty() {
        report.push(Violation::new(&node.id, "command.run.shell", "must not be empty"));
    }
    if command.run.workdir.trim().is_empty() {
        report.push(Violation::new(&node.id, "command.run.workdir", "must not be empty"));
    }
    if !command.ac_ref.is_empty()
        && (!id_regex().is_match(&command.ac_ref)
            || Layer::from_id(&command.ac_ref) != Some(Layer::Criteria))
    {
        report.push(Violation::new(
            &node.id,
            "command.ac_ref",
            format!("'{}' is not a criteria node id", command.ac_ref),
        ));
    }
    for artifact in &command.artifacts {
        if artifact.trim().is_empty() {
            report.push(Violation::new(&node.id, "command.artifacts", "artifact paths must not be blank"));
        }
    }
}

fn check_declarative(node: &Node, report: &mut ValidationReport) {
    if node.command.is_some() {
        report.push(Violation::new(
            &node.id,
            "command",
            format!("only {} nodes may carry a command payload", Layer::TERMINAL),
        ));
    }

    let mut fields: Vec<(&str, &str)> = vec![
        ("title", node.title.as_str()),
        ("description", node.description.as_str()),
    ];
    if let Some(ref owner) = node.metadata.owner {
        fields.push(("metadata.owner", owner));
    }
    if let Some(ref assignee) = node.metadata.assignee {
        fields.push(("metadata.assignee", assignee));
    }
    for label in &node.metadata.labels {
        fields.push(("metadata.labels", label));
    }

    for (field, value) in fields {
        if looks_executable(value) {
            report.push(Violation::new(
                &node.id,
                field,
                "contains executable content; move it to a command node",
            ));
        }
    }
}
