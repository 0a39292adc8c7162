//! Schema validation for node data.
//!
//! Validation never stops at the first problem: every check runs and each
//! failure is recorded as a [`Violation`] in one [`ValidationReport`].

use super::{Layer, Node};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::OnceLock;

/// Maximum progress percentage.
pub const MAX_PROGRESS: u8 = 100;

/// A single schema or structural-integrity problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// Node the problem was found on
    pub node_id: String,
    /// Field or rule that failed (e.g. "id", "links.parents", "command")
    pub field: String,
    pub message: String,
}

impl Violation {
    pub fn new(node_id: impl Into<String>, field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]: {}", self.node_id, self.field, self.message)
    }
}

/// Every violation found in one validation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn push(&mut self, violation: Violation) {
        self.violations.push(violation);
    }

    pub fn extend(&mut self, other: ValidationReport) {
        self.violations.extend(other.violations);
    }

    /// Convert into a `Result`, failing with `Error::Validation` when not valid.
    pub fn into_result(self) -> crate::Result<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(crate::Error::Validation(self))
        }
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.violations.iter().map(|v| v.to_string()).collect();
        write!(f, "{} violation(s): {}", parts.len(), parts.join("; "))
    }
}

/// The node id pattern: `^(PREFIX)-[A-Z0-9_-]+$` over the twelve layer prefixes.
pub fn id_regex() -> &'static Regex {
    static ID_RE: OnceLock<Regex> = OnceLock::new();
    ID_RE.get_or_init(|| {
        let prefixes: Vec<&str> = Layer::ALL.iter().map(|l| l.prefix()).collect();
        let pattern = format!("^({})-[A-Z0-9_-]+$", prefixes.join("|"));
        Regex::new(&pattern).expect("id pattern is a valid regex")
    })
}

/// Check an id against the pattern, returning `Error::InvalidId` on mismatch.
pub fn validate_id(id: &str) -> crate::Result<()> {
    if id_regex().is_match(id) {
        Ok(())
    } else {
        Err(crate::Error::InvalidId(format!(
            "ID must match {}, got: {}",
            id_regex().as_str(),
            id
        )))
    }
}

/// Validate a node against the schema.
///
/// Checks the id pattern and its prefix/layer agreement, a non-empty title,
/// the progress range, link id shapes and self-links, and label text.
/// Command payload placement is a separate concern (see `separation`).
pub fn validate_node(node: &Node) -> ValidationReport {
    let mut report = ValidationReport::default();
    let id = node.id.as_str();

    if !id_regex().is_match(id) {
        report.push(Violation::new(
            id,
            "id",
            format!("does not match {}", id_regex().as_str()),
        ));
    } else if Layer::from_id(id) != Some(node.layer) {
        report.push(Violation::new(
            id,
            "id",
            format!(
                "prefix does not match layer '{}' (expected {}-)",
                node.layer,
                node.layer.prefix()
            ),
        ));
    }

    if node.title.trim().is_empty() {
        report.push(Violation::new(id, "title", "must not be empty"));
    }

    if let Some(progress) = node.progress {
        if progress > MAX_PROGRESS {
            report.push(Violation::new(
                id,
                "progress",
                format!("must be 0-{}, got {}", MAX_PROGRESS, progress),
            ));
        }
    }

    for (field, ids) in [
        ("links.parents", &node.links.parents),
        ("links.children", &node.links.children),
    ] {
        for linked in ids {
            if linked == id {
                report.push(Violation::new(id, field, "node cannot link to itself"));
            } else if !id_regex().is_match(linked) {
                report.push(Violation::new(
                    id,
                    field,
                    format!("'{}' is not a valid node id", linked),
                ));
            }
        }
    }

    for label in &node.metadata.labels {
        if label.trim().is_empty() {
            report.push(Violation::new(id, "metadata.labels", "labels must not be blank"));
        }
    }

    report
}

/// Check that every link endpoint names a node in `nodes`.
///
/// Storage accepts links to unknown ids (deletes never cascade), so this
/// runs over a full snapshot and reports each missing endpoint once per
/// referencing node and field.
pub fn check_links(nodes: &[Node]) -> ValidationReport {
    let known: BTreeSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
    let mut report = ValidationReport::default();
    for node in nodes {
        for (field, ids) in [
            ("links.parents", &node.links.parents),
            ("links.children", &node.links.children),
        ] {
            for linked in ids.iter().filter(|l| !known.contains(l.as_str())) {
                report.push(Violation::new(
                    &node.id,
                    field,
                    format!("'{}' does not exist", linked),
                ));
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_links_reports_missing_endpoints() {
        let goal = Node::new("GOAL-A", Layer::Goal, "Top");
        let mut story = Node::new("STORY-B", Layer::Story, "Story");
        story.links.parents.insert("GOAL-A".to_string());
        story.links.parents.insert("EPIC-GONE".to_string());
        story.links.children.insert("REQ-GONE".to_string());

        let report = check_links(&[goal, story]);
        assert_eq!(
            report.violations,
            vec![
                Violation::new("STORY-B", "links.parents", "'EPIC-GONE' does not exist"),
                Violation::new("STORY-B", "links.children", "'REQ-GONE' does not exist"),
            ]
        );
    }

    #[test]
    fn test_check_links_accepts_closed_graph() {
        let mut goal = Node::new("GOAL-A", Layer::Goal, "Top");
        goal.links.children.insert("STRAT-B".to_string());
        let mut strat = Node::new("STRAT-B", Layer::Strategy, "Plan");
        strat.links.parents.insert("GOAL-A".to_string());
        assert!(check_links(&[goal, strat]).is_valid());
    }

    #[test]
    fn test_validate_id_valid() {
        assert!(validate_id("GOAL-A").is_ok());
        assert!(validate_id("AC-LOGIN_WORKS-2").is_ok());
        assert!(validate_id("CMD-AC-LOGIN").is_ok());
    }

    #[test]
    fn test_validate_id_invalid() {
        assert!(validate_id("goal-a").is_err());
        assert!(validate_id("GOAL-").is_err());
        assert!(validate_id("XYZ-A").is_err());
        assert!(validate_id("GOAL-a b").is_err());
    }

    #[test]
    fn test_valid_node_has_no_violations() {
        let node = Node::new("GOAL-A", Layer::Goal, "Ship it");
        assert!(validate_node(&node).is_valid());
    }

    #[test]
    fn test_all_violations_reported_in_one_pass() {
        let mut node = Node::new("TASK-A", Layer::Goal, "  ");
        node.progress = Some(150);
        node.links.parents.insert("TASK-A".to_string());
        node.links.children.insert("bad id".to_string());

        let report = validate_node(&node);
        let fields: Vec<&str> = report.violations.iter().map(|v| v.field.as_str()).collect();
        assert_eq!(report.violations.len(), 5);
        assert!(fields.contains(&"id"));
        assert!(fields.contains(&"title"));
        assert!(fields.contains(&"progress"));
        assert!(fields.contains(&"links.parents"));
        assert!(fields.contains(&"links.children"));
    }

    #[test]
    fn test_into_result() {
        let node = Node::new("bogus", Layer::Task, "x");
        let err = validate_node(&node).into_result().unwrap_err();
        assert!(matches!(err, crate::Error::Validation(_)));
    }
}
