//! Data models for tracegraph entities.
//!
//! This module defines the core data structures:
//! - `Node` - The universal hierarchical entity (one per layer item)
//! - `Layer` - The twelve ordered hierarchy layers
//! - `Metadata` / `Links` - Ownership, labels and parent/child relations
//! - `CommandPayload` - What to run and where (terminal layer only)
//! - `NodePatch` / `NodeQuery` - Partial updates and search predicates

pub mod graph;
pub mod layer;
pub mod separation;
pub mod validation;

pub use layer::Layer;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Node status in the workflow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Planned,
    InProgress,
    Blocked,
    Cancelled,
    #[serde(alias = "completed")]
    Done,
    Rejected,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planned => "planned",
            Self::InProgress => "in_progress",
            Self::Blocked => "blocked",
            Self::Cancelled => "cancelled",
            Self::Done => "done",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "planned" | "todo" => Ok(Self::Planned),
            "in_progress" | "in-progress" | "inprogress" => Ok(Self::InProgress),
            "blocked" => Ok(Self::Blocked),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            "done" | "completed" => Ok(Self::Done),
            "rejected" => Ok(Self::Rejected),
            _ => Err(format!("Invalid status: {}", s)),
        }
    }
}

/// Severity of a node's subject matter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            _ => Err(format!("Invalid severity: {}", s)),
        }
    }
}

/// Kind of work a node represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkType {
    Feature,
    Bug,
    Chore,
    Research,
    Documentation,
}

impl WorkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Feature => "feature",
            Self::Bug => "bug",
            Self::Chore => "chore",
            Self::Research => "research",
            Self::Documentation => "documentation",
        }
    }
}

impl FromStr for WorkType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "feature" => Ok(Self::Feature),
            "bug" => Ok(Self::Bug),
            "chore" => Ok(Self::Chore),
            "research" | "spike" => Ok(Self::Research),
            "documentation" | "docs" => Ok(Self::Documentation),
            _ => Err(format!("Invalid work type: {}", s)),
        }
    }
}

/// Ownership and categorization attached to a node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,

    /// Free-text tags; uniqueness is on the tag string itself
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub labels: BTreeSet<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_type: Option<WorkType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
}

impl Metadata {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Parent and child relations of a node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Links {
    #[serde(default)]
    pub parents: BTreeSet<String>,

    #[serde(default)]
    pub children: BTreeSet<String>,
}

/// How a command node is invoked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSpec {
    /// Shell command line, run with `sh -c`
    pub shell: String,

    #[serde(default = "default_workdir")]
    pub workdir: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

fn default_workdir() -> String {
    ".".to_string()
}

impl RunSpec {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
            workdir: default_workdir(),
            env: BTreeMap::new(),
        }
    }
}

/// Executable payload carried only by terminal-layer nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandPayload {
    /// Criteria node this command verifies
    #[serde(default)]
    pub ac_ref: String,

    pub run: RunSpec,

    /// Paths the command is expected to produce
    #[serde(default)]
    pub artifacts: Vec<String>,
}

/// The universal entity tracked by tracegraph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier (e.g., "GOAL-LAUNCH"); immutable after creation
    pub id: String,

    pub layer: Layer,

    pub title: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub status: Status,

    /// Completion percentage (0-100)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,

    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,

    #[serde(default)]
    pub links: Links,

    /// Present only on terminal-layer nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<CommandPayload>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Node {
    /// Create a new node with the given ID, layer and title.
    pub fn new(id: impl Into<String>, layer: Layer, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            layer,
            title: title.into(),
            description: String::new(),
            status: Status::default(),
            progress: None,
            metadata: Metadata::default(),
            links: Links::default(),
            command: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// True when the content fields of both nodes match, ignoring timestamps.
    pub fn same_content(&self, other: &Node) -> bool {
        self.id == other.id
            && self.layer == other.layer
            && self.title == other.title
            && self.description == other.description
            && self.status == other.status
            && self.progress == other.progress
            && self.metadata == other.metadata
            && self.links == other.links
            && self.command == other.command
    }
}

/// Input for creating a node; the id is generated from the title when absent.
#[derive(Debug, Clone)]
pub struct NewNode {
    pub id: Option<String>,
    pub layer: Layer,
    pub title: String,
    pub description: String,
    pub status: Status,
    pub progress: Option<u8>,
    pub metadata: Metadata,
    pub links: Links,
    pub command: Option<CommandPayload>,
}

impl NewNode {
    pub fn new(layer: Layer, title: impl Into<String>) -> Self {
        Self {
            id: None,
            layer,
            title: title.into(),
            description: String::new(),
            status: Status::default(),
            progress: None,
            metadata: Metadata::default(),
            links: Links::default(),
            command: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.links.parents.insert(parent.into());
        self
    }

    pub fn with_command(mut self, command: CommandPayload) -> Self {
        self.command = Some(command);
        self
    }

    /// Materialize into a `Node` with the given final id.
    pub fn into_node(self, id: String) -> Node {
        let mut node = Node::new(id, self.layer, self.title);
        node.description = self.description;
        node.status = self.status;
        node.progress = self.progress;
        node.metadata = self.metadata;
        node.links = self.links;
        node.command = self.command;
        node
    }
}

/// Partial update for a node.
///
/// Absent fields are left untouched. Present fields replace the stored value
/// entirely: `parents`, `children` and `labels` are whole-set replacements,
/// never merged. Metadata is patched per sub-field so that an owner change
/// leaves labels alone.
#[derive(Debug, Clone, Default)]
pub struct NodePatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<Status>,
    /// `Some(None)` clears progress
    pub progress: Option<Option<u8>>,
    pub owner: Option<String>,
    pub labels: Option<BTreeSet<String>>,
    pub severity: Option<Severity>,
    pub work_type: Option<WorkType>,
    pub assignee: Option<String>,
    pub parents: Option<BTreeSet<String>>,
    pub children: Option<BTreeSet<String>>,
    /// `Some(None)` removes the command payload
    pub command: Option<Option<CommandPayload>>,
}

impl NodePatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.status.is_none()
            && self.progress.is_none()
            && self.owner.is_none()
            && self.labels.is_none()
            && self.severity.is_none()
            && self.work_type.is_none()
            && self.assignee.is_none()
            && self.parents.is_none()
            && self.children.is_none()
            && self.command.is_none()
    }

    /// Apply this patch to a node, bumping `updated_at`.
    pub fn apply(&self, node: &mut Node) {
        if let Some(ref title) = self.title {
            node.title = title.clone();
        }
        if let Some(ref description) = self.description {
            node.description = description.clone();
        }
        if let Some(status) = self.status {
            node.status = status;
        }
        if let Some(progress) = self.progress {
            node.progress = progress;
        }
        if let Some(ref owner) = self.owner {
            node.metadata.owner = Some(owner.clone());
        }
        if let Some(ref labels) = self.labels {
            node.metadata.labels = labels.clone();
        }
        if let Some(severity) = self.severity {
            node.metadata.severity = Some(severity);
        }
        if let Some(work_type) = self.work_type {
            node.metadata.work_type = Some(work_type);
        }
        if let Some(ref assignee) = self.assignee {
            node.metadata.assignee = Some(assignee.clone());
        }
        if let Some(ref parents) = self.parents {
            node.links.parents = parents.clone();
        }
        if let Some(ref children) = self.children {
            node.links.children = children.clone();
        }
        if let Some(ref command) = self.command {
            node.command = command.clone();
        }
        node.updated_at = Utc::now();
    }
}

/// Search predicate over nodes. Every set field must match.
#[derive(Debug, Clone, Default)]
pub struct NodeQuery {
    pub layer: Option<Layer>,
    pub status: Option<Status>,
    pub label: Option<String>,
    pub owner: Option<String>,
    pub assignee: Option<String>,
    /// Case-insensitive substring of id, title or description
    pub text: Option<String>,
}

impl NodeQuery {
    pub fn matches(&self, node: &Node) -> bool {
        if self.layer.is_some_and(|l| l != node.layer) {
            return false;
        }
        if self.status.is_some_and(|s| s != node.status) {
            return false;
        }
        if let Some(ref label) = self.label {
            if !node.metadata.labels.contains(label) {
                return false;
            }
        }
        if let Some(ref owner) = self.owner {
            if node.metadata.owner.as_deref() != Some(owner.as_str()) {
                return false;
            }
        }
        if let Some(ref assignee) = self.assignee {
            if node.metadata.assignee.as_deref() != Some(assignee.as_str()) {
                return false;
            }
        }
        if let Some(ref text) = self.text {
            let needle = text.to_lowercase();
            let hit = node.id.to_lowercase().contains(&needle)
                || node.title.to_lowercase().contains(&needle)
                || node.description.to_lowercase().contains(&needle);
            if !hit {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_default_and_aliases() {
        assert_eq!(Status::default(), Status::Planned);
        assert_eq!("completed".parse::<Status>().unwrap(), Status::Done);
        assert_eq!("in-progress".parse::<Status>().unwrap(), Status::InProgress);
        let parsed: Status = serde_json::from_str("\"completed\"").unwrap();
        assert_eq!(parsed, Status::Done);
    }

    #[test]
    fn test_patch_owner_keeps_labels() {
        let mut node = Node::new("REQ-LOGIN", Layer::Requirement, "Login");
        node.metadata.labels.insert("auth".to_string());

        let patch = NodePatch {
            owner: Some("alice".to_string()),
            ..Default::default()
        };
        patch.apply(&mut node);

        assert_eq!(node.metadata.owner.as_deref(), Some("alice"));
        assert!(node.metadata.labels.contains("auth"));
    }

    #[test]
    fn test_patch_replaces_sets() {
        let mut node = Node::new("REQ-LOGIN", Layer::Requirement, "Login");
        node.links.parents.insert("STORY-A".to_string());
        node.metadata.labels.insert("old".to_string());

        let patch = NodePatch {
            parents: Some(BTreeSet::from(["STORY-B".to_string()])),
            labels: Some(BTreeSet::new()),
            ..Default::default()
        };
        patch.apply(&mut node);

        assert_eq!(
            node.links.parents,
            BTreeSet::from(["STORY-B".to_string()])
        );
        assert!(node.metadata.labels.is_empty());
    }

    #[test]
    fn test_patch_clears_progress() {
        let mut node = Node::new("TASK-X", Layer::Task, "X");
        node.progress = Some(40);
        NodePatch {
            progress: Some(None),
            ..Default::default()
        }
        .apply(&mut node);
        assert_eq!(node.progress, None);
    }

    #[test]
    fn test_query_matches() {
        let mut node = Node::new("FEAT-SEARCH", Layer::Feature, "Full text search");
        node.metadata.labels.insert("ux".to_string());

        assert!(NodeQuery::default().matches(&node));
        assert!(
            NodeQuery {
                text: Some("TEXT".to_string()),
                ..Default::default()
            }
            .matches(&node)
        );
        assert!(
            !NodeQuery {
                layer: Some(Layer::Epic),
                ..Default::default()
            }
            .matches(&node)
        );
        assert!(
            !NodeQuery {
                label: Some("perf".to_string()),
                ..Default::default()
            }
            .matches(&node)
        );
    }

    #[test]
    fn test_same_content_ignores_timestamps() {
        let a = Node::new("GOAL-A", Layer::Goal, "A");
        let mut b = a.clone();
        b.updated_at = b.updated_at + chrono::Duration::seconds(5);
        assert!(a.same_content(&b));
        b.title = "B".to_string();
        assert!(!a.same_content(&b));
    }
}
