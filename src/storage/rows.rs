//! Row mapping shared by the relational backends.
//!
//! Both relational backends use the same table layout:
//!
//! - `nodes` - one row per node (scalar fields)
//! - `node_links` - the node's own `parent` / `child` relations
//! - `labels` + `node_labels` - labels unique on their name, many-to-many with nodes
//! - `commands` - command payload of terminal nodes
//! - `command_artifacts` - declared artifact paths with their position
//!
//! Reads fetch a node together with its links, labels, command and artifacts
//! in a single statement: correlated subqueries aggregate the association
//! tables into JSON arrays, so listing N nodes costs one round trip instead of
//! one query per node and association.

use crate::models::{CommandPayload, Layer, Links, Metadata, Node, RunSpec, Status};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};

/// Relation value stored in `node_links.relation` for a parent id.
pub const RELATION_PARENT: &str = "parent";
/// Relation value stored in `node_links.relation` for a child id.
pub const RELATION_CHILD: &str = "child";

/// Eager-loading select for SQLite. Append a `WHERE` clause and/or `ORDER BY`.
pub const SQLITE_SELECT_NODES: &str = r#"
SELECT n.id, n.layer, n.title, n.description, n.status, n.progress,
       n.owner, n.severity, n.work_type, n.assignee, n.created_at, n.updated_at,
       (SELECT json_group_array(target_id) FROM node_links
         WHERE node_id = n.id AND relation = 'parent') AS parents,
       (SELECT json_group_array(target_id) FROM node_links
         WHERE node_id = n.id AND relation = 'child') AS children,
       (SELECT json_group_array(lb.name) FROM node_labels nl
          JOIN labels lb ON lb.id = nl.label_id
         WHERE nl.node_id = n.id) AS labels,
       c.ac_ref, c.shell, c.workdir, c.env_json,
       (SELECT json_group_array(json_array(position, path)) FROM command_artifacts
         WHERE node_id = n.id) AS artifacts
FROM nodes n
LEFT JOIN commands c ON c.node_id = n.id
"#;

/// Eager-loading select for PostgreSQL. Append a `WHERE` clause and/or `ORDER BY`.
pub const POSTGRES_SELECT_NODES: &str = r#"
SELECT n.id, n.layer, n.title, n.description, n.status, n.progress,
       n.owner, n.severity, n.work_type, n.assignee, n.created_at, n.updated_at,
       COALESCE((SELECT json_agg(target_id) FROM node_links
         WHERE node_id = n.id AND relation = 'parent'), '[]'::json)::text AS parents,
       COALESCE((SELECT json_agg(target_id) FROM node_links
         WHERE node_id = n.id AND relation = 'child'), '[]'::json)::text AS children,
       COALESCE((SELECT json_agg(lb.name) FROM node_labels nl
          JOIN labels lb ON lb.id = nl.label_id
         WHERE nl.node_id = n.id), '[]'::json)::text AS labels,
       c.ac_ref, c.shell, c.workdir, c.env_json,
       COALESCE((SELECT json_agg(json_build_array(position, path)) FROM command_artifacts
         WHERE node_id = n.id), '[]'::json)::text AS artifacts
FROM nodes n
LEFT JOIN commands c ON c.node_id = n.id
"#;

/// One eagerly loaded row, as raw column values.
#[derive(Debug, Clone)]
pub struct NodeRow {
    pub id: String,
    pub layer: String,
    pub title: String,
    pub description: String,
    pub status: String,
    pub progress: Option<i64>,
    pub owner: Option<String>,
    pub severity: Option<String>,
    pub work_type: Option<String>,
    pub assignee: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    /// JSON array of parent ids
    pub parents: String,
    /// JSON array of child ids
    pub children: String,
    /// JSON array of label names
    pub labels: String,
    pub ac_ref: Option<String>,
    /// NULL when the node has no command row
    pub shell: Option<String>,
    pub workdir: Option<String>,
    pub env_json: Option<String>,
    /// JSON array of `[position, path]` pairs
    pub artifacts: String,
}

impl NodeRow {
    /// Assemble the domain node from the raw columns.
    pub fn into_node(self) -> Result<Node> {
        let layer: Layer = self.layer.parse().map_err(|e| corrupt(&self.id, e))?;
        let status: Status = self.status.parse().map_err(|e| corrupt(&self.id, e))?;
        let progress = self
            .progress
            .map(|p| u8::try_from(p).map_err(|_| corrupt(&self.id, format!("progress {}", p))))
            .transpose()?;
        let severity = self
            .severity
            .as_deref()
            .map(str::parse)
            .transpose()
            .map_err(|e: String| corrupt(&self.id, e))?;
        let work_type = self
            .work_type
            .as_deref()
            .map(str::parse)
            .transpose()
            .map_err(|e: String| corrupt(&self.id, e))?;

        let parents: BTreeSet<String> = serde_json::from_str(&self.parents)?;
        let children: BTreeSet<String> = serde_json::from_str(&self.children)?;
        let labels: BTreeSet<String> = serde_json::from_str(&self.labels)?;

        let command = match self.shell {
            Some(shell) => {
                let env: BTreeMap<String, String> = match self.env_json.as_deref() {
                    Some(json) if !json.is_empty() => serde_json::from_str(json)?,
                    _ => BTreeMap::new(),
                };
                let mut artifacts: Vec<(i64, String)> = serde_json::from_str(&self.artifacts)?;
                artifacts.sort_by_key(|(position, _)| *position);
                Some(CommandPayload {
                    ac_ref: self.ac_ref.unwrap_or_default(),
                    run: RunSpec {
                        shell,
                        workdir: self.workdir.unwrap_or_else(|| ".".to_string()),
                        env,
                    },
                    artifacts: artifacts.into_iter().map(|(_, path)| path).collect(),
                })
            }
            None => None,
        };

        Ok(Node {
            created_at: parse_timestamp(&self.id, &self.created_at)?,
            updated_at: parse_timestamp(&self.id, &self.updated_at)?,
            id: self.id,
            layer,
            title: self.title,
            description: self.description,
            status,
            progress,
            metadata: Metadata {
                owner: self.owner,
                labels,
                severity,
                work_type,
                assignee: self.assignee,
            },
            links: Links { parents, children },
            command,
        })
    }
}

/// Scalar column values for the `nodes` table, in insert order.
pub struct NodeColumns<'a> {
    pub id: &'a str,
    pub layer: &'static str,
    pub title: &'a str,
    pub description: &'a str,
    pub status: &'static str,
    pub progress: Option<i64>,
    pub owner: Option<&'a str>,
    pub severity: Option<&'static str>,
    pub work_type: Option<&'static str>,
    pub assignee: Option<&'a str>,
    pub created_at: String,
    pub updated_at: String,
}

impl<'a> NodeColumns<'a> {
    pub fn from_node(node: &'a Node) -> Self {
        Self {
            id: &node.id,
            layer: node.layer.as_str(),
            title: &node.title,
            description: &node.description,
            status: node.status.as_str(),
            progress: node.progress.map(i64::from),
            owner: node.metadata.owner.as_deref(),
            severity: node.metadata.severity.map(|s| s.as_str()),
            work_type: node.metadata.work_type.map(|w| w.as_str()),
            assignee: node.metadata.assignee.as_deref(),
            created_at: node.created_at.to_rfc3339(),
            updated_at: node.updated_at.to_rfc3339(),
        }
    }
}

/// `(relation, target_id)` pairs for a node's own link rows.
pub fn link_rows(node: &Node) -> Vec<(&'static str, &str)> {
    node.links
        .parents
        .iter()
        .map(|p| (RELATION_PARENT, p.as_str()))
        .chain(
            node.links
                .children
                .iter()
                .map(|c| (RELATION_CHILD, c.as_str())),
        )
        .collect()
}

/// JSON encoding of a run environment for the `commands.env_json` column.
pub fn env_json(command: &CommandPayload) -> Result<String> {
    Ok(serde_json::to_string(&command.run.env)?)
}

fn parse_timestamp(id: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| corrupt(id, format!("timestamp '{}': {}", value, e)))
}

fn corrupt(id: &str, detail: impl std::fmt::Display) -> Error {
    Error::Other(format!("Corrupt row for node {}: {}", id, detail))
}
