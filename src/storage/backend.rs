//! Node store trait and backend kinds.
//!
//! This module defines the CRUD contract every persistence backend implements:
//! - `PostgresAdapter` - Primary relational backend (feature `postgres`)
//! - `SqliteAdapter` - Secondary, embedded relational backend
//! - `FlatFileAdapter` - One YAML file per node, partitioned by layer

use crate::Result;
use crate::models::{Layer, Node, NodePatch, NodeQuery};
use std::collections::{BTreeMap, BTreeSet};

/// Nodes grouped by layer, each group ordered by id.
pub type LayeredNodes = BTreeMap<Layer, Vec<Node>>;

/// Trait for backends that persist nodes.
///
/// Not-found is never an error: `read` and `update` return `Ok(None)` and
/// `delete` is a no-op for absent ids.
pub trait NodeStore: Send {
    /// Which backend this is.
    fn kind(&self) -> BackendKind;

    /// Storage location description (for display purposes).
    fn location(&self) -> String;

    /// Insert a new node. Fails with `Error::AlreadyExists` on a duplicate id.
    fn create(&mut self, node: &Node) -> Result<Node>;

    fn read(&self, id: &str) -> Result<Option<Node>>;

    /// Apply a patch to an existing node and return the stored result.
    fn update(&mut self, id: &str, patch: &NodePatch) -> Result<Option<Node>>;

    /// Remove a node. Never cascades to children.
    fn delete(&mut self, id: &str) -> Result<()>;

    /// Insert or fully overwrite a node.
    fn replace(&mut self, node: &Node) -> Result<()>;

    fn list(&self) -> Result<LayeredNodes>;

    /// Every stored id.
    fn ids(&self) -> Result<BTreeSet<String>> {
        Ok(self
            .list()?
            .into_values()
            .flatten()
            .map(|n| n.id)
            .collect())
    }

    fn search(&self, query: &NodeQuery) -> Result<Vec<Node>> {
        Ok(self
            .list()?
            .into_values()
            .flatten()
            .filter(|n| query.matches(n))
            .collect())
    }
}

/// Group a flat node list by layer, ordering each group by id.
pub fn group_by_layer(nodes: impl IntoIterator<Item = Node>) -> LayeredNodes {
    let mut grouped: LayeredNodes = BTreeMap::new();
    for node in nodes {
        grouped.entry(node.layer).or_default().push(node);
    }
    for group in grouped.values_mut() {
        group.sort_by(|a, b| a.id.cmp(&b.id));
    }
    grouped
}

/// Available backend kinds, in fallback-chain order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Primary relational backend - PostgreSQL server
    Postgres,
    /// Secondary embedded relational backend - SQLite file
    Sqlite,
    /// Declarative YAML tree - always available
    FlatFile,
}

impl BackendKind {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Sqlite => "sqlite",
            Self::FlatFile => "flat-file",
        }
    }

    pub fn is_relational(&self) -> bool {
        matches!(self, Self::Postgres | Self::Sqlite)
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
