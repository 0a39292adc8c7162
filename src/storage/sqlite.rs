//! Embedded SQLite backend.
//!
//! The secondary relational store. The database file defaults to
//! `<root>/.tracegraph/tracegraph.db` and is created on first open.

use super::backend::{BackendKind, LayeredNodes, NodeStore, group_by_layer};
use super::rows::{NodeColumns, NodeRow, SQLITE_SELECT_NODES, env_json, link_rows};
use crate::models::{Node, NodePatch};
use crate::{Error, Result};
use rusqlite::{Connection, Row, Transaction, params};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Relational backend over a single SQLite file.
pub struct SqliteAdapter {
    conn: Connection,
    path: PathBuf,
}

impl SqliteAdapter {
    /// Open (or create) the database at `path` and ensure the schema exists.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Self::init_schema(&conn)?;
        tracing::debug!(path = %path.display(), "opened sqlite store");
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    /// Check that a database at `path` can be opened and queried.
    pub fn probe(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let one: i64 = conn.query_row("SELECT 1", [], |row| row.get(0))?;
        if one != 1 {
            return Err(Error::Other("SQLite probe returned an unexpected value".to_string()));
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS nodes (
                id TEXT PRIMARY KEY,
                layer TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'planned',
                progress INTEGER,
                owner TEXT,
                severity TEXT,
                work_type TEXT,
                assignee TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS node_links (
                node_id TEXT NOT NULL,
                relation TEXT NOT NULL CHECK (relation IN ('parent', 'child')),
                target_id TEXT NOT NULL,
                PRIMARY KEY (node_id, relation, target_id),
                FOREIGN KEY (node_id) REFERENCES nodes(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS labels (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE
            );

            CREATE TABLE IF NOT EXISTS node_labels (
                node_id TEXT NOT NULL,
                label_id INTEGER NOT NULL,
                PRIMARY KEY (node_id, label_id),
                FOREIGN KEY (node_id) REFERENCES nodes(id) ON DELETE CASCADE,
                FOREIGN KEY (label_id) REFERENCES labels(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS commands (
                node_id TEXT PRIMARY KEY,
                ac_ref TEXT NOT NULL DEFAULT '',
                shell TEXT NOT NULL,
                workdir TEXT NOT NULL DEFAULT '.',
                env_json TEXT NOT NULL DEFAULT '{}',
                FOREIGN KEY (node_id) REFERENCES nodes(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS command_artifacts (
                node_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                path TEXT NOT NULL,
                PRIMARY KEY (node_id, position),
                FOREIGN KEY (node_id) REFERENCES commands(node_id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_nodes_layer ON nodes(layer);
            CREATE INDEX IF NOT EXISTS idx_node_links_target ON node_links(target_id);
            "#,
        )?;
        Ok(())
    }

    fn row_to_node(row: &Row<'_>) -> rusqlite::Result<NodeRow> {
        Ok(NodeRow {
            id: row.get(0)?,
            layer: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            status: row.get(4)?,
            progress: row.get(5)?,
            owner: row.get(6)?,
            severity: row.get(7)?,
            work_type: row.get(8)?,
            assignee: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
            parents: row.get(12)?,
            children: row.get(13)?,
            labels: row.get(14)?,
            ac_ref: row.get(15)?,
            shell: row.get(16)?,
            workdir: row.get(17)?,
            env_json: row.get(18)?,
            artifacts: row.get(19)?,
        })
    }

    fn exists(&self, id: &str) -> Result<bool> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM nodes WHERE id = ?1)",
            [id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Insert a node and all of its association rows.
    fn insert_node(tx: &Transaction<'_>, node: &Node) -> Result<()> {
        let cols = NodeColumns::from_node(node);
        tx.execute(
            r#"
            INSERT INTO nodes (id, layer, title, description, status, progress,
                               owner, severity, work_type, assignee, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                cols.id,
                cols.layer,
                cols.title,
                cols.description,
                cols.status,
                cols.progress,
                cols.owner,
                cols.severity,
                cols.work_type,
                cols.assignee,
                cols.created_at,
                cols.updated_at,
            ],
        )?;

        for (relation, target) in link_rows(node) {
            tx.execute(
                "INSERT OR IGNORE INTO node_links (node_id, relation, target_id) VALUES (?1, ?2, ?3)",
                params![node.id, relation, target],
            )?;
        }

        for label in &node.metadata.labels {
            tx.execute("INSERT OR IGNORE INTO labels (name) VALUES (?1)", [label])?;
            tx.execute(
                "INSERT OR IGNORE INTO node_labels (node_id, label_id)
                 SELECT ?1, id FROM labels WHERE name = ?2",
                params![node.id, label],
            )?;
        }

        if let Some(command) = &node.command {
            tx.execute(
                "INSERT INTO commands (node_id, ac_ref, shell, workdir, env_json)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    node.id,
                    command.ac_ref,
                    command.run.shell,
                    command.run.workdir,
                    env_json(command)?,
                ],
            )?;
            for (position, path) in command.artifacts.iter().enumerate() {
                tx.execute(
                    "INSERT INTO command_artifacts (node_id, position, path) VALUES (?1, ?2, ?3)",
                    params![node.id, position as i64, path],
                )?;
            }
        }

        Ok(())
    }

    /// Delete a node row; association rows go with it via `ON DELETE CASCADE`.
    fn remove_node(tx: &Transaction<'_>, id: &str) -> Result<usize> {
        Ok(tx.execute("DELETE FROM nodes WHERE id = ?1", [id])?)
    }

    fn query_nodes(&self, id: Option<&str>) -> Result<Vec<Node>> {
        let rows = match id {
            Some(id) => {
                let sql = format!("{} WHERE n.id = ?1", SQLITE_SELECT_NODES);
                let mut stmt = self.conn.prepare(&sql)?;
                stmt.query_map([id], Self::row_to_node)?
                    .collect::<std::result::Result<Vec<_>, _>>()?
            }
            None => {
                let sql = format!("{} ORDER BY n.id", SQLITE_SELECT_NODES);
                let mut stmt = self.conn.prepare(&sql)?;
                stmt.query_map([], Self::row_to_node)?
                    .collect::<std::result::Result<Vec<_>, _>>()?
            }
        };
        rows.into_iter().map(NodeRow::into_node).collect()
    }
}

impl NodeStore for SqliteAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }

    fn create(&mut self, node: &Node) -> Result<Node> {
        if self.exists(&node.id)? {
            return Err(Error::AlreadyExists(node.id.clone()));
        }
        let tx = self.conn.transaction()?;
        Self::insert_node(&tx, node)?;
        tx.commit()?;
        Ok(node.clone())
    }

    fn read(&self, id: &str) -> Result<Option<Node>> {
        Ok(self.query_nodes(Some(id))?.into_iter().next())
    }

    fn update(&mut self, id: &str, patch: &NodePatch) -> Result<Option<Node>> {
        let Some(mut node) = self.read(id)? else {
            return Ok(None);
        };
        patch.apply(&mut node);
        let tx = self.conn.transaction()?;
        Self::remove_node(&tx, id)?;
        Self::insert_node(&tx, &node)?;
        tx.commit()?;
        Ok(Some(node))
    }

    fn delete(&mut self, id: &str) -> Result<()> {
        let tx = self.conn.transaction()?;
        let removed = Self::remove_node(&tx, id)?;
        tx.commit()?;
        if removed > 0 {
            tracing::debug!(id, "deleted node from sqlite");
        }
        Ok(())
    }

    fn replace(&mut self, node: &Node) -> Result<()> {
        let tx = self.conn.transaction()?;
        Self::remove_node(&tx, &node.id)?;
        Self::insert_node(&tx, node)?;
        tx.commit()?;
        Ok(())
    }

    fn list(&self) -> Result<LayeredNodes> {
        Ok(group_by_layer(self.query_nodes(None)?))
    }

    fn ids(&self) -> Result<BTreeSet<String>> {
        let mut stmt = self.conn.prepare("SELECT id FROM nodes ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<BTreeSet<_>, _>>()?;
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CommandPayload, Layer, NodeQuery, RunSpec, Severity, Status, WorkType};
    use crate::test_utils::TestEnv;

    fn command_node() -> Node {
        let mut node = Node::new("CMD-LOGIN", Layer::Command, "Run login test");
        node.description = "Checks login".to_string();
        node.status = Status::Blocked;
        node.progress = Some(10);
        node.metadata.owner = Some("qa".to_string());
        node.metadata.assignee = Some("sam".to_string());
        node.metadata.severity = Some(Severity::Critical);
        node.metadata.work_type = Some(WorkType::Bug);
        node.metadata.labels.insert("auth".to_string());
        node.metadata.labels.insert("ci".to_string());
        node.links.parents.insert("AC-LOGIN".to_string());
        let mut run = RunSpec::new("cargo test login");
        run.workdir = "crates/app".to_string();
        run.env.insert("RUST_LOG".to_string(), "debug".to_string());
        node.command = Some(CommandPayload {
            ac_ref: "AC-LOGIN".to_string(),
            run,
            artifacts: vec![
                "z-last.xml".to_string(),
                "a-first.xml".to_string(),
                "m-middle.xml".to_string(),
            ],
        });
        node
    }

    #[test]
    fn test_create_then_read_round_trip() {
        let env = TestEnv::new();
        let mut store = env.sqlite();
        let node = command_node();
        store.create(&node).unwrap();

        let read = store.read("CMD-LOGIN").unwrap().unwrap();
        assert_eq!(read, node);
    }

    #[test]
    fn test_timestamps_keep_subsecond_precision() {
        let env = TestEnv::new();
        let mut store = env.sqlite();
        let node = Node::new("GOAL-A", Layer::Goal, "A");
        store.create(&node).unwrap();
        let read = store.read("GOAL-A").unwrap().unwrap();
        assert_eq!(read.created_at, node.created_at);
        assert_eq!(read.updated_at, node.updated_at);
    }

    #[test]
    fn test_create_duplicate_fails() {
        let env = TestEnv::new();
        let mut store = env.sqlite();
        store.create(&command_node()).unwrap();
        let err = store.create(&command_node()).unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
    }

    #[test]
    fn test_absent_ids_are_not_errors() {
        let env = TestEnv::new();
        let mut store = env.sqlite();
        assert!(store.read("GOAL-NONE").unwrap().is_none());
        assert!(store.update("GOAL-NONE", &NodePatch::default()).unwrap().is_none());
        store.delete("GOAL-NONE").unwrap();
    }

    #[test]
    fn test_update_replaces_sets() {
        let env = TestEnv::new();
        let mut store = env.sqlite();
        store.create(&command_node()).unwrap();

        let patch = NodePatch {
            labels: Some(["release".to_string()].into_iter().collect()),
            ..Default::default()
        };
        let updated = store.update("CMD-LOGIN", &patch).unwrap().unwrap();
        let read = store.read("CMD-LOGIN").unwrap().unwrap();
        assert_eq!(read, updated);
        assert_eq!(read.metadata.labels.len(), 1);
        assert!(read.metadata.labels.contains("release"));
        assert_eq!(read.metadata.owner.as_deref(), Some("qa"));
    }

    #[test]
    fn test_delete_does_not_cascade_to_linked_nodes() {
        let env = TestEnv::new();
        let mut store = env.sqlite();
        let mut parent = Node::new("GOAL-A", Layer::Goal, "A");
        parent.links.children.insert("STRAT-A".to_string());
        let mut child = Node::new("STRAT-A", Layer::Strategy, "A");
        child.links.parents.insert("GOAL-A".to_string());
        store.create(&parent).unwrap();
        store.create(&child).unwrap();

        store.delete("GOAL-A").unwrap();
        let child = store.read("STRAT-A").unwrap().unwrap();
        assert!(child.links.parents.contains("GOAL-A"));
        assert!(store.read("GOAL-A").unwrap().is_none());
    }

    #[test]
    fn test_labels_are_shared_rows() {
        let env = TestEnv::new();
        let mut store = env.sqlite();
        let mut a = Node::new("TASK-A", Layer::Task, "a");
        a.metadata.labels.insert("auth".to_string());
        let mut b = Node::new("TASK-B", Layer::Task, "b");
        b.metadata.labels.insert("auth".to_string());
        store.create(&a).unwrap();
        store.create(&b).unwrap();

        let count: i64 = store
            .conn
            .query_row("SELECT COUNT(*) FROM labels WHERE name = 'auth'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_list_and_search() {
        let env = TestEnv::new();
        let mut store = env.sqlite();
        store.create(&Node::new("GOAL-A", Layer::Goal, "Launch")).unwrap();
        store.create(&Node::new("TASK-B", Layer::Task, "Write docs")).unwrap();
        store.create(&Node::new("TASK-A", Layer::Task, "Write code")).unwrap();

        let listed = store.list().unwrap();
        assert_eq!(listed[&Layer::Task].len(), 2);
        assert_eq!(listed[&Layer::Task][0].id, "TASK-A");
        assert_eq!(store.ids().unwrap().len(), 3);

        let query = NodeQuery {
            text: Some("docs".to_string()),
            ..Default::default()
        };
        let found = store.search(&query).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "TASK-B");
    }

    #[test]
    fn test_replace_overwrites() {
        let env = TestEnv::new();
        let mut store = env.sqlite();
        store.create(&command_node()).unwrap();
        let mut node = command_node();
        node.command = None;
        node.links.parents.clear();
        store.replace(&node).unwrap();
        assert_eq!(store.read("CMD-LOGIN").unwrap().unwrap(), node);
    }

    #[test]
    fn test_probe() {
        let env = TestEnv::new();
        SqliteAdapter::probe(&env.db_path()).unwrap();
    }
}
