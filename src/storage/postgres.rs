//! PostgreSQL backend (feature `postgres`).
//!
//! The library is synchronous, so the adapter owns a private current-thread
//! tokio runtime and drives a single-connection `PgPool` with `block_on`.

use super::backend::{BackendKind, LayeredNodes, NodeStore, group_by_layer};
use super::router::redact_url;
use super::rows::{NodeColumns, NodeRow, POSTGRES_SELECT_NODES, env_json, link_rows};
use crate::models::{Node, NodePatch};
use crate::{Error, Result};
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions, PgRow};
use sqlx::{Connection, Postgres, Row, Transaction};
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::runtime::{Builder, Runtime};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS nodes (
        id TEXT PRIMARY KEY,
        layer TEXT NOT NULL,
        title TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        status TEXT NOT NULL DEFAULT 'planned',
        progress BIGINT,
        owner TEXT,
        severity TEXT,
        work_type TEXT,
        assignee TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS node_links (
        node_id TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
        relation TEXT NOT NULL CHECK (relation IN ('parent', 'child')),
        target_id TEXT NOT NULL,
        PRIMARY KEY (node_id, relation, target_id)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS labels (
        id BIGSERIAL PRIMARY KEY,
        name TEXT NOT NULL UNIQUE
    )"#,
    r#"CREATE TABLE IF NOT EXISTS node_labels (
        node_id TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
        label_id BIGINT NOT NULL REFERENCES labels(id) ON DELETE CASCADE,
        PRIMARY KEY (node_id, label_id)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS commands (
        node_id TEXT PRIMARY KEY REFERENCES nodes(id) ON DELETE CASCADE,
        ac_ref TEXT NOT NULL DEFAULT '',
        shell TEXT NOT NULL,
        workdir TEXT NOT NULL DEFAULT '.',
        env_json TEXT NOT NULL DEFAULT '{}'
    )"#,
    r#"CREATE TABLE IF NOT EXISTS command_artifacts (
        node_id TEXT NOT NULL REFERENCES commands(node_id) ON DELETE CASCADE,
        position BIGINT NOT NULL,
        path TEXT NOT NULL,
        PRIMARY KEY (node_id, position)
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_nodes_layer ON nodes(layer)",
    "CREATE INDEX IF NOT EXISTS idx_node_links_target ON node_links(target_id)",
];

/// Relational backend over a PostgreSQL server.
pub struct PostgresAdapter {
    runtime: Runtime,
    pool: PgPool,
    location: String,
}

fn runtime() -> Result<Runtime> {
    Ok(Builder::new_current_thread().enable_all().build()?)
}

impl PostgresAdapter {
    /// Connect to `url` and ensure the schema exists.
    pub fn connect(url: &str) -> Result<Self> {
        let runtime = runtime()?;
        let pool = runtime.block_on(async {
            let pool = PgPoolOptions::new()
                .max_connections(1)
                .acquire_timeout(CONNECT_TIMEOUT)
                .connect(url)
                .await?;
            for statement in SCHEMA {
                sqlx::query(statement).execute(&pool).await?;
            }
            Ok::<_, Error>(pool)
        })?;
        tracing::debug!(url = %redact_url(url), "connected postgres store");
        Ok(Self {
            runtime,
            pool,
            location: redact_url(url),
        })
    }

    /// Open a connection, run `SELECT 1`, and close it.
    pub fn probe(url: &str) -> Result<()> {
        runtime()?.block_on(async {
            let mut conn = tokio::time::timeout(CONNECT_TIMEOUT, PgConnection::connect(url))
                .await
                .map_err(|_| Error::Other("connection timed out".to_string()))??;
            let one: i32 = sqlx::query_scalar("SELECT 1").fetch_one(&mut conn).await?;
            conn.close().await?;
            if one != 1 {
                return Err(Error::Other("Postgres probe returned an unexpected value".to_string()));
            }
            Ok(())
        })
    }

    fn pg_row(row: &PgRow) -> std::result::Result<NodeRow, sqlx::Error> {
        Ok(NodeRow {
            id: row.try_get("id")?,
            layer: row.try_get("layer")?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            status: row.try_get("status")?,
            progress: row.try_get("progress")?,
            owner: row.try_get("owner")?,
            severity: row.try_get("severity")?,
            work_type: row.try_get("work_type")?,
            assignee: row.try_get("assignee")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            parents: row.try_get("parents")?,
            children: row.try_get("children")?,
            labels: row.try_get("labels")?,
            ac_ref: row.try_get("ac_ref")?,
            shell: row.try_get("shell")?,
            workdir: row.try_get("workdir")?,
            env_json: row.try_get("env_json")?,
            artifacts: row.try_get("artifacts")?,
        })
    }

    fn query_nodes(&self, id: Option<&str>) -> Result<Vec<Node>> {
        let rows = self.runtime.block_on(async {
            match id {
                Some(id) => {
                    let sql = format!("{} WHERE n.id = $1", POSTGRES_SELECT_NODES);
                    sqlx::query(&sql).bind(id).fetch_all(&self.pool).await
                }
                None => {
                    let sql = format!("{} ORDER BY n.id", POSTGRES_SELECT_NODES);
                    sqlx::query(&sql).fetch_all(&self.pool).await
                }
            }
        })?;
        rows.iter()
            .map(|row| Self::pg_row(row).map_err(Error::from)?.into_node())
            .collect()
    }
}

async fn insert_node(tx: &mut Transaction<'static, Postgres>, node: &Node) -> Result<()> {
    let cols = NodeColumns::from_node(node);
    sqlx::query(
        r#"
        INSERT INTO nodes (id, layer, title, description, status, progress,
                           owner, severity, work_type, assignee, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#,
    )
    .bind(cols.id)
    .bind(cols.layer)
    .bind(cols.title)
    .bind(cols.description)
    .bind(cols.status)
    .bind(cols.progress)
    .bind(cols.owner)
    .bind(cols.severity)
    .bind(cols.work_type)
    .bind(cols.assignee)
    .bind(&cols.created_at)
    .bind(&cols.updated_at)
    .execute(&mut **tx)
    .await?;

    for (relation, target) in link_rows(node) {
        sqlx::query(
            "INSERT INTO node_links (node_id, relation, target_id) VALUES ($1, $2, $3)
             ON CONFLICT DO NOTHING",
        )
        .bind(&node.id)
        .bind(relation)
        .bind(target)
        .execute(&mut **tx)
        .await?;
    }

    for label in &node.metadata.labels {
        sqlx::query("INSERT INTO labels (name) VALUES ($1) ON CONFLICT (name) DO NOTHING")
            .bind(label)
            .execute(&mut **tx)
            .await?;
        sqlx::query(
            "INSERT INTO node_labels (node_id, label_id)
             SELECT $1, id FROM labels WHERE name = $2
             ON CONFLICT DO NOTHING",
        )
        .bind(&node.id)
        .bind(label)
        .execute(&mut **tx)
        .await?;
    }

    if let Some(command) = &node.command {
        sqlx::query(
            "INSERT INTO commands (node_id, ac_ref, shell, workdir, env_json)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&node.id)
        .bind(&command.ac_ref)
        .bind(&command.run.shell)
        .bind(&command.run.workdir)
        .bind(env_json(command)?)
        .execute(&mut **tx)
        .await?;
        for (position, path) in command.artifacts.iter().enumerate() {
            sqlx::query(
                "INSERT INTO command_artifacts (node_id, position, path) VALUES ($1, $2, $3)",
            )
            .bind(&node.id)
            .bind(position as i64)
            .bind(path)
            .execute(&mut **tx)
            .await?;
        }
    }

    Ok(())
}

async fn remove_node(tx: &mut Transaction<'static, Postgres>, id: &str) -> Result<u64> {
    let result = sqlx::query("DELETE FROM nodes WHERE id = $1")
        .bind(id)
        .execute(&mut **tx)
        .await?;
    Ok(result.rows_affected())
}

impl NodeStore for PostgresAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Postgres
    }

    fn location(&self) -> String {
        self.location.clone()
    }

    fn create(&mut self, node: &Node) -> Result<Node> {
        self.runtime.block_on(async {
            let mut tx = self.pool.begin().await?;
            let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM nodes WHERE id = $1)")
                .bind(&node.id)
                .fetch_one(&mut *tx)
                .await?;
            if exists {
                return Err(Error::AlreadyExists(node.id.clone()));
            }
            insert_node(&mut tx, node).await?;
            tx.commit().await?;
            Ok(())
        })?;
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
        self.replace(&node)?;
        Ok(Some(node))
    }

    fn delete(&mut self, id: &str) -> Result<()> {
        let removed = self.runtime.block_on(async {
            let mut tx = self.pool.begin().await?;
            let removed = remove_node(&mut tx, id).await?;
            tx.commit().await?;
            Ok::<_, Error>(removed)
        })?;
        if removed > 0 {
            tracing::debug!(id, "deleted node from postgres");
        }
        Ok(())
    }

    fn replace(&mut self, node: &Node) -> Result<()> {
        self.runtime.block_on(async {
            let mut tx = self.pool.begin().await?;
            remove_node(&mut tx, &node.id).await?;
            insert_node(&mut tx, node).await?;
            tx.commit().await?;
            Ok(())
        })
    }

    fn list(&self) -> Result<LayeredNodes> {
        Ok(group_by_layer(self.query_nodes(None)?))
    }

    fn ids(&self) -> Result<BTreeSet<String>> {
        let ids: Vec<String> = self.runtime.block_on(
            sqlx::query_scalar("SELECT id FROM nodes ORDER BY id").fetch_all(&self.pool),
        )?;
        Ok(ids.into_iter().collect())
    }
}
