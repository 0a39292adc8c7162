//! Common test utilities for tracegraph integration tests.
//!
//! Provides `TestEnv` for isolated workspaces that never touch the user's
//! config directory or a real database server.

#![allow(dead_code)]

use assert_cmd::Command;
use std::path::{Path, PathBuf};
pub use tempfile::TempDir;

/// A test environment with an isolated workspace and config directory.
///
/// The `tg()` method returns a `Command` that sets `TG_ROOT` and
/// `TG_CONFIG_DIR` per invocation and clears any connection string from the
/// caller's environment, making tests parallel-safe.
pub struct TestEnv {
    pub root_dir: TempDir,
    pub config_dir: TempDir,
    storage: String,
}

impl TestEnv {
    /// Workspace that resolves to SQLite (no Postgres URL is ever set).
    pub fn new() -> Self {
        Self::with_storage("auto")
    }

    /// Workspace locked to the flat-file backend.
    pub fn flat_file() -> Self {
        Self::with_storage("flat-file-only")
    }

    pub fn with_storage(storage: &str) -> Self {
        Self {
            root_dir: TempDir::new().unwrap(),
            config_dir: TempDir::new().unwrap(),
            storage: storage.to_string(),
        }
    }

    /// Get a Command for the tg binary bound to this workspace.
    pub fn tg(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_tg"));
        cmd.current_dir(self.root_dir.path());
        cmd.env("TG_ROOT", self.root_dir.path());
        cmd.env("TG_CONFIG_DIR", self.config_dir.path());
        cmd.env("TG_STORAGE", &self.storage);
        cmd.env_remove("TG_DATABASE_URL");
        cmd.env_remove("DATABASE_URL");
        cmd.env_remove("TG_LOG");
        cmd
    }

    /// Run `tg` with `args`, assert success, and parse stdout as JSON.
    pub fn json(&self, args: &[&str]) -> serde_json::Value {
        let output = self.tg().args(args).assert().success().get_output().stdout.clone();
        serde_json::from_slice(&output).unwrap()
    }

    pub fn path(&self) -> &Path {
        self.root_dir.path()
    }

    pub fn nodes_dir(&self) -> PathBuf {
        self.root_dir.path().join("nodes")
    }

    pub fn db_path(&self) -> PathBuf {
        self.root_dir.path().join(".tracegraph").join("tracegraph.db")
    }

    /// Write a node file directly, bypassing the CLI.
    pub fn write_node_file(&self, layer: &str, id: &str, yaml: &str) -> PathBuf {
        let dir = self.nodes_dir().join(layer);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("{}.yaml", id));
        std::fs::write(&path, yaml).unwrap();
        path
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}
