//! The single CRUD surface over whichever backend is active.

use crate::models::validation::{validate_id, validate_node};
use crate::models::{NewNode, Node, NodePatch, NodeQuery};
use crate::storage::router::default_settings;
use crate::storage::{
    BackendKind, FlatFileAdapter, LayeredNodes, NodeStore, RouterSettings, Selection,
    StorageRouter, generate_id,
};
use crate::sync::import_into;
use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// Everything a repository needs to open, resolved up front by the caller.
#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    pub root: PathBuf,
    pub router: RouterSettings,
    /// Pull file-only nodes into a relational backend on open
    pub auto_import: bool,
}

impl RepositoryConfig {
    /// Defaults for a workspace rooted at `root`.
    pub fn for_root(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            router: default_settings(root),
            auto_import: true,
        }
    }
}

/// Node repository bound to one storage backend.
pub struct NodeRepository {
    store: Box<dyn NodeStore>,
    selection: Option<Selection>,
}

impl NodeRepository {
    /// Select a backend, open it, and (for relational backends with
    /// `auto_import`) import any nodes that only exist as files.
    pub fn open(config: &RepositoryConfig) -> Result<Self> {
        let mut router = StorageRouter::new(config.router.clone());
        let selection = router.select()?;
        let store = StorageRouter::open(&selection)?;
        let mut repo = Self {
            store,
            selection: Some(selection),
        };

        if repo.backend().is_relational() && config.auto_import {
            repo.auto_import(&FlatFileAdapter::new(&config.router.nodes_dir));
        }
        Ok(repo)
    }

    /// Wrap an already-open store.
    pub fn with_store(store: Box<dyn NodeStore>) -> Self {
        Self {
            store,
            selection: None,
        }
    }

    pub fn backend(&self) -> BackendKind {
        self.store.kind()
    }

    /// The router decision, when opened through [`NodeRepository::open`].
    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    pub fn store(&self) -> &dyn NodeStore {
        self.store.as_ref()
    }

    /// Hand the underlying store to another component (e.g. `SyncEngine`).
    pub fn into_store(self) -> Box<dyn NodeStore> {
        self.store
    }

    /// Best effort: failures are logged, never returned.
    fn auto_import(&mut self, files: &FlatFileAdapter) {
        match import_into(files, self.store.as_mut(), false, false) {
            Ok(summary) => {
                for issue in &summary.errors {
                    tracing::warn!(source = %issue.source, message = %issue.message, "auto-import skipped node");
                }
                if summary.imported > 0 {
                    tracing::info!(imported = summary.imported, "auto-imported file-only nodes");
                }
            }
            Err(e) => tracing::warn!(error = %e, "auto-import failed"),
        }
    }

    /// Validate and store a new node, generating its id from the title when
    /// none is given.
    pub fn create(&mut self, new: NewNode) -> Result<Node> {
        let id = match new.id.clone() {
            Some(id) => {
                validate_id(&id)?;
                if self.store.read(&id)?.is_some() {
                    return Err(Error::AlreadyExists(id));
                }
                id
            }
            None => {
                let store = &self.store;
                generate_id(new.layer, &new.title, |candidate| {
                    Ok(store.read(candidate)?.is_some())
                })?
            }
        };
        let node = new.into_node(id);
        validate_node(&node).into_result()?;
        let created = self.store.create(&node)?;
        tracing::debug!(id = %created.id, backend = %self.backend(), "created node");
        Ok(created)
    }

    pub fn read(&self, id: &str) -> Result<Option<Node>> {
        self.store.read(id)
    }

    /// Apply `patch`, rejecting it when the result would be invalid.
    pub fn update(&mut self, id: &str, patch: &NodePatch) -> Result<Option<Node>> {
        let Some(mut candidate) = self.store.read(id)? else {
            return Ok(None);
        };
        patch.apply(&mut candidate);
        validate_node(&candidate).into_result()?;
        self.store.update(id, patch)
    }

    pub fn delete(&mut self, id: &str) -> Result<()> {
        self.store.delete(id)
    }

    pub fn list(&self) -> Result<LayeredNodes> {
        self.store.list()
    }

    /// Every node, in layer then id order.
    pub fn all_nodes(&self) -> Result<Vec<Node>> {
        Ok(self.store.list()?.into_values().flatten().collect())
    }

    pub fn search(&self, query: &NodeQuery) -> Result<Vec<Node>> {
        self.store.search(query)
    }
}
