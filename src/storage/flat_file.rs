//! Flat-file storage backend.
//!
//! Stores each node as one YAML document under a layer-named directory:
//!
//! ```text
//! <root>/
//!   goal/GOAL-LAUNCH.yaml
//!   criteria/AC-LOGIN_WORKS.yaml
//!   command/CMD-AC-LOGIN_WORKS.yaml
//! ```
//!
//! Writes go to a temporary file in the target directory which is then
//! renamed over the destination, so a crash mid-write never leaves a
//! half-written node file behind. A missing root reads as an empty store.

use super::backend::{BackendKind, LayeredNodes, NodeStore, group_by_layer};
use crate::models::{Layer, Node, NodePatch};
use crate::{Error, Result};
use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// File extension for node documents.
pub const NODE_EXTENSION: &str = "yaml";

/// Extensions that look like node documents but are never loaded.
const FOREIGN_EXTENSIONS: &[&str] = &["yml"];

/// A node file that could not be loaded.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct FileError {
    pub path: PathBuf,
    pub message: String,
}

/// Result of scanning the node tree.
#[derive(Debug, Default)]
pub struct FileScan {
    pub nodes: Vec<(PathBuf, Node)>,
    pub errors: Vec<FileError>,
}

/// Storage backend that keeps one YAML file per node.
#[derive(Debug, Clone)]
pub struct FlatFileAdapter {
    root: PathBuf,
}

impl FlatFileAdapter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Canonical path of a node file: `<root>/<layer>/<id>.yaml`.
    pub fn path_for(&self, layer: Layer, id: &str) -> PathBuf {
        self.root
            .join(layer.as_str())
            .join(format!("{}.{}", id, NODE_EXTENSION))
    }

    /// Path for an id, inferring the layer from its prefix.
    pub fn path_for_id(&self, id: &str) -> Option<PathBuf> {
        Layer::from_id(id).map(|layer| self.path_for(layer, id))
    }

    /// Parse a single node file.
    pub fn load_file(path: &Path) -> Result<Node> {
        let content = fs::read_to_string(path)?;
        let node: Node = serde_yaml::from_str(&content)?;
        Ok(node)
    }

    /// Write a node atomically (temp file in the same directory, then rename).
    pub fn write_node(&self, node: &Node) -> Result<PathBuf> {
        let path = self.path_for(node.layer, &node.id);
        let dir = path
            .parent()
            .ok_or_else(|| Error::Other(format!("Invalid node path: {}", path.display())))?;
        fs::create_dir_all(dir)?;

        let yaml = serde_yaml::to_string(node)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(yaml.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| e.error)?;

        tracing::debug!(id = %node.id, path = %path.display(), "wrote node file");
        Ok(path)
    }

    /// Scan every layer directory, collecting parsed nodes and per-file errors.
    ///
    /// Only `*.yaml` files in the twelve layer directories are read, the same
    /// paths `read` and `delete` resolve. A `*.yml` file, a file whose id does
    /// not match its file name, or one whose layer does not match its
    /// directory is reported as an error rather than loaded.
    pub fn scan(&self) -> Result<FileScan> {
        let mut scan = FileScan::default();
        if !self.root.exists() {
            return Ok(scan);
        }

        for layer in Layer::ALL {
            let dir = self.root.join(layer.as_str());
            if !dir.is_dir() {
                continue;
            }
            let mut entries: Vec<PathBuf> = fs::read_dir(&dir)?
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| is_visible_file(p))
                .collect();
            entries.sort();

            let (entries, foreign): (Vec<PathBuf>, Vec<PathBuf>) =
                entries.into_iter().partition(|p| has_extension(p, NODE_EXTENSION));
            for path in foreign
                .into_iter()
                .filter(|p| FOREIGN_EXTENSIONS.iter().any(|ext| has_extension(p, ext)))
            {
                tracing::warn!(path = %path.display(), "ignoring node file with wrong extension");
                scan.errors.push(FileError {
                    path,
                    message: format!("node files must use the .{} extension", NODE_EXTENSION),
                });
            }

            for path in entries {
                match Self::load_file(&path) {
                    Ok(node) => {
                        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
                        if stem != node.id {
                            scan.errors.push(FileError {
                                path,
                                message: format!("file name does not match id '{}'", node.id),
                            });
                        } else if node.layer != layer {
                            scan.errors.push(FileError {
                                path,
                                message: format!(
                                    "layer '{}' does not match directory '{}'",
                                    node.layer, layer
                                ),
                            });
                        } else {
                            scan.nodes.push((path, node));
                        }
                    }
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "skipping unreadable node file");
                        scan.errors.push(FileError {
                            path,
                            message: e.to_string(),
                        });
                    }
                }
            }
        }

        Ok(scan)
    }
}

fn is_visible_file(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'));
    path.is_file() && !hidden
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(ext)
}

impl NodeStore for FlatFileAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::FlatFile
    }

    fn location(&self) -> String {
        self.root.display().to_string()
    }

    fn create(&mut self, node: &Node) -> Result<Node> {
        let path = self.path_for(node.layer, &node.id);
        if path.exists() {
            return Err(Error::AlreadyExists(node.id.clone()));
        }
        self.write_node(node)?;
        Ok(node.clone())
    }

    fn read(&self, id: &str) -> Result<Option<Node>> {
        let Some(path) = self.path_for_id(id) else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }
        Self::load_file(&path).map(Some)
    }

    fn update(&mut self, id: &str, patch: &NodePatch) -> Result<Option<Node>> {
        let Some(mut node) = self.read(id)? else {
            return Ok(None);
        };
        patch.apply(&mut node);
        self.write_node(&node)?;
        Ok(Some(node))
    }

    fn delete(&mut self, id: &str) -> Result<()> {
        if let Some(path) = self.path_for_id(id) {
            if path.exists() {
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    fn replace(&mut self, node: &Node) -> Result<()> {
        self.write_node(node)?;
        Ok(())
    }

    fn list(&self) -> Result<LayeredNodes> {
        let scan = self.scan()?;
        Ok(group_by_layer(scan.nodes.into_iter().map(|(_, n)| n)))
    }

    fn ids(&self) -> Result<BTreeSet<String>> {
        Ok(self.scan()?.nodes.into_iter().map(|(_, n)| n.id).collect())
    }
}
