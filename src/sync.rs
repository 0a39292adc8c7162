//! Synchronization between the flat-file tree and a relational store.
//!
//! Import and export never overwrite blindly: import skips ids the database
//! already has unless forced, and export backs up any file it is about to
//! replace. Both honour `dry_run` by computing the same summary without
//! touching either store.

use crate::models::Node;
use crate::models::validation::validate_node;
use crate::storage::flat_file::NODE_EXTENSION;
use crate::storage::{FlatFileAdapter, NodeStore};
use crate::Result;
use chrono::Utc;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Backup suffix stamp, precise to the microsecond.
const BACKUP_STAMP_FORMAT: &str = "%Y%m%dT%H%M%S%.6fZ";

/// Numbered names tried when a backup with the same stamp already exists.
const MAX_BACKUP_ATTEMPTS: u32 = 1000;

/// Something that went wrong with one node or file during a sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncIssue {
    /// Node id or file path
    pub source: String,
    pub message: String,
}

impl SyncIssue {
    fn new(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub imported: usize,
    pub skipped: usize,
    pub errors: Vec<SyncIssue>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExportSummary {
    pub exported: usize,
    pub backed_up: usize,
    pub errors: Vec<SyncIssue>,
}

/// Membership of every id across the two stores.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub file_only: Vec<String>,
    pub db_only: Vec<String>,
    pub both: Vec<String>,
    /// Ids in both stores whose content differs (timestamps ignored)
    pub divergent: Vec<String>,
}

impl SyncStatus {
    pub fn in_sync(&self) -> bool {
        self.file_only.is_empty() && self.db_only.is_empty() && self.divergent.is_empty()
    }
}

/// Import every parseable file node into `db`.
///
/// Ids only present in files are inserted. Ids present in both are skipped
/// unless `force`, which overwrites the stored row with the file content.
pub fn import_into(
    files: &FlatFileAdapter,
    db: &mut dyn NodeStore,
    force: bool,
    dry_run: bool,
) -> Result<ImportSummary> {
    let scan = files.scan()?;
    let existing = db.ids()?;
    let mut summary = ImportSummary::default();
    let mut seen = BTreeSet::new();

    for error in scan.errors {
        summary
            .errors
            .push(SyncIssue::new(error.path.display().to_string(), error.message));
    }

    for (path, node) in scan.nodes {
        if !seen.insert(node.id.clone()) {
            summary.errors.push(SyncIssue::new(
                path.display().to_string(),
                format!("duplicate id {}", node.id),
            ));
            continue;
        }
        let report = validate_node(&node);
        if !report.is_valid() {
            summary
                .errors
                .push(SyncIssue::new(&node.id, report.to_string()));
            continue;
        }

        let in_db = existing.contains(&node.id);
        if in_db && !force {
            summary.skipped += 1;
            continue;
        }
        if !dry_run {
            let written = if in_db { db.replace(&node) } else { db.create(&node).map(|_| ()) };
            if let Err(e) = written {
                summary.errors.push(SyncIssue::new(&node.id, e.to_string()));
                continue;
            }
        }
        summary.imported += 1;
    }

    tracing::info!(
        imported = summary.imported,
        skipped = summary.skipped,
        errors = summary.errors.len(),
        dry_run,
        force,
        "import finished"
    );
    Ok(summary)
}

/// Moves nodes between the flat-file tree and a relational store.
pub struct SyncEngine {
    files: FlatFileAdapter,
    db: Box<dyn NodeStore>,
}

impl SyncEngine {
    pub fn new(files: FlatFileAdapter, db: Box<dyn NodeStore>) -> Self {
        Self { files, db }
    }

    pub fn files(&self) -> &FlatFileAdapter {
        &self.files
    }

    pub fn db(&self) -> &dyn NodeStore {
        self.db.as_ref()
    }

    /// Import the file tree into the database.
    pub fn import_files(&mut self, force: bool, dry_run: bool) -> Result<ImportSummary> {
        import_into(&self.files, self.db.as_mut(), force, dry_run)
    }

    /// Write every database node to `<output_dir>/<layer>/<ID>.yaml`.
    ///
    /// `output_dir` defaults to the flat-file root. Existing files are copied
    /// to `<ID>.yaml.bak.<timestamp>` first when `backup_existing`. Files for
    /// ids missing from the database are left alone.
    pub fn export_to_files(
        &self,
        output_dir: Option<&Path>,
        backup_existing: bool,
        dry_run: bool,
    ) -> Result<ExportSummary> {
        let target = match output_dir {
            Some(dir) => FlatFileAdapter::new(dir),
            None => self.files.clone(),
        };
        let stamp = Utc::now().format(BACKUP_STAMP_FORMAT).to_string();
        let mut summary = ExportSummary::default();

        for node in self.db.list()?.into_values().flatten() {
            let path = target.path_for(node.layer, &node.id);
            if path.exists() && backup_existing {
                if !dry_run {
                    if let Err(e) = write_backup(&path, &node, &stamp) {
                        summary.errors.push(SyncIssue::new(
                            &node.id,
                            format!("backup of {} failed: {}", path.display(), e),
                        ));
                        continue;
                    }
                }
                summary.backed_up += 1;
            }
            if !dry_run {
                if let Err(e) = target.write_node(&node) {
                    summary.errors.push(SyncIssue::new(&node.id, e.to_string()));
                    continue;
                }
            }
            summary.exported += 1;
        }

        tracing::info!(
            exported = summary.exported,
            backed_up = summary.backed_up,
            errors = summary.errors.len(),
            dry_run,
            "export finished"
        );
        Ok(summary)
    }

    /// Compare the two stores id by id.
    pub fn check_sync(&self) -> Result<SyncStatus> {
        let file_nodes: BTreeMap<String, Node> = self
            .files
            .scan()?
            .nodes
            .into_iter()
            .map(|(_, n)| (n.id.clone(), n))
            .collect();
        let db_nodes: BTreeMap<String, Node> = self
            .db
            .list()?
            .into_values()
            .flatten()
            .map(|n| (n.id.clone(), n))
            .collect();

        let mut status = SyncStatus::default();
        for (id, file_node) in &file_nodes {
            match db_nodes.get(id) {
                Some(db_node) => {
                    status.both.push(id.clone());
                    if !file_node.same_content(db_node) {
                        status.divergent.push(id.clone());
                    }
                }
                None => status.file_only.push(id.clone()),
            }
        }
        status.db_only = db_nodes
            .keys()
            .filter(|id| !file_nodes.contains_key(*id))
            .cloned()
            .collect();
        Ok(status)
    }
}

fn backup_path(path: &Path, node: &Node, stamp: &str) -> PathBuf {
    path.with_file_name(format!("{}.{}.bak.{}", node.id, NODE_EXTENSION, stamp))
}

/// Copy `path` to a backup name that does not exist yet. An earlier backup
/// with the same stamp is never overwritten; a `-N` suffix is added instead.
fn write_backup(path: &Path, node: &Node, stamp: &str) -> io::Result<PathBuf> {
    let mut attempt = 0u32;
    loop {
        let candidate = if attempt == 0 {
            backup_path(path, node, stamp)
        } else {
            backup_path(path, node, &format!("{}-{}", stamp, attempt))
        };
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(mut backup) => {
                let mut source = fs::File::open(path)?;
                io::copy(&mut source, &mut backup)?;
                return Ok(candidate);
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && attempt < MAX_BACKUP_ATTEMPTS => {
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
