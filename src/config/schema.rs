//! KDL schema for config.kdl.
//!
//! The same schema is read from the system file and from the workspace file;
//! the resolver layers them.

use crate::storage::StoragePreference;
use crate::{Error, Result};
use kdl::{KdlDocument, KdlEntry, KdlNode, KdlValue};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the config file in both locations.
pub const CONFIG_FILE_NAME: &str = "config.kdl";

/// Per-workspace state directory, relative to the workspace root.
pub const WORKSPACE_DIR: &str = ".tracegraph";

/// Output format preference for CLI commands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// JSON output (default, machine-readable)
    #[default]
    Json,
    /// Human-readable output
    Human,
}

impl OutputFormat {
    /// Parse from string, case-insensitive.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "json" => Some(OutputFormat::Json),
            "human" => Some(OutputFormat::Human),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Human => "human",
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Settings stored in config.kdl.
///
/// # KDL Schema
///
/// ```kdl
/// storage "auto"               // auto, relational-only, flat-file-only, postgres, sqlite
/// database-url "postgres://tg@localhost/tracegraph"
/// nodes-dir "nodes"
/// auto-import #true
/// log-dir ".tracegraph/logs"
/// reports-dir ".tracegraph/reports"
/// jobs 4
/// output-format "json"         // or "human"
/// ```
///
/// Relative paths are resolved against the workspace root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TracegraphConfig {
    pub storage: Option<StoragePreference>,
    pub database_url: Option<String>,
    pub nodes_dir: Option<String>,
    pub auto_import: Option<bool>,
    pub log_dir: Option<String>,
    pub reports_dir: Option<String>,
    /// Worker threads for batch command execution
    pub jobs: Option<usize>,
    pub output_format: Option<OutputFormat>,
}

impl TracegraphConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the config values.
    ///
    /// Returns an error message if any value is invalid.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.jobs == Some(0) {
            return Err("jobs must be at least 1, got 0".to_string());
        }
        for (key, value) in [
            ("nodes-dir", &self.nodes_dir),
            ("log-dir", &self.log_dir),
            ("reports-dir", &self.reports_dir),
        ] {
            if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
                return Err(format!("{} must not be empty", key));
            }
        }
        Ok(())
    }

    /// Parse config from a KDL document.
    ///
    /// Unknown keys are ignored. A known key with a value of the wrong type
    /// or an unrecognised token is an error.
    pub fn from_kdl(doc: &KdlDocument) -> std::result::Result<Self, String> {
        let mut config = Self::new();

        if let Some(s) = string_value(doc, "storage")? {
            config.storage = Some(s.parse()?);
        }
        config.database_url = string_value(doc, "database-url")?;
        config.nodes_dir = string_value(doc, "nodes-dir")?;
        config.log_dir = string_value(doc, "log-dir")?;
        config.reports_dir = string_value(doc, "reports-dir")?;

        if let Some(entry) = first_entry(doc, "auto-import") {
            match entry.value().as_bool() {
                Some(b) => config.auto_import = Some(b),
                None => return Err("auto-import must be #true or #false".to_string()),
            }
        }

        if let Some(entry) = first_entry(doc, "jobs") {
            match entry.value().as_integer().map(usize::try_from) {
                Some(Ok(jobs)) => config.jobs = Some(jobs),
                Some(Err(_)) => return Err("jobs is out of range".to_string()),
                None => return Err("jobs must be a non-negative integer".to_string()),
            }
        }

        if let Some(s) = string_value(doc, "output-format")? {
            match OutputFormat::parse(&s) {
                Some(format) => config.output_format = Some(format),
                None => return Err(format!("output-format must be json or human, got {}", s)),
            }
        }

        Ok(config)
    }

    /// Convert config to a KDL document.
    pub fn to_kdl(&self) -> KdlDocument {
        let mut doc = KdlDocument::new();

        if let Some(storage) = self.storage {
            push_string(&mut doc, "storage", storage.as_str());
        }
        if let Some(ref url) = self.database_url {
            push_string(&mut doc, "database-url", url);
        }
        if let Some(ref dir) = self.nodes_dir {
            push_string(&mut doc, "nodes-dir", dir);
        }
        if let Some(auto_import) = self.auto_import {
            let mut node = KdlNode::new("auto-import");
            node.push(KdlEntry::new(KdlValue::Bool(auto_import)));
            doc.nodes_mut().push(node);
        }
        if let Some(ref dir) = self.log_dir {
            push_string(&mut doc, "log-dir", dir);
        }
        if let Some(ref dir) = self.reports_dir {
            push_string(&mut doc, "reports-dir", dir);
        }
        if let Some(jobs) = self.jobs {
            let mut node = KdlNode::new("jobs");
            node.push(KdlEntry::new(KdlValue::Integer(jobs as i128)));
            doc.nodes_mut().push(node);
        }
        if let Some(format) = self.output_format {
            push_string(&mut doc, "output-format", format.as_str());
        }

        doc
    }

    /// Merge another config into this one.
    /// Values from `other` override values in `self` if they are Some.
    pub fn merge(&mut self, other: &TracegraphConfig) {
        if other.storage.is_some() {
            self.storage = other.storage;
        }
        if other.database_url.is_some() {
            self.database_url = other.database_url.clone();
        }
        if other.nodes_dir.is_some() {
            self.nodes_dir = other.nodes_dir.clone();
        }
        if other.auto_import.is_some() {
            self.auto_import = other.auto_import;
        }
        if other.log_dir.is_some() {
            self.log_dir = other.log_dir.clone();
        }
        if other.reports_dir.is_some() {
            self.reports_dir = other.reports_dir.clone();
        }
        if other.jobs.is_some() {
            self.jobs = other.jobs;
        }
        if other.output_format.is_some() {
            self.output_format = other.output_format;
        }
    }

    /// Load a config file.
    ///
    /// Returns an empty config if the file doesn't exist.
    pub fn load_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Other(format!("Failed to read {}: {}", path.display(), e)))?;

        let doc: KdlDocument = content
            .parse()
            .map_err(|e| Error::Other(format!("Failed to parse KDL in {}: {}", path.display(), e)))?;

        let config = Self::from_kdl(&doc)
            .map_err(|e| Error::Configuration(format!("{}: {}", path.display(), e)))?;
        config
            .validate()
            .map_err(|e| Error::Configuration(format!("{}: {}", path.display(), e)))?;
        Ok(config)
    }

    /// Write the config file, creating parent directories.
    pub fn write_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_kdl().to_string())?;
        Ok(())
    }
}

/// Overrides the system config directory.
pub const TG_CONFIG_DIR_ENV: &str = "TG_CONFIG_DIR";

/// `~/.config/tracegraph/config.kdl`, or `$TG_CONFIG_DIR/config.kdl`.
pub fn system_config_path() -> Option<PathBuf> {
    if let Some(dir) = std::env::var_os(TG_CONFIG_DIR_ENV).filter(|d| !d.is_empty()) {
        return Some(PathBuf::from(dir).join(CONFIG_FILE_NAME));
    }
    dirs::config_dir().map(|dir| dir.join("tracegraph").join(CONFIG_FILE_NAME))
}

/// `<root>/.tracegraph/config.kdl`.
pub fn workspace_config_path(root: &Path) -> PathBuf {
    root.join(WORKSPACE_DIR).join(CONFIG_FILE_NAME)
}

fn first_entry<'a>(doc: &'a KdlDocument, key: &str) -> Option<&'a KdlEntry> {
    doc.get(key).and_then(|node| node.entries().first())
}

fn string_value(doc: &KdlDocument, key: &str) -> std::result::Result<Option<String>, String> {
    match first_entry(doc, key) {
        None => Ok(None),
        Some(entry) => match entry.value().as_string() {
            Some(s) => Ok(Some(s.to_string())),
            None => Err(format!("{} must be a string", key)),
        },
    }
}

fn push_string(doc: &mut KdlDocument, key: &str, value: &str) {
    let mut node = KdlNode::new(key);
    node.push(KdlEntry::new(KdlValue::String(value.to_string())));
    doc.nodes_mut().push(node);
}
