//! Precedence resolution for configuration.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. CLI flags (passed at runtime)
//! 2. Environment (`TG_STORAGE`, `TG_DATABASE_URL`, `DATABASE_URL`)
//! 3. Workspace config.kdl (`<root>/.tracegraph/config.kdl`)
//! 4. System config.kdl (`~/.config/tracegraph/config.kdl`)
//! 5. Built-in defaults

use crate::config::schema::{
    OutputFormat, TracegraphConfig, WORKSPACE_DIR, system_config_path, workspace_config_path,
};
use crate::pipeline::DEFAULT_JOBS;
use crate::repository::RepositoryConfig;
use crate::storage::router::redact_url;
use crate::storage::{RouterSettings, StoragePreference};
use crate::{Error, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Storage preference override.
pub const TG_STORAGE_ENV: &str = "TG_STORAGE";
/// Explicit connection string override.
pub const TG_DATABASE_URL_ENV: &str = "TG_DATABASE_URL";
/// Conventional connection string, consulted after `TG_DATABASE_URL`.
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";

/// File name of the default SQLite database inside the workspace dir.
pub const SQLITE_FILE_NAME: &str = "tracegraph.db";

/// Tracks where a resolved value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueSource {
    /// Value from CLI flag
    CliFlag,
    /// Value from environment variable
    EnvVar(String),
    /// Value from the workspace config.kdl
    Workspace,
    /// Value from the system config.kdl
    System,
    /// Built-in default value
    Default,
}

impl std::fmt::Display for ValueSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueSource::CliFlag => write!(f, "cli"),
            ValueSource::EnvVar(name) => write!(f, "env:{}", name),
            ValueSource::Workspace => write!(f, "workspace"),
            ValueSource::System => write!(f, "system"),
            ValueSource::Default => write!(f, "default"),
        }
    }
}

impl Serialize for ValueSource {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A resolved value with its source.
#[derive(Debug, Clone, Serialize)]
pub struct Resolved<T> {
    pub value: T,
    pub source: ValueSource,
}

impl<T> Resolved<T> {
    pub fn new(value: T, source: ValueSource) -> Self {
        Self { value, source }
    }
}

/// Fully resolved configuration with source tracking.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Workspace root every relative path is resolved against
    pub root: PathBuf,
    pub storage: Resolved<StoragePreference>,
    pub database_url: Option<Resolved<String>>,
    pub nodes_dir: Resolved<PathBuf>,
    pub auto_import: Resolved<bool>,
    pub log_dir: Resolved<PathBuf>,
    pub reports_dir: Resolved<PathBuf>,
    pub jobs: Resolved<usize>,
    pub output_format: Resolved<OutputFormat>,
}

impl ResolvedConfig {
    /// Built-in defaults for a workspace rooted at `root`.
    pub fn defaults(root: &Path) -> Self {
        let workspace = root.join(WORKSPACE_DIR);
        Self {
            root: root.to_path_buf(),
            storage: Resolved::new(StoragePreference::Auto, ValueSource::Default),
            database_url: None,
            nodes_dir: Resolved::new(root.join("nodes"), ValueSource::Default),
            auto_import: Resolved::new(true, ValueSource::Default),
            log_dir: Resolved::new(workspace.join("logs"), ValueSource::Default),
            reports_dir: Resolved::new(workspace.join("reports"), ValueSource::Default),
            jobs: Resolved::new(DEFAULT_JOBS, ValueSource::Default),
            output_format: Resolved::new(OutputFormat::Json, ValueSource::Default),
        }
    }

    pub fn output_format(&self) -> OutputFormat {
        self.output_format.value
    }

    pub fn database_url(&self) -> Option<&str> {
        self.database_url.as_ref().map(|r| r.value.as_str())
    }

    /// The SQLite file used when the connection string doesn't name one.
    pub fn default_sqlite_path(&self) -> PathBuf {
        self.root.join(WORKSPACE_DIR).join(SQLITE_FILE_NAME)
    }

    /// Settings for opening a `NodeRepository`.
    pub fn repository_config(&self) -> RepositoryConfig {
        RepositoryConfig {
            root: self.root.clone(),
            router: RouterSettings {
                preference: self.storage.value,
                root: self.root.clone(),
                database_url: self.database_url.as_ref().map(|r| r.value.clone()),
                default_sqlite_path: self.default_sqlite_path(),
                nodes_dir: self.nodes_dir.value.clone(),
            },
            auto_import: self.auto_import.value,
        }
    }

    /// Every setting as `(key, display value, source)`, connection strings
    /// redacted.
    pub fn entries(&self) -> Vec<(&'static str, String, ValueSource)> {
        let path = |r: &Resolved<PathBuf>| r.value.display().to_string();
        let mut entries = vec![(
            "storage",
            self.storage.value.to_string(),
            self.storage.source.clone(),
        )];
        match &self.database_url {
            Some(url) => entries.push(("database-url", redact_url(&url.value), url.source.clone())),
            None => entries.push(("database-url", String::new(), ValueSource::Default)),
        }
        entries.extend([
            ("nodes-dir", path(&self.nodes_dir), self.nodes_dir.source.clone()),
            (
                "auto-import",
                self.auto_import.value.to_string(),
                self.auto_import.source.clone(),
            ),
            ("log-dir", path(&self.log_dir), self.log_dir.source.clone()),
            ("reports-dir", path(&self.reports_dir), self.reports_dir.source.clone()),
            ("jobs", self.jobs.value.to_string(), self.jobs.source.clone()),
            (
                "output-format",
                self.output_format.value.to_string(),
                self.output_format.source.clone(),
            ),
        ]);
        entries
    }
}

/// CLI overrides for configuration resolution.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub storage: Option<StoragePreference>,
    pub database_url: Option<String>,
    pub output_format: Option<OutputFormat>,
    pub jobs: Option<usize>,
}

impl ConfigOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_storage(mut self, storage: StoragePreference) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    pub fn with_output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = Some(format);
        self
    }

    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = Some(jobs);
        self
    }
}

/// Non-empty value of an environment variable.
fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Pick the first layer that has a value: workspace, then system.
fn from_files<T, F>(workspace: &TracegraphConfig, system: &TracegraphConfig, get: F) -> Option<Resolved<T>>
where
    F: Fn(&TracegraphConfig) -> Option<T>,
{
    get(workspace)
        .map(|v| Resolved::new(v, ValueSource::Workspace))
        .or_else(|| get(system).map(|v| Resolved::new(v, ValueSource::System)))
}

/// Resolve configuration for the workspace at `root` with the full
/// precedence chain.
pub fn resolve_config(root: &Path, overrides: &ConfigOverrides) -> Result<ResolvedConfig> {
    let system = match system_config_path() {
        Some(path) => TracegraphConfig::load_file(&path)?,
        None => TracegraphConfig::default(),
    };
    let workspace = TracegraphConfig::load_file(&workspace_config_path(root))?;
    resolve_layers(root, overrides, &workspace, &system)
}

fn resolve_layers(
    root: &Path,
    overrides: &ConfigOverrides,
    workspace: &TracegraphConfig,
    system: &TracegraphConfig,
) -> Result<ResolvedConfig> {
    let mut result = ResolvedConfig::defaults(root);
    let rooted = |dir: String| root.join(dir);

    // storage
    if let Some(storage) = overrides.storage {
        result.storage = Resolved::new(storage, ValueSource::CliFlag);
    } else if let Some(token) = env_value(TG_STORAGE_ENV) {
        let storage = token
            .parse::<StoragePreference>()
            .map_err(|e: String| Error::Configuration(format!("{}: {}", TG_STORAGE_ENV, e)))?;
        result.storage = Resolved::new(storage, ValueSource::EnvVar(TG_STORAGE_ENV.to_string()));
    } else if let Some(storage) = from_files(workspace, system, |c| c.storage) {
        result.storage = storage;
    }

    // database_url
    if let Some(ref url) = overrides.database_url {
        result.database_url = Some(Resolved::new(url.clone(), ValueSource::CliFlag));
    } else if let Some(url) = env_value(TG_DATABASE_URL_ENV) {
        result.database_url = Some(Resolved::new(
            url,
            ValueSource::EnvVar(TG_DATABASE_URL_ENV.to_string()),
        ));
    } else if let Some(url) = env_value(DATABASE_URL_ENV) {
        result.database_url = Some(Resolved::new(
            url,
            ValueSource::EnvVar(DATABASE_URL_ENV.to_string()),
        ));
    } else {
        result.database_url = from_files(workspace, system, |c| c.database_url.clone());
    }
    // else: remains None (no default connection string)

    if let Some(dir) = from_files(workspace, system, |c| c.nodes_dir.clone().map(rooted)) {
        result.nodes_dir = dir;
    }
    if let Some(auto_import) = from_files(workspace, system, |c| c.auto_import) {
        result.auto_import = auto_import;
    }
    if let Some(dir) = from_files(workspace, system, |c| c.log_dir.clone().map(rooted)) {
        result.log_dir = dir;
    }
    if let Some(dir) = from_files(workspace, system, |c| c.reports_dir.clone().map(rooted)) {
        result.reports_dir = dir;
    }

    // jobs
    if let Some(jobs) = overrides.jobs {
        if jobs == 0 {
            return Err(Error::Configuration("jobs must be at least 1".to_string()));
        }
        result.jobs = Resolved::new(jobs, ValueSource::CliFlag);
    } else if let Some(jobs) = from_files(workspace, system, |c| c.jobs) {
        result.jobs = jobs;
    }

    // output_format
    if let Some(format) = overrides.output_format {
        result.output_format = Resolved::new(format, ValueSource::CliFlag);
    } else if let Some(format) = from_files(workspace, system, |c| c.output_format) {
        result.output_format = format;
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    fn clear_env() {
        // SAFETY: tests touching the environment are serialized
        unsafe {
            std::env::remove_var(TG_STORAGE_ENV);
            std::env::remove_var(TG_DATABASE_URL_ENV);
            std::env::remove_var(DATABASE_URL_ENV);
        }
    }

    #[test]
    fn test_value_source_display() {
        assert_eq!(ValueSource::EnvVar("FOO".to_string()).to_string(), "env:FOO");
        assert_eq!(ValueSource::Workspace.to_string(), "workspace");
        assert_eq!(ValueSource::System.to_string(), "system");
        assert_eq!(ValueSource::CliFlag.to_string(), "cli");
        assert_eq!(ValueSource::Default.to_string(), "default");
    }

    #[test]
    #[serial]
    fn test_resolve_config_defaults() {
        clear_env();
        let root = TempDir::new().unwrap();
        let empty = TracegraphConfig::default();
        let config = resolve_layers(root.path(), &ConfigOverrides::default(), &empty, &empty).unwrap();

        assert_eq!(config.storage.value, StoragePreference::Auto);
        assert_eq!(config.storage.source, ValueSource::Default);
        assert!(config.database_url.is_none());
        assert_eq!(config.nodes_dir.value, root.path().join("nodes"));
        assert!(config.auto_import.value);
        assert_eq!(config.jobs.value, DEFAULT_JOBS);
        assert_eq!(config.output_format(), OutputFormat::Json);
        assert_eq!(
            config.default_sqlite_path(),
            root.path().join(".tracegraph").join("tracegraph.db")
        );
    }

    #[test]
    #[serial]
    fn test_workspace_overrides_system() {
        clear_env();
        let root = TempDir::new().unwrap();
        let system = TracegraphConfig {
            storage: Some(StoragePreference::Postgres),
            jobs: Some(2),
            output_format: Some(OutputFormat::Human),
            ..Default::default()
        };
        let workspace = TracegraphConfig {
            storage: Some(StoragePreference::Sqlite),
            nodes_dir: Some("trace/nodes".to_string()),
            ..Default::default()
        };
        let config = resolve_layers(root.path(), &ConfigOverrides::default(), &workspace, &system).unwrap();

        assert_eq!(config.storage.value, StoragePreference::Sqlite);
        assert_eq!(config.storage.source, ValueSource::Workspace);
        assert_eq!(config.nodes_dir.value, root.path().join("trace/nodes"));
        assert_eq!(config.jobs.value, 2);
        assert_eq!(config.jobs.source, ValueSource::System);
        assert_eq!(config.output_format.source, ValueSource::System);
    }

    #[test]
    #[serial]
    fn test_env_overrides_files_and_cli_overrides_env() {
        clear_env();
        let root = TempDir::new().unwrap();
        let workspace = TracegraphConfig {
            storage: Some(StoragePreference::Postgres),
            database_url: Some("postgres://file/db".to_string()),
            ..Default::default()
        };
        let empty = TracegraphConfig::default();

        unsafe {
            std::env::set_var(TG_STORAGE_ENV, "flat_file");
            std::env::set_var(DATABASE_URL_ENV, "postgres://conventional/db");
        }
        let config = resolve_layers(root.path(), &ConfigOverrides::default(), &workspace, &empty).unwrap();
        assert_eq!(config.storage.value, StoragePreference::FlatFileOnly);
        assert_eq!(config.storage.source, ValueSource::EnvVar("TG_STORAGE".to_string()));
        assert_eq!(config.database_url(), Some("postgres://conventional/db"));

        unsafe { std::env::set_var(TG_DATABASE_URL_ENV, "postgres://explicit/db") };
        let config = resolve_layers(root.path(), &ConfigOverrides::default(), &workspace, &empty).unwrap();
        assert_eq!(config.database_url(), Some("postgres://explicit/db"));

        let overrides = ConfigOverrides::new()
            .with_storage(StoragePreference::Sqlite)
            .with_database_url("sqlite:///tmp/cli.db")
            .with_jobs(9);
        let config = resolve_layers(root.path(), &overrides, &workspace, &empty).unwrap();
        assert_eq!(config.storage.source, ValueSource::CliFlag);
        assert_eq!(config.database_url(), Some("sqlite:///tmp/cli.db"));
        assert_eq!(config.jobs.value, 9);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_env_storage_is_configuration_error() {
        clear_env();
        unsafe { std::env::set_var(TG_STORAGE_ENV, "mongo") };
        let root = TempDir::new().unwrap();
        let empty = TracegraphConfig::default();
        let err = resolve_layers(root.path(), &ConfigOverrides::default(), &empty, &empty).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_resolve_config_reads_workspace_file() {
        clear_env();
        let root = TempDir::new().unwrap();
        let system_dir = TempDir::new().unwrap();
        unsafe { std::env::set_var(crate::config::schema::TG_CONFIG_DIR_ENV, system_dir.path()) };
        TracegraphConfig {
            jobs: Some(6),
            ..Default::default()
        }
        .write_file(&system_dir.path().join("config.kdl"))
        .unwrap();
        TracegraphConfig {
            auto_import: Some(false),
            reports_dir: Some("out".to_string()),
            ..Default::default()
        }
        .write_file(&workspace_config_path(root.path()))
        .unwrap();

        let config = resolve_config(root.path(), &ConfigOverrides::default()).unwrap();
        assert!(!config.auto_import.value);
        assert_eq!(config.auto_import.source, ValueSource::Workspace);
        assert_eq!(config.reports_dir.value, root.path().join("out"));
        assert_eq!(config.jobs.value, 6);
        assert_eq!(config.jobs.source, ValueSource::System);

        unsafe { std::env::remove_var(crate::config::schema::TG_CONFIG_DIR_ENV) };
    }

    #[test]
    #[serial]
    fn test_repository_config_and_redacted_entries() {
        clear_env();
        let root = TempDir::new().unwrap();
        let empty = TracegraphConfig::default();
        let overrides = ConfigOverrides::new().with_database_url("postgres://tg:secret@db/trace");
        let config = resolve_layers(root.path(), &overrides, &empty, &empty).unwrap();

        let repo = config.repository_config();
        assert_eq!(repo.root, root.path());
        assert_eq!(repo.router.postgres_url(), Some("postgres://tg:secret@db/trace"));
        assert_eq!(repo.router.nodes_dir, root.path().join("nodes"));
        assert!(repo.auto_import);

        let entries = config.entries();
        let (_, url, source) = entries.iter().find(|(k, _, _)| *k == "database-url").unwrap();
        assert!(!url.contains("secret"));
        assert_eq!(*source, ValueSource::CliFlag);
    }
}
