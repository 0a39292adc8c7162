//! Backend selection.
//!
//! The router decides which `NodeStore` a repository talks to. In `auto`
//! mode it walks the fallback chain Postgres → SQLite → flat files and picks
//! the first backend whose probe succeeds; any other preference locks the
//! choice to one family and fails loudly instead of falling back.
//!
//! The decision is computed once and cached; call [`StorageRouter::refresh`]
//! when availability may have changed.

use super::backend::{BackendKind, NodeStore};
use super::flat_file::FlatFileAdapter;
use super::sqlite::SqliteAdapter;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Which backends the router may choose from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoragePreference {
    /// Postgres, then SQLite, then flat files
    #[default]
    Auto,
    /// Postgres, then SQLite; never flat files
    RelationalOnly,
    FlatFileOnly,
    Postgres,
    Sqlite,
}

impl StoragePreference {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::RelationalOnly => "relational-only",
            Self::FlatFileOnly => "flat-file-only",
            Self::Postgres => "postgres",
            Self::Sqlite => "sqlite",
        }
    }
}

impl FromStr for StoragePreference {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "auto" | "" => Ok(Self::Auto),
            "relational-only" | "relational" | "db" | "database" => Ok(Self::RelationalOnly),
            "flat-file-only" | "flat-file" | "files" | "file" | "yaml" => Ok(Self::FlatFileOnly),
            "postgres" | "postgresql" | "pg" => Ok(Self::Postgres),
            "sqlite" | "sqlite3" => Ok(Self::Sqlite),
            other => Err(format!(
                "Invalid storage preference: {} (expected auto, relational-only, flat-file-only, postgres or sqlite)",
                other
            )),
        }
    }
}

impl std::fmt::Display for StoragePreference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where a selected backend lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionDescriptor {
    Postgres { url: String },
    Sqlite { path: PathBuf },
    FlatFile { root: PathBuf },
}

impl ConnectionDescriptor {
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Postgres { .. } => BackendKind::Postgres,
            Self::Sqlite { .. } => BackendKind::Sqlite,
            Self::FlatFile { .. } => BackendKind::FlatFile,
        }
    }

    /// Human-readable location with credentials removed.
    pub fn display_location(&self) -> String {
        match self {
            Self::Postgres { url } => redact_url(url),
            Self::Sqlite { path } => path.display().to_string(),
            Self::FlatFile { root } => root.display().to_string(),
        }
    }
}

/// One probe made while selecting a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeAttempt {
    pub kind: BackendKind,
    pub ok: bool,
    pub detail: String,
}

/// The router's decision plus every probe that led to it.
#[derive(Debug, Clone)]
pub struct Selection {
    pub kind: BackendKind,
    pub descriptor: ConnectionDescriptor,
    pub attempts: Vec<ProbeAttempt>,
}

/// Inputs to backend selection, resolved before the router runs.
#[derive(Debug, Clone)]
pub struct RouterSettings {
    pub preference: StoragePreference,
    /// Workspace root; relative `sqlite:` paths resolve against it
    pub root: PathBuf,
    /// Connection string (`TG_DATABASE_URL`, then `DATABASE_URL`, then config)
    pub database_url: Option<String>,
    /// SQLite file used when the URL does not name one
    pub default_sqlite_path: PathBuf,
    pub nodes_dir: PathBuf,
}

impl RouterSettings {
    /// Postgres URL, when the connection string is one.
    pub fn postgres_url(&self) -> Option<&str> {
        self.database_url
            .as_deref()
            .filter(|url| url.starts_with("postgres://") || url.starts_with("postgresql://"))
    }

    /// SQLite file: named by a `sqlite:` URL (relative to the workspace
    /// root), else the default path.
    pub fn sqlite_path(&self) -> PathBuf {
        match self.database_url.as_deref().and_then(sqlite_url_path) {
            Some(path) if path.is_relative() => self.root.join(path),
            Some(path) => path,
            None => self.default_sqlite_path.clone(),
        }
    }
}

fn sqlite_url_path(url: &str) -> Option<PathBuf> {
    let rest = url.strip_prefix("sqlite:")?;
    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let rest = rest.split('?').next().unwrap_or(rest);
    if rest.is_empty() {
        None
    } else {
        Some(PathBuf::from(rest))
    }
}

/// Strip the password from a connection URL for display.
pub(crate) fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            match url[scheme_end + 3..at].split_once(':') {
                Some((user, _)) => format!("{}{}:***{}", &url[..scheme_end + 3], user, &url[at..]),
                None => url.to_string(),
            }
        }
        _ => url.to_string(),
    }
}

/// Checks whether a backend is reachable right now.
pub trait BackendProbe: Send {
    fn probe(&self, descriptor: &ConnectionDescriptor) -> Result<()>;
}

/// Probe that really connects.
#[derive(Debug, Default, Clone, Copy)]
pub struct LiveProbe;

impl BackendProbe for LiveProbe {
    fn probe(&self, descriptor: &ConnectionDescriptor) -> Result<()> {
        match descriptor {
            #[cfg(feature = "postgres")]
            ConnectionDescriptor::Postgres { url } => super::postgres::PostgresAdapter::probe(url),
            #[cfg(not(feature = "postgres"))]
            ConnectionDescriptor::Postgres { .. } => Err(Error::Configuration(
                "built without the `postgres` feature".to_string(),
            )),
            ConnectionDescriptor::Sqlite { path } => SqliteAdapter::probe(path),
            ConnectionDescriptor::FlatFile { .. } => Ok(()),
        }
    }
}

/// Selects and opens the active backend.
pub struct StorageRouter {
    settings: RouterSettings,
    probe: Box<dyn BackendProbe>,
    cached: Option<Selection>,
}

impl StorageRouter {
    pub fn new(settings: RouterSettings) -> Self {
        Self::with_probe(settings, Box::new(LiveProbe))
    }

    pub fn with_probe(settings: RouterSettings, probe: Box<dyn BackendProbe>) -> Self {
        Self {
            settings,
            probe,
            cached: None,
        }
    }

    pub fn settings(&self) -> &RouterSettings {
        &self.settings
    }

    /// The cached selection, computing it on first use.
    pub fn select(&mut self) -> Result<Selection> {
        if let Some(selection) = &self.cached {
            return Ok(selection.clone());
        }
        self.refresh()
    }

    /// Discard the cached selection and probe again.
    pub fn refresh(&mut self) -> Result<Selection> {
        self.cached = None;
        let selection = self.compute()?;
        tracing::info!(
            backend = %selection.kind,
            location = %selection.descriptor.display_location(),
            preference = %self.settings.preference,
            "selected storage backend"
        );
        self.cached = Some(selection.clone());
        Ok(selection)
    }

    /// Open the adapter for a selection.
    pub fn open(selection: &Selection) -> Result<Box<dyn NodeStore>> {
        match &selection.descriptor {
            #[cfg(feature = "postgres")]
            ConnectionDescriptor::Postgres { url } => {
                Ok(Box::new(super::postgres::PostgresAdapter::connect(url)?))
            }
            #[cfg(not(feature = "postgres"))]
            ConnectionDescriptor::Postgres { .. } => Err(Error::Configuration(
                "postgres backend selected but tg was built without the `postgres` feature"
                    .to_string(),
            )),
            ConnectionDescriptor::Sqlite { path } => Ok(Box::new(SqliteAdapter::open(path)?)),
            ConnectionDescriptor::FlatFile { root } => Ok(Box::new(FlatFileAdapter::new(root))),
        }
    }

    fn compute(&self) -> Result<Selection> {
        let mut attempts = Vec::new();
        let preference = self.settings.preference;

        let chain: &[BackendKind] = match preference {
            StoragePreference::Auto => &[BackendKind::Postgres, BackendKind::Sqlite, BackendKind::FlatFile],
            StoragePreference::RelationalOnly => &[BackendKind::Postgres, BackendKind::Sqlite],
            StoragePreference::FlatFileOnly => &[BackendKind::FlatFile],
            StoragePreference::Postgres => &[BackendKind::Postgres],
            StoragePreference::Sqlite => &[BackendKind::Sqlite],
        };

        for &kind in chain {
            let (descriptor, record) = self.try_backend(kind);
            tracing::debug!(backend = %kind, ok = record.ok, detail = %record.detail, "storage probe");
            let ok = record.ok;
            attempts.push(record);
            if let (true, Some(descriptor)) = (ok, descriptor) {
                return Ok(Selection {
                    kind,
                    descriptor,
                    attempts,
                });
            }
        }

        let reasons: Vec<String> = attempts
            .iter()
            .map(|a| format!("{}: {}", a.kind, a.detail))
            .collect();
        Err(Error::Configuration(format!(
            "storage preference '{}' cannot be satisfied ({})",
            preference,
            reasons.join("; ")
        )))
    }

    fn try_backend(&self, kind: BackendKind) -> (Option<ConnectionDescriptor>, ProbeAttempt) {
        let descriptor = match kind {
            BackendKind::Postgres => match self.settings.postgres_url() {
                Some(url) => ConnectionDescriptor::Postgres {
                    url: url.to_string(),
                },
                None => {
                    return (
                        None,
                        ProbeAttempt {
                            kind,
                            ok: false,
                            detail: "no postgres:// connection string configured".to_string(),
                        },
                    );
                }
            },
            BackendKind::Sqlite => ConnectionDescriptor::Sqlite {
                path: self.settings.sqlite_path(),
            },
            BackendKind::FlatFile => ConnectionDescriptor::FlatFile {
                root: self.settings.nodes_dir.clone(),
            },
        };

        let record = match self.probe.probe(&descriptor) {
            Ok(()) => ProbeAttempt {
                kind,
                ok: true,
                detail: format!("available at {}", descriptor.display_location()),
            },
            Err(e) => ProbeAttempt {
                kind,
                ok: false,
                detail: e.to_string(),
            },
        };
        (Some(descriptor), record)
    }
}

/// Settings for a workspace rooted at `root` with default locations.
pub fn default_settings(root: &Path) -> RouterSettings {
    RouterSettings {
        preference: StoragePreference::Auto,
        root: root.to_path_buf(),
        database_url: None,
        default_sqlite_path: root.join(".tracegraph").join("tracegraph.db"),
        nodes_dir: root.join("nodes"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestEnv;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Probe with scripted availability that counts calls.
    struct FakeProbe {
        postgres: bool,
        sqlite: bool,
        calls: Arc<AtomicUsize>,
    }

    impl BackendProbe for FakeProbe {
        fn probe(&self, descriptor: &ConnectionDescriptor) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let ok = match descriptor.kind() {
                BackendKind::Postgres => self.postgres,
                BackendKind::Sqlite => self.sqlite,
                BackendKind::FlatFile => true,
            };
            if ok {
                Ok(())
            } else {
                Err(Error::Other("unreachable".to_string()))
            }
        }
    }

    fn router(
        env: &TestEnv,
        preference: StoragePreference,
        url: Option<&str>,
        postgres: bool,
        sqlite: bool,
    ) -> (StorageRouter, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut settings = default_settings(env.path());
        settings.preference = preference;
        settings.database_url = url.map(str::to_string);
        let probe = FakeProbe {
            postgres,
            sqlite,
            calls: Arc::clone(&calls),
        };
        (StorageRouter::with_probe(settings, Box::new(probe)), calls)
    }

    #[test]
    fn test_preference_parsing() {
        assert_eq!("AUTO".parse::<StoragePreference>().unwrap(), StoragePreference::Auto);
        assert_eq!("db".parse::<StoragePreference>().unwrap(), StoragePreference::RelationalOnly);
        assert_eq!("files".parse::<StoragePreference>().unwrap(), StoragePreference::FlatFileOnly);
        assert_eq!("pg".parse::<StoragePreference>().unwrap(), StoragePreference::Postgres);
        assert_eq!(
            "flat_file_only".parse::<StoragePreference>().unwrap(),
            StoragePreference::FlatFileOnly
        );
        assert!("mongo".parse::<StoragePreference>().is_err());
    }

    #[test]
    fn test_auto_prefers_postgres() {
        let env = TestEnv::new();
        let (mut r, _) = router(&env, StoragePreference::Auto, Some("postgres://db/x"), true, true);
        let selection = r.select().unwrap();
        assert_eq!(selection.kind, BackendKind::Postgres);
        assert_eq!(selection.attempts.len(), 1);
    }

    #[test]
    fn test_auto_falls_back_to_sqlite_then_files() {
        let env = TestEnv::new();
        let (mut r, _) = router(&env, StoragePreference::Auto, Some("postgres://db/x"), false, true);
        let selection = r.select().unwrap();
        assert_eq!(selection.kind, BackendKind::Sqlite);
        assert!(!selection.attempts[0].ok);

        let (mut r, _) = router(&env, StoragePreference::Auto, None, false, false);
        let selection = r.select().unwrap();
        assert_eq!(selection.kind, BackendKind::FlatFile);
        assert_eq!(selection.attempts.len(), 3);
        assert_eq!(
            selection.descriptor,
            ConnectionDescriptor::FlatFile {
                root: env.nodes_dir()
            }
        );
    }

    #[test]
    fn test_locked_preference_never_falls_back() {
        let env = TestEnv::new();
        let (mut r, _) = router(&env, StoragePreference::Postgres, Some("postgres://db/x"), false, true);
        let err = r.select().unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));

        let (mut r, _) = router(&env, StoragePreference::Postgres, None, true, true);
        assert!(matches!(r.select().unwrap_err(), Error::Configuration(_)));

        let (mut r, _) = router(&env, StoragePreference::RelationalOnly, None, false, false);
        assert!(matches!(r.select().unwrap_err(), Error::Configuration(_)));
    }

    #[test]
    fn test_flat_file_only_skips_databases() {
        let env = TestEnv::new();
        let (mut r, _) = router(&env, StoragePreference::FlatFileOnly, Some("postgres://db/x"), true, true);
        let selection = r.select().unwrap();
        assert_eq!(selection.kind, BackendKind::FlatFile);
        assert_eq!(selection.attempts.len(), 1);
    }

    #[test]
    fn test_selection_is_cached_until_refresh() {
        let env = TestEnv::new();
        let (mut r, calls) = router(&env, StoragePreference::Auto, None, false, true);
        let first = r.select().unwrap();
        let second = r.select().unwrap();
        assert_eq!(first.kind, second.kind);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        r.refresh().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_sqlite_url_names_the_file() {
        let env = TestEnv::new();
        let mut settings = default_settings(env.path());
        settings.database_url = Some("sqlite:///tmp/trace.db".to_string());
        assert_eq!(settings.sqlite_path(), PathBuf::from("/tmp/trace.db"));
        assert!(settings.postgres_url().is_none());

        settings.database_url = Some("sqlite:data/trace.db?mode=rwc".to_string());
        assert_eq!(settings.sqlite_path(), env.path().join("data").join("trace.db"));

        settings.database_url = None;
        assert_eq!(settings.sqlite_path(), env.db_path());
    }

    #[test]
    fn test_live_probe_selects_sqlite_in_auto_without_url() {
        let env = TestEnv::new();
        let mut r = StorageRouter::new(default_settings(env.path()));
        let selection = r.select().unwrap();
        assert_eq!(selection.kind, BackendKind::Sqlite);
        let store = StorageRouter::open(&selection).unwrap();
        assert_eq!(store.kind(), BackendKind::Sqlite);
    }

    #[test]
    fn test_redacted_location() {
        let d = ConnectionDescriptor::Postgres {
            url: "postgres://u:pw@h/db".to_string(),
        };
        assert_eq!(d.display_location(), "postgres://u:***@h/db");
        assert_eq!(redact_url("postgres://db/trace"), "postgres://db/trace");
    }
}
