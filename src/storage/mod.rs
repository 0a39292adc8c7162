//! Storage layer for tracegraph nodes.
//!
//! ## Storage Backends
//!
//! tracegraph can persist the node graph in three places:
//!
//! - **Postgres** (primary, feature `postgres`): a shared relational server
//! - **SQLite**: an embedded database at `<root>/.tracegraph/tracegraph.db`
//! - **Flat files**: one YAML document per node under `<root>/nodes/<layer>/`
//!
//! All backends implement [`NodeStore`]; the [`StorageRouter`] decides which
//! one is active. The relational backends share the table layout and row
//! assembly in [`rows`].

pub mod backend;
pub mod flat_file;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod router;
pub mod rows;
pub mod sqlite;

pub use backend::{BackendKind, LayeredNodes, NodeStore, group_by_layer};
pub use flat_file::{FileError, FileScan, FlatFileAdapter};
#[cfg(feature = "postgres")]
pub use postgres::PostgresAdapter;
pub use router::{
    BackendProbe, ConnectionDescriptor, LiveProbe, ProbeAttempt, RouterSettings, Selection,
    StoragePreference, StorageRouter,
};
pub use sqlite::SqliteAdapter;

use crate::models::Layer;
use crate::{Error, Result};
use sha2::{Digest, Sha256};

/// Longest slug derived from a title.
const MAX_SLUG_LEN: usize = 48;

/// Attempts at a unique suffix before giving up.
const MAX_SUFFIX_ATTEMPTS: u32 = 16;

/// Derive an id slug from free text: uppercase `[A-Z0-9_-]`, runs of other
/// characters collapsed to `_`.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_sep = false;
    for c in text.chars() {
        if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
            if pending_sep && !slug.is_empty() {
                slug.push('_');
            }
            pending_sep = false;
            slug.push(c.to_ascii_uppercase());
        } else {
            pending_sep = true;
        }
    }
    let slug: String = slug.chars().take(MAX_SLUG_LEN).collect();
    let slug = slug.trim_matches(|c| c == '_' || c == '-').to_string();
    if slug.is_empty() {
        "NODE".to_string()
    } else {
        slug
    }
}

/// Generate a unique node id for `layer` from `seed` (usually the title).
///
/// Returns `<PREFIX>-<SLUG>` when free, otherwise appends a 4-hex-character
/// hash suffix. `taken` reports whether an id is already in use.
pub fn generate_id<F>(layer: Layer, seed: &str, taken: F) -> Result<String>
where
    F: Fn(&str) -> Result<bool>,
{
    let base = format!("{}-{}", layer.prefix(), slugify(seed));
    if !taken(&base)? {
        return Ok(base);
    }
    for attempt in 0..MAX_SUFFIX_ATTEMPTS {
        let candidate = format!("{}-{}", base, hash_suffix(seed, attempt));
        if !taken(&candidate)? {
            return Ok(candidate);
        }
    }
    Err(Error::Other(format!(
        "Could not generate a unique id for '{}'",
        base
    )))
}

fn hash_suffix(seed: &str, attempt: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(seed.as_bytes());
    hasher.update(
        chrono::Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or(0)
            .to_le_bytes(),
    );
    hasher.update(attempt.to_le_bytes());
    let hash = hasher.finalize();
    format!("{:x}", hash)[..4].to_uppercase()
}
