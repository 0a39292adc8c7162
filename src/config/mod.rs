//! Configuration for tracegraph.
//!
//! Settings live in `config.kdl` files at two levels:
//!
//! - System: `~/.config/tracegraph/config.kdl` (or `$TG_CONFIG_DIR/config.kdl`)
//! - Workspace: `<root>/.tracegraph/config.kdl`
//!
//! ## Precedence
//!
//! CLI flag > environment > workspace config > system config > defaults
//!
//! Use the [`resolver`] module for precedence resolution.

pub mod resolver;
pub mod schema;

pub use resolver::{
    ConfigOverrides, DATABASE_URL_ENV, Resolved, ResolvedConfig, TG_DATABASE_URL_ENV,
    TG_STORAGE_ENV, ValueSource, resolve_config,
};
pub use schema::{
    OutputFormat, TracegraphConfig, system_config_path, workspace_config_path,
};
