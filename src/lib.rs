//! tracegraph - A layered traceability graph library.
//!
//! This library provides the core functionality for the `tg` CLI tool:
//! node persistence across a relational database and a tree of declarative
//! YAML files, backend selection, file/database synchronization, graph
//! analysis, and command-node generation and execution.

pub mod cli;
pub mod commands;
pub mod config;
pub mod models;
pub mod pipeline;
pub mod report;
pub mod repository;
pub mod storage;
pub mod sync;

use models::validation::ValidationReport;


/// Library-level error type for tracegraph operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[cfg(feature = "postgres")]
    #[error("Postgres error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// An explicitly requested backend is unavailable, or config is malformed.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation failed: {0}")]
    Validation(ValidationReport),

    #[error("Node not found: {0}")]
    NotFound(String),

    #[error("Node already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid ID format: {0}")]
    InvalidId(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    Other(String),
}

/// Result type alias for tracegraph operations.
pub type Result<T> = std::result::Result<T, Error>;
