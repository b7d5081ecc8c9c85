// src/error.rs

//! Error types for Entropy
//!
//! Domain failures (unmatched packages, protected removals) are ordinary
//! variants that callers render as user-facing messages. Graph integrity
//! violations are wrapped from [`GraphError`].

use crate::graph::GraphError;
use crate::resolver::NotRemovable;
use std::collections::BTreeSet;
use thiserror::Error;

/// Result type for Entropy operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Entropy operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration parse error
    #[error("Configuration error: {0}")]
    ConfigError(#[from] toml::de::Error),

    /// Initialization error
    #[error("Initialization error: {0}")]
    InitError(String),

    /// Malformed atom, version or stored value
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Lock acquisition or release failure
    #[error("Lock error: {0}")]
    LockError(String),

    /// Entity not found
    #[error("Not found: {0}")]
    NotFoundError(String),

    /// One or more requested package specs could not be matched
    #[error("Package not found: {}", .0.join(", "))]
    PackageNotFound(Vec<String>),

    /// Requested packages reference dependencies that cannot be resolved
    #[error("Dependencies not found: {}", join_set(.0))]
    DependenciesNotFound(BTreeSet<String>),

    /// Removal would pull in protected system packages
    #[error("Dependencies not removable: {}", describe_not_removable(.0))]
    DependenciesNotRemovable(Vec<NotRemovable>),

    /// Repository dependency index stayed stale after regeneration
    #[error("Repository {0} dependency index is stale")]
    StaleRepository(String),

    /// Graph integrity violation
    #[error(transparent)]
    Graph(#[from] GraphError),
}

fn join_set(items: &BTreeSet<String>) -> String {
    items.iter().cloned().collect::<Vec<_>>().join(", ")
}

fn describe_not_removable(items: &[NotRemovable]) -> String {
    items
        .iter()
        .map(|item| format!("{} ({})", item.atom, item.reason))
        .collect::<Vec<_>>()
        .join(", ")
}
