// src/lib.rs

//! Entropy dependency resolution engine
//!
//! Computes ordered install and removal queues for the Entropy binary
//! package manager.
//!
//! # Architecture
//!
//! - Graph: arena-backed dependency graph solved with Tarjan SCC and a
//!   leveled Kahn pass, so dependency cycles collapse into one level
//! - Repositories: SQLite metadata stores queried through the
//!   [`repository::Repository`] trait, guarded by a reentrant [`lock::ResourceLock`]
//! - Resolver: expands forward or reverse dependencies into a graph and
//!   flattens the solved levels into an action queue

pub mod atom;
pub mod config;
pub mod db;
mod error;
pub mod graph;
pub mod lock;
pub mod repository;
pub mod resolver;

pub use atom::{Atom, DependencySpec, PackageVersion};
pub use config::EntropyConfig;
pub use error::{Error, Result};
pub use graph::{Graph, GraphError, TopologicalSorter};
pub use lock::{LockGuard, LockMode, ResourceLock};
pub use repository::{PackageMatch, Repository, RepositorySet, SqliteRepository};
pub use resolver::{
    Conflict, InstallOptions, InstallQueue, NotRemovable, QueueStatus, RemovalOptions, Resolver,
};
