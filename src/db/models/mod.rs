// src/db/models/mod.rs

//! Data models for Entropy repository tables
//!
//! Each struct maps to one table and carries its own insert/find/delete
//! helpers taking a plain `&Connection`, so they work inside
//! [`crate::db::transaction`] as well.

mod dependency;
mod library;
mod package;

pub use dependency::{DependencyEntry, DependencyType};
pub use library::{LibraryEntry, LibraryKind};
pub use package::PackageEntry;
