// src/repository/sqlite.rs

//! SQLite-backed repository
//!
//! Serves both as the Installed Packages Repository and as an available
//! repository. Reverse dependency lookups go through a materialized index
//! which every write to `packages` or `dependencies` flags stale; queries
//! against the dependency tables answer [`Lookup::Stale`] until
//! [`Repository::regenerate_dependency_index`] runs.

use super::{DependencyType, Lookup, Repository};
use crate::atom::{Atom, DependencySpec};
use crate::db::models::{DependencyEntry, LibraryEntry, LibraryKind, PackageEntry};
use crate::db::{self, schema};
use crate::error::Result;
use crate::lock::ResourceLock;
use rusqlite::Connection;
use tracing::{debug, info, warn};

/// Repository stored in one SQLite database
#[derive(Debug)]
pub struct SqliteRepository {
    id: String,
    conn: Connection,
    lock: ResourceLock,
}

impl SqliteRepository {
    /// Open an existing database; the lock file is `<db_path>.lock`
    pub fn open(repository_id: &str, db_path: &str) -> Result<Self> {
        let conn = db::open(db_path)?;
        let lock = ResourceLock::file(format!("{db_path}.lock"))?;
        info!("Opened repository {} at {}", repository_id, db_path);

        Ok(Self {
            id: repository_id.to_string(),
            conn,
            lock,
        })
    }

    /// Fresh in-memory repository with a process-local lock
    pub fn in_memory(repository_id: &str) -> Result<Self> {
        Ok(Self {
            id: repository_id.to_string(),
            conn: db::open_in_memory()?,
            lock: ResourceLock::direct(),
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Store a package with its dependency strings and libraries
    ///
    /// Blockers are passed as dependency strings starting with `!`.
    pub fn add_package(
        &mut self,
        mut entry: PackageEntry,
        dependencies: &[(&str, DependencyType)],
        libraries: &[(&str, i32, LibraryKind)],
    ) -> Result<i64> {
        let _guard = self.lock.exclusive()?;

        let package_id = db::transaction(&mut self.conn, |tx| {
            let package_id = entry.insert(tx)?;
            for (dependency, dep_type) in dependencies {
                DependencyEntry::new(package_id, dependency.to_string(), *dep_type).insert(tx)?;
            }
            for (soname, elfclass, kind) in libraries {
                LibraryEntry::new(package_id, soname.to_string(), *elfclass, *kind).insert(tx)?;
            }
            Ok(package_id)
        })?;

        debug!("Added {} to repository {} as {}", entry.atom(), self.id, package_id);
        Ok(package_id)
    }

    /// Delete a package and everything attached to it
    pub fn remove_package(&mut self, package_id: i64) -> Result<()> {
        let _guard = self.lock.exclusive()?;
        db::transaction(&mut self.conn, |tx| PackageEntry::delete(tx, package_id))?;
        debug!("Removed package {} from repository {}", package_id, self.id);
        Ok(())
    }

    fn lookup<T>(&self, query: impl FnOnce() -> Result<T>) -> Result<Lookup<T>> {
        if schema::is_index_stale(&self.conn)? {
            debug!("Dependency index of {} is stale", self.id);
            return Ok(Lookup::Stale);
        }
        Ok(Lookup::Fresh(query()?))
    }
}

impl Repository for SqliteRepository {
    fn repository_id(&self) -> &str {
        &self.id
    }

    fn resource_lock(&self) -> &ResourceLock {
        &self.lock
    }

    fn retrieve_package(&self, package_id: i64) -> Result<Option<PackageEntry>> {
        PackageEntry::find_by_id(&self.conn, package_id)
    }

    fn atom_match_all(&self, atom: &Atom) -> Result<Vec<i64>> {
        let candidates = match &atom.category {
            Some(category) => PackageEntry::find_by_key(&self.conn, category, &atom.name)?,
            None => PackageEntry::find_by_name(&self.conn, &atom.name)?,
        };

        let mut matches = Vec::new();
        for pkg in candidates {
            let Some(package_id) = pkg.id else {
                continue;
            };
            if atom.matches(&pkg.key(), &pkg.package_version()?, &pkg.slot) {
                matches.push(package_id);
            }
        }
        Ok(matches)
    }

    fn retrieve_dependencies(
        &self,
        package_id: i64,
        exclude: &[DependencyType],
    ) -> Result<Lookup<Vec<String>>> {
        self.lookup(|| {
            Ok(DependencyEntry::find_by_package(&self.conn, package_id, exclude)?
                .into_iter()
                .filter(|dep| !dep.dependency.starts_with('!'))
                .map(|dep| dep.dependency)
                .collect())
        })
    }

    fn retrieve_reverse_dependencies(
        &self,
        package_id: i64,
        exclude: &[DependencyType],
    ) -> Result<Lookup<Vec<(i64, String)>>> {
        self.lookup(|| {
            Ok(DependencyEntry::find_dependents(&self.conn, package_id, exclude)?
                .into_iter()
                .map(|dep| (dep.package_id, dep.dependency))
                .collect())
        })
    }

    fn retrieve_conflicts(&self, package_id: i64) -> Result<Vec<String>> {
        Ok(DependencyEntry::find_by_package(&self.conn, package_id, &[])?
            .into_iter()
            .filter_map(|dep| dep.dependency.strip_prefix('!').map(str::to_string))
            .collect())
    }

    fn retrieve_provided_libraries(&self, package_id: i64) -> Result<Vec<(String, i32)>> {
        Ok(
            LibraryEntry::find_by_package(&self.conn, package_id, LibraryKind::Provided)?
                .into_iter()
                .map(|lib| (lib.soname, lib.elfclass))
                .collect(),
        )
    }

    fn resolve_needed(&self, soname: &str, elfclass: i32) -> Result<Vec<i64>> {
        LibraryEntry::find_packages(&self.conn, soname, elfclass, LibraryKind::Provided)
    }

    fn search_needed(&self, soname: &str, elfclass: i32) -> Result<Vec<i64>> {
        LibraryEntry::find_packages(&self.conn, soname, elfclass, LibraryKind::Needed)
    }

    fn regenerate_dependency_index(&self) -> Result<()> {
        info!("Regenerating dependency index of repository {}", self.id);
        let _guard = self.lock.exclusive()?;

        let tx = self.conn.unchecked_transaction()?;
        DependencyEntry::clear_index(&tx)?;

        let mut indexed = 0usize;
        for dep in DependencyEntry::list_all(&tx)? {
            let Some(dependency_id) = dep.id else {
                continue;
            };
            let spec = match DependencySpec::parse(&dep.dependency) {
                Ok(spec) if !spec.is_blocker() => spec,
                Ok(_) => continue,
                Err(e) => {
                    warn!("Skipping unparsable dependency '{}': {}", dep.dependency, e);
                    continue;
                }
            };

            for atom in spec.alternatives() {
                for package_id in self.atom_match_all(atom)? {
                    DependencyEntry::index(&tx, dependency_id, package_id)?;
                    indexed += 1;
                }
            }
        }

        schema::set_index_stale(&tx, false)?;
        tx.commit()?;

        debug!("Indexed {} dependency links in {}", indexed, self.id);
        Ok(())
    }
}
