// tests/common/mod.rs

//! Shared fixtures for integration tests.

#![allow(dead_code)]

use entropy::db;
use entropy::db::models::{LibraryKind, PackageEntry};
use entropy::repository::{DependencyType, INSTALLED_REPOSITORY_ID};
use entropy::{RepositorySet, SqliteRepository};
use tempfile::TempDir;

/// Build a package row from `category/name-version[:slot]`.
pub fn entry(atom: &str) -> PackageEntry {
    let (atom, slot) = match atom.split_once(':') {
        Some((atom, slot)) => (atom, Some(slot)),
        None => (atom, None),
    };
    let (key, version) = atom.rsplit_once('-').unwrap();
    let (category, name) = key.split_once('/').unwrap();

    let mut entry = PackageEntry::new(category.to_string(), name.to_string(), version.to_string());
    if let Some(slot) = slot {
        entry.slot = slot.to_string();
    }
    entry
}

pub fn runtime<'s>(deps: &[&'s str]) -> Vec<(&'s str, DependencyType)> {
    deps.iter().map(|dep| (*dep, DependencyType::Runtime)).collect()
}

/// Create an empty on-disk repository database at `dir/<name>.db`.
pub fn open_repository(dir: &TempDir, id: &str, name: &str) -> SqliteRepository {
    let db_path = dir.path().join(format!("{name}.db")).to_str().unwrap().to_string();
    db::init(&db_path).unwrap();
    SqliteRepository::open(id, &db_path).unwrap()
}

/// An installed repository plus one available repository called `main`,
/// both stored in a temporary directory.
///
/// Keep the returned `TempDir` alive for as long as the repositories are used.
pub struct Fixture {
    pub dir: TempDir,
    pub installed: SqliteRepository,
    pub main: SqliteRepository,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let installed = open_repository(&dir, INSTALLED_REPOSITORY_ID, "installed");
        let main = open_repository(&dir, "main", "main");
        Self {
            dir,
            installed,
            main,
        }
    }

    pub fn install(&mut self, atom: &str, deps: &[&str]) -> i64 {
        self.installed.add_package(entry(atom), &runtime(deps), &[]).unwrap()
    }

    pub fn install_system(&mut self, atom: &str, deps: &[&str]) -> i64 {
        let mut package = entry(atom);
        package.is_system = true;
        self.installed.add_package(package, &runtime(deps), &[]).unwrap()
    }

    pub fn install_with_libraries(
        &mut self,
        atom: &str,
        deps: &[&str],
        libraries: &[(&str, i32, LibraryKind)],
    ) -> i64 {
        self.installed.add_package(entry(atom), &runtime(deps), libraries).unwrap()
    }

    pub fn publish(&mut self, atom: &str, deps: &[&str]) -> i64 {
        self.main.add_package(entry(atom), &runtime(deps), &[]).unwrap()
    }

    pub fn publish_typed(&mut self, atom: &str, deps: &[(&str, DependencyType)]) -> i64 {
        self.main.add_package(entry(atom), deps, &[]).unwrap()
    }

    pub fn into_set(self) -> (TempDir, RepositorySet) {
        let set = RepositorySet::new(Box::new(self.installed)).with_repository(Box::new(self.main));
        (self.dir, set)
    }
}
