// src/repository/mod.rs

//! Repository collaborators queried during dependency resolution
//!
//! A [`Repository`] answers metadata questions about the packages it
//! carries: atom matching, forward and reverse dependencies, blockers,
//! system flags and ELF libraries. The resolver works against a
//! [`RepositorySet`], which pairs the Installed Packages Repository with
//! an ordered list of available repositories.

pub mod sqlite;

pub use crate::db::models::DependencyType;
pub use sqlite::SqliteRepository;

use crate::atom::{Atom, PackageVersion};
use crate::db::models::PackageEntry;
use crate::error::Result;
use crate::lock::ResourceLock;
use std::fmt;
use tracing::debug;

/// Repository id of the Installed Packages Repository
pub const INSTALLED_REPOSITORY_ID: &str = "__system__";

/// A package id scoped to the repository carrying it
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageMatch {
    pub package_id: i64,
    pub repository_id: String,
}

impl PackageMatch {
    pub fn new(package_id: i64, repository_id: impl Into<String>) -> Self {
        Self {
            package_id,
            repository_id: repository_id.into(),
        }
    }

    /// Whether the package lives in the Installed Packages Repository
    pub fn is_installed(&self) -> bool {
        self.repository_id == INSTALLED_REPOSITORY_ID
    }
}

impl fmt::Display for PackageMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.package_id, self.repository_id)
    }
}

/// Result of a query against dependency tables that may need regeneration
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum Lookup<T> {
    Fresh(T),
    /// The dependency index is out of date; regenerate and ask again
    Stale,
}

impl<T> Lookup<T> {
    pub fn fresh(self) -> Option<T> {
        match self {
            Lookup::Fresh(value) => Some(value),
            Lookup::Stale => None,
        }
    }
}

/// Metadata queries the resolver needs from a repository
pub trait Repository {
    /// Identifier of this repository, e.g. `sabayonlinux.org`
    fn repository_id(&self) -> &str;

    /// Lock guarding this repository against concurrent writers
    fn resource_lock(&self) -> &ResourceLock;

    /// Full metadata row of a package
    fn retrieve_package(&self, package_id: i64) -> Result<Option<PackageEntry>>;

    /// Every package selected by `atom`, in id order
    fn atom_match_all(&self, atom: &Atom) -> Result<Vec<i64>>;

    /// Dependency strings of a package, blockers excluded
    fn retrieve_dependencies(
        &self,
        package_id: i64,
        exclude: &[DependencyType],
    ) -> Result<Lookup<Vec<String>>>;

    /// Packages depending on `package_id`, with the dependency string that links them
    fn retrieve_reverse_dependencies(
        &self,
        package_id: i64,
        exclude: &[DependencyType],
    ) -> Result<Lookup<Vec<(i64, String)>>>;

    /// Atoms this package blocks (stored without the leading `!`)
    fn retrieve_conflicts(&self, package_id: i64) -> Result<Vec<String>>;

    /// `(soname, elfclass)` pairs the package ships
    fn retrieve_provided_libraries(&self, package_id: i64) -> Result<Vec<(String, i32)>>;

    /// Packages shipping `soname` for `elfclass`
    fn resolve_needed(&self, soname: &str, elfclass: i32) -> Result<Vec<i64>>;

    /// Packages linking against `soname` for `elfclass`
    fn search_needed(&self, soname: &str, elfclass: i32) -> Result<Vec<i64>>;

    /// Rebuild the reverse dependency index
    fn regenerate_dependency_index(&self) -> Result<()>;

    /// Best package selected by `atom`: highest version, latest id on ties
    fn atom_match(&self, atom: &Atom) -> Result<Option<i64>> {
        let mut best: Option<(PackageVersion, i64)> = None;
        for package_id in self.atom_match_all(atom)? {
            let Some(version) = self.retrieve_version(package_id)? else {
                continue;
            };
            if best.as_ref().is_none_or(|(current, _)| version >= *current) {
                best = Some((version, package_id));
            }
        }
        Ok(best.map(|(_, package_id)| package_id))
    }

    /// Post-merge dependency strings of a package
    fn retrieve_post_dependencies(&self, package_id: i64) -> Result<Lookup<Vec<String>>> {
        self.retrieve_dependencies(
            package_id,
            &[
                DependencyType::Runtime,
                DependencyType::Manual,
                DependencyType::Build,
            ],
        )
    }

    fn retrieve_atom(&self, package_id: i64) -> Result<Option<String>> {
        Ok(self.retrieve_package(package_id)?.map(|pkg| pkg.atom()))
    }

    fn retrieve_key_slot(&self, package_id: i64) -> Result<Option<(String, String)>> {
        Ok(self.retrieve_package(package_id)?.map(|pkg| pkg.key_slot()))
    }

    fn retrieve_version(&self, package_id: i64) -> Result<Option<PackageVersion>> {
        self.retrieve_package(package_id)?
            .map(|pkg| pkg.package_version())
            .transpose()
    }

    fn is_system_package(&self, package_id: i64) -> Result<bool> {
        Ok(self
            .retrieve_package(package_id)?
            .is_some_and(|pkg| pkg.is_system))
    }
}

/// The Installed Packages Repository plus available repositories in priority order
pub struct RepositorySet {
    installed: Box<dyn Repository>,
    available: Vec<Box<dyn Repository>>,
}

impl RepositorySet {
    pub fn new(installed: Box<dyn Repository>) -> Self {
        Self {
            installed,
            available: Vec::new(),
        }
    }

    /// Append an available repository with the lowest priority so far
    pub fn add_repository(&mut self, repository: Box<dyn Repository>) {
        debug!("Adding repository {}", repository.repository_id());
        self.available.push(repository);
    }

    pub fn with_repository(mut self, repository: Box<dyn Repository>) -> Self {
        self.add_repository(repository);
        self
    }

    pub fn installed(&self) -> &dyn Repository {
        self.installed.as_ref()
    }

    /// Available repositories, highest priority first
    pub fn available(&self) -> impl Iterator<Item = &dyn Repository> {
        self.available.iter().map(|repo| repo.as_ref())
    }

    /// Look up a repository by id, the installed one included
    pub fn get(&self, repository_id: &str) -> Option<&dyn Repository> {
        if self.installed.repository_id() == repository_id {
            return Some(self.installed());
        }
        self.available().find(|repo| repo.repository_id() == repository_id)
    }

    /// Metadata row behind a match, if both repository and package exist
    pub fn package(&self, pkg_match: &PackageMatch) -> Result<Option<PackageEntry>> {
        match self.get(&pkg_match.repository_id) {
            Some(repo) => repo.retrieve_package(pkg_match.package_id),
            None => Ok(None),
        }
    }

    /// Best match for `atom` across available repositories
    ///
    /// The highest version wins; on equal versions the repository listed
    /// first wins.
    pub fn atom_match(&self, atom: &Atom) -> Result<Option<PackageMatch>> {
        let mut best: Option<(PackageVersion, PackageMatch)> = None;

        for repo in self.available() {
            let Some(package_id) = repo.atom_match(atom)? else {
                continue;
            };
            let Some(version) = repo.retrieve_version(package_id)? else {
                continue;
            };
            if best.as_ref().is_none_or(|(current, _)| version > *current) {
                best = Some((version, PackageMatch::new(package_id, repo.repository_id())));
            }
        }

        Ok(best.map(|(_, pkg_match)| pkg_match))
    }

    /// Best installed match for `atom`
    pub fn installed_match(&self, atom: &Atom) -> Result<Option<PackageMatch>> {
        Ok(self
            .installed
            .atom_match(atom)?
            .map(|package_id| PackageMatch::new(package_id, self.installed.repository_id())))
    }
}

impl fmt::Debug for RepositorySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepositorySet")
            .field("installed", &self.installed.repository_id())
            .field(
                "available",
                &self.available().map(|repo| repo.repository_id()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::PackageEntry;

    fn repo_with(id: &str, packages: &[(&str, &str, &str)]) -> SqliteRepository {
        let mut repo = SqliteRepository::in_memory(id).unwrap();
        for (category, name, version) in packages {
            repo.add_package(
                PackageEntry::new(category.to_string(), name.to_string(), version.to_string()),
                &[],
                &[],
            )
            .unwrap();
        }
        repo
    }

    #[test]
    fn test_atom_match_prefers_highest_version() {
        let set = RepositorySet::new(Box::new(repo_with(INSTALLED_REPOSITORY_ID, &[])))
            .with_repository(Box::new(repo_with("main", &[("sys-libs", "zlib", "1.2.13")])))
            .with_repository(Box::new(repo_with("testing", &[("sys-libs", "zlib", "1.3")])));

        let atom = Atom::parse("sys-libs/zlib").unwrap();
        let found = set.atom_match(&atom).unwrap().unwrap();
        assert_eq!(found.repository_id, "testing");
    }

    #[test]
    fn test_atom_match_ties_go_to_first_repository() {
        let set = RepositorySet::new(Box::new(repo_with(INSTALLED_REPOSITORY_ID, &[])))
            .with_repository(Box::new(repo_with("main", &[("sys-libs", "zlib", "1.3")])))
            .with_repository(Box::new(repo_with("mirror", &[("sys-libs", "zlib", "1.3")])));

        let atom = Atom::parse("zlib").unwrap();
        assert_eq!(set.atom_match(&atom).unwrap().unwrap().repository_id, "main");
    }

    #[test]
    fn test_installed_match_and_lookup() {
        let set = RepositorySet::new(Box::new(repo_with(
            INSTALLED_REPOSITORY_ID,
            &[("sys-libs", "zlib", "1.3")],
        )));

        let atom = Atom::parse(">=sys-libs/zlib-1.2").unwrap();
        let found = set.installed_match(&atom).unwrap().unwrap();
        assert!(found.is_installed());
        assert_eq!(set.package(&found).unwrap().unwrap().name, "zlib");
        assert!(set.atom_match(&atom).unwrap().is_none());
        assert!(set.get("nowhere").is_none());
    }

    #[test]
    fn test_single_repository_atom_match_picks_newest() {
        let repo = repo_with(
            "main",
            &[
                ("dev-lang", "python", "3.10.12"),
                ("dev-lang", "python", "3.11.4"),
                ("dev-lang", "python", "3.9.18"),
            ],
        );

        let atom = Atom::parse("dev-lang/python").unwrap();
        let best = repo.atom_match(&atom).unwrap().unwrap();
        assert_eq!(repo.retrieve_version(best).unwrap().unwrap().version, "3.11.4");
        assert_eq!(repo.atom_match_all(&atom).unwrap().len(), 3);
    }
}
