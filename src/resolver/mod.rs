// src/resolver/mod.rs

//! Install and removal queue resolution
//!
//! The resolver expands requested packages into a dependency graph by
//! querying a [`RepositorySet`], solves it with [`crate::graph::Graph`] and
//! flattens the levels into an ordered queue:
//!
//! - install queues list dependencies before their dependents
//! - removal queues list dependents before the packages they depend on
//!
//! The Installed Packages Repository is held in shared mode for the whole
//! expansion and solve.

pub mod conflict;
mod install;
pub mod plan;
mod removal;

pub use conflict::Conflict;
pub use plan::{InstallOptions, InstallQueue, QueueStatus, RemovalOptions};

use crate::atom::Atom;
use crate::error::{Error, Result};
use crate::repository::{Lookup, PackageMatch, Repository, RepositorySet};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// A package that may not be removed, and why
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotRemovable {
    pub package: PackageMatch,
    pub atom: String,
    pub reason: String,
}

/// Installed packages selected by the system mask
#[derive(Debug, Clone, Default)]
pub(crate) struct SystemMask {
    ids: BTreeSet<i64>,
    /// Package key to the masked ids carrying it
    keys: BTreeMap<String, BTreeSet<i64>>,
}

impl SystemMask {
    pub(crate) fn contains(&self, package_id: i64) -> bool {
        self.ids.contains(&package_id)
    }
}

/// Resolves install and removal queues against a set of repositories
#[derive(Debug)]
pub struct Resolver<'a> {
    repositories: &'a RepositorySet,
    system_mask: Vec<Atom>,
}

impl<'a> Resolver<'a> {
    pub fn new(repositories: &'a RepositorySet) -> Self {
        Self {
            repositories,
            system_mask: Vec::new(),
        }
    }

    /// Protect installed packages matching `atoms` from removal
    pub fn with_system_mask(mut self, atoms: Vec<Atom>) -> Self {
        self.system_mask = atoms;
        self
    }

    pub fn repositories(&self) -> &'a RepositorySet {
        self.repositories
    }

    /// Match atom strings against available repositories
    ///
    /// Fails with [`Error::PackageNotFound`] listing every atom that matched
    /// nothing.
    pub fn match_packages<S: AsRef<str>>(&self, specs: &[S]) -> Result<Vec<PackageMatch>> {
        let mut matches = Vec::new();
        let mut not_found = Vec::new();

        for spec in specs {
            let spec = spec.as_ref();
            match self.repositories.atom_match(&Atom::parse(spec)?)? {
                Some(pkg_match) => matches.push(pkg_match),
                None => not_found.push(spec.to_string()),
            }
        }

        if !not_found.is_empty() {
            return Err(Error::PackageNotFound(not_found));
        }
        Ok(matches)
    }

    /// Match atom strings against the Installed Packages Repository
    pub fn match_installed<S: AsRef<str>>(&self, specs: &[S]) -> Result<Vec<i64>> {
        let mut ids = Vec::new();
        let mut not_found = Vec::new();

        for spec in specs {
            let spec = spec.as_ref();
            match self.repositories.installed_match(&Atom::parse(spec)?)? {
                Some(pkg_match) => ids.push(pkg_match.package_id),
                None => not_found.push(spec.to_string()),
            }
        }

        if !not_found.is_empty() {
            return Err(Error::PackageNotFound(not_found));
        }
        Ok(ids)
    }

    /// Ordered install queue for `requested`, dependencies first
    pub fn resolve_install(
        &self,
        requested: &[PackageMatch],
        options: &InstallOptions,
    ) -> Result<InstallQueue> {
        let _guard = self.repositories.installed().resource_lock().shared()?;
        debug!("Resolving install of {} package(s)", requested.len());

        install::InstallTree::new(self, options).resolve(requested)
    }

    /// Ordered removal queue of installed package ids, dependents first
    pub fn resolve_removal(&self, requested: &[i64], options: &RemovalOptions) -> Result<Vec<i64>> {
        let installed_id = self.repositories.installed().repository_id().to_string();
        let matches: Vec<PackageMatch> = requested
            .iter()
            .map(|&package_id| PackageMatch::new(package_id, installed_id.clone()))
            .collect();

        Ok(self
            .resolve_reverse(&matches, options)?
            .into_iter()
            .map(|pkg_match| pkg_match.package_id)
            .collect())
    }

    /// Ordered reverse dependency queue over packages from any repository
    pub fn resolve_reverse(
        &self,
        requested: &[PackageMatch],
        options: &RemovalOptions,
    ) -> Result<Vec<PackageMatch>> {
        let _guard = self.repositories.installed().resource_lock().shared()?;
        debug!("Resolving reverse dependencies of {} package(s)", requested.len());

        removal::ReverseTree::new(self, options)?.resolve(requested)
    }

    /// Whether a package may be removed without harming the base system
    pub fn validate_package_removal(&self, pkg_match: &PackageMatch) -> Result<bool> {
        let _guard = self.repositories.installed().resource_lock().shared()?;
        let mask = self.system_mask()?;
        Ok(self.not_removable_reason(pkg_match, &mask)?.is_none())
    }

    pub(crate) fn repository(&self, repository_id: &str) -> Result<&'a dyn Repository> {
        self.repositories
            .get(repository_id)
            .ok_or_else(|| Error::NotFoundError(format!("Repository {repository_id}")))
    }

    /// Resolve the mask atoms against installed packages
    pub(crate) fn system_mask(&self) -> Result<SystemMask> {
        let installed = self.repositories.installed();
        let mut mask = SystemMask::default();

        for atom in &self.system_mask {
            for package_id in installed.atom_match_all(atom)? {
                let Some(package) = installed.retrieve_package(package_id)? else {
                    continue;
                };
                mask.keys.entry(package.key()).or_default().insert(package_id);
                mask.ids.insert(package_id);
            }
        }

        debug!("System mask covers {} installed package(s)", mask.ids.len());
        Ok(mask)
    }

    /// Why a package may not be removed, or `None` if it may
    ///
    /// Masked and system packages stay removable while another installed
    /// package carries the same key, e.g. a second slot.
    pub(crate) fn not_removable_reason(
        &self,
        pkg_match: &PackageMatch,
        mask: &SystemMask,
    ) -> Result<Option<String>> {
        let repo = self.repository(&pkg_match.repository_id)?;
        let Some(package) = repo.retrieve_package(pkg_match.package_id)? else {
            return Ok(None);
        };
        let key = package.key();

        let installed = pkg_match.repository_id == self.repositories.installed().repository_id();
        if installed && mask.contains(pkg_match.package_id) {
            if mask.keys.get(&key).is_some_and(|ids| ids.len() > 1) {
                return Ok(None);
            }
            return Ok(Some("system mask".to_string()));
        }

        let reason = if repo.is_system_package(pkg_match.package_id)? {
            Some("system package".to_string())
        } else {
            let reverse = fresh(repo, || repo.retrieve_reverse_dependencies(pkg_match.package_id, &[]))?;
            let mut reason = None;
            for (dependent, _) in reverse {
                if repo.is_system_package(dependent)? {
                    let atom = repo
                        .retrieve_atom(dependent)?
                        .unwrap_or_else(|| dependent.to_string());
                    reason = Some(format!("required by system package {atom}"));
                    break;
                }
            }
            reason
        };

        let Some(reason) = reason else {
            return Ok(None);
        };

        if repo.atom_match_all(&Atom::parse(&key)?)?.len() > 1 {
            return Ok(None);
        }
        Ok(Some(reason))
    }
}

/// Run a dependency-table query, regenerating a stale index once
pub(crate) fn fresh<T>(
    repo: &dyn Repository,
    mut query: impl FnMut() -> Result<Lookup<T>>,
) -> Result<T> {
    if let Lookup::Fresh(value) = query()? {
        return Ok(value);
    }

    warn!(
        "Dependency index of repository {} is stale, regenerating",
        repo.repository_id()
    );
    repo.regenerate_dependency_index()?;

    match query()? {
        Lookup::Fresh(value) => Ok(value),
        Lookup::Stale => Err(Error::StaleRepository(repo.repository_id().to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::PackageEntry;
    use crate::repository::{DependencyType, INSTALLED_REPOSITORY_ID, SqliteRepository};
    use crate::lock::ResourceLock;

    fn installed_with(
        packages: &[(&str, &str, &str, bool, &[&str])],
    ) -> (SqliteRepository, Vec<i64>) {
        let mut repo = SqliteRepository::in_memory(INSTALLED_REPOSITORY_ID).unwrap();
        let mut ids = Vec::new();
        for (category, name, version, system, deps) in packages {
            let mut entry = PackageEntry::new(category.to_string(), name.to_string(), version.to_string());
            entry.is_system = *system;
            let deps: Vec<(&str, DependencyType)> =
                deps.iter().map(|dep| (*dep, DependencyType::Runtime)).collect();
            ids.push(repo.add_package(entry, &deps, &[]).unwrap());
        }
        (repo, ids)
    }

    /// Repository whose index never becomes fresh
    struct AlwaysStale(SqliteRepository);

    impl Repository for AlwaysStale {
        fn repository_id(&self) -> &str {
            self.0.repository_id()
        }
        fn resource_lock(&self) -> &ResourceLock {
            self.0.resource_lock()
        }
        fn retrieve_package(&self, package_id: i64) -> Result<Option<PackageEntry>> {
            self.0.retrieve_package(package_id)
        }
        fn atom_match_all(&self, atom: &Atom) -> Result<Vec<i64>> {
            self.0.atom_match_all(atom)
        }
        fn retrieve_dependencies(&self, _: i64, _: &[DependencyType]) -> Result<Lookup<Vec<String>>> {
            Ok(Lookup::Stale)
        }
        fn retrieve_reverse_dependencies(
            &self,
            _: i64,
            _: &[DependencyType],
        ) -> Result<Lookup<Vec<(i64, String)>>> {
            Ok(Lookup::Stale)
        }
        fn retrieve_conflicts(&self, package_id: i64) -> Result<Vec<String>> {
            self.0.retrieve_conflicts(package_id)
        }
        fn retrieve_provided_libraries(&self, package_id: i64) -> Result<Vec<(String, i32)>> {
            self.0.retrieve_provided_libraries(package_id)
        }
        fn resolve_needed(&self, soname: &str, elfclass: i32) -> Result<Vec<i64>> {
            self.0.resolve_needed(soname, elfclass)
        }
        fn search_needed(&self, soname: &str, elfclass: i32) -> Result<Vec<i64>> {
            self.0.search_needed(soname, elfclass)
        }
        fn regenerate_dependency_index(&self) -> Result<()> {
            self.0.regenerate_dependency_index()
        }
    }

    #[test]
    fn test_fresh_regenerates_once() {
        let (repo, ids) = installed_with(&[
            ("sys-libs", "zlib", "1.3", false, &[]),
            ("app-misc", "app", "1.0", false, &["sys-libs/zlib"]),
        ]);

        let deps = fresh(&repo, || repo.retrieve_dependencies(ids[1], &[])).unwrap();
        assert_eq!(deps, vec!["sys-libs/zlib".to_string()]);
    }

    #[test]
    fn test_fresh_gives_up_when_still_stale() {
        let (repo, ids) = installed_with(&[("sys-libs", "zlib", "1.3", false, &[])]);
        let stale = AlwaysStale(repo);

        let err = fresh(&stale, || stale.retrieve_dependencies(ids[0], &[])).unwrap_err();
        assert!(matches!(err, Error::StaleRepository(ref id) if id == INSTALLED_REPOSITORY_ID));
    }

    #[test]
    fn test_match_packages_reports_every_missing_atom() {
        let (repo, _) = installed_with(&[]);
        let set = RepositorySet::new(Box::new(repo))
            .with_repository(Box::new(SqliteRepository::in_memory("main").unwrap()));
        let resolver = Resolver::new(&set);

        let err = resolver.match_packages(&["app-misc/foo", "bar"]).unwrap_err();
        match err {
            Error::PackageNotFound(specs) => assert_eq!(specs, vec!["app-misc/foo", "bar"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_system_package_not_removable() {
        let (repo, ids) = installed_with(&[
            ("sys-libs", "glibc", "2.38", true, &[]),
            ("app-misc", "tool", "1.0", false, &[]),
        ]);
        let set = RepositorySet::new(Box::new(repo));
        let resolver = Resolver::new(&set);

        let glibc = PackageMatch::new(ids[0], INSTALLED_REPOSITORY_ID);
        let tool = PackageMatch::new(ids[1], INSTALLED_REPOSITORY_ID);
        assert!(!resolver.validate_package_removal(&glibc).unwrap());
        assert!(resolver.validate_package_removal(&tool).unwrap());
    }

    #[test]
    fn test_dependency_of_system_package_not_removable() {
        let (repo, ids) = installed_with(&[
            ("virtual", "libc", "1", false, &[]),
            ("sys-apps", "baselayout", "2.14", true, &["virtual/libc"]),
        ]);
        let set = RepositorySet::new(Box::new(repo));
        let resolver = Resolver::new(&set);

        let libc = PackageMatch::new(ids[0], INSTALLED_REPOSITORY_ID);
        let mask = resolver.system_mask().unwrap();
        let reason = resolver.not_removable_reason(&libc, &mask).unwrap().unwrap();
        assert!(reason.contains("sys-apps/baselayout"));
    }

    #[test]
    fn test_system_mask_allows_removal_of_extra_slot() {
        let mut repo = SqliteRepository::in_memory(INSTALLED_REPOSITORY_ID).unwrap();
        let mut py310 = PackageEntry::new("dev-lang".into(), "python".into(), "3.10.12".into());
        py310.slot = "3.10".into();
        let py310 = repo.add_package(py310, &[], &[]).unwrap();
        let mut py311 = PackageEntry::new("dev-lang".into(), "python".into(), "3.11.4".into());
        py311.slot = "3.11".into();
        repo.add_package(py311, &[], &[]).unwrap();
        let mut gcc = PackageEntry::new("sys-devel".into(), "gcc".into(), "13.2.1".into());
        gcc.slot = "13".into();
        let gcc = repo.add_package(gcc, &[], &[]).unwrap();

        let set = RepositorySet::new(Box::new(repo));
        let resolver = Resolver::new(&set).with_system_mask(vec![
            Atom::parse("dev-lang/python").unwrap(),
            Atom::parse("sys-devel/gcc").unwrap(),
        ]);

        let python = PackageMatch::new(py310, INSTALLED_REPOSITORY_ID);
        let gcc = PackageMatch::new(gcc, INSTALLED_REPOSITORY_ID);
        assert!(resolver.validate_package_removal(&python).unwrap());
        assert!(!resolver.validate_package_removal(&gcc).unwrap());
    }
}
