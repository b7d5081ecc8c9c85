// src/resolver/removal.rs

//! Removal queue builder
//!
//! Expands reverse dependencies of the requested packages. Every dependent
//! `D` of a package `P` is recorded as `graph.add(D, [P])`, so solving the
//! graph and reading the levels top down yields dependents first.

use super::{NotRemovable, Resolver, SystemMask, fresh};
use super::plan::RemovalOptions;
use crate::atom::DependencySpec;
use crate::error::{Error, Result};
use crate::graph::{Graph, Lifo};
use crate::repository::{DependencyType, PackageMatch, Repository};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

/// Dependency types that never make a package a reverse dependency
const EXCLUDED_TYPES: [DependencyType; 2] = [DependencyType::Post, DependencyType::Build];

pub(super) struct ReverseTree<'r, 'a> {
    resolver: &'r Resolver<'a>,
    options: &'r RemovalOptions,
    mask: SystemMask,
    graph: Graph<PackageMatch>,
    removal: BTreeSet<PackageMatch>,
    not_removable: Vec<NotRemovable>,
    /// Packages pulled in by the orphan pass or by folding dependencies
    orphans: BTreeSet<PackageMatch>,
    /// Removal candidates whose dependencies were already checked for orphans
    orphan_scanned: BTreeSet<PackageMatch>,
    /// `(repository, soname, elfclass)` to the packages providing it
    providers: HashMap<(String, String, i32), Vec<i64>>,
}

impl<'r, 'a> ReverseTree<'r, 'a> {
    pub(super) fn new(resolver: &'r Resolver<'a>, options: &'r RemovalOptions) -> Result<Self> {
        Ok(Self {
            resolver,
            options,
            mask: resolver.system_mask()?,
            graph: Graph::new(),
            removal: BTreeSet::new(),
            not_removable: Vec::new(),
            orphans: BTreeSet::new(),
            orphan_scanned: BTreeSet::new(),
            providers: HashMap::new(),
        })
    }

    pub(super) fn resolve(mut self, requested: &[PackageMatch]) -> Result<Vec<PackageMatch>> {
        let mut not_found = Vec::new();
        for pkg_match in requested {
            let repo = self.resolver.repository(&pkg_match.repository_id)?;
            if repo.retrieve_package(pkg_match.package_id)?.is_none() {
                not_found.push(pkg_match.to_string());
            }
        }
        if !not_found.is_empty() {
            return Err(Error::PackageNotFound(not_found));
        }

        let mut stack = Lifo::new();
        for pkg_match in requested.iter().rev() {
            stack.push(pkg_match.clone());
        }
        let mut fold_dependencies = self.options.deep && self.options.empty;

        loop {
            while let Some(pkg_match) = stack.pop() {
                if !self.removal.insert(pkg_match.clone()) {
                    continue;
                }
                self.graph.add(pkg_match.clone(), []);

                if self.options.system_check
                    && let Some(reason) = self.resolver.not_removable_reason(&pkg_match, &self.mask)?
                {
                    let atom = self
                        .resolver
                        .repository(&pkg_match.repository_id)?
                        .retrieve_atom(pkg_match.package_id)?
                        .unwrap_or_else(|| pkg_match.to_string());
                    warn!("{} cannot be removed: {}", atom, reason);
                    self.not_removable.push(NotRemovable {
                        package: pkg_match,
                        atom,
                        reason,
                    });
                    continue;
                }

                if !self.options.recursive
                    && !requested.contains(&pkg_match)
                    && !self.orphans.contains(&pkg_match)
                {
                    continue;
                }

                if fold_dependencies {
                    fold_dependencies = false;
                    for dependency in self.direct_dependencies(&pkg_match)? {
                        if self.resolver.not_removable_reason(&dependency, &self.mask)?.is_none() {
                            self.orphans.insert(dependency.clone());
                            stack.push(dependency);
                        }
                    }
                }

                for dependent in self.reverse_dependencies(&pkg_match)? {
                    self.graph.add(dependent.clone(), [pkg_match.clone()]);
                    stack.push(dependent);
                }
            }

            if !self.options.deep {
                break;
            }
            let orphans = self.find_orphans()?;
            if orphans.is_empty() {
                break;
            }
            for orphan in orphans {
                self.orphans.insert(orphan.clone());
                stack.push(orphan);
            }
        }

        if !self.not_removable.is_empty() {
            return Err(Error::DependenciesNotRemovable(self.not_removable));
        }

        let queue: Vec<PackageMatch> = self.graph.solve()?.into_values().rev().flatten().collect();
        debug!("Removal queue holds {} package(s)", queue.len());
        Ok(queue)
    }

    /// Packages that stop working once `pkg_match` is gone
    fn reverse_dependencies(&mut self, pkg_match: &PackageMatch) -> Result<Vec<PackageMatch>> {
        let repo = self.resolver.repository(&pkg_match.repository_id)?;
        let reverse = fresh(repo, || {
            repo.retrieve_reverse_dependencies(pkg_match.package_id, &EXCLUDED_TYPES)
        })?;

        let mut dependents = Vec::new();
        for (package_id, dependency) in reverse {
            let dependent = PackageMatch::new(package_id, pkg_match.repository_id.clone());
            if dependent == *pkg_match || dependents.contains(&dependent) {
                continue;
            }
            if self.still_satisfied(repo, pkg_match, &dependency)? {
                debug!("{} keeps {} satisfied without {}", dependent, dependency, pkg_match);
                continue;
            }
            dependents.push(dependent);
        }

        if self.options.elf_needed_scanning {
            for dependent in self.library_dependents(repo, pkg_match)? {
                if !dependents.contains(&dependent) {
                    dependents.push(dependent);
                }
            }
        }

        Ok(dependents)
    }

    /// Whether `dependency` still matches a package outside the removal set
    fn still_satisfied(
        &self,
        repo: &dyn Repository,
        pkg_match: &PackageMatch,
        dependency: &str,
    ) -> Result<bool> {
        let spec = match DependencySpec::parse(dependency) {
            Ok(spec) => spec,
            Err(e) => {
                warn!("Unparsable reverse dependency {}: {}", dependency, e);
                return Ok(false);
            }
        };
        if spec.is_blocker() {
            return Ok(true);
        }

        for atom in spec.alternatives() {
            for package_id in repo.atom_match_all(atom)? {
                if package_id == pkg_match.package_id {
                    continue;
                }
                let other = PackageMatch::new(package_id, pkg_match.repository_id.clone());
                if !self.removal.contains(&other) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Packages linking against libraries only `pkg_match` provides
    fn library_dependents(
        &mut self,
        repo: &dyn Repository,
        pkg_match: &PackageMatch,
    ) -> Result<Vec<PackageMatch>> {
        let Some(package) = repo.retrieve_package(pkg_match.package_id)? else {
            return Ok(Vec::new());
        };
        let key_slot = package.key_slot();

        let mut dependents = Vec::new();
        for (soname, elfclass) in repo.retrieve_provided_libraries(pkg_match.package_id)? {
            let cache_key = (pkg_match.repository_id.clone(), soname.clone(), elfclass);
            if !self.providers.contains_key(&cache_key) {
                let providers = repo.resolve_needed(&soname, elfclass)?;
                self.providers.insert(cache_key.clone(), providers);
            }

            let still_provided = self.providers[&cache_key].iter().any(|&package_id| {
                package_id != pkg_match.package_id
                    && !self
                        .removal
                        .contains(&PackageMatch::new(package_id, pkg_match.repository_id.clone()))
            });
            if still_provided {
                continue;
            }

            for package_id in repo.search_needed(&soname, elfclass)? {
                if package_id == pkg_match.package_id {
                    continue;
                }
                if repo.retrieve_key_slot(package_id)?.as_ref() == Some(&key_slot) {
                    continue;
                }
                let dependent = PackageMatch::new(package_id, pkg_match.repository_id.clone());
                if !dependents.contains(&dependent) {
                    debug!("{} needs {} (class {}) from {}", dependent, soname, elfclass, pkg_match);
                    dependents.push(dependent);
                }
            }
        }

        Ok(dependents)
    }

    /// Packages matched by the direct dependencies of `pkg_match`
    fn direct_dependencies(&self, pkg_match: &PackageMatch) -> Result<Vec<PackageMatch>> {
        let repo = self.resolver.repository(&pkg_match.repository_id)?;
        let installed =
            pkg_match.repository_id == self.resolver.repositories().installed().repository_id();
        let dependencies = fresh(repo, || {
            repo.retrieve_dependencies(pkg_match.package_id, &EXCLUDED_TYPES)
        })?;

        let mut matches = Vec::new();
        for dependency in dependencies {
            let spec = match DependencySpec::parse(&dependency) {
                Ok(spec) if !spec.is_blocker() => spec,
                Ok(_) => continue,
                Err(e) => {
                    warn!("Unparsable dependency {} of {}: {}", dependency, pkg_match, e);
                    continue;
                }
            };

            for atom in spec.alternatives() {
                let found = if installed {
                    repo.atom_match(atom)?
                        .map(|package_id| PackageMatch::new(package_id, pkg_match.repository_id.clone()))
                } else {
                    self.resolver.repositories().atom_match(atom)?
                };
                if let Some(found) = found
                    && found != *pkg_match
                    && !matches.contains(&found)
                {
                    matches.push(found);
                }
            }
        }
        Ok(matches)
    }

    /// Dependencies of the removal set that nothing outside it still needs
    fn find_orphans(&mut self) -> Result<Vec<PackageMatch>> {
        let pending: Vec<PackageMatch> = self
            .removal
            .difference(&self.orphan_scanned)
            .cloned()
            .collect();

        let mut orphans = Vec::new();
        for pkg_match in pending {
            self.orphan_scanned.insert(pkg_match.clone());
            if self.not_removable.iter().any(|entry| entry.package == pkg_match) {
                continue;
            }

            for candidate in self.direct_dependencies(&pkg_match)? {
                if self.removal.contains(&candidate) || orphans.contains(&candidate) {
                    continue;
                }
                if self.resolver.not_removable_reason(&candidate, &self.mask)?.is_some() {
                    continue;
                }

                if self.is_orphan(&candidate)? {
                    debug!("{} is orphaned by the removal set", candidate);
                    orphans.push(candidate);
                }
            }
        }
        Ok(orphans)
    }

    /// Whether every package naming or linking `candidate` is already being removed
    ///
    /// Uses unfiltered reverse dependencies. Two candidates that each keep an
    /// outside or-dependency satisfied must both stay.
    fn is_orphan(&self, candidate: &PackageMatch) -> Result<bool> {
        let repo = self.resolver.repository(&candidate.repository_id)?;
        let outside = |package_id: i64| {
            package_id != candidate.package_id
                && !self
                    .removal
                    .contains(&PackageMatch::new(package_id, candidate.repository_id.clone()))
        };

        let reverse = fresh(repo, || {
            repo.retrieve_reverse_dependencies(candidate.package_id, &EXCLUDED_TYPES)
        })?;
        for (package_id, dependency) in reverse {
            let blocker = DependencySpec::parse(&dependency).is_ok_and(|spec| spec.is_blocker());
            if !blocker && outside(package_id) {
                return Ok(false);
            }
        }

        if self.options.elf_needed_scanning {
            for (soname, elfclass) in repo.retrieve_provided_libraries(candidate.package_id)? {
                if repo.search_needed(&soname, elfclass)?.into_iter().any(|id| outside(id)) {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{LibraryKind, PackageEntry};
    use crate::repository::{INSTALLED_REPOSITORY_ID, RepositorySet, SqliteRepository};

    struct Installed {
        repo: SqliteRepository,
    }

    impl Installed {
        fn new() -> Self {
            Self {
                repo: SqliteRepository::in_memory(INSTALLED_REPOSITORY_ID).unwrap(),
            }
        }

        fn add(&mut self, atom: &str, deps: &[&str]) -> i64 {
            self.add_full(atom, deps, &[], false)
        }

        fn add_full(
            &mut self,
            atom: &str,
            deps: &[&str],
            libraries: &[(&str, i32, LibraryKind)],
            system: bool,
        ) -> i64 {
            let (key, version) = atom.rsplit_once('-').unwrap();
            let (category, name) = key.split_once('/').unwrap();
            let mut entry = PackageEntry::new(category.into(), name.into(), version.into());
            entry.is_system = system;
            let deps: Vec<(&str, DependencyType)> =
                deps.iter().map(|dep| (*dep, DependencyType::Runtime)).collect();
            self.repo.add_package(entry, &deps, libraries).unwrap()
        }

        fn into_set(self) -> RepositorySet {
            RepositorySet::new(Box::new(self.repo))
        }
    }

    fn remove(set: &RepositorySet, ids: &[i64], options: &RemovalOptions) -> Result<Vec<i64>> {
        Resolver::new(set).resolve_removal(ids, options)
    }

    fn position(queue: &[i64], id: i64) -> usize {
        queue.iter().position(|&queued| queued == id).unwrap()
    }

    #[test]
    fn test_dependents_removed_first() {
        let mut installed = Installed::new();
        let lib = installed.add("dev-libs/lib-1.0", &[]);
        let app = installed.add("app-misc/app-1.0", &["dev-libs/lib"]);
        let tool = installed.add("app-misc/tool-1.0", &["app-misc/app"]);
        let set = installed.into_set();

        let queue = remove(&set, &[lib], &RemovalOptions::default()).unwrap();
        assert_eq!(queue, vec![tool, app, lib]);
    }

    #[test]
    fn test_system_package_aborts_whole_removal() {
        let mut installed = Installed::new();
        let zlib = installed.add("sys-libs/zlib-1.3", &[]);
        let app = installed.add("app-misc/app-1.0", &["sys-libs/zlib"]);
        let core = installed.add_full("sys-apps/core-1.0", &["app-misc/app"], &[], true);
        let set = installed.into_set();

        let err = remove(&set, &[zlib], &RemovalOptions::default()).unwrap_err();
        match err {
            Error::DependenciesNotRemovable(entries) => {
                assert_eq!(entries.len(), 1);
                assert_eq!(entries[0].package.package_id, app);
                assert_eq!(entries[0].atom, "app-misc/app-1.0");
                assert!(entries[0].reason.contains("sys-apps/core"));
            }
            other => panic!("unexpected error: {other}"),
        }

        let unchecked = RemovalOptions {
            system_check: false,
            ..Default::default()
        };
        let queue = remove(&set, &[zlib], &unchecked).unwrap();
        assert_eq!(queue, vec![core, app, zlib]);
    }

    #[test]
    fn test_non_recursive_takes_direct_dependents_only() {
        let mut installed = Installed::new();
        let lib = installed.add("dev-libs/lib-1.0", &[]);
        let app = installed.add("app-misc/app-1.0", &["dev-libs/lib"]);
        installed.add("app-misc/tool-1.0", &["app-misc/app"]);
        let set = installed.into_set();

        let options = RemovalOptions {
            recursive: false,
            ..Default::default()
        };
        let queue = remove(&set, &[lib], &options).unwrap();
        assert_eq!(queue, vec![app, lib]);
    }

    #[test]
    fn test_deep_removes_orphans_after_dependents() {
        let mut installed = Installed::new();
        let base = installed.add("sys-libs/base-1.0", &[]);
        let lib = installed.add("dev-libs/lib-1.0", &["sys-libs/base"]);
        let app = installed.add("app-misc/app-1.0", &["dev-libs/lib"]);
        installed.add("app-misc/other-1.0", &["sys-libs/base"]);
        let set = installed.into_set();

        let queue = remove(&set, &[app], &RemovalOptions::default()).unwrap();
        assert_eq!(queue, vec![app]);

        let deep = RemovalOptions {
            deep: true,
            ..Default::default()
        };
        let queue = remove(&set, &[app], &deep).unwrap();
        assert_eq!(queue, vec![app, lib]);
        assert!(!queue.contains(&base));
    }

    #[test]
    fn test_deep_keeps_shared_or_dependency_providers() {
        let mut installed = Installed::new();
        let openjdk = installed.add("dev-java/openjdk-17.0.9", &[]);
        let icedtea = installed.add("dev-java/icedtea-3.22", &[]);
        let javauser = installed.add("app-misc/javauser-1.0", &["dev-java/openjdk;dev-java/icedtea?"]);
        let both = installed.add("app-misc/both-1.0", &["dev-java/openjdk", "dev-java/icedtea"]);
        let set = installed.into_set();

        let deep = RemovalOptions {
            deep: true,
            ..Default::default()
        };
        let queue = remove(&set, &[both], &deep).unwrap();
        assert_eq!(queue, vec![both]);
        assert!(!queue.contains(&javauser));
        assert!(!queue.contains(&openjdk));
        assert!(!queue.contains(&icedtea));
    }

    #[test]
    fn test_deep_keeps_library_provider_with_outside_consumer() {
        let mut installed = Installed::new();
        installed.add_full(
            "dev-libs/libfoo-1.0",
            &[],
            &[("libfoo.so.1", 2, LibraryKind::Provided)],
            false,
        );
        installed.add_full(
            "app-misc/linker-1.0",
            &[],
            &[("libfoo.so.1", 2, LibraryKind::Needed)],
            false,
        );
        let app = installed.add("app-misc/app-1.0", &["dev-libs/libfoo"]);
        let set = installed.into_set();

        let deep = RemovalOptions {
            deep: true,
            ..Default::default()
        };
        assert_eq!(remove(&set, &[app], &deep).unwrap(), vec![app]);
    }

    #[test]
    fn test_deep_skips_system_orphans() {
        let mut installed = Installed::new();
        installed.add_full("sys-libs/glibc-2.38", &[], &[], true);
        let app = installed.add("app-misc/app-1.0", &["sys-libs/glibc"]);
        let set = installed.into_set();

        let deep = RemovalOptions {
            deep: true,
            ..Default::default()
        };
        assert_eq!(remove(&set, &[app], &deep).unwrap(), vec![app]);
    }

    #[test]
    fn test_deep_empty_folds_dependencies() {
        let mut installed = Installed::new();
        let jdk = installed.add("dev-java/openjdk-17.0.9", &[]);
        let virtual_jdk = installed.add("virtual/jdk-17", &["dev-java/openjdk"]);
        let app = installed.add("app-misc/javaapp-1.0", &["dev-java/openjdk"]);
        let set = installed.into_set();

        let deep = RemovalOptions {
            deep: true,
            ..Default::default()
        };
        assert_eq!(remove(&set, &[virtual_jdk], &deep).unwrap(), vec![virtual_jdk]);

        let empty = RemovalOptions {
            deep: true,
            empty: true,
            ..Default::default()
        };
        let queue = remove(&set, &[virtual_jdk], &empty).unwrap();
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.last(), Some(&jdk));
        assert!(position(&queue, app) < position(&queue, jdk));
        assert!(position(&queue, virtual_jdk) < position(&queue, jdk));
    }

    #[test]
    fn test_or_dependency_alternative_keeps_dependent() {
        let mut installed = Installed::new();
        let openjdk = installed.add("dev-java/openjdk-17.0.9", &[]);
        let icedtea = installed.add("dev-java/icedtea-3.22", &[]);
        let app = installed.add("app-misc/javaapp-1.0", &["dev-java/openjdk;dev-java/icedtea?"]);
        let set = installed.into_set();

        let queue = remove(&set, &[openjdk], &RemovalOptions::default()).unwrap();
        assert_eq!(queue, vec![openjdk]);

        let queue = remove(&set, &[openjdk, icedtea], &RemovalOptions::default()).unwrap();
        assert_eq!(queue.len(), 3);
        assert!(position(&queue, app) < position(&queue, icedtea));
    }

    #[test]
    fn test_elf_needed_scanning() {
        let mut installed = Installed::new();
        let libfoo = installed.add_full(
            "dev-libs/libfoo-1.0",
            &[],
            &[("libfoo.so.1", 2, LibraryKind::Provided)],
            false,
        );
        let app = installed.add_full(
            "app-misc/app-1.0",
            &[],
            &[("libfoo.so.1", 2, LibraryKind::Needed)],
            false,
        );
        installed.add_full(
            "app-misc/app32-1.0",
            &[],
            &[("libfoo.so.1", 1, LibraryKind::Needed)],
            false,
        );
        let set = installed.into_set();

        let queue = remove(&set, &[libfoo], &RemovalOptions::default()).unwrap();
        assert_eq!(queue, vec![app, libfoo]);

        let no_scan = RemovalOptions {
            elf_needed_scanning: false,
            ..Default::default()
        };
        assert_eq!(remove(&set, &[libfoo], &no_scan).unwrap(), vec![libfoo]);
    }

    #[test]
    fn test_elf_library_with_other_provider() {
        let mut installed = Installed::new();
        let libfoo = installed.add_full(
            "dev-libs/libfoo-1.0",
            &[],
            &[("libfoo.so.1", 2, LibraryKind::Provided)],
            false,
        );
        installed.add_full(
            "dev-libs/libfoo-compat-1.0",
            &[],
            &[("libfoo.so.1", 2, LibraryKind::Provided)],
            false,
        );
        installed.add_full(
            "app-misc/app-1.0",
            &[],
            &[("libfoo.so.1", 2, LibraryKind::Needed)],
            false,
        );
        let set = installed.into_set();

        assert_eq!(
            remove(&set, &[libfoo], &RemovalOptions::default()).unwrap(),
            vec![libfoo]
        );
    }

    #[test]
    fn test_unknown_package() {
        let set = Installed::new().into_set();
        let err = remove(&set, &[7], &RemovalOptions::default()).unwrap_err();
        assert!(matches!(err, Error::PackageNotFound(ref ids) if ids[0] == "7@__system__"));
    }
}
