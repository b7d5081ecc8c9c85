// src/resolver/install.rs

//! Install queue builder
//!
//! Walks forward dependencies from the requested packages with an explicit
//! stack, adding one `package -> dependencies` arc per visited package.
//! Post-dependencies are added the other way round (`post -> package`) so
//! they land after the package that wants them.

use super::conflict::Conflict;
use super::plan::{InstallOptions, InstallQueue, QueueStatus};
use super::{Resolver, fresh};
use crate::atom::{Atom, DependencySpec};
use crate::db::models::PackageEntry;
use crate::error::{Error, Result};
use crate::graph::{Graph, Lifo};
use crate::repository::{DependencyType, PackageMatch};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

pub(super) struct InstallTree<'r, 'a> {
    resolver: &'r Resolver<'a>,
    options: &'r InstallOptions,
    graph: Graph<PackageMatch>,
    visited: BTreeSet<PackageMatch>,
    /// Pulled-in packages that do not exist in their repository
    not_found: BTreeSet<String>,
    /// Dependency strings nothing satisfies
    missing: BTreeSet<String>,
    /// `(package, blocked atom)` pairs
    blockers: Vec<(PackageMatch, String)>,
}

impl<'r, 'a> InstallTree<'r, 'a> {
    pub(super) fn new(resolver: &'r Resolver<'a>, options: &'r InstallOptions) -> Self {
        Self {
            resolver,
            options,
            graph: Graph::new(),
            visited: BTreeSet::new(),
            not_found: BTreeSet::new(),
            missing: BTreeSet::new(),
            blockers: Vec::new(),
        }
    }

    pub(super) fn resolve(mut self, requested: &[PackageMatch]) -> Result<InstallQueue> {
        let mut unknown = Vec::new();
        for pkg_match in requested {
            if !self.exists(pkg_match)? {
                unknown.push(pkg_match.to_string());
            }
        }
        if !unknown.is_empty() {
            return Err(Error::PackageNotFound(unknown));
        }

        for pkg_match in requested {
            self.expand(pkg_match)?;
        }

        if !self.not_found.is_empty() {
            return Err(Error::DependenciesNotFound(self.not_found));
        }

        let closure = self.closure_entries()?;
        let (removal, mut conflicts) = self.check_blockers(&closure)?;
        conflicts.extend(slot_collisions(&closure));

        if !conflicts.is_empty() {
            warn!("Install set has {} conflict(s)", conflicts.len());
            return Ok(InstallQueue {
                install: Vec::new(),
                removal: Vec::new(),
                conflicts,
                missing: self.missing,
                status: QueueStatus::Conflict,
            });
        }

        let install: Vec<PackageMatch> = self.graph.solve()?.into_values().flatten().collect();
        debug!("Install queue holds {} package(s)", install.len());

        Ok(InstallQueue {
            install,
            removal: removal.into_iter().collect(),
            conflicts,
            missing: self.missing,
            status: QueueStatus::Done,
        })
    }

    fn exists(&self, pkg_match: &PackageMatch) -> Result<bool> {
        match self.resolver.repositories().get(&pkg_match.repository_id) {
            Some(repo) => Ok(repo.retrieve_package(pkg_match.package_id)?.is_some()),
            None => Ok(false),
        }
    }

    fn excluded_types(&self) -> Vec<DependencyType> {
        let mut exclude = vec![DependencyType::Post];
        if !self.options.build {
            exclude.push(DependencyType::Build);
        }
        exclude
    }

    fn expand(&mut self, root: &PackageMatch) -> Result<()> {
        let exclude = self.excluded_types();
        let mut stack = Lifo::new();
        stack.push(root.clone());

        while let Some(pkg_match) = stack.pop() {
            if !self.visited.insert(pkg_match.clone()) {
                continue;
            }

            let Some(repo) = self.resolver.repositories().get(&pkg_match.repository_id) else {
                self.not_found.insert(unknown_token(&pkg_match));
                continue;
            };
            if repo.retrieve_package(pkg_match.package_id)?.is_none() {
                self.not_found.insert(unknown_token(&pkg_match));
                continue;
            }

            let dependencies = fresh(repo, || {
                repo.retrieve_dependencies(pkg_match.package_id, &exclude)
            })?;
            let mut dep_matches = Vec::new();
            for dependency in &dependencies {
                let Some(dep_match) = self.select(&pkg_match, dependency)? else {
                    continue;
                };
                if dep_matches.contains(&dep_match) {
                    continue;
                }
                if self.options.recursive {
                    stack.push(dep_match.clone());
                }
                dep_matches.push(dep_match);
            }

            for blocked in repo.retrieve_conflicts(pkg_match.package_id)? {
                self.blockers.push((pkg_match.clone(), blocked));
            }

            let post_dependencies =
                fresh(repo, || repo.retrieve_post_dependencies(pkg_match.package_id))?;
            let mut post_matches = Vec::new();
            for dependency in &post_dependencies {
                if let Some(post_match) = self.select(&pkg_match, dependency)?
                    && !self.visited.contains(&post_match)
                {
                    post_matches.push(post_match);
                }
            }

            self.graph.add(pkg_match.clone(), dep_matches);
            for post_match in post_matches {
                self.graph.add(post_match.clone(), [pkg_match.clone()]);
                if self.options.recursive {
                    stack.push(post_match);
                }
            }
        }

        Ok(())
    }

    /// Pick the package that should satisfy `dependency`, if one must be pulled in
    fn select(&mut self, pkg_match: &PackageMatch, dependency: &str) -> Result<Option<PackageMatch>> {
        let spec = match DependencySpec::parse(dependency) {
            Ok(spec) => spec,
            Err(e) => {
                warn!("Unparsable dependency {} of {}: {}", dependency, pkg_match, e);
                self.missing.insert(dependency.to_string());
                return Ok(None);
            }
        };

        let atom = match &spec {
            DependencySpec::Blocker(atom) => {
                self.blockers.push((pkg_match.clone(), atom.to_string()));
                return Ok(None);
            }
            DependencySpec::Atom(atom) => atom,
            DependencySpec::AnyOf(alternatives) => match self.pick_alternative(alternatives)? {
                Some(atom) => atom,
                None => {
                    warn!("No alternative of {} for {} is available", dependency, pkg_match);
                    self.missing.insert(dependency.to_string());
                    return Ok(None);
                }
            },
        };

        let repositories = self.resolver.repositories();
        let installed = repositories.installed_match(atom)?;
        let available = repositories.atom_match(atom)?;

        match (installed, available) {
            (Some(installed), Some(available)) if !self.options.empty => {
                if self.options.deep && self.is_newer(&available, &installed)? {
                    debug!("Pulling in newer {} for {}", available, dependency);
                    Ok(Some(available))
                } else {
                    Ok(None)
                }
            }
            (_, Some(available)) => Ok(Some(available)),
            (Some(_), None) => Ok(None),
            (None, None) => {
                warn!("Dependency {} of {} not found", dependency, pkg_match);
                self.missing.insert(dependency.to_string());
                Ok(None)
            }
        }
    }

    /// First installed alternative, else the first one available
    fn pick_alternative<'s>(&self, alternatives: &'s [Atom]) -> Result<Option<&'s Atom>> {
        let repositories = self.resolver.repositories();

        if !self.options.empty {
            for atom in alternatives {
                if repositories.installed_match(atom)?.is_some() {
                    return Ok(Some(atom));
                }
            }
        }
        for atom in alternatives {
            if repositories.atom_match(atom)?.is_some() {
                return Ok(Some(atom));
            }
        }
        Ok(None)
    }

    fn is_newer(&self, candidate: &PackageMatch, current: &PackageMatch) -> Result<bool> {
        let candidate = self.resolver.repository(&candidate.repository_id)?.retrieve_version(candidate.package_id)?;
        let current = self.resolver.repository(&current.repository_id)?.retrieve_version(current.package_id)?;
        Ok(match (candidate, current) {
            (Some(candidate), Some(current)) => candidate > current,
            _ => false,
        })
    }

    fn closure_entries(&self) -> Result<BTreeMap<PackageMatch, PackageEntry>> {
        let mut entries = BTreeMap::new();
        for pkg_match in self.graph.raw() {
            if let Some(entry) = self.resolver.repositories().package(&pkg_match)? {
                entries.insert(pkg_match, entry);
            }
        }
        Ok(entries)
    }

    /// Split blockers into installed packages to remove and hard conflicts
    fn check_blockers(
        &self,
        closure: &BTreeMap<PackageMatch, PackageEntry>,
    ) -> Result<(BTreeSet<i64>, Vec<Conflict>)> {
        let installed = self.resolver.repositories().installed();
        let replaced: BTreeSet<(String, String)> =
            closure.values().map(PackageEntry::key_slot).collect();

        let mut removal = BTreeSet::new();
        let mut conflicts = Vec::new();

        for (pkg_match, blocker) in &self.blockers {
            let atom = match Atom::parse(blocker) {
                Ok(atom) => atom,
                Err(e) => {
                    warn!("Ignoring unparsable blocker {} of {}: {}", blocker, pkg_match, e);
                    continue;
                }
            };

            for (other, entry) in closure {
                if other == pkg_match {
                    continue;
                }
                if atom.matches(&entry.key(), &entry.package_version()?, &entry.slot) {
                    conflicts.push(Conflict::Blocked {
                        package: pkg_match.clone(),
                        blocker: blocker.clone(),
                        blocked: other.clone(),
                    });
                }
            }

            for package_id in installed.atom_match_all(&atom)? {
                let Some(entry) = installed.retrieve_package(package_id)? else {
                    continue;
                };
                if replaced.contains(&entry.key_slot()) {
                    continue;
                }
                debug!("{} blocks installed {}, scheduling removal", pkg_match, entry.atom());
                removal.insert(package_id);
            }
        }

        Ok((removal, conflicts))
    }
}

/// Different packages sharing a key and slot inside the closure
fn slot_collisions(closure: &BTreeMap<PackageMatch, PackageEntry>) -> Vec<Conflict> {
    let mut by_key_slot: BTreeMap<(String, String), Vec<PackageMatch>> = BTreeMap::new();
    for (pkg_match, entry) in closure {
        by_key_slot
            .entry(entry.key_slot())
            .or_default()
            .push(pkg_match.clone());
    }

    by_key_slot
        .into_iter()
        .filter(|(_, packages)| packages.len() > 1)
        .map(|((key, slot), packages)| Conflict::SlotCollision { key, slot, packages })
        .collect()
}

fn unknown_token(pkg_match: &PackageMatch) -> String {
    format!("unknown_{}_{}", pkg_match.package_id, pkg_match.repository_id)
}
