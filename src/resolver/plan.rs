// src/resolver/plan.rs

//! Resolution options and result types

use super::conflict::Conflict;
use crate::repository::PackageMatch;
use std::collections::BTreeSet;

/// Outcome of an install resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStatus {
    /// The install list is complete and ordered
    Done,
    /// Hard conflicts prevent any install order
    Conflict,
}

impl QueueStatus {
    /// Numeric status code: `0` done, `-3` conflict
    pub fn code(&self) -> i32 {
        match self {
            QueueStatus::Done => 0,
            QueueStatus::Conflict => -3,
        }
    }
}

/// Knobs for [`super::Resolver::resolve_install`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOptions {
    /// Expand dependencies of dependencies until fixpoint
    pub recursive: bool,
    /// Treat the installed packages repository as empty
    pub empty: bool,
    /// Pull in satisfied dependencies that have a newer version available
    pub deep: bool,
    /// Include build-time dependencies
    pub build: bool,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            empty: false,
            deep: false,
            build: false,
        }
    }
}

/// Knobs for [`super::Resolver::resolve_removal`] and [`super::Resolver::resolve_reverse`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovalOptions {
    /// Also remove dependencies left without any remaining dependent
    pub deep: bool,
    /// With `deep`, fold the first package's dependencies into the removal set
    pub empty: bool,
    /// Expand reverse dependencies of reverse dependencies until fixpoint
    pub recursive: bool,
    /// Refuse to remove system packages
    pub system_check: bool,
    /// Treat packages linking against removed libraries as reverse dependencies
    pub elf_needed_scanning: bool,
}

impl Default for RemovalOptions {
    fn default() -> Self {
        Self {
            deep: false,
            empty: false,
            recursive: true,
            system_check: true,
            elf_needed_scanning: true,
        }
    }
}

/// Result of an install resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallQueue {
    /// Packages to install, dependencies first; empty on conflict
    pub install: Vec<PackageMatch>,
    /// Installed package ids blocked by the install set, to be removed
    pub removal: Vec<i64>,
    /// Hard conflicts found in the dependency closure
    pub conflicts: Vec<Conflict>,
    /// Dependency strings that matched nothing and were left out
    pub missing: BTreeSet<String>,
    pub status: QueueStatus,
}

impl InstallQueue {
    pub fn is_done(&self) -> bool {
        self.status == QueueStatus::Done
    }

    /// Every package involved in a conflict, without duplicates
    pub fn conflicting_packages(&self) -> Vec<PackageMatch> {
        let packages: BTreeSet<PackageMatch> = self
            .conflicts
            .iter()
            .flat_map(|conflict| conflict.packages())
            .cloned()
            .collect();
        packages.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(QueueStatus::Done.code(), 0);
        assert_eq!(QueueStatus::Conflict.code(), -3);
    }

    #[test]
    fn test_defaults() {
        let install = InstallOptions::default();
        assert!(install.recursive && !install.empty && !install.deep && !install.build);

        let removal = RemovalOptions::default();
        assert!(removal.recursive && removal.system_check && removal.elf_needed_scanning);
        assert!(!removal.deep && !removal.empty);
    }

    #[test]
    fn test_conflicting_packages_dedup() {
        let a = PackageMatch::new(1, "main");
        let b = PackageMatch::new(2, "main");
        let queue = InstallQueue {
            install: Vec::new(),
            removal: Vec::new(),
            conflicts: vec![
                Conflict::Blocked {
                    package: a.clone(),
                    blocker: "app-misc/b".to_string(),
                    blocked: b.clone(),
                },
                Conflict::SlotCollision {
                    key: "app-misc/a".to_string(),
                    slot: "0".to_string(),
                    packages: vec![a.clone()],
                },
            ],
            missing: BTreeSet::new(),
            status: QueueStatus::Conflict,
        };

        assert!(!queue.is_done());
        assert_eq!(queue.conflicting_packages(), vec![a, b]);
    }
}
