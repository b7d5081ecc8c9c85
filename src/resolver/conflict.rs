// src/resolver/conflict.rs

//! Hard conflicts detected while building an install queue

use crate::repository::PackageMatch;

/// A conflict that prevents ordering an install set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conflict {
    /// A package in the closure blocks another package in the closure
    Blocked {
        package: PackageMatch,
        blocker: String,
        blocked: PackageMatch,
    },
    /// Different packages sharing one key and slot were pulled in together
    SlotCollision {
        key: String,
        slot: String,
        packages: Vec<PackageMatch>,
    },
}

impl Conflict {
    /// Packages involved in this conflict
    pub fn packages(&self) -> Vec<&PackageMatch> {
        match self {
            Conflict::Blocked {
                package, blocked, ..
            } => vec![package, blocked],
            Conflict::SlotCollision { packages, .. } => packages.iter().collect(),
        }
    }
}

impl std::fmt::Display for Conflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Conflict::Blocked {
                package,
                blocker,
                blocked,
            } => write!(f, "Package {package} blocks {blocker}, pulled in as {blocked}"),
            Conflict::SlotCollision {
                key,
                slot,
                packages,
            } => {
                let packages: Vec<String> = packages.iter().map(ToString::to_string).collect();
                write!(
                    f,
                    "Packages {} collide on {}:{}",
                    packages.join(", "),
                    key,
                    slot
                )
            }
        }
    }
}
