// src/atom/version.rs

//! Package version parsing and ordering
//!
//! Versions follow the `version[-rN]` form used by Entropy atoms, for
//! example `1.2.3`, `1.0.2h`, `2.0_rc1-r2`.

use crate::error::{Error, Result};
use semver::Version;
use std::cmp::Ordering;
use std::fmt;

/// A parsed package version with an optional revision
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageVersion {
    pub version: String,
    pub revision: u32,
}

impl PackageVersion {
    /// Parse a version string
    ///
    /// - "1.2.3" → version="1.2.3", revision=0
    /// - "1.2.3-r4" → version="1.2.3", revision=4
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let (version, revision) = match s.rsplit_once("-r") {
            Some((v, r)) if !r.is_empty() && r.chars().all(|c| c.is_ascii_digit()) => {
                let revision = r.parse::<u32>().map_err(|e| {
                    Error::ParseError(format!("Invalid revision in version '{s}': {e}"))
                })?;
                (v, revision)
            }
            _ => (s, 0),
        };

        if version.is_empty() || !version.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(Error::ParseError(format!("Invalid version '{s}'")));
        }

        Ok(Self {
            version: version.to_string(),
            revision,
        })
    }

    /// Compare two versions, revision last
    pub fn compare(&self, other: &PackageVersion) -> Ordering {
        // Strict semver strings compare exactly; everything else goes
        // segment by segment
        let base = match (Version::parse(&self.version), Version::parse(&other.version)) {
            (Ok(v1), Ok(v2)) => v1.cmp(&v2),
            _ => compare_segments(&self.version, &other.version),
        };

        base.then(self.revision.cmp(&other.revision))
    }

    /// Whether both versions are equal ignoring the revision
    pub fn same_base(&self, other: &PackageVersion) -> bool {
        PackageVersion {
            version: self.version.clone(),
            revision: 0,
        }
        .compare(&PackageVersion {
            version: other.version.clone(),
            revision: 0,
        })
            == Ordering::Equal
    }
}

/// Compare dotted/underscored versions one segment at a time
///
/// Each segment is split into a leading number and a trailing suffix. Numbers
/// compare numerically; suffixes lexicographically, where an empty suffix
/// sorts after a non-empty one beginning with `_` (pre-releases like
/// `_rc1`) and before any letter suffix (`1.0.2h`).
fn compare_segments(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');

    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (Some(_), None) => return Ordering::Greater,
            (None, Some(_)) => return Ordering::Less,
            (Some(l), Some(r)) => {
                let ord = compare_segment(l, r);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

fn compare_segment(a: &str, b: &str) -> Ordering {
    let (a_num, a_suffix) = split_numeric(a);
    let (b_num, b_suffix) = split_numeric(b);

    a_num
        .cmp(&b_num)
        .then_with(|| match (a_suffix.is_empty(), b_suffix.is_empty()) {
            (true, true) => Ordering::Equal,
            (true, false) if b_suffix.starts_with('_') => Ordering::Greater,
            (true, false) => Ordering::Less,
            (false, true) if a_suffix.starts_with('_') => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => a_suffix.cmp(b_suffix),
        })
}

fn split_numeric(segment: &str) -> (u64, &str) {
    let end = segment
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(segment.len());
    let number = segment[..end].parse::<u64>().unwrap_or(0);
    (number, &segment[end..])
}

impl fmt::Display for PackageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.version)?;
        if self.revision > 0 {
            write!(f, "-r{}", self.revision)?;
        }
        Ok(())
    }
}

impl Ord for PackageVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl PartialOrd for PackageVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
