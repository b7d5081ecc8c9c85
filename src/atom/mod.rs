// src/atom/mod.rs

//! Package atoms and dependency strings
//!
//! An atom selects packages by key, optionally narrowed by a version
//! operator and a slot:
//!
//! - `dev-libs/openssl` or just `openssl`
//! - `>=dev-libs/openssl-1.0.2`
//! - `~dev-lang/python-3.11` (any revision of 3.11)
//! - `sys-libs/zlib:0`
//!
//! Dependency strings add two forms on top of plain atoms:
//!
//! - `!app-misc/foo` blocks (conflicts with) matching packages
//! - `a;b;c?` is satisfied by any one of the alternatives

pub mod version;

pub use version::PackageVersion;

use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

const OR_SEPARATOR: char = ';';
const OR_MARKER: char = '?';
const BLOCKER: char = '!';

/// Version comparison operator of an atom
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Equal,
    /// `~`: same version, any revision
    AnyRevision,
    Greater,
    GreaterOrEqual,
    Less,
    LessOrEqual,
}

impl Operator {
    pub fn as_str(&self) -> &str {
        match self {
            Operator::Equal => "=",
            Operator::AnyRevision => "~",
            Operator::Greater => ">",
            Operator::GreaterOrEqual => ">=",
            Operator::Less => "<",
            Operator::LessOrEqual => "<=",
        }
    }

    fn split_prefix(s: &str) -> (Option<Self>, &str) {
        // Two-character operators first
        for (prefix, op) in [
            (">=", Operator::GreaterOrEqual),
            ("<=", Operator::LessOrEqual),
            (">", Operator::Greater),
            ("<", Operator::Less),
            ("=", Operator::Equal),
            ("~", Operator::AnyRevision),
        ] {
            if let Some(rest) = s.strip_prefix(prefix) {
                return (Some(op), rest);
            }
        }
        (None, s)
    }

    fn accepts(&self, candidate: &PackageVersion, wanted: &PackageVersion) -> bool {
        match self {
            Operator::Equal => candidate == wanted,
            Operator::AnyRevision => candidate.same_base(wanted),
            Operator::Greater => candidate > wanted,
            Operator::GreaterOrEqual => candidate >= wanted,
            Operator::Less => candidate < wanted,
            Operator::LessOrEqual => candidate <= wanted,
        }
    }
}

/// A parsed package atom
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Atom {
    pub category: Option<String>,
    pub name: String,
    pub constraint: Option<(Operator, PackageVersion)>,
    pub slot: Option<String>,
}

impl Atom {
    /// Parse an atom string
    ///
    /// A version is only recognised after an operator, so names containing
    /// digits after a hyphen (`font-adobe-100dpi`) stay intact.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::ParseError("Empty atom".to_string()));
        }

        let (op, rest) = Operator::split_prefix(s);

        let (body, slot) = match rest.split_once(':') {
            Some((body, slot)) if !slot.is_empty() => (body, Some(slot.to_string())),
            Some(_) => return Err(Error::ParseError(format!("Empty slot in atom '{s}'"))),
            None => (rest, None),
        };

        let (key, constraint) = match op {
            Some(op) => {
                let (key, version) = split_version(body)
                    .ok_or_else(|| Error::ParseError(format!("Missing version in atom '{s}'")))?;
                (key, Some((op, PackageVersion::parse(version)?)))
            }
            None => (body, None),
        };

        let (category, name) = match key.split_once('/') {
            Some((category, name)) if !category.is_empty() && !name.is_empty() => {
                (Some(category.to_string()), name.to_string())
            }
            Some(_) => return Err(Error::ParseError(format!("Invalid package key in atom '{s}'"))),
            None => (None, key.to_string()),
        };

        if name.is_empty() {
            return Err(Error::ParseError(format!("Missing package name in atom '{s}'")));
        }

        Ok(Self {
            category,
            name,
            constraint,
            slot,
        })
    }

    /// The `category/name` key, or just the name when no category was given
    pub fn key(&self) -> String {
        match &self.category {
            Some(category) => format!("{}/{}", category, self.name),
            None => self.name.clone(),
        }
    }

    /// Whether a package with the given key, version and slot is selected
    pub fn matches(&self, key: &str, version: &PackageVersion, slot: &str) -> bool {
        let key_matches = match &self.category {
            Some(_) => self.key() == key,
            None => key.rsplit('/').next() == Some(self.name.as_str()),
        };
        if !key_matches {
            return false;
        }

        if self.slot.as_deref().is_some_and(|wanted| wanted != slot) {
            return false;
        }

        match &self.constraint {
            Some((op, wanted)) => op.accepts(version, wanted),
            None => true,
        }
    }
}

/// Split `category/name-1.0-r1` into key and version parts
///
/// The version starts at the last hyphen followed by a digit.
fn split_version(body: &str) -> Option<(&str, &str)> {
    let name_start = body.find('/').map(|idx| idx + 1).unwrap_or(0);
    let bytes = body.as_bytes();

    (name_start..bytes.len().saturating_sub(1))
        .rev()
        .find(|&idx| bytes[idx] == b'-' && bytes[idx + 1].is_ascii_digit())
        .map(|idx| (&body[..idx], &body[idx + 1..]))
}

impl FromStr for Atom {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Atom::parse(s)
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.constraint {
            Some((op, version)) => write!(f, "{}{}-{}", op.as_str(), self.key(), version)?,
            None => write!(f, "{}", self.key())?,
        }
        if let Some(slot) = &self.slot {
            write!(f, ":{slot}")?;
        }
        Ok(())
    }
}

/// A dependency string as stored in a repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencySpec {
    /// A plain required atom
    Atom(Atom),
    /// Satisfied by any one of the alternatives, in preference order
    AnyOf(Vec<Atom>),
    /// Conflicts with packages matching the atom
    Blocker(Atom),
}

impl DependencySpec {
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();

        if let Some(blocked) = s.strip_prefix(BLOCKER) {
            return Ok(DependencySpec::Blocker(Atom::parse(blocked)?));
        }

        if let Some(alternatives) = s.strip_suffix(OR_MARKER) {
            let atoms = alternatives
                .split(OR_SEPARATOR)
                .filter(|alt| !alt.trim().is_empty())
                .map(Atom::parse)
                .collect::<Result<Vec<_>>>()?;
            if atoms.is_empty() {
                return Err(Error::ParseError(format!("Empty or-dependency '{s}'")));
            }
            return Ok(DependencySpec::AnyOf(atoms));
        }

        Ok(DependencySpec::Atom(Atom::parse(s)?))
    }

    pub fn is_blocker(&self) -> bool {
        matches!(self, DependencySpec::Blocker(_))
    }

    /// Alternatives in preference order (a single one for plain atoms)
    pub fn alternatives(&self) -> &[Atom] {
        match self {
            DependencySpec::Atom(atom) | DependencySpec::Blocker(atom) => std::slice::from_ref(atom),
            DependencySpec::AnyOf(atoms) => atoms,
        }
    }
}

impl fmt::Display for DependencySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependencySpec::Atom(atom) => write!(f, "{atom}"),
            DependencySpec::Blocker(atom) => write!(f, "{BLOCKER}{atom}"),
            DependencySpec::AnyOf(atoms) => {
                let joined = atoms
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(&OR_SEPARATOR.to_string());
                write!(f, "{joined}{OR_MARKER}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> PackageVersion {
        PackageVersion::parse(s).unwrap()
    }

    #[test]
    fn test_parse_key_only() {
        let atom = Atom::parse("dev-libs/openssl").unwrap();
        assert_eq!(atom.category.as_deref(), Some("dev-libs"));
        assert_eq!(atom.name, "openssl");
        assert!(atom.constraint.is_none());
        assert!(atom.slot.is_none());
    }

    #[test]
    fn test_parse_name_only() {
        let atom = Atom::parse("openssl").unwrap();
        assert!(atom.category.is_none());
        assert!(atom.matches("dev-libs/openssl", &v("1.0"), "0"));
        assert!(!atom.matches("dev-libs/libressl", &v("1.0"), "0"));
    }

    #[test]
    fn test_parse_versioned_with_slot() {
        let atom = Atom::parse(">=dev-lang/python-3.10-r1:3.10").unwrap();
        assert_eq!(atom.key(), "dev-lang/python");
        assert_eq!(atom.slot.as_deref(), Some("3.10"));
        let (op, version) = atom.constraint.clone().unwrap();
        assert_eq!(op, Operator::GreaterOrEqual);
        assert_eq!(version, v("3.10-r1"));
        assert_eq!(atom.to_string(), ">=dev-lang/python-3.10-r1:3.10");
    }

    #[test]
    fn test_digits_in_name_without_operator() {
        let atom = Atom::parse("media-fonts/font-adobe-100dpi").unwrap();
        assert_eq!(atom.name, "font-adobe-100dpi");
        assert!(atom.constraint.is_none());
    }

    #[test]
    fn test_digits_in_name_with_operator() {
        let atom = Atom::parse("=media-fonts/font-adobe-100dpi-1.0.3").unwrap();
        assert_eq!(atom.name, "font-adobe-100dpi");
        assert_eq!(atom.constraint.unwrap().1, v("1.0.3"));
    }

    #[test]
    fn test_invalid_atoms() {
        assert!(Atom::parse("").is_err());
        assert!(Atom::parse(">=dev-libs/openssl").is_err());
        assert!(Atom::parse("dev-libs/").is_err());
        assert!(Atom::parse("dev-libs/openssl:").is_err());
    }

    #[test]
    fn test_operator_matching() {
        let ge = Atom::parse(">=sys-libs/zlib-1.2").unwrap();
        assert!(ge.matches("sys-libs/zlib", &v("1.2"), "0"));
        assert!(ge.matches("sys-libs/zlib", &v("1.3"), "0"));
        assert!(!ge.matches("sys-libs/zlib", &v("1.1"), "0"));

        let lt = Atom::parse("<sys-libs/zlib-1.2").unwrap();
        assert!(lt.matches("sys-libs/zlib", &v("1.1"), "0"));
        assert!(!lt.matches("sys-libs/zlib", &v("1.2"), "0"));

        let tilde = Atom::parse("~sys-libs/zlib-1.2").unwrap();
        assert!(tilde.matches("sys-libs/zlib", &v("1.2-r3"), "0"));
        assert!(!tilde.matches("sys-libs/zlib", &v("1.2.1"), "0"));

        let eq = Atom::parse("=sys-libs/zlib-1.2-r1").unwrap();
        assert!(eq.matches("sys-libs/zlib", &v("1.2-r1"), "0"));
        assert!(!eq.matches("sys-libs/zlib", &v("1.2"), "0"));
    }

    #[test]
    fn test_slot_matching() {
        let atom = Atom::parse("dev-lang/python:3.11").unwrap();
        assert!(atom.matches("dev-lang/python", &v("3.11.4"), "3.11"));
        assert!(!atom.matches("dev-lang/python", &v("3.10.1"), "3.10"));
    }

    #[test]
    fn test_dependency_spec_forms() {
        let plain = DependencySpec::parse("dev-libs/glib").unwrap();
        assert!(matches!(plain, DependencySpec::Atom(_)));

        let blocker = DependencySpec::parse("!app-misc/foo").unwrap();
        assert!(blocker.is_blocker());
        assert_eq!(blocker.to_string(), "!app-misc/foo");

        let any = DependencySpec::parse("virtual/jdk;dev-java/openjdk?").unwrap();
        assert_eq!(any.alternatives().len(), 2);
        assert_eq!(any.alternatives()[1].key(), "dev-java/openjdk");
        assert_eq!(any.to_string(), "virtual/jdk;dev-java/openjdk?");
    }

    #[test]
    fn test_empty_or_dependency() {
        assert!(DependencySpec::parse("?").is_err());
    }
}
