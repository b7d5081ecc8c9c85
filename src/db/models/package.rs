// src/db/models/package.rs

//! PackageEntry model - one package row in a repository

use crate::atom::PackageVersion;
use crate::error::Result;
use rusqlite::{Connection, OptionalExtension, Row, params};

const COLUMNS: &str = "id, category, name, version, revision, slot, is_system";

/// A package stored in a repository database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageEntry {
    pub id: Option<i64>,
    pub category: String,
    pub name: String,
    pub version: String,
    pub revision: u32,
    pub slot: String,
    /// Flagged as part of the base system
    pub is_system: bool,
}

impl PackageEntry {
    /// Create a new PackageEntry in slot `0`
    pub fn new(category: String, name: String, version: String) -> Self {
        Self {
            id: None,
            category,
            name,
            version,
            revision: 0,
            slot: "0".to_string(),
            is_system: false,
        }
    }

    /// The `category/name` key
    pub fn key(&self) -> String {
        format!("{}/{}", self.category, self.name)
    }

    /// Key and slot, the identity two installed packages may not share
    pub fn key_slot(&self) -> (String, String) {
        (self.key(), self.slot.clone())
    }

    /// Parsed version including the revision
    pub fn package_version(&self) -> Result<PackageVersion> {
        let mut version = PackageVersion::parse(&self.version)?;
        version.revision = self.revision;
        Ok(version)
    }

    /// Full atom string, e.g. `dev-libs/openssl-1.0.2h-r1`
    pub fn atom(&self) -> String {
        if self.revision > 0 {
            format!("{}-{}-r{}", self.key(), self.version, self.revision)
        } else {
            format!("{}-{}", self.key(), self.version)
        }
    }

    /// Insert this package into the database
    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO packages (category, name, version, revision, slot, is_system)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                &self.category,
                &self.name,
                &self.version,
                self.revision,
                &self.slot,
                self.is_system,
            ],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    /// Find a package by ID
    pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM packages WHERE id = ?1"))?;
        let package = stmt.query_row([id], Self::from_row).optional()?;
        Ok(package)
    }

    /// Find every package with the given category and name
    pub fn find_by_key(conn: &Connection, category: &str, name: &str) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM packages WHERE category = ?1 AND name = ?2 ORDER BY id"
        ))?;

        let packages = stmt
            .query_map([category, name], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(packages)
    }

    /// Find every package with the given name in any category
    pub fn find_by_name(conn: &Connection, name: &str) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM packages WHERE name = ?1 ORDER BY id"
        ))?;

        let packages = stmt
            .query_map([name], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(packages)
    }

    /// List all packages
    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM packages ORDER BY category, name, id"
        ))?;

        let packages = stmt
            .query_map([], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(packages)
    }

    /// Number of packages sharing a category/name key
    pub fn count_by_key(conn: &Connection, category: &str, name: &str) -> Result<usize> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM packages WHERE category = ?1 AND name = ?2",
            [category, name],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Delete a package by ID, cascading to its dependencies and libraries
    pub fn delete(conn: &Connection, id: i64) -> Result<()> {
        conn.execute("DELETE FROM packages WHERE id = ?1", [id])?;
        Ok(())
    }

    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: Some(row.get(0)?),
            category: row.get(1)?,
            name: row.get(2)?,
            version: row.get(3)?,
            revision: row.get(4)?,
            slot: row.get(5)?,
            is_system: row.get(6)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[test]
    fn test_insert_and_find() {
        let conn = db::open_in_memory().unwrap();

        let mut zlib = PackageEntry::new("sys-libs".into(), "zlib".into(), "1.3".into());
        zlib.revision = 2;
        zlib.is_system = true;
        let id = zlib.insert(&conn).unwrap();

        let found = PackageEntry::find_by_id(&conn, id).unwrap().unwrap();
        assert_eq!(found, zlib);
        assert_eq!(found.atom(), "sys-libs/zlib-1.3-r2");
        assert_eq!(found.package_version().unwrap().to_string(), "1.3-r2");

        assert_eq!(PackageEntry::find_by_key(&conn, "sys-libs", "zlib").unwrap().len(), 1);
        assert_eq!(PackageEntry::find_by_name(&conn, "zlib").unwrap().len(), 1);
        assert!(PackageEntry::find_by_id(&conn, id + 1).unwrap().is_none());
    }

    #[test]
    fn test_count_by_key_and_delete() {
        let conn = db::open_in_memory().unwrap();

        let mut py310 = PackageEntry::new("dev-lang".into(), "python".into(), "3.10.12".into());
        py310.slot = "3.10".into();
        let id = py310.insert(&conn).unwrap();
        let mut py311 = PackageEntry::new("dev-lang".into(), "python".into(), "3.11.4".into());
        py311.slot = "3.11".into();
        py311.insert(&conn).unwrap();

        assert_eq!(PackageEntry::count_by_key(&conn, "dev-lang", "python").unwrap(), 2);

        PackageEntry::delete(&conn, id).unwrap();
        assert_eq!(PackageEntry::count_by_key(&conn, "dev-lang", "python").unwrap(), 1);
        assert_eq!(PackageEntry::list_all(&conn).unwrap()[0].slot, "3.11");
    }
}
