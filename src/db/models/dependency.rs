// src/db/models/dependency.rs

//! DependencyEntry model - dependency strings declared by packages

use crate::error::{Error, Result};
use rusqlite::{Connection, Row, params};
use std::str::FromStr;

/// Kind of dependency, stored as its integer id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DependencyType {
    /// Needed at runtime
    Runtime,
    /// Needed after the package is merged
    Post,
    /// Added by hand on top of the package metadata
    Manual,
    /// Needed only to build the package
    Build,
}

impl DependencyType {
    pub fn id(&self) -> i64 {
        match self {
            DependencyType::Runtime => 0,
            DependencyType::Post => 1,
            DependencyType::Manual => 2,
            DependencyType::Build => 3,
        }
    }

    pub fn from_id(id: i64) -> Option<Self> {
        match id {
            0 => Some(DependencyType::Runtime),
            1 => Some(DependencyType::Post),
            2 => Some(DependencyType::Manual),
            3 => Some(DependencyType::Build),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            DependencyType::Runtime => "runtime",
            DependencyType::Post => "post",
            DependencyType::Manual => "manual",
            DependencyType::Build => "build",
        }
    }
}

impl FromStr for DependencyType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "runtime" => Ok(DependencyType::Runtime),
            "post" => Ok(DependencyType::Post),
            "manual" => Ok(DependencyType::Manual),
            "build" => Ok(DependencyType::Build),
            _ => Err(format!("Invalid dependency type: {s}")),
        }
    }
}

/// A dependency string declared by a package
///
/// Blockers are stored as dependency strings with a leading `!`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyEntry {
    pub id: Option<i64>,
    pub package_id: i64,
    pub dependency: String,
    pub dependency_type: DependencyType,
}

impl DependencyEntry {
    pub fn new(package_id: i64, dependency: String, dependency_type: DependencyType) -> Self {
        Self {
            id: None,
            package_id,
            dependency,
            dependency_type,
        }
    }

    /// Insert this dependency into the database
    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO dependencies (package_id, dependency, dependency_type) VALUES (?1, ?2, ?3)",
            params![self.package_id, &self.dependency, self.dependency_type.id()],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    /// All dependencies of a package whose type is not in `exclude`
    pub fn find_by_package(
        conn: &Connection,
        package_id: i64,
        exclude: &[DependencyType],
    ) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, package_id, dependency, dependency_type
             FROM dependencies WHERE package_id = ?1 ORDER BY id",
        )?;

        let deps = stmt
            .query_map([package_id], Self::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(deps
            .into_iter()
            .filter(|dep| !exclude.contains(&dep.dependency_type))
            .collect())
    }

    /// Every dependency row in the database
    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, package_id, dependency, dependency_type FROM dependencies ORDER BY id",
        )?;

        let deps = stmt
            .query_map([], Self::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(deps)
    }

    /// Dependencies satisfied by `package_id` according to the dependency index
    ///
    /// Each returned entry's `package_id` is the dependent package.
    pub fn find_dependents(
        conn: &Connection,
        package_id: i64,
        exclude: &[DependencyType],
    ) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT d.id, d.package_id, d.dependency, d.dependency_type
             FROM dependency_index i
             JOIN dependencies d ON d.id = i.dependency_id
             WHERE i.package_id = ?1 AND d.package_id != ?1
             ORDER BY d.package_id, d.id",
        )?;

        let deps = stmt
            .query_map([package_id], Self::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(deps
            .into_iter()
            .filter(|dep| !exclude.contains(&dep.dependency_type))
            .collect())
    }

    /// Record that `dependency_id` is satisfied by `package_id`
    pub fn index(conn: &Connection, dependency_id: i64, package_id: i64) -> Result<()> {
        conn.execute(
            "INSERT OR IGNORE INTO dependency_index (dependency_id, package_id) VALUES (?1, ?2)",
            [dependency_id, package_id],
        )?;
        Ok(())
    }

    /// Drop the whole dependency index
    pub fn clear_index(conn: &Connection) -> Result<()> {
        conn.execute("DELETE FROM dependency_index", [])?;
        Ok(())
    }

    /// Delete all dependencies of a package
    pub fn delete_by_package(conn: &Connection, package_id: i64) -> Result<()> {
        conn.execute("DELETE FROM dependencies WHERE package_id = ?1", [package_id])?;
        Ok(())
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let type_id: i64 = row.get(3)?;
        let dependency_type = DependencyType::from_id(type_id).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Integer,
                Box::new(Error::ParseError(format!("Invalid dependency type id: {type_id}"))),
            )
        })?;

        Ok(Self {
            id: Some(row.get(0)?),
            package_id: row.get(1)?,
            dependency: row.get(2)?,
            dependency_type,
        })
    }
}
