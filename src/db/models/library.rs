// src/db/models/library.rs

//! LibraryEntry model - ELF sonames provided or needed by packages

use crate::error::Result;
use rusqlite::{Connection, Row, params};
use std::str::FromStr;

/// Whether a package ships a library or links against it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LibraryKind {
    Provided,
    Needed,
}

impl LibraryKind {
    pub fn as_str(&self) -> &str {
        match self {
            LibraryKind::Provided => "provided",
            LibraryKind::Needed => "needed",
        }
    }
}

impl FromStr for LibraryKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "provided" => Ok(LibraryKind::Provided),
            "needed" => Ok(LibraryKind::Needed),
            _ => Err(format!("Invalid library kind: {s}")),
        }
    }
}

/// One soname row for a package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryEntry {
    pub id: Option<i64>,
    pub package_id: i64,
    pub soname: String,
    /// ELF class (1 = 32-bit, 2 = 64-bit)
    pub elfclass: i32,
    pub kind: LibraryKind,
}

impl LibraryEntry {
    pub fn new(package_id: i64, soname: String, elfclass: i32, kind: LibraryKind) -> Self {
        Self {
            id: None,
            package_id,
            soname,
            elfclass,
            kind,
        }
    }

    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO libraries (package_id, soname, elfclass, kind) VALUES (?1, ?2, ?3, ?4)",
            params![self.package_id, &self.soname, self.elfclass, self.kind.as_str()],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    /// Libraries of `kind` attached to a package
    pub fn find_by_package(conn: &Connection, package_id: i64, kind: LibraryKind) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, package_id, soname, elfclass, kind
             FROM libraries WHERE package_id = ?1 AND kind = ?2 ORDER BY id",
        )?;

        let libs = stmt
            .query_map(params![package_id, kind.as_str()], Self::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(libs)
    }

    /// IDs of packages carrying `soname`/`elfclass` as `kind`
    pub fn find_packages(
        conn: &Connection,
        soname: &str,
        elfclass: i32,
        kind: LibraryKind,
    ) -> Result<Vec<i64>> {
        let mut stmt = conn.prepare(
            "SELECT DISTINCT package_id FROM libraries
             WHERE soname = ?1 AND elfclass = ?2 AND kind = ?3 ORDER BY package_id",
        )?;

        let ids = stmt
            .query_map(params![soname, elfclass, kind.as_str()], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;

        Ok(ids)
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let kind_str: String = row.get(4)?;
        let kind = kind_str.parse::<LibraryKind>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                4,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
            )
        })?;

        Ok(Self {
            id: Some(row.get(0)?),
            package_id: row.get(1)?,
            soname: row.get(2)?,
            elfclass: row.get(3)?,
            kind,
        })
    }
}
