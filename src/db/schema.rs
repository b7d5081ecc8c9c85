// src/db/schema.rs

//! Database schema definitions and migrations for Entropy repositories
//!
//! The schema version is tracked in `schema_version`; [`migrate`] applies
//! every missing version in order.

use crate::error::{Error, Result};
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// Settings key flagging the dependency index as out of date
pub const INDEX_STALE_KEY: &str = "dependency_index_stale";

fn init_schema_version(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    init_schema_version(conn)?;

    let version = conn
        .query_row(
            "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?
        .unwrap_or(0);

    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// Apply all pending migrations to bring the database up to date
pub fn migrate(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;
    debug!("Current schema version: {}", current_version);

    if current_version >= SCHEMA_VERSION {
        return Ok(());
    }

    for version in (current_version + 1)..=SCHEMA_VERSION {
        info!("Applying migration to version {}", version);
        apply_migration(conn, version)?;
        set_schema_version(conn, version)?;
    }

    info!("Schema migration complete. Now at version {}", SCHEMA_VERSION);
    Ok(())
}

fn apply_migration(conn: &Connection, version: i32) -> Result<()> {
    match version {
        1 => migrate_v1(conn),
        2 => migrate_v2(conn),
        _ => Err(Error::InitError(format!("Unknown migration version: {version}"))),
    }
}

/// Initial schema
///
/// - packages: one row per package, keyed by category/name, version and slot
/// - dependencies: raw dependency strings with their type id
/// - libraries: ELF sonames a package provides or needs
fn migrate_v1(conn: &Connection) -> Result<()> {
    debug!("Creating schema version 1");

    conn.execute_batch(
        "
        CREATE TABLE packages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            category TEXT NOT NULL,
            name TEXT NOT NULL,
            version TEXT NOT NULL,
            revision INTEGER NOT NULL DEFAULT 0,
            slot TEXT NOT NULL DEFAULT '0',
            is_system INTEGER NOT NULL DEFAULT 0,
            added_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(category, name, version, revision, slot)
        );

        CREATE INDEX idx_packages_key ON packages(category, name);
        CREATE INDEX idx_packages_name ON packages(name);

        -- dependency_type: 0 runtime, 1 post, 2 manual, 3 build
        CREATE TABLE dependencies (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            package_id INTEGER NOT NULL,
            dependency TEXT NOT NULL,
            dependency_type INTEGER NOT NULL DEFAULT 0 CHECK(dependency_type BETWEEN 0 AND 3),
            FOREIGN KEY (package_id) REFERENCES packages(id) ON DELETE CASCADE
        );

        CREATE INDEX idx_dependencies_package_id ON dependencies(package_id);

        CREATE TABLE libraries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            package_id INTEGER NOT NULL,
            soname TEXT NOT NULL,
            elfclass INTEGER NOT NULL,
            kind TEXT NOT NULL CHECK(kind IN ('provided', 'needed')),
            FOREIGN KEY (package_id) REFERENCES packages(id) ON DELETE CASCADE
        );

        CREATE INDEX idx_libraries_package_id ON libraries(package_id);
        CREATE INDEX idx_libraries_soname ON libraries(soname, elfclass, kind);
        ",
    )?;

    Ok(())
}

/// Reverse dependency index
///
/// `dependency_index` maps each dependency row to the packages satisfying
/// it. Any write to `packages` or `dependencies` flags the index stale
/// until it is regenerated.
fn migrate_v2(conn: &Connection) -> Result<()> {
    debug!("Creating schema version 2");

    conn.execute_batch(
        "
        CREATE TABLE settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE dependency_index (
            dependency_id INTEGER NOT NULL,
            package_id INTEGER NOT NULL,
            PRIMARY KEY (dependency_id, package_id),
            FOREIGN KEY (dependency_id) REFERENCES dependencies(id) ON DELETE CASCADE,
            FOREIGN KEY (package_id) REFERENCES packages(id) ON DELETE CASCADE
        );

        CREATE INDEX idx_dependency_index_package ON dependency_index(package_id);

        INSERT INTO settings (key, value) VALUES ('dependency_index_stale', '1');

        CREATE TRIGGER packages_insert_stale AFTER INSERT ON packages
        BEGIN
            UPDATE settings SET value = '1' WHERE key = 'dependency_index_stale';
        END;

        CREATE TRIGGER packages_delete_stale AFTER DELETE ON packages
        BEGIN
            UPDATE settings SET value = '1' WHERE key = 'dependency_index_stale';
        END;

        CREATE TRIGGER dependencies_insert_stale AFTER INSERT ON dependencies
        BEGIN
            UPDATE settings SET value = '1' WHERE key = 'dependency_index_stale';
        END;

        CREATE TRIGGER dependencies_delete_stale AFTER DELETE ON dependencies
        BEGIN
            UPDATE settings SET value = '1' WHERE key = 'dependency_index_stale';
        END;
        ",
    )?;

    Ok(())
}

/// Whether the reverse dependency index needs regeneration
pub fn is_index_stale(conn: &Connection) -> Result<bool> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM settings WHERE key = ?1",
            [INDEX_STALE_KEY],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value.as_deref() != Some("0"))
}

/// Record the freshness of the reverse dependency index
pub fn set_index_stale(conn: &Connection, stale: bool) -> Result<()> {
    conn.execute(
        "INSERT INTO settings (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        [INDEX_STALE_KEY, if stale { "1" } else { "0" }],
    )?;
    Ok(())
}
