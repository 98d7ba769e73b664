// src/db/schema.rs

//! Ledger schema and migrations
//!
//! The ledger holds two tables keyed by recipe name: the explicit-install
//! markers and the (recipe, root-relative path) file records.

use crate::error::{Error, Result};
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the schema version tracking table
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

    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// Apply all pending migrations to bring the ledger up to date
pub fn migrate(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;
    debug!("Current ledger schema version: {}", current_version);

    if current_version > SCHEMA_VERSION {
        return Err(Error::Config(format!(
            "ledger schema version {} is newer than supported version {}",
            current_version, SCHEMA_VERSION
        )));
    }

    for version in (current_version + 1)..=SCHEMA_VERSION {
        info!("Applying ledger migration to version {}", version);
        apply_migration(conn, version)?;
        set_schema_version(conn, version)?;
    }

    Ok(())
}

fn apply_migration(conn: &Connection, version: i32) -> Result<()> {
    match version {
        1 => migrate_v1(conn),
        _ => Err(Error::Config(format!(
            "unknown ledger migration version: {}",
            version
        ))),
    }
}

/// Initial schema - Version 1
fn migrate_v1(conn: &Connection) -> Result<()> {
    debug!("Creating ledger schema version 1");

    conn.execute_batch(
        "
        -- Recipes the user asked for by name
        CREATE TABLE IF NOT EXISTS installed_recipes (
            recipe TEXT NOT NULL
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_installed_recipes_recipe
            ON installed_recipes(recipe);

        -- Files owned by each recipe, relative to the environment root.
        -- Directory markers end with '/'.
        CREATE TABLE IF NOT EXISTS installed_files (
            recipe TEXT NOT NULL,
            filepath TEXT NOT NULL CHECK(substr(filepath, 1, 1) <> '/')
        );

        CREATE INDEX IF NOT EXISTS idx_installed_files_recipe
            ON installed_files(recipe);
        CREATE INDEX IF NOT EXISTS idx_installed_files_filepath
            ON installed_files(filepath);
        ",
    )?;

    Ok(())
}
