// src/db/models/installed_file.rs

//! InstalledFile model - one file owned by one recipe

use crate::error::Result;
use rusqlite::{Connection, OptionalExtension, Row, params};

/// A file record: root-relative path owned by a recipe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledFile {
    pub recipe: String,
    pub filepath: String,
}

impl InstalledFile {
    pub fn new(recipe: impl Into<String>, filepath: impl Into<String>) -> Self {
        Self {
            recipe: recipe.into(),
            filepath: filepath.into(),
        }
    }

    /// Insert this record
    pub fn insert(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            "INSERT INTO installed_files (recipe, filepath) VALUES (?1, ?2)",
            params![&self.recipe, &self.filepath],
        )?;
        Ok(())
    }

    /// All records of a recipe, deepest paths first
    pub fn find_by_recipe(conn: &Connection, recipe: &str) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT recipe, filepath FROM installed_files
             WHERE recipe = ?1 ORDER BY filepath DESC",
        )?;

        let files = stmt
            .query_map([recipe], Self::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(files)
    }

    /// Recipe owning `filepath`, if any
    pub fn find_owner(conn: &Connection, filepath: &str) -> Result<Option<String>> {
        let owner = conn
            .query_row(
                "SELECT recipe FROM installed_files WHERE filepath = ?1 LIMIT 1",
                [filepath],
                |row| row.get(0),
            )
            .optional()?;
        Ok(owner)
    }

    pub fn exists_for_recipe(conn: &Connection, recipe: &str) -> Result<bool> {
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM installed_files WHERE recipe = ?1 LIMIT 1",
                [recipe],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Every recorded path across all recipes
    pub fn all_paths(conn: &Connection) -> Result<Vec<String>> {
        let mut stmt = conn.prepare("SELECT DISTINCT filepath FROM installed_files")?;
        let paths = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(paths)
    }

    /// Names of recipes owning at least one file
    pub fn recipes(conn: &Connection) -> Result<Vec<String>> {
        let mut stmt =
            conn.prepare("SELECT DISTINCT recipe FROM installed_files ORDER BY recipe")?;
        let recipes = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(recipes)
    }

    pub fn delete_by_recipe(conn: &Connection, recipe: &str) -> Result<usize> {
        Ok(conn.execute("DELETE FROM installed_files WHERE recipe = ?1", [recipe])?)
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            recipe: row.get(0)?,
            filepath: row.get(1)?,
        })
    }
}
