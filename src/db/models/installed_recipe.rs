// src/db/models/installed_recipe.rs

//! InstalledRecipe model - explicit-install marker

use crate::error::Result;
use rusqlite::{Connection, OptionalExtension};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledRecipe {
    pub recipe: String,
}

impl InstalledRecipe {
    pub fn new(recipe: impl Into<String>) -> Self {
        Self {
            recipe: recipe.into(),
        }
    }

    /// Insert the marker unless it already exists
    pub fn insert_if_missing(&self, conn: &Connection) -> Result<bool> {
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO installed_recipes (recipe) VALUES (?1)",
            [&self.recipe],
        )?;
        Ok(inserted > 0)
    }

    pub fn exists(conn: &Connection, recipe: &str) -> Result<bool> {
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM installed_recipes WHERE recipe = ?1",
                [recipe],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare("SELECT recipe FROM installed_recipes ORDER BY recipe")?;
        let rows = stmt
            .query_map([], |row| Ok(Self { recipe: row.get(0)? }))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn delete(conn: &Connection, recipe: &str) -> Result<bool> {
        let removed = conn.execute("DELETE FROM installed_recipes WHERE recipe = ?1", [recipe])?;
        Ok(removed > 0)
    }
}
