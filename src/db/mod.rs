// src/db/mod.rs

//! Installation ledger
//!
//! The ledger is the only authority on which files belong to which recipe.
//! It lives in a SQLite file inside the environment root and is opened once
//! per root.
//!
//! # Scopes
//!
//! Mutations happen inside a [`LedgerScope`]. Scopes nest: only the
//! outermost one issues `BEGIN IMMEDIATE` / `COMMIT`, inner scopes just
//! count depth. A scope dropped without [`LedgerScope::commit`] rolls the
//! whole transaction back once the outermost scope ends, even if the outer
//! scope tries to commit.
//!
//! ```ignore
//! let scope = ledger.begin()?;
//! ledger.record("lib_zlib", &files)?;
//! scope.commit()?;
//! ```

pub mod models;
pub mod schema;

use crate::error::{Error, Result};
use models::{InstalledFile, InstalledRecipe};
use rusqlite::Connection;
use std::cell::Cell;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub struct Ledger {
    conn: Connection,
    path: Option<PathBuf>,
    depth: Cell<usize>,
    /// An inner scope ended without committing
    poisoned: Cell<bool>,
}

impl Ledger {
    /// Open (creating if needed) the ledger at `path`
    ///
    /// An unreadable or corrupt ledger is fatal.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        let check: String = conn.query_row("PRAGMA quick_check", [], |row| row.get(0))?;
        if check != "ok" {
            return Err(Error::Config(format!(
                "ledger {} is corrupt: {}",
                path.display(),
                check
            )));
        }

        Self::from_connection(conn, Some(path.to_path_buf()))
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, None)
    }

    fn from_connection(conn: Connection, path: Option<PathBuf>) -> Result<Self> {
        schema::migrate(&conn)?;
        Ok(Self {
            conn,
            path,
            depth: Cell::new(0),
            poisoned: Cell::new(false),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Open a (possibly nested) scope
    pub fn begin(&self) -> Result<LedgerScope<'_>> {
        let depth = self.depth.get();
        if depth == 0 {
            self.conn.execute_batch("BEGIN IMMEDIATE")?;
            self.poisoned.set(false);
        }
        self.depth.set(depth + 1);
        debug!("Ledger scope opened at depth {}", depth + 1);
        Ok(LedgerScope {
            ledger: self,
            committed: false,
        })
    }

    /// Number of open scopes
    pub fn depth(&self) -> usize {
        self.depth.get()
    }

    /// True iff the recipe owns at least one file record
    pub fn is_installed(&self, recipe: &str) -> Result<bool> {
        InstalledFile::exists_for_recipe(&self.conn, recipe)
    }

    /// True iff the recipe carries the explicit-install marker
    pub fn is_marked(&self, recipe: &str) -> Result<bool> {
        InstalledRecipe::exists(&self.conn, recipe)
    }

    /// Add the explicit marker; returns false if it was already there
    pub fn mark_explicit(&self, recipe: &str) -> Result<bool> {
        InstalledRecipe::new(recipe).insert_if_missing(&self.conn)
    }

    pub fn unmark(&self, recipe: &str) -> Result<bool> {
        InstalledRecipe::delete(&self.conn, recipe)
    }

    pub fn marked_recipes(&self) -> Result<Vec<String>> {
        Ok(InstalledRecipe::list_all(&self.conn)?
            .into_iter()
            .map(|r| r.recipe)
            .collect())
    }

    /// Recipes owning at least one file, sorted by name
    pub fn installed_recipes(&self) -> Result<Vec<String>> {
        InstalledFile::recipes(&self.conn)
    }

    /// Files of a recipe in reverse-lexicographic order
    pub fn files_for(&self, recipe: &str) -> Result<Vec<String>> {
        Ok(InstalledFile::find_by_recipe(&self.conn, recipe)?
            .into_iter()
            .map(|f| f.filepath)
            .collect())
    }

    pub fn is_recorded(&self, path: &str) -> Result<bool> {
        Ok(self.owner_of(path)?.is_some())
    }

    /// Every recorded path, for bulk membership checks
    pub fn recorded_paths(&self) -> Result<HashSet<String>> {
        Ok(InstalledFile::all_paths(&self.conn)?.into_iter().collect())
    }

    pub fn owner_of(&self, path: &str) -> Result<Option<String>> {
        InstalledFile::find_owner(&self.conn, path)
    }

    /// Record the files a recipe installed, atomically
    ///
    /// An empty set is a build-script defect, and every path must be
    /// relative to the environment root.
    pub fn record(&self, recipe: &str, files: &[String]) -> Result<()> {
        if files.is_empty() {
            return Err(Error::Config(format!(
                "recipe '{}' installed no files",
                recipe
            )));
        }
        if let Some(bad) = files.iter().find(|f| f.is_empty() || f.starts_with('/')) {
            return Err(Error::Config(format!(
                "recipe '{}' tried to record non-relative path '{}'",
                recipe, bad
            )));
        }

        let scope = self.begin()?;
        let mut seen = HashSet::new();
        for file in files {
            if seen.insert(file.as_str()) {
                InstalledFile::new(recipe, file.as_str()).insert(&self.conn)?;
            }
        }
        scope.commit()?;

        debug!("Recorded {} files for {}", seen.len(), recipe);
        Ok(())
    }

    /// Drop every record of a recipe, returning its files deepest first
    pub fn remove(&self, recipe: &str) -> Result<Vec<String>> {
        let scope = self.begin()?;
        let files = self.files_for(recipe)?;
        InstalledFile::delete_by_recipe(&self.conn, recipe)?;
        InstalledRecipe::delete(&self.conn, recipe)?;
        scope.commit()?;
        Ok(files)
    }

    fn end_scope(&self, committed: bool) -> Result<()> {
        let depth = self.depth.get();
        self.depth.set(depth.saturating_sub(1));

        if !committed {
            self.poisoned.set(true);
        }
        if depth > 1 {
            return Ok(());
        }

        if self.poisoned.replace(false) {
            self.conn.execute_batch("ROLLBACK")?;
            debug!("Ledger transaction rolled back");
            if committed {
                return Err(Error::TransactionAborted(
                    "a nested operation failed".to_string(),
                ));
            }
            return Ok(());
        }

        if let Err(e) = self.conn.execute_batch("COMMIT") {
            let _ = self.conn.execute_batch("ROLLBACK");
            return Err(e.into());
        }
        debug!("Ledger transaction committed");
        Ok(())
    }
}

/// RAII guard for one ledger scope
#[must_use = "a scope dropped without commit rolls back"]
pub struct LedgerScope<'a> {
    ledger: &'a Ledger,
    committed: bool,
}

impl LedgerScope<'_> {
    /// Finish this scope successfully
    ///
    /// Only the outermost scope actually commits. Fails with
    /// [`Error::TransactionAborted`] if a nested scope was abandoned.
    pub fn commit(mut self) -> Result<()> {
        self.committed = true;
        self.ledger.end_scope(true)
    }

    pub fn depth(&self) -> usize {
        self.ledger.depth()
    }
}

impl Drop for LedgerScope<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if let Err(e) = self.ledger.end_scope(false) {
            warn!("Ledger rollback failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_record_and_query() {
        let ledger = Ledger::open_in_memory().unwrap();
        assert!(!ledger.is_installed("lib_zlib").unwrap());

        ledger
            .record(
                "lib_zlib",
                &paths(&["local/include/zlib.h", "local/lib/libz.so", "local/lib/pkgconfig/"]),
            )
            .unwrap();

        assert!(ledger.is_installed("lib_zlib").unwrap());
        assert!(ledger.is_recorded("local/lib/libz.so").unwrap());
        assert_eq!(
            ledger.owner_of("local/include/zlib.h").unwrap().as_deref(),
            Some("lib_zlib")
        );
        assert_eq!(ledger.installed_recipes().unwrap(), vec!["lib_zlib"]);
        assert!(!ledger.is_marked("lib_zlib").unwrap());
    }

    #[test]
    fn test_record_rejects_empty_and_absolute() {
        let ledger = Ledger::open_in_memory().unwrap();
        assert!(matches!(ledger.record("empty", &[]), Err(Error::Config(_))));
        assert!(matches!(
            ledger.record("abs", &paths(&["local/ok", "/etc/passwd"])),
            Err(Error::Config(_))
        ));
        assert!(!ledger.is_installed("abs").unwrap());
        assert_eq!(ledger.depth(), 0);
    }

    #[test]
    fn test_remove_returns_reverse_order() {
        let ledger = Ledger::open_in_memory().unwrap();
        ledger
            .record(
                "lib_png",
                &paths(&["local/lib/libpng.so", "local/lib/", "local/lib/libpng.a"]),
            )
            .unwrap();
        ledger.mark_explicit("lib_png").unwrap();

        let removed = ledger.remove("lib_png").unwrap();
        assert_eq!(
            removed,
            paths(&["local/lib/libpng.so", "local/lib/libpng.a", "local/lib/"])
        );
        assert!(!ledger.is_installed("lib_png").unwrap());
        assert!(!ledger.is_marked("lib_png").unwrap());
        assert!(ledger.remove("lib_png").unwrap().is_empty());
    }

    #[test]
    fn test_mark_is_idempotent() {
        let ledger = Ledger::open_in_memory().unwrap();
        assert!(ledger.mark_explicit("python27").unwrap());
        assert!(!ledger.mark_explicit("python27").unwrap());
        assert_eq!(ledger.marked_recipes().unwrap(), vec!["python27"]);
        assert!(ledger.unmark("python27").unwrap());
        assert!(ledger.marked_recipes().unwrap().is_empty());
    }

    #[test]
    fn test_nested_scopes_commit_once() {
        let ledger = Ledger::open_in_memory().unwrap();

        let outer = ledger.begin().unwrap();
        {
            let inner = ledger.begin().unwrap();
            assert_eq!(inner.depth(), 2);
            ledger.record("lib_zlib", &paths(&["local/lib/libz.so"])).unwrap();
            inner.commit().unwrap();
        }
        assert_eq!(ledger.depth(), 1);
        ledger.record("python27", &paths(&["local/bin/python"])).unwrap();
        outer.commit().unwrap();

        assert_eq!(ledger.depth(), 0);
        assert_eq!(ledger.installed_recipes().unwrap(), vec!["lib_zlib", "python27"]);
    }

    #[test]
    fn test_dropped_scope_rolls_back() {
        let ledger = Ledger::open_in_memory().unwrap();
        {
            let _scope = ledger.begin().unwrap();
            ledger.record("lib_zlib", &paths(&["local/lib/libz.so"])).unwrap();
        }
        assert_eq!(ledger.depth(), 0);
        assert!(!ledger.is_installed("lib_zlib").unwrap());
    }

    #[test]
    fn test_abandoned_inner_scope_aborts_outer() {
        let ledger = Ledger::open_in_memory().unwrap();

        let outer = ledger.begin().unwrap();
        ledger.record("lib_zlib", &paths(&["local/lib/libz.so"])).unwrap();
        {
            let _inner = ledger.begin().unwrap();
            ledger.record("lib_bz2", &paths(&["local/lib/libbz2.a"])).unwrap();
        }
        assert!(matches!(outer.commit(), Err(Error::TransactionAborted(_))));

        assert!(!ledger.is_installed("lib_zlib").unwrap());
        assert!(!ledger.is_installed("lib_bz2").unwrap());

        let scope = ledger.begin().unwrap();
        ledger.record("lib_zlib", &paths(&["local/lib/libz.so"])).unwrap();
        scope.commit().unwrap();
        assert!(ledger.is_installed("lib_zlib").unwrap());
    }

    #[test]
    fn test_open_on_disk_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("local/kiln.db");
        {
            let ledger = Ledger::open(&path).unwrap();
            ledger.record("lib_zlib", &paths(&["local/lib/libz.so"])).unwrap();
            ledger.mark_explicit("lib_zlib").unwrap();
        }
        let ledger = Ledger::open(&path).unwrap();
        assert_eq!(ledger.path(), Some(path.as_path()));
        assert!(ledger.is_installed("lib_zlib").unwrap());
        assert!(ledger.is_marked("lib_zlib").unwrap());
    }

    #[test]
    fn test_garbage_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kiln.db");
        fs::write(&path, vec![0xABu8; 4096]).unwrap();
        assert!(Ledger::open(&path).is_err());
    }
}
