// src/environment/scan.rs

//! New-file scanner
//!
//! Walks an environment root breadth-first and yields every root-relative
//! path that the ledger does not know about. Empty directories are yielded
//! with a trailing `/` so they can be recorded (and later pruned) as a unit.
//!
//! The walk is lazy: a directory is only read when the iterator gets to it.
//! Entries whose names are not valid UTF-8 are deleted on sight, and a
//! directory that disappears mid-walk counts as empty.

use crate::config::SETTINGS_FILE_NAME;
use crate::db::Ledger;
use crate::error::Result;
use crate::lock::LOCK_FILE_NAME;
use crate::platform::Layout;
use std::collections::{HashSet, VecDeque};
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Paths under a root that are never part of any recipe
pub fn ignored_paths(layout: &Layout) -> Vec<PathBuf> {
    let mut ignored = vec![
        layout.build_dir.clone(),
        layout.cache_dir.clone(),
        layout.ledger.clone(),
        layout.root.join(LOCK_FILE_NAME),
        layout.root.join(SETTINGS_FILE_NAME),
        layout.root.join("recipes"),
    ];
    for suffix in ["-journal", "-wal", "-shm"] {
        let mut name = OsString::from(layout.ledger.as_os_str());
        name.push(suffix);
        ignored.push(PathBuf::from(name));
    }
    ignored
}

/// Lazy iterator over unrecorded paths
pub struct NewFiles {
    layout: Layout,
    ignored: Vec<PathBuf>,
    recorded: HashSet<String>,
    queue: VecDeque<PathBuf>,
    ready: VecDeque<String>,
}

impl NewFiles {
    pub fn new(layout: &Layout, ledger: &Ledger) -> Result<Self> {
        let mut queue = VecDeque::new();
        queue.push_back(layout.root.clone());
        Ok(Self {
            layout: layout.clone(),
            ignored: ignored_paths(layout),
            recorded: ledger.recorded_paths()?,
            queue,
            ready: VecDeque::new(),
        })
    }

    fn is_ignored(&self, path: &Path) -> bool {
        self.ignored
            .iter()
            .any(|ignored| path == ignored || path.starts_with(ignored))
    }

    fn scan_dir(&mut self, dir: &Path) -> io::Result<()> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };

        let mut names = Vec::new();
        for entry in entries {
            match entry {
                Ok(entry) => names.push(entry.file_name()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            }
        }
        names.sort();

        let mut empty = true;
        for name in names {
            let path = dir.join(&name);
            if name.to_str().is_none() {
                warn!("Deleting undecodable path {}", path.display());
                remove_any(&path)?;
                continue;
            }
            empty = false;

            if self.is_ignored(&path) {
                continue;
            }

            let meta = match path.symlink_metadata() {
                Ok(meta) => meta,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };

            if meta.is_dir() {
                self.queue.push_back(path);
            } else if let Some(rel) = self.layout.relative(&path)
                && !self.recorded.contains(&rel)
            {
                self.ready.push_back(rel);
            }
        }

        if empty && let Some(rel) = self.layout.relative(dir) {
            let marker = format!("{}/", rel);
            if !self.recorded.contains(&marker) {
                self.ready.push_back(marker);
            }
        }
        Ok(())
    }
}

impl Iterator for NewFiles {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(path) = self.ready.pop_front() {
                return Some(Ok(path));
            }
            let dir = self.queue.pop_front()?;
            if let Err(e) = self.scan_dir(&dir) {
                return Some(Err(e.into()));
            }
        }
    }
}

/// Remove a file, symlink or whole directory; a missing path is fine
pub fn remove_any(path: &Path) -> io::Result<()> {
    let result = match path.symlink_metadata() {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) => Err(e),
    };
    match result {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout_for(root: &Path) -> Layout {
        Layout {
            root: root.to_path_buf(),
            prefix: root.join("local"),
            ledger: root.join("local/kiln.db"),
            build_dir: root.join("build"),
            cache_dir: root.join("cache"),
        }
    }

    fn scan(layout: &Layout, ledger: &Ledger) -> Vec<String> {
        NewFiles::new(layout, ledger)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn test_yields_unrecorded_files_and_empty_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout_for(dir.path());
        let ledger = Ledger::open(&layout.ledger).unwrap();

        fs::create_dir_all(dir.path().join("local/lib/pkgconfig")).unwrap();
        fs::create_dir_all(dir.path().join("local/share/empty")).unwrap();
        fs::create_dir_all(dir.path().join("build/zlib-1.2.7.tar.gz")).unwrap();
        fs::create_dir_all(dir.path().join("cache")).unwrap();
        fs::write(dir.path().join("local/lib/libz.a"), "a").unwrap();
        fs::write(dir.path().join("local/lib/pkgconfig/zlib.pc"), "pc").unwrap();
        fs::write(dir.path().join("cache/zlib-1.2.7.tar.gz"), "tgz").unwrap();
        fs::write(dir.path().join(LOCK_FILE_NAME), "").unwrap();

        ledger
            .record("lib_zlib", &["local/lib/libz.a".to_string()])
            .unwrap();

        assert_eq!(
            scan(&layout, &ledger),
            vec!["local/lib/pkgconfig/zlib.pc", "local/share/empty/"]
        );
    }

    #[test]
    fn test_recorded_empty_dir_not_yielded() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout_for(dir.path());
        let ledger = Ledger::open(&layout.ledger).unwrap();
        fs::create_dir_all(dir.path().join("local/var/run")).unwrap();
        ledger
            .record("site", &["local/var/run/".to_string()])
            .unwrap();
        assert!(scan(&layout, &ledger).is_empty());
    }

    #[test]
    fn test_symlinks_are_files() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout_for(dir.path());
        let ledger = Ledger::open(&layout.ledger).unwrap();
        fs::create_dir_all(dir.path().join("local/lib/real")).unwrap();
        fs::write(dir.path().join("local/lib/real/x"), "x").unwrap();
        std::os::unix::fs::symlink("real", dir.path().join("local/lib/alias")).unwrap();

        assert_eq!(
            scan(&layout, &ledger),
            vec!["local/lib/alias", "local/lib/real/x"]
        );
    }

    #[test]
    fn test_undecodable_names_are_deleted() {
        use std::os::unix::ffi::OsStrExt;

        let dir = tempfile::tempdir().unwrap();
        let layout = layout_for(dir.path());
        let ledger = Ledger::open(&layout.ledger).unwrap();
        let bad = dir
            .path()
            .join("local")
            .join(std::ffi::OsStr::from_bytes(b"bad\xff"));
        if fs::write(&bad, "junk").is_err() {
            // Filesystem refuses non-UTF-8 names
            return;
        }

        assert!(scan(&layout, &ledger).is_empty());
        assert!(!bad.exists());
    }

    #[test]
    fn test_directory_vanishing_mid_scan_counts_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout_for(dir.path());
        let ledger = Ledger::open(&layout.ledger).unwrap();
        fs::create_dir_all(dir.path().join("local/a")).unwrap();
        fs::create_dir_all(dir.path().join("local/b/deeper")).unwrap();
        fs::write(dir.path().join("local/a/file"), "a").unwrap();
        fs::write(dir.path().join("local/b/deeper/file"), "b").unwrap();

        let mut files = NewFiles::new(&layout, &ledger).unwrap();
        assert_eq!(files.next().unwrap().unwrap(), "local/a/file");

        // local/b is queued but not read yet
        fs::remove_dir_all(dir.path().join("local/b")).unwrap();
        let rest = files.collect::<Result<Vec<_>>>().unwrap();
        assert!(rest.is_empty(), "unexpected {:?}", rest);
    }

    #[test]
    fn test_remove_any() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a/b")).unwrap();
        fs::write(dir.path().join("a/b/c"), "c").unwrap();
        remove_any(&dir.path().join("a")).unwrap();
        assert!(!dir.path().join("a").exists());
        remove_any(&dir.path().join("a")).unwrap();
    }
}
