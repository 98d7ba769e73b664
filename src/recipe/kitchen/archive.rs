// src/recipe/kitchen/archive.rs

//! Source archive utilities for the Kitchen

use crate::error::Result;
use crate::runner::{CommandRunner, CommandSpec};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Name of the merged tree some n-way sources ship with
const FAT_DIR: &str = "fat";

/// `tar` extraction flag for an archive name
pub fn tar_flag(archive: &Path) -> &'static str {
    let name = archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    if name.ends_with(".tar.bz2") || name.ends_with(".tbz2") {
        "-xjf"
    } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        "-xzf"
    } else if name.ends_with(".tar.xz") || name.ends_with(".txz") {
        "-xJf"
    } else {
        "-xf"
    }
}

/// Extract `archive` into a fresh `work_dir`
///
/// Whatever a previous build left in `work_dir` is removed first.
pub fn unpack(
    runner: &dyn CommandRunner,
    env: &BTreeMap<String, String>,
    archive: &Path,
    work_dir: &Path,
) -> Result<()> {
    if work_dir.exists() {
        debug!("Removing previous build tree {}", work_dir.display());
        fs::remove_dir_all(work_dir)?;
    }
    fs::create_dir_all(work_dir)?;

    let cmd = CommandSpec::new("tar")
        .env_map(env.clone())
        .arg(tar_flag(archive))
        .arg(archive)
        .arg("-C")
        .arg(work_dir);
    runner.run(&cmd)
}

/// The single top-level directory an archive unpacked into
///
/// Per-architecture copies and merged trees that sit next to it are
/// ignored. Returns `None` unless exactly one candidate is left.
pub fn find_source_dir(work_dir: &Path, archs: &[String]) -> io::Result<Option<PathBuf>> {
    let entries = match fs::read_dir(work_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    let mut found = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == FAT_DIR || archs.iter().any(|a| *a == name) {
            continue;
        }
        found.push(entry.path());
    }

    if found.len() == 1 {
        Ok(found.pop())
    } else {
        Ok(None)
    }
}
