// src/recipe/patch.rs

//! Line patches
//!
//! A patch is a pure transform from the lines of one file to its new lines.
//! Lines are addressed by index, so lookahead is explicit: a block
//! replacement says how many lines after its anchor it swallows. Every
//! input line is visited exactly once.
//!
//! Patched files are rewritten through a temporary file in the same
//! directory, carrying over the original permissions, and then atomically
//! renamed over the original.
//!
//! ```toml
//! [[recipe.platform.linux.patches]]
//! file = "pyconfig.h"
//! stage = "post-configure"
//! op = "delete_lines"
//! pattern = "HAVE_EPOLL"
//! ```

use crate::error::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::{debug, warn};

/// When a patch runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PatchStage {
    /// Against the unpacked source, before configure
    #[default]
    PreConfigure,
    /// Against generated files, before make
    PostConfigure,
    /// Against installed files, relative to the prefix
    PostInstall,
}

/// A patch bound to one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    /// Path relative to the source tree (or prefix for post-install)
    pub file: String,

    #[serde(default)]
    pub stage: PatchStage,

    #[serde(flatten)]
    pub op: PatchOp,
}

fn default_marker() -> String {
    "#".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PatchOp {
    /// Substring replacement on every line
    Replace { from: String, to: String },

    /// Regex replacement on every line (line ending excluded)
    Regex {
        pattern: String,
        replacement: String,
    },

    /// Prefix matching lines with a comment marker
    Comment {
        pattern: String,
        #[serde(default = "default_marker")]
        marker: String,
    },

    /// Remove the first comment marker from matching commented lines
    Uncomment {
        pattern: String,
        #[serde(default = "default_marker")]
        marker: String,
    },

    DeleteLines { pattern: String },

    InsertBefore { pattern: String, text: String },

    InsertAfter { pattern: String, text: String },

    /// Replace the line containing `start` and the `skip` lines after it
    ReplaceBlock {
        start: String,
        #[serde(default)]
        skip: usize,
        text: String,
    },
}

/// Split `text` into lines that each end with a newline
fn text_lines(text: &str) -> Vec<String> {
    text.split_inclusive('\n')
        .map(|l| {
            if l.ends_with('\n') {
                l.to_string()
            } else {
                format!("{}\n", l)
            }
        })
        .collect()
}

/// Split a line into its body and its line ending
fn split_ending(line: &str) -> (&str, &str) {
    let body = line.trim_end_matches(['\n', '\r']);
    (body, &line[body.len()..])
}

impl PatchOp {
    /// Transform `lines` (each carrying its own line ending)
    pub fn apply(&self, lines: &[String]) -> Result<Vec<String>> {
        let mut out = Vec::with_capacity(lines.len());

        match self {
            PatchOp::Replace { from, to } => {
                out.extend(lines.iter().map(|l| l.replace(from.as_str(), to)));
            }
            PatchOp::Regex {
                pattern,
                replacement,
            } => {
                let re = Regex::new(pattern)
                    .map_err(|e| Error::Config(format!("bad patch regex '{}': {}", pattern, e)))?;
                for line in lines {
                    let (body, ending) = split_ending(line);
                    out.push(format!("{}{}", re.replace_all(body, replacement.as_str()), ending));
                }
            }
            PatchOp::Comment { pattern, marker } => {
                for line in lines {
                    if line.contains(pattern.as_str()) && !line.trim_start().starts_with(marker.as_str()) {
                        out.push(format!("{}{}", marker, line));
                    } else {
                        out.push(line.clone());
                    }
                }
            }
            PatchOp::Uncomment { pattern, marker } => {
                for line in lines {
                    if line.trim_start().starts_with(marker.as_str())
                        && line.contains(pattern.as_str())
                        && let Some(idx) = line.find(marker.as_str())
                    {
                        out.push(format!("{}{}", &line[..idx], &line[idx + marker.len()..]));
                    } else {
                        out.push(line.clone());
                    }
                }
            }
            PatchOp::DeleteLines { pattern } => {
                out.extend(lines.iter().filter(|l| !l.contains(pattern.as_str())).cloned());
            }
            PatchOp::InsertBefore { pattern, text } => {
                for line in lines {
                    if line.contains(pattern.as_str()) {
                        out.extend(text_lines(text));
                    }
                    out.push(line.clone());
                }
            }
            PatchOp::InsertAfter { pattern, text } => {
                for line in lines {
                    out.push(line.clone());
                    if line.contains(pattern.as_str()) {
                        out.extend(text_lines(text));
                    }
                }
            }
            PatchOp::ReplaceBlock { start, skip, text } => {
                let mut i = 0;
                while i < lines.len() {
                    if lines[i].contains(start.as_str()) {
                        out.extend(text_lines(text));
                        i = (i + 1 + skip).min(lines.len());
                    } else {
                        out.push(lines[i].clone());
                        i += 1;
                    }
                }
            }
        }

        Ok(out)
    }
}

impl Patch {
    /// Apply to `base/<file>` in place
    pub fn apply_in(&self, base: &Path) -> Result<()> {
        let path = base.join(&self.file);
        if !path.is_file() {
            return Err(Error::Config(format!(
                "patch target not found: {}",
                path.display()
            )));
        }

        debug!("Patching {}", path.display());
        let content = fs::read_to_string(&path)?;
        let lines: Vec<String> = content.split_inclusive('\n').map(str::to_string).collect();
        let patched = self.op.apply(&lines)?;

        if patched == lines {
            warn!("Patch left {} unchanged", path.display());
            return Ok(());
        }

        rewrite_file(&path, &patched)
    }
}

/// Replace a file's content atomically, keeping its permissions
pub fn rewrite_file(path: &Path, lines: &[String]) -> Result<()> {
    let dir = path.parent().unwrap_or(Path::new("."));
    let permissions = fs::metadata(path)?.permissions();

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    for line in lines {
        tmp.write_all(line.as_bytes())?;
    }
    tmp.flush()?;
    fs::set_permissions(tmp.path(), permissions)?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}
