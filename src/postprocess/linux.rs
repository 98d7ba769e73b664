// src/postprocess/linux.rs

//! ELF post-processing
//!
//! For every new ELF library and executable:
//! 1. `objdump -T` and reject references to `GLIBC_x` at or above the
//!    configured floor, or `GLIBCXX_x` above the configured maximum
//! 2. `strip --strip-debug`
//! 3. `patchelf --set-rpath '$ORIGIN:$ORIGIN/<rel>'` where `<rel>` leads
//!    from the file's directory to `<prefix>/lib`
//!
//! patchelf is itself a recipe. While it is not installed yet (bootstrap)
//! a copy on `PATH` is used, and failing that the rpath step is skipped.

use super::{FileKind, ObjectFormat, PostContext, PostProcessor, candidates};
use crate::error::{Error, Result};
use crate::platform::relative_path;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use version_compare::Version;

/// A versioned symbol reference that breaks portability
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolViolation {
    pub tag: String,
}

pub struct ElfPostProcessor {
    max_glibc: String,
    max_glibcxx: String,
}

impl ElfPostProcessor {
    pub fn new(max_glibc: &str, max_glibcxx: &str) -> Self {
        Self {
            max_glibc: max_glibc.to_string(),
            max_glibcxx: max_glibcxx.to_string(),
        }
    }

    /// Scan `objdump -T` output for disallowed symbol versions
    pub fn check_symbols(&self, objdump_output: &str) -> Vec<SymbolViolation> {
        let mut violations: Vec<SymbolViolation> = Vec::new();

        for token in objdump_output.split_whitespace() {
            let token = token.trim_start_matches('(').trim_end_matches(')');
            let Some((family, version)) = token.split_once('_') else {
                continue;
            };
            if !version.starts_with(|c: char| c.is_ascii_digit()) {
                continue;
            }

            let rejected = match family {
                "GLIBC" => version_at_least(version, &self.max_glibc),
                "GLIBCXX" => version_above(version, &self.max_glibcxx),
                _ => false,
            };

            if rejected && !violations.iter().any(|v| v.tag == token) {
                violations.push(SymbolViolation {
                    tag: token.to_string(),
                });
            }
        }

        violations
    }

    fn verify_symbols(&self, ctx: &PostContext<'_>, path: &Path) -> Result<()> {
        debug!("VERIFYING SYMBOLS {}", path.display());
        let output = ctx.runner.capture(&ctx.command("objdump").arg("-T").arg(path))?;
        let output = String::from_utf8_lossy(&output);

        let violations = self.check_symbols(&output);
        if violations.is_empty() {
            return Ok(());
        }

        let tags: Vec<&str> = violations.iter().map(|v| v.tag.as_str()).collect();
        Err(Error::Portability {
            path: path.display().to_string(),
            reason: format!(
                "references {} (limits: GLIBC < {}, GLIBCXX <= {})",
                tags.join(", "),
                self.max_glibc,
                self.max_glibcxx
            ),
        })
    }

    fn find_patchelf(ctx: &PostContext<'_>) -> Option<PathBuf> {
        let bundled = ctx.layout.bin_dir().join("patchelf");
        if bundled.is_file() {
            return Some(bundled);
        }
        let search = ctx.env.get("PATH")?;
        which::which_in("patchelf", Some(search), &ctx.layout.root).ok()
    }
}

/// `$ORIGIN`-relative rpath for a file living in `file_dir`
pub fn origin_rpath(file_dir: &Path, lib_dir: &Path) -> String {
    let rel = relative_path(file_dir, lib_dir);
    if rel.as_os_str().is_empty() {
        "$ORIGIN".to_string()
    } else {
        format!("$ORIGIN:$ORIGIN/{}", rel.display())
    }
}

fn version_at_least(version: &str, floor: &str) -> bool {
    match (Version::from(version), Version::from(floor)) {
        (Some(v), Some(f)) => v >= f,
        _ => false,
    }
}

fn version_above(version: &str, max: &str) -> bool {
    match (Version::from(version), Version::from(max)) {
        (Some(v), Some(m)) => v > m,
        _ => false,
    }
}

impl PostProcessor for ElfPostProcessor {
    fn process(&self, ctx: &PostContext<'_>, files: &[String]) -> Result<()> {
        let binaries: Vec<_> = candidates(ctx.layout, files)?
            .into_iter()
            .filter(|c| c.info.format == ObjectFormat::Elf)
            .filter(|c| c.info.kind != FileKind::StaticArchive)
            .collect();
        if binaries.is_empty() {
            return Ok(());
        }

        let patchelf = Self::find_patchelf(ctx);
        if patchelf.is_none() {
            warn!("patchelf not available yet, leaving rpaths untouched");
        }

        let lib_dir = ctx.layout.lib_dir();
        for binary in &binaries {
            self.verify_symbols(ctx, &binary.path)?;

            ctx.runner
                .run(&ctx.command("strip").arg("--strip-debug").arg(&binary.path))?;

            if let Some(patchelf) = &patchelf {
                let dir = binary.path.parent().unwrap_or(ctx.layout.prefix.as_path());
                let rpath = origin_rpath(dir, &lib_dir);
                info!("ADJUSTING RPATH {} -> {}", binary.path.display(), rpath);
                ctx.runner.run(
                    &ctx.command(patchelf)
                        .arg("--set-rpath")
                        .arg(&rpath)
                        .arg(&binary.path),
                )?;
            }
        }

        Ok(())
    }
}
