// src/postprocess/macos.rs

//! Mach-O post-processing
//!
//! Libraries must be universal: every `.a`, `.dylib` and `.so` is checked
//! with `lipo -info` for all target architectures. Load commands that point
//! at absolute paths inside the environment root are rewritten to
//! `@loader_path/<relative>` with `install_name_tool`, and a library's own
//! install name is made loader-relative as well.

use super::{FileKind, ObjectFormat, PostContext, PostProcessor, candidates};
use crate::error::{Error, Result};
use crate::platform::relative_path;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use version_compare::Version;

const LOADER_PATH: &str = "@loader_path/";

pub struct MachOPostProcessor {
    archs: Vec<String>,
    sdk: Option<PathBuf>,
}

impl MachOPostProcessor {
    pub fn new(archs: Vec<String>, sdk: Option<PathBuf>) -> Self {
        Self { archs, sdk }
    }

    /// Target architectures missing from `lipo -info` output
    pub fn missing_archs(&self, lipo_output: &str) -> Vec<String> {
        let present: Vec<&str> = lipo_output
            .trim()
            .rsplit(':')
            .next()
            .unwrap_or_default()
            .split_whitespace()
            .collect();

        self.archs
            .iter()
            .filter(|arch| !present.contains(&arch.as_str()))
            .cloned()
            .collect()
    }

    fn verify_archs(&self, ctx: &PostContext<'_>, path: &Path) -> Result<()> {
        let output = ctx.runner.capture(&ctx.command("lipo").arg("-info").arg(path))?;
        let missing = self.missing_archs(&String::from_utf8_lossy(&output));
        if missing.is_empty() {
            return Ok(());
        }
        Err(Error::Portability {
            path: path.display().to_string(),
            reason: format!("missing architectures: {}", missing.join(", ")),
        })
    }

    fn libsystem_version(ctx: &PostContext<'_>, path: &Path) -> Result<Option<String>> {
        let output = ctx.runner.capture(&ctx.command("otool").arg("-L").arg(path))?;
        Ok(parse_load_commands(&String::from_utf8_lossy(&output))
            .into_iter()
            .find(|dep| dep.path.contains("libSystem.B.dylib"))
            .and_then(|dep| dep.current_version))
    }

    fn verify_libsystem(&self, ctx: &PostContext<'_>, path: &Path, sdk_version: &str) -> Result<()> {
        let Some(found) = Self::libsystem_version(ctx, path)? else {
            return Ok(());
        };
        match (Version::from(&found), Version::from(sdk_version)) {
            (Some(f), Some(s)) if f > s => Err(Error::Portability {
                path: path.display().to_string(),
                reason: format!(
                    "linked against libSystem {} but the SDK provides {}",
                    found, sdk_version
                ),
            }),
            _ => Ok(()),
        }
    }

    fn relink(&self, ctx: &PostContext<'_>, path: &Path, kind: FileKind) -> Result<()> {
        let dir = path.parent().unwrap_or(ctx.layout.prefix.as_path());
        let lib_dir = ctx.layout.lib_dir();

        if kind == FileKind::SharedLibrary {
            let output = ctx.runner.capture(&ctx.command("otool").arg("-D").arg(path))?;
            let output = String::from_utf8_lossy(&output);
            if let Some(id) = output.lines().nth(1).map(str::trim)
                && Path::new(id).starts_with(&ctx.layout.root)
                && let Some(name) = path.file_name()
            {
                let new_id = format!("{}{}", LOADER_PATH, name.to_string_lossy());
                debug!("Setting install name of {} to {}", path.display(), new_id);
                ctx.runner.run(
                    &ctx.command("install_name_tool")
                        .arg("-id")
                        .arg(&new_id)
                        .arg(path),
                )?;
            }
        }

        let output = ctx.runner.capture(&ctx.command("otool").arg("-L").arg(path))?;
        for dep in parse_load_commands(&String::from_utf8_lossy(&output)) {
            let Some(new) = loader_relative(&dep.path, dir, &ctx.layout.root, &lib_dir) else {
                continue;
            };
            info!("ADJUSTING LOAD PATH {}: {} -> {}", path.display(), dep.path, new);
            ctx.runner.run(
                &ctx.command("install_name_tool")
                    .arg("-change")
                    .arg(&dep.path)
                    .arg(&new)
                    .arg(path),
            )?;
        }

        Ok(())
    }
}

/// One dependency line of `otool -L`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadCommand {
    pub path: String,
    pub current_version: Option<String>,
}

/// Parse `otool -L` output, skipping the header line naming the file
pub fn parse_load_commands(output: &str) -> Vec<LoadCommand> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() {
                return None;
            }
            let (path, meta) = match line.find(" (") {
                Some(idx) => (&line[..idx], &line[idx..]),
                None => (line, ""),
            };
            let current_version = meta
                .split("current version ")
                .nth(1)
                .map(|v| v.trim_end_matches(')').trim().to_string());
            Some(LoadCommand {
                path: path.to_string(),
                current_version,
            })
        })
        .collect()
}

/// Loader-relative replacement for a dependency reference, if one is needed
///
/// Absolute references into the root are rewritten. A loader-relative
/// reference that does not resolve next to the file but does resolve in
/// the prefix's `lib` directory (a library whose install name was already
/// made relative) is redirected there.
pub fn loader_relative(dep: &str, file_dir: &Path, root: &Path, lib_dir: &Path) -> Option<String> {
    let target = if Path::new(dep).starts_with(root) {
        PathBuf::from(dep)
    } else if let Some(rest) = dep.strip_prefix(LOADER_PATH) {
        if file_dir.join(rest).exists() || !lib_dir.join(rest).exists() {
            return None;
        }
        lib_dir.join(rest)
    } else {
        return None;
    };

    let target_dir = target.parent()?;
    let name = target.file_name()?;
    let rel = relative_path(file_dir, target_dir).join(name);
    let new = format!("{}{}", LOADER_PATH, rel.display());
    (new != dep).then_some(new)
}

impl PostProcessor for MachOPostProcessor {
    fn process(&self, ctx: &PostContext<'_>, files: &[String]) -> Result<()> {
        let binaries = candidates(ctx.layout, files)?;
        if binaries.is_empty() {
            return Ok(());
        }

        let sdk_version = match &self.sdk {
            Some(sdk) => {
                Self::libsystem_version(ctx, &sdk.join("usr/lib/libSystem.B.dylib"))?
            }
            None => None,
        };

        for binary in &binaries {
            let claims_library = binary.info.kind != FileKind::Executable;
            if claims_library && self.archs.len() > 1 {
                self.verify_archs(ctx, &binary.path)?;
            }

            if binary.info.format != ObjectFormat::MachO {
                continue;
            }

            if let Some(sdk_version) = &sdk_version {
                self.verify_libsystem(ctx, &binary.path, sdk_version)?;
            }

            self.relink(ctx, &binary.path, binary.info.kind)?;
        }

        Ok(())
    }
}
