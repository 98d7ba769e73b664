// src/recipe/kitchen/nway.rs

//! N-way builds: one build per target architecture, merged with `lipo`
//!
//! The unpacked tree is copied to `<work dir>/<arch>` for every
//! architecture. Each copy is configured and made with single-arch compiler
//! flags, then every object file of the first copy is replaced by a fat
//! file combining it with its peers. Install runs from the first copy.

use super::Cook;
use crate::error::Result;
use crate::postprocess::{ObjectFormat, classify};
use crate::recipe::PatchStage;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Flag variables that carry `-arch` options
const ARCH_FLAG_VARS: &[&str] = &["CFLAGS", "CXXFLAGS", "LDFLAGS"];

/// Configure and make per architecture; returns the merged primary tree
pub(super) fn build(cook: &Cook<'_>, tree: &Path) -> Result<PathBuf> {
    let archs = cook.kitchen().config.archs.clone();
    let work_dir = tree.parent().unwrap_or(tree).to_path_buf();
    let steps = cook.steps();

    let mut trees = Vec::with_capacity(archs.len());
    for arch in &archs {
        let arch_tree = work_dir.join(arch);
        if arch_tree.exists() {
            fs::remove_dir_all(&arch_tree)?;
        }
        copy_tree(tree, &arch_tree)?;

        info!("BUILDING {} for {}", cook.recipe().name, arch);
        let arch_cook = cook.variant(arch_tree.clone(), single_arch_env(cook.env(), arch));
        steps.configure(&arch_cook, &arch_tree)?;
        arch_cook.apply_patches(PatchStage::PostConfigure, &arch_tree)?;
        steps.make(&arch_cook, &arch_tree)?;
        trees.push(arch_tree);
    }

    let merged = merge_trees(cook, &trees)?;
    debug!("Merged {} fat files for {}", merged, cook.recipe().name);
    Ok(trees.swap_remove(0))
}

/// `env` with every `-arch` option replaced by `-arch <arch>`
pub fn single_arch_env(env: &BTreeMap<String, String>, arch: &str) -> BTreeMap<String, String> {
    let mut env = env.clone();
    for key in ARCH_FLAG_VARS {
        let current = env.get(*key).cloned().unwrap_or_default();
        env.insert(key.to_string(), single_arch_flags(&current, arch));
    }
    env
}

fn single_arch_flags(flags: &str, arch: &str) -> String {
    let mut out = vec!["-arch".to_string(), arch.to_string()];
    let mut tokens = flags.split_whitespace();
    while let Some(token) = tokens.next() {
        if token == "-arch" {
            tokens.next();
        } else {
            out.push(token.to_string());
        }
    }
    out.join(" ")
}

/// Copy a tree, keeping symlinks as symlinks and file permissions as they are
pub fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(io::Error::from)?;
        let Ok(rel) = entry.path().strip_prefix(src) else {
            continue;
        };
        let target = dst.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            symlink(fs::read_link(entry.path())?, &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Replace object files in `trees[0]` by fat files built from all trees
fn merge_trees(cook: &Cook<'_>, trees: &[PathBuf]) -> Result<usize> {
    let Some((primary, others)) = trees.split_first() else {
        return Ok(0);
    };

    let mut merged = 0;
    for entry in WalkDir::new(primary).follow_links(false) {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(info) = classify(entry.path())? else {
            continue;
        };
        if !matches!(info.format, ObjectFormat::MachO | ObjectFormat::Archive) {
            continue;
        }

        let Ok(rel) = entry.path().strip_prefix(primary) else {
            continue;
        };
        let peers: Vec<PathBuf> = others.iter().map(|t| t.join(rel)).collect();
        if let Some(missing) = peers.iter().find(|p| !p.is_file()) {
            debug!("Not merging {}: {} missing", rel.display(), missing.display());
            continue;
        }

        lipo_create(cook, entry.path(), &peers)?;
        merged += 1;
    }
    Ok(merged)
}

fn lipo_create(cook: &Cook<'_>, primary: &Path, peers: &[PathBuf]) -> Result<()> {
    let mut output = OsString::from(primary.as_os_str());
    output.push(".lipo");
    let output = PathBuf::from(output);

    let cmd = cook
        .command("lipo")
        .arg("-create")
        .arg(primary)
        .args(peers)
        .arg("-output")
        .arg(&output);
    cook.run(&cmd)?;

    let permissions = fs::metadata(primary)?.permissions();
    fs::set_permissions(&output, permissions)?;
    fs::rename(&output, primary)?;
    Ok(())
}
