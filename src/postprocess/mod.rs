// src/postprocess/mod.rs

//! Binary portability post-processing
//!
//! Runs once per recipe, right before its new files are recorded in the
//! ledger. Each platform variant verifies that binaries will load on the
//! oldest supported OS release, strips them, and rewrites their library
//! search paths to be relative to the binary itself so the environment root
//! can be moved anywhere.
//!
//! Every adjustment is idempotent: running the processor again over an
//! already processed file either changes nothing or re-verifies it.

pub mod linux;
pub mod macos;

use crate::error::Result;
use crate::platform::Layout;
use crate::runner::{CommandRunner, CommandSpec};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::debug;

/// What a binary is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    SharedLibrary,
    StaticArchive,
    Executable,
}

/// Object file container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectFormat {
    Elf,
    MachO,
    Archive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinaryInfo {
    pub kind: FileKind,
    pub format: ObjectFormat,
}

/// True for `libfoo.so`, `libfoo.so.1.2`, `foo.dylib`
pub fn is_shared_lib_name(name: &str) -> bool {
    name.ends_with(".so") || name.contains(".so.") || name.ends_with(".dylib")
}

/// Classify a file by its magic bytes and name
///
/// Returns `None` for anything that is not an object file, including text
/// files that merely carry a library extension (linker scripts).
pub fn classify(path: &Path) -> io::Result<Option<BinaryInfo>> {
    let mut magic = [0u8; 16];
    let mut file = File::open(path)?;
    if let Err(e) = file.read_exact(&mut magic) {
        return match e.kind() {
            io::ErrorKind::UnexpectedEof => Ok(None),
            _ => Err(e),
        };
    }

    let format = match goblin::peek_bytes(&magic) {
        Ok(goblin::Hint::Elf(_)) => ObjectFormat::Elf,
        Ok(goblin::Hint::Mach(_)) | Ok(goblin::Hint::MachFat(_)) => ObjectFormat::MachO,
        Ok(goblin::Hint::Archive) => ObjectFormat::Archive,
        _ => return Ok(None),
    };

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let kind = match format {
        ObjectFormat::Archive => FileKind::StaticArchive,
        _ if is_shared_lib_name(&name) => FileKind::SharedLibrary,
        _ => FileKind::Executable,
    };

    Ok(Some(BinaryInfo { kind, format }))
}

/// Everything a post-processor may touch
pub struct PostContext<'a> {
    pub layout: &'a Layout,
    pub runner: &'a dyn CommandRunner,
    /// Environment for the binary tools
    pub env: &'a BTreeMap<String, String>,
}

impl PostContext<'_> {
    pub fn command(&self, program: impl AsRef<std::ffi::OsStr>) -> CommandSpec {
        CommandSpec::new(program).env_map(self.env.clone())
    }
}

/// A binary selected for processing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub path: PathBuf,
    pub info: BinaryInfo,
}

/// Pick the binaries worth processing out of a set of root-relative paths
///
/// Symlinks, directory markers, files outside the prefix and files whose
/// canonical path differs from their recorded path are skipped.
pub fn candidates(layout: &Layout, files: &[String]) -> Result<Vec<Candidate>> {
    let mut out = Vec::new();
    let canonical_root = layout.root.canonicalize()?;

    for rel in files {
        if rel.ends_with('/') {
            continue;
        }
        let path = layout.root.join(rel);
        if !layout.in_prefix(&path) {
            continue;
        }

        let meta = match path.symlink_metadata() {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        if !meta.file_type().is_file() {
            continue;
        }
        if path.canonicalize()? != canonical_root.join(rel) {
            debug!("Skipping {}: reached through a symlinked directory", rel);
            continue;
        }

        if let Some(info) = classify(&path)? {
            out.push(Candidate { path, info });
        }
    }

    Ok(out)
}

/// Platform-specific binary adjustment
pub trait PostProcessor {
    /// Adjust the binaries among `files` (root-relative paths)
    fn process(&self, ctx: &PostContext<'_>, files: &[String]) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn layout_for(root: &Path) -> Layout {
        Layout {
            root: root.to_path_buf(),
            prefix: root.join("local"),
            ledger: root.join("local/kiln.db"),
            build_dir: root.join("build"),
            cache_dir: root.join("cache"),
        }
    }

    fn elf_header() -> Vec<u8> {
        let mut bytes = vec![0x7f, b'E', b'L', b'F', 2, 1, 1, 0];
        bytes.resize(64, 0);
        bytes
    }

    #[test]
    fn test_shared_lib_names() {
        assert!(is_shared_lib_name("libz.so"));
        assert!(is_shared_lib_name("libz.so.1.2.7"));
        assert!(is_shared_lib_name("libpng.dylib"));
        assert!(!is_shared_lib_name("libz.a"));
        assert!(!is_shared_lib_name("python"));
    }

    #[test]
    fn test_classify_by_magic() {
        let dir = tempfile::tempdir().unwrap();

        let lib = dir.path().join("libz.so.1");
        fs::write(&lib, elf_header()).unwrap();
        assert_eq!(
            classify(&lib).unwrap(),
            Some(BinaryInfo {
                kind: FileKind::SharedLibrary,
                format: ObjectFormat::Elf
            })
        );

        let exe = dir.path().join("python");
        fs::write(&exe, elf_header()).unwrap();
        assert_eq!(classify(&exe).unwrap().unwrap().kind, FileKind::Executable);

        let script = dir.path().join("libc.so");
        fs::write(&script, "/* GNU ld script */\nGROUP ( libc.so.6 )\n").unwrap();
        assert_eq!(classify(&script).unwrap(), None);

        let tiny = dir.path().join("empty.so");
        fs::write(&tiny, b"x").unwrap();
        assert_eq!(classify(&tiny).unwrap(), None);

        let archive = dir.path().join("libz.a");
        fs::write(&archive, b"!<arch>\nfoo.o/          0           0     0     644     0         `\n")
            .unwrap();
        assert_eq!(
            classify(&archive).unwrap().unwrap().kind,
            FileKind::StaticArchive
        );
    }

    #[test]
    fn test_candidates_skip_symlinks_and_outside_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let layout = layout_for(root);
        fs::create_dir_all(root.join("local/lib")).unwrap();
        fs::write(root.join("local/lib/libz.so.1"), elf_header()).unwrap();
        std::os::unix::fs::symlink("libz.so.1", root.join("local/lib/libz.so")).unwrap();
        fs::write(root.join("stray.so"), elf_header()).unwrap();
        fs::write(root.join("local/lib/README"), "text").unwrap();

        let files = vec![
            "local/lib/".to_string(),
            "local/lib/libz.so".to_string(),
            "local/lib/libz.so.1".to_string(),
            "local/lib/README".to_string(),
            "stray.so".to_string(),
            "local/lib/missing.so".to_string(),
        ];
        let found = candidates(&layout, &files).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].path, root.join("local/lib/libz.so.1"));
    }
}
