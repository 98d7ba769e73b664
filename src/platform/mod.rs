// src/platform/mod.rs

//! Host platform traits
//!
//! A platform decides where the prefix and the ledger live inside an
//! environment root, which recipes make up a freshly initialised
//! environment, which compiler variables every build sees, and which
//! portability post-processor adjusts installed binaries.

mod linux;
mod macos;

pub use linux::LinuxPlatform;
pub use macos::MacosPlatform;

use crate::config::EnvSettings;
use crate::error::{Error, Result};
use crate::postprocess::PostProcessor;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

/// Directory layout of one environment root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub root: PathBuf,
    /// `--prefix` handed to build tools
    pub prefix: PathBuf,
    /// SQLite ledger file
    pub ledger: PathBuf,
    pub build_dir: PathBuf,
    pub cache_dir: PathBuf,
}

impl Layout {
    pub fn new(root: &Path, platform: &dyn Platform, cache_dir: PathBuf) -> Self {
        Self {
            root: root.to_path_buf(),
            prefix: root.join(platform.prefix_subpath()),
            ledger: root.join(platform.ledger_subpath()),
            build_dir: root.join("build"),
            cache_dir,
        }
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.prefix.join("bin")
    }

    pub fn lib_dir(&self) -> PathBuf {
        self.prefix.join("lib")
    }

    pub fn include_dir(&self) -> PathBuf {
        self.prefix.join("include")
    }

    /// Interpreter used by python-style recipes
    pub fn python(&self) -> PathBuf {
        self.bin_dir().join("python")
    }

    /// Root-relative ledger path for `path`, or `None` if it lies outside the root
    pub fn relative(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let rel = rel.to_str()?;
        if rel.is_empty() {
            None
        } else {
            Some(rel.to_string())
        }
    }

    /// True if `path` is inside the prefix
    pub fn in_prefix(&self, path: &Path) -> bool {
        path.starts_with(&self.prefix)
    }
}

/// Relative path from directory `from` to `to`
///
/// Both paths must be absolute and free of `..` components.
pub fn relative_path(from: &Path, to: &Path) -> PathBuf {
    let from: Vec<Component<'_>> = from.components().collect();
    let to: Vec<Component<'_>> = to.components().collect();
    let common = from.iter().zip(&to).take_while(|(a, b)| a == b).count();

    let mut rel = PathBuf::new();
    for _ in common..from.len() {
        rel.push("..");
    }
    for part in &to[common..] {
        rel.push(part.as_os_str());
    }
    rel
}

/// Behaviour that differs between host operating systems
pub trait Platform {
    /// Name used for `[recipe.platform.<name>]` sections
    fn name(&self) -> &'static str;

    /// Prefix location relative to the environment root
    fn prefix_subpath(&self) -> &'static str;

    /// Ledger location relative to the environment root
    fn ledger_subpath(&self) -> &'static str;

    /// Recipes installed by `init`, in order
    fn base_recipes(&self) -> Vec<String>;

    /// Compiler and search-path variables for every build step
    fn build_vars(&self, layout: &Layout) -> BTreeMap<String, String>;

    /// Architectures for per-arch fat builds; empty when unsupported
    fn target_archs(&self) -> &[String] {
        &[]
    }

    /// Shared library suffix, e.g. `so` or `dylib`
    fn shared_lib_ext(&self) -> &'static str;

    fn post_processor(&self) -> Box<dyn PostProcessor>;

    /// Finishing touches once the base set is installed
    ///
    /// Returns the paths it created so they can be recorded.
    fn post_init(&self, _layout: &Layout) -> Result<Vec<PathBuf>> {
        Ok(Vec::new())
    }
}

/// Platform for the host this binary was compiled for
pub fn host(settings: &EnvSettings) -> Box<dyn Platform> {
    if cfg!(target_os = "macos") {
        Box::new(MacosPlatform::new(&settings.macos))
    } else {
        Box::new(LinuxPlatform::new(&settings.linux))
    }
}

/// Platform by name
pub fn by_name(name: &str, settings: &EnvSettings) -> Result<Box<dyn Platform>> {
    match name {
        "linux" => Ok(Box::new(LinuxPlatform::new(&settings.linux))),
        "macos" => Ok(Box::new(MacosPlatform::new(&settings.macos))),
        other => Err(Error::Config(format!("unsupported platform: {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_path() {
        assert_eq!(
            relative_path(Path::new("/env/local/bin"), Path::new("/env/local/lib")),
            PathBuf::from("../lib")
        );
        assert_eq!(
            relative_path(
                Path::new("/env/local/lib/python2.7/lib-dynload"),
                Path::new("/env/local/lib")
            ),
            PathBuf::from("../..")
        );
        assert_eq!(
            relative_path(Path::new("/env/local/lib"), Path::new("/env/local/lib")),
            PathBuf::new()
        );
    }

    #[test]
    fn test_layout_per_platform() {
        let settings = EnvSettings::default();
        let root = Path::new("/tmp/envA");

        let linux = by_name("linux", &settings).unwrap();
        let layout = Layout::new(root, linux.as_ref(), root.join("cache"));
        assert_eq!(layout.prefix, PathBuf::from("/tmp/envA/local"));
        assert_eq!(layout.ledger, PathBuf::from("/tmp/envA/local/kiln.db"));
        assert_eq!(
            layout.relative(Path::new("/tmp/envA/local/lib/libz.so")),
            Some("local/lib/libz.so".to_string())
        );
        assert_eq!(layout.relative(Path::new("/etc/passwd")), None);

        let mac = by_name("macos", &settings).unwrap();
        let layout = Layout::new(root, mac.as_ref(), root.join("cache"));
        assert_eq!(
            layout.prefix,
            PathBuf::from("/tmp/envA/Contents/Frameworks/Python.framework/Versions/2.7")
        );
        assert_eq!(layout.ledger, PathBuf::from("/tmp/envA/Contents/kiln.db"));

        assert!(by_name("plan9", &settings).is_err());
    }
}
