// src/config.rs

//! Per-root settings and the build environment map
//!
//! An environment root may carry a `kiln.toml` next to its ledger:
//!
//! ```toml
//! base_recipes = ["python27", "py_setuptools"]
//! cache_dir = "/var/cache/kiln"
//!
//! [build]
//! jobs = 8
//!
//! [env]
//! LC_ALL = "C"
//!
//! [linux]
//! max_glibc = "2.4"
//! max_glibcxx = "3.4"
//!
//! [macos]
//! target_archs = ["i386", "x86_64"]
//! deployment_target = "10.5"
//! ```
//!
//! The [`BuildEnv`] is assembled once per root from a snapshot of the
//! process environment and is never mutated afterwards. Subprocesses receive
//! an explicit copy of it, plus per-call overrides.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Settings file name inside an environment root
pub const SETTINGS_FILE_NAME: &str = "kiln.toml";

/// Environment variable overriding the download cache directory
pub const CACHE_DIR_ENV: &str = "KILN_DOWNLOAD_CACHE";

/// Environment variable listing extra recipe directories (colon-separated)
pub const RECIPE_PATH_ENV: &str = "KILN_RECIPE_PATH";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EnvSettings {
    /// Replaces the platform's base recipe set
    pub base_recipes: Option<Vec<String>>,
    pub cache_dir: Option<PathBuf>,
    pub build: BuildSettings,
    /// Extra variables exported to every build step
    pub env: BTreeMap<String, String>,
    pub linux: LinuxSettings,
    pub macos: MacosSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildSettings {
    pub jobs: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LinuxSettings {
    /// Oldest glibc the tree must run on; `GLIBC_x` symbols at or above it are rejected
    pub max_glibc: String,
    /// Newest libstdc++ symbol version allowed
    pub max_glibcxx: String,
}

impl Default for LinuxSettings {
    fn default() -> Self {
        Self {
            max_glibc: "2.4".to_string(),
            max_glibcxx: "3.4".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MacosSettings {
    pub target_archs: Vec<String>,
    pub deployment_target: String,
    /// SDK root passed as `-isysroot`; also enables the libSystem version check
    pub sdk: Option<PathBuf>,
    pub cc: Option<String>,
    pub cxx: Option<String>,
}

impl Default for MacosSettings {
    fn default() -> Self {
        Self {
            target_archs: vec!["i386".to_string(), "x86_64".to_string()],
            deployment_target: "10.5".to_string(),
            sdk: None,
            cc: None,
            cxx: None,
        }
    }
}

impl EnvSettings {
    /// Load `<root>/kiln.toml`, or defaults when it does not exist
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(SETTINGS_FILE_NAME);
        if !path.exists() {
            return Ok(Self::default());
        }

        debug!("Loading settings from {}", path.display());
        let content = fs::read_to_string(&path)?;
        Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Parallel make jobs
    pub fn jobs(&self) -> usize {
        self.build.jobs.filter(|&j| j > 0).unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    /// Download cache directory for `root`
    pub fn cache_dir(&self, root: &Path) -> PathBuf {
        self.resolve_cache_dir(root, std::env::var_os(CACHE_DIR_ENV))
    }

    /// Cache directory given an explicit value of the override variable
    pub fn resolve_cache_dir(&self, root: &Path, env_override: Option<OsString>) -> PathBuf {
        let chosen = env_override
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .or_else(|| self.cache_dir.clone());

        match chosen {
            Some(dir) if dir.is_absolute() => dir,
            Some(dir) => root.join(dir),
            None => root.join("cache"),
        }
    }
}

/// Extra recipe directories from `KILN_RECIPE_PATH`
pub fn recipe_search_path() -> Vec<PathBuf> {
    std::env::var_os(RECIPE_PATH_ENV)
        .map(|v| std::env::split_paths(&v).filter(|p| !p.as_os_str().is_empty()).collect())
        .unwrap_or_default()
}

/// Immutable variable map handed to every subprocess
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildEnv {
    vars: BTreeMap<String, String>,
}

impl BuildEnv {
    /// Snapshot the current process environment
    ///
    /// Variables that are not valid UTF-8 are dropped.
    pub fn from_process() -> Self {
        Self {
            vars: std::env::vars_os()
                .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
                .collect(),
        }
    }

    pub fn from_vars(vars: BTreeMap<String, String>) -> Self {
        Self { vars }
    }

    /// Put `dir` in front of a search-path variable such as `PATH`
    pub fn prepend_path(mut self, key: &str, dir: &Path) -> Self {
        let dir = dir.to_string_lossy().into_owned();
        let value = match self.vars.get(key) {
            Some(existing) if !existing.is_empty() => format!("{}:{}", dir, existing),
            _ => dir,
        };
        self.vars.insert(key.to_string(), value);
        self
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn extend<I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.vars.extend(vars);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    /// Copy of the map with `overrides` layered on top
    pub fn with_overrides(&self, overrides: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut vars = self.vars.clone();
        for (key, value) in overrides {
            vars.insert(key.clone(), value.clone());
        }
        vars
    }
}
