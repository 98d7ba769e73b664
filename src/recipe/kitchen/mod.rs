// src/recipe/kitchen/mod.rs

//! Kitchen: the build context of one environment root
//!
//! The Kitchen owns nothing itself. It borrows the layout, the build
//! environment, the subprocess runner and the download cache, and hands a
//! [`Cook`] to every recipe that gets prepared:
//! - Fetching source archives through the shared cache
//! - Unpacking them into `<root>/build/<archive name>/`
//! - Applying line patches and running the style's configure/make/install
//! - Per-architecture builds merged into fat binaries (n-way)

mod archive;
mod cook;
mod nway;
mod steps;

pub use archive::{find_source_dir, tar_flag};
pub use cook::{Cook, RecipeState};
pub use steps::{BuildSteps, CMAKE_BUILD_DIR, steps_for};

use super::Recipe;
use crate::config::BuildEnv;
use crate::error::{Error, Result};
use crate::fetch::{SourceCache, cache_file_name};
use crate::platform::Layout;
use crate::runner::CommandRunner;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Knobs a Kitchen is created with
#[derive(Debug, Clone)]
pub struct KitchenConfig {
    /// Parallel make jobs
    pub jobs: usize,
    /// Target architectures for n-way builds; fewer than two disables them
    pub archs: Vec<String>,
    /// Shared library suffix of the host
    pub lib_ext: String,
}

impl Default for KitchenConfig {
    fn default() -> Self {
        Self {
            jobs: 1,
            archs: Vec::new(),
            lib_ext: "so".to_string(),
        }
    }
}

/// The Kitchen: where recipes are cooked
pub struct Kitchen<'a> {
    pub(crate) config: KitchenConfig,
    layout: &'a Layout,
    env: &'a BuildEnv,
    runner: &'a dyn CommandRunner,
    cache: &'a SourceCache,
}

impl<'a> Kitchen<'a> {
    pub fn new(
        config: KitchenConfig,
        layout: &'a Layout,
        env: &'a BuildEnv,
        runner: &'a dyn CommandRunner,
        cache: &'a SourceCache,
    ) -> Self {
        Self {
            config,
            layout,
            env,
            runner,
            cache,
        }
    }

    pub fn layout(&self) -> &Layout {
        self.layout
    }

    pub fn env(&self) -> &BuildEnv {
        self.env
    }

    pub fn runner(&self) -> &dyn CommandRunner {
        self.runner
    }

    pub fn cache(&self) -> &SourceCache {
        self.cache
    }

    /// Substitution keys every recipe can use
    pub fn context(&self) -> BTreeMap<String, String> {
        let layout = self.layout;
        let path = |p: PathBuf| p.to_string_lossy().into_owned();

        let mut context = BTreeMap::new();
        context.insert("root".to_string(), path(layout.root.clone()));
        context.insert("prefix".to_string(), path(layout.prefix.clone()));
        context.insert("bin".to_string(), path(layout.bin_dir()));
        context.insert("lib".to_string(), path(layout.lib_dir()));
        context.insert("include".to_string(), path(layout.include_dir()));
        context.insert("build".to_string(), path(layout.build_dir.clone()));
        context.insert("python".to_string(), path(layout.python()));
        context.insert("jobs".to_string(), self.config.jobs.to_string());
        context.insert("lib_ext".to_string(), self.config.lib_ext.clone());
        context
    }

    /// Per-recipe work directory, named after the source archive
    ///
    /// Repeated builds of the same source reuse (and overwrite) it.
    pub fn work_dir(&self, recipe: &Recipe) -> Result<PathBuf> {
        let source = recipe
            .source
            .as_ref()
            .ok_or_else(|| Error::BuildDirMissing(recipe.name.clone()))?;
        Ok(self.layout.build_dir.join(cache_file_name(&source.url)))
    }

    /// True when n-way builds are possible on this host
    pub fn multi_arch(&self) -> bool {
        self.config.archs.len() > 1
    }

    /// Start cooking `recipe`
    pub fn cook<'k>(&'k self, recipe: &'k Recipe) -> Cook<'k> {
        Cook::new(self, recipe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::HttpDownloader;
    use crate::recipe::RecipeRegistry;
    use crate::runner::SystemRunner;

    fn layout_for(root: &std::path::Path) -> Layout {
        Layout {
            root: root.to_path_buf(),
            prefix: root.join("local"),
            ledger: root.join("local/kiln.db"),
            build_dir: root.join("build"),
            cache_dir: root.join("cache"),
        }
    }

    #[test]
    fn test_context_and_work_dir() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout_for(dir.path());
        let env = BuildEnv::default();
        let cache = SourceCache::new(layout.cache_dir.clone(), Box::new(HttpDownloader));
        let kitchen = Kitchen::new(
            KitchenConfig {
                jobs: 4,
                ..Default::default()
            },
            &layout,
            &env,
            &SystemRunner,
            &cache,
        );

        let context = kitchen.context();
        assert_eq!(context["prefix"], dir.path().join("local").to_string_lossy());
        assert_eq!(context["jobs"], "4");

        let registry = RecipeRegistry::builtin("linux").unwrap();
        let zlib = registry.resolve("lib_zlib").unwrap();
        assert_eq!(
            kitchen.work_dir(&zlib).unwrap(),
            dir.path().join("build/zlib-1.2.7.tar.gz")
        );

        let pip = registry.resolve("py_pip").unwrap();
        assert!(matches!(kitchen.work_dir(&pip), Err(Error::BuildDirMissing(_))));
        assert!(!kitchen.multi_arch());
    }
}
