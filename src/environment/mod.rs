// src/environment/mod.rs

//! Environment orchestrator
//!
//! An [`Environment`] is one root directory holding a portable Python
//! installation. It decides what to build and in which order, keeps the
//! ledger in step with what is on disk, and enforces the rules that span
//! several recipes:
//!
//! - dependencies are installed (non-explicitly) before their dependents
//! - an explicitly installed recipe is never removed to resolve a conflict
//! - everything from fetch to record for one install request, including
//!   the dependencies it pulls in, commits as one ledger transaction;
//!   implicit conflicts are removed in their own transactions beforehand
//! - pruning after a removal stops at directories other recipes recorded
//! - an environment is initialised with the platform base set before any
//!   other recipe is built

mod scan;

pub use scan::{NewFiles, ignored_paths, remove_any};

use crate::config::{BuildEnv, EnvSettings};
use crate::db::Ledger;
use crate::error::{Error, Result};
use crate::fetch::{Downloader, HttpDownloader, SourceCache};
use crate::platform::{self, Layout, Platform};
use crate::postprocess::PostContext;
use crate::recipe::kitchen::{Kitchen, KitchenConfig};
use crate::recipe::{Recipe, RecipeRegistry};
use crate::runner::{CommandRunner, CommandSpec, SystemRunner};
use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One row of `kiln list`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledEntry {
    pub name: String,
    pub explicit: bool,
    pub required: bool,
    pub files: usize,
}

/// Collaborators an [`Environment`] is assembled from
///
/// Anything left unset falls back to the host default: settings from
/// `<root>/kiln.toml`, the host platform, the registry for the root, the
/// system runner, HTTP downloads and the current process environment.
pub struct EnvironmentBuilder {
    root: PathBuf,
    settings: Option<EnvSettings>,
    platform: Option<Box<dyn Platform>>,
    registry: Option<RecipeRegistry>,
    runner: Option<Box<dyn CommandRunner>>,
    downloader: Option<Box<dyn Downloader>>,
    base_recipes: Option<Vec<String>>,
    process_env: Option<BuildEnv>,
}

impl EnvironmentBuilder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            settings: None,
            platform: None,
            registry: None,
            runner: None,
            downloader: None,
            base_recipes: None,
            process_env: None,
        }
    }

    pub fn settings(mut self, settings: EnvSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn platform(mut self, platform: Box<dyn Platform>) -> Self {
        self.platform = Some(platform);
        self
    }

    pub fn registry(mut self, registry: RecipeRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn runner(mut self, runner: Box<dyn CommandRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    pub fn downloader(mut self, downloader: Box<dyn Downloader>) -> Self {
        self.downloader = Some(downloader);
        self
    }

    pub fn base_recipes(mut self, base: Vec<String>) -> Self {
        self.base_recipes = Some(base);
        self
    }

    /// Variables to start the build environment from
    pub fn process_env(mut self, env: BuildEnv) -> Self {
        self.process_env = Some(env);
        self
    }

    /// Create the root if needed and open its ledger
    pub fn open(self) -> Result<Environment> {
        fs::create_dir_all(&self.root)?;
        let root = self.root.canonicalize()?;

        let settings = match self.settings {
            Some(settings) => settings,
            None => EnvSettings::load(&root)?,
        };
        let platform = self
            .platform
            .unwrap_or_else(|| platform::host(&settings));
        let layout = Layout::new(&root, platform.as_ref(), settings.cache_dir(&root));

        let registry = match self.registry {
            Some(registry) => registry,
            None => RecipeRegistry::load_for_root(platform.name(), &root)?,
        };
        if registry.platform() != platform.name() {
            return Err(Error::Config(format!(
                "recipe registry is for {} but the environment is {}",
                registry.platform(),
                platform.name()
            )));
        }
        registry.validate()?;

        let base_recipes = self
            .base_recipes
            .or_else(|| settings.base_recipes.clone())
            .unwrap_or_else(|| platform.base_recipes());
        for name in &base_recipes {
            if !registry.contains(name) {
                return Err(Error::Config(format!("unknown base recipe '{}'", name)));
            }
        }

        let env = self
            .process_env
            .unwrap_or_else(BuildEnv::from_process)
            .prepend_path("PATH", &layout.bin_dir())
            .extend(platform.build_vars(&layout))
            .extend(settings.env.clone());

        let cache = SourceCache::new(
            layout.cache_dir.clone(),
            self.downloader.unwrap_or_else(|| Box::new(HttpDownloader)),
        );
        let ledger = Ledger::open(&layout.ledger)?;
        debug!("Opened environment {} ({})", root.display(), platform.name());

        Ok(Environment {
            layout,
            settings,
            platform,
            registry,
            runner: self.runner.unwrap_or_else(|| Box::new(SystemRunner)),
            cache,
            env,
            ledger,
            base_recipes,
            initialising: Cell::new(false),
            in_progress: RefCell::new(Vec::new()),
        })
    }
}

/// A portable Python environment rooted at one directory
pub struct Environment {
    layout: Layout,
    settings: EnvSettings,
    platform: Box<dyn Platform>,
    registry: RecipeRegistry,
    runner: Box<dyn CommandRunner>,
    cache: SourceCache,
    env: BuildEnv,
    ledger: Ledger,
    base_recipes: Vec<String>,
    /// Set while `init` installs the base set
    initialising: Cell<bool>,
    /// Recipes currently being installed, outermost first
    in_progress: RefCell<Vec<String>>,
}

/// Pops the in-progress stack when an install returns
struct InProgress<'a> {
    stack: &'a RefCell<Vec<String>>,
}

impl Drop for InProgress<'_> {
    fn drop(&mut self) {
        self.stack.borrow_mut().pop();
    }
}

/// Resets the initialising flag when `init` returns
struct Initialising<'a> {
    flag: &'a Cell<bool>,
    previous: bool,
}

impl Drop for Initialising<'_> {
    fn drop(&mut self) {
        self.flag.set(self.previous);
    }
}

impl Environment {
    /// Open `root` with host defaults
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        EnvironmentBuilder::new(root).open()
    }

    pub fn builder(root: impl Into<PathBuf>) -> EnvironmentBuilder {
        EnvironmentBuilder::new(root)
    }

    pub fn root(&self) -> &Path {
        &self.layout.root
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn registry(&self) -> &RecipeRegistry {
        &self.registry
    }

    pub fn platform(&self) -> &dyn Platform {
        self.platform.as_ref()
    }

    pub fn build_env(&self) -> &BuildEnv {
        &self.env
    }

    pub fn base_recipes(&self) -> &[String] {
        &self.base_recipes
    }

    pub fn is_installed(&self, name: &str) -> Result<bool> {
        self.ledger.is_installed(name)
    }

    /// True once every base recipe is installed
    pub fn is_initialised(&self) -> Result<bool> {
        for name in &self.base_recipes {
            if !self.ledger.is_installed(name)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Install the platform base set
    pub fn init(&self) -> Result<()> {
        let _guard = Initialising {
            flag: &self.initialising,
            previous: self.initialising.replace(true),
        };
        info!("Initialising {}", self.layout.root.display());
        for name in &self.base_recipes {
            self.install(name, false)?;
        }
        self.finish_init()
    }

    /// Run the platform's post-init step and record what it created
    ///
    /// The paths belong to the first base recipe, which provides the
    /// interpreter.
    fn finish_init(&self) -> Result<()> {
        let created = self.platform.post_init(&self.layout)?;
        let mut files = Vec::new();
        for path in &created {
            if let Some(rel) = self.layout.relative(path)
                && !self.ledger.is_recorded(&rel)?
            {
                files.push(rel);
            }
        }
        if files.is_empty() {
            return Ok(());
        }
        match self.base_recipes.first() {
            Some(owner) => {
                info!("RECORDING {} ({} links)", owner, files.len());
                self.ledger.record(owner, &files)
            }
            None => {
                warn!("No base recipe to own {} new links", files.len());
                Ok(())
            }
        }
    }

    /// Installed and either marked explicit or part of the base set
    pub fn is_explicit(&self, name: &str) -> Result<bool> {
        if !self.ledger.is_installed(name)? {
            return Ok(false);
        }
        Ok(self.base_recipes.iter().any(|b| b == name) || self.ledger.is_marked(name)?)
    }

    /// Reachable from the marked or base recipes over runtime dependencies
    ///
    /// Dependencies come from the current recipe definitions, not from the
    /// ledger. Marked recipes that are no longer defined contribute no edges.
    pub fn is_required(&self, name: &str) -> Result<bool> {
        Ok(self.required_recipes()?.contains(name))
    }

    fn required_recipes(&self) -> Result<BTreeSet<String>> {
        let graph = self.registry.runtime_graph()?;
        let mut required = BTreeSet::new();
        let roots = self.ledger.marked_recipes()?;
        for start in roots.iter().chain(&self.base_recipes) {
            required.insert(start.clone());
            if graph.contains(start) {
                required.extend(graph.transitive_dependencies(start));
            } else {
                debug!("Skipping dependencies of undefined {}", start);
            }
        }
        Ok(required)
    }

    /// Installed recipes that list `name` as a runtime dependency
    pub fn installed_dependents(&self, name: &str) -> Result<Vec<String>> {
        let graph = self.registry.runtime_graph()?;
        let mut dependents = Vec::new();
        for other in graph.dependents(name).into_iter().flatten() {
            if self.ledger.is_installed(other)? {
                dependents.push(other.clone());
            }
        }
        Ok(dependents)
    }

    /// Install `name` and everything it needs
    ///
    /// An installed recipe is never rebuilt; asking for it explicitly only
    /// adds the marker.
    pub fn install(&self, name: &str, explicit: bool) -> Result<()> {
        if self.ledger.is_installed(name)? {
            debug!("{} is already installed", name);
            return self.mark_if(name, explicit);
        }

        let recipe = self.registry.resolve(name)?;

        if !self.initialising.get() && !self.is_initialised()? {
            self.init()?;
            if self.ledger.is_installed(name)? {
                return self.mark_if(name, explicit);
            }
        }

        self.clear_conflicts(name)?;

        let _progress = self.enter(name)?;
        let scope = self.ledger.begin()?;

        for dep in recipe.all_dependencies() {
            self.install(dep, false)?;
        }

        self.cook_and_record(&recipe)?;
        self.mark_if(name, explicit)?;
        scope.commit()
    }

    /// Remove implicit recipes that conflict with anything `name` would build
    ///
    /// Removals commit on their own before the install scope opens. Inside an
    /// open scope an installed conflict is fatal.
    fn clear_conflicts(&self, name: &str) -> Result<()> {
        for planned in self.registry.plan(name)? {
            if self.ledger.is_installed(&planned)? {
                continue;
            }
            let recipe = self.registry.resolve(&planned)?;
            for conflict in &recipe.conflicts {
                if !self.ledger.is_installed(conflict)? {
                    continue;
                }
                if self.is_explicit(conflict)? || self.ledger.depth() > 0 {
                    return Err(Error::Conflict {
                        recipe: planned.clone(),
                        conflict: conflict.clone(),
                    });
                }
                warn!("Removing {} to make room for {}", conflict, planned);
                self.remove_recipe(conflict)?;
            }
        }
        Ok(())
    }

    /// Remove a recipe nothing else depends on
    pub fn uninstall(&self, name: &str) -> Result<()> {
        if !self.ledger.is_installed(name)? {
            if self.ledger.unmark(name)? {
                info!("Dropped stale marker for {}", name);
            } else {
                info!("{} is not installed", name);
            }
            return Ok(());
        }

        let dependents = self.installed_dependents(name)?;
        if !dependents.is_empty() {
            return Err(Error::HasDependents {
                recipe: name.to_string(),
                dependents,
            });
        }

        self.remove_recipe(name)
    }

    /// Remove build products, implicit installs and unrecorded files
    pub fn clean(&self) -> Result<()> {
        for dir in [&self.layout.build_dir, &self.layout.cache_dir] {
            if !dir.starts_with(&self.layout.root) {
                debug!("Keeping shared directory {}", dir.display());
                continue;
            }
            if dir.exists() {
                info!("REMOVING {}", dir.display());
                fs::remove_dir_all(dir)?;
            }
        }

        for name in self.ledger.installed_recipes()? {
            if !self.is_explicit(&name)? {
                info!("Uninstalling implicit {}", name);
                self.remove_recipe(&name)?;
            }
        }

        let mut orphans = self.find_new_files()?.collect::<Result<Vec<_>>>()?;
        orphans.sort_by(|a, b| b.cmp(a));
        for rel in &orphans {
            info!("REMOVING orphan {}", rel);
        }
        self.delete_paths(&orphans)
    }

    /// Unrecorded paths under the root, computed lazily
    pub fn find_new_files(&self) -> Result<NewFiles> {
        NewFiles::new(&self.layout, &self.ledger)
    }

    /// Post-process `files` and record them as belonging to `recipe`
    pub fn record_files(&self, recipe: &Recipe, files: &[String]) -> Result<()> {
        info!("RECORDING {} ({} files)", recipe.name, files.len());
        if recipe.postprocess {
            self.post_process(files)?;
        }
        self.ledger.record(&recipe.name, files)
    }

    /// Record whatever is new under the root as belonging to `name`
    ///
    /// For files installed by hand. Unknown names are recorded with
    /// post-processing enabled.
    pub fn record(&self, name: &str) -> Result<usize> {
        let scope = self.ledger.begin()?;
        let files = self.find_new_files()?.collect::<Result<Vec<_>>>()?;
        let postprocess = match self.registry.resolve(name) {
            Ok(recipe) => recipe.postprocess,
            Err(Error::RecipeNotFound(_)) => true,
            Err(e) => return Err(e),
        };

        info!("RECORDING {} ({} files)", name, files.len());
        if postprocess {
            self.post_process(&files)?;
        }
        self.ledger.record(name, &files)?;
        scope.commit()?;
        Ok(files.len())
    }

    /// Run a command line with `sh -c` inside the build environment
    pub fn do_command(&self, cmdline: &[String]) -> Result<i32> {
        let cmd = self
            .command("sh")
            .arg("-c")
            .arg(cmdline.join(" "))
            .cwd(&self.layout.root);
        self.runner.status(&cmd)
    }

    /// Interactive shell inside the build environment
    pub fn shell(&self) -> Result<i32> {
        let cmd = self.command("sh").cwd(&self.layout.root);
        self.runner.status(&cmd)
    }

    /// Installed recipes with their flags, sorted by name
    pub fn list(&self) -> Result<Vec<InstalledEntry>> {
        let required = self.required_recipes()?;
        let mut entries = Vec::new();
        for name in self.ledger.installed_recipes()? {
            entries.push(InstalledEntry {
                explicit: self.is_explicit(&name)?,
                required: required.contains(&name),
                files: self.ledger.files_for(&name)?.len(),
                name,
            });
        }
        Ok(entries)
    }

    /// Build order for `name`, marking the recipes that are already installed
    pub fn plan(&self, name: &str) -> Result<Vec<(String, bool)>> {
        let mut plan = Vec::new();
        for recipe in self.registry.plan(name)? {
            let installed = self.ledger.is_installed(&recipe)?;
            plan.push((recipe, installed));
        }
        Ok(plan)
    }

    fn command(&self, program: &str) -> CommandSpec {
        CommandSpec::new(program).env_map(self.env.vars().clone())
    }

    fn mark_if(&self, name: &str, explicit: bool) -> Result<()> {
        if explicit && self.ledger.mark_explicit(name)? {
            info!("Marked {} as explicitly installed", name);
        }
        Ok(())
    }

    fn enter(&self, name: &str) -> Result<InProgress<'_>> {
        let mut stack = self.in_progress.borrow_mut();
        if let Some(start) = stack.iter().position(|n| n == name) {
            let mut cycle: Vec<String> = stack[start..].to_vec();
            cycle.push(name.to_string());
            return Err(Error::DependencyCycle(cycle.join(" -> ")));
        }
        stack.push(name.to_string());
        Ok(InProgress {
            stack: &self.in_progress,
        })
    }

    fn kitchen(&self) -> Kitchen<'_> {
        let config = KitchenConfig {
            jobs: self.settings.jobs(),
            archs: self.platform.target_archs().to_vec(),
            lib_ext: self.platform.shared_lib_ext().to_string(),
        };
        Kitchen::new(config, &self.layout, &self.env, self.runner.as_ref(), &self.cache)
    }

    fn cook_and_record(&self, recipe: &Recipe) -> Result<()> {
        let kitchen = self.kitchen();
        let mut cook = kitchen.cook(recipe);
        cook.fetch()?;

        let scope = self.ledger.begin()?;
        cook.build()?;
        cook.install()?;
        let files = self.find_new_files()?.collect::<Result<Vec<_>>>()?;
        self.record_files(recipe, &files)?;
        scope.commit()?;

        info!("INSTALLED {}", recipe.name);
        Ok(())
    }

    fn post_process(&self, files: &[String]) -> Result<()> {
        let ctx = PostContext {
            layout: &self.layout,
            runner: self.runner.as_ref(),
            env: self.env.vars(),
        };
        self.platform.post_processor().process(&ctx, files)
    }

    /// Drop a recipe's records and delete its files, skipping dependents checks
    fn remove_recipe(&self, name: &str) -> Result<()> {
        let scope = self.ledger.begin()?;
        let files = self.ledger.remove(name)?;
        info!("REMOVING {} ({} files)", name, files.len());
        self.delete_paths(&files)?;
        scope.commit()
    }

    /// Delete root-relative paths, deepest first, then prune empty parents
    fn delete_paths(&self, files: &[String]) -> Result<()> {
        let mut parents = BTreeSet::new();
        for rel in files {
            let path = self.layout.root.join(rel.trim_end_matches('/'));
            if rel.ends_with('/') {
                match fs::remove_dir(&path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => debug!("Keeping {}: {}", path.display(), e),
                }
            } else {
                match path.symlink_metadata() {
                    Ok(meta) if meta.is_dir() => {
                        if let Err(e) = fs::remove_dir(&path) {
                            debug!("Keeping {}: {}", path.display(), e);
                        }
                    }
                    Ok(_) => fs::remove_file(&path)?,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
            if let Some(parent) = path.parent() {
                parents.insert(parent.to_path_buf());
            }
        }

        // Deepest directories first
        for dir in parents.into_iter().rev() {
            self.prune(&dir)?;
        }
        Ok(())
    }

    /// Remove `dir` and its parents while they are empty
    ///
    /// Stops at the root and at any directory still recorded as a marker.
    fn prune(&self, dir: &Path) -> Result<()> {
        let mut current = dir;
        while let Some(rel) = self.layout.relative(current) {
            if self.ledger.is_recorded(&format!("{}/", rel))? {
                debug!("Keeping recorded directory {}", rel);
                break;
            }
            if fs::remove_dir(current).is_err() {
                break;
            }
            debug!("PRUNING {}", current.display());
            match current.parent() {
                Some(parent) => current = parent,
                None => break,
            }
        }
        Ok(())
    }
}
