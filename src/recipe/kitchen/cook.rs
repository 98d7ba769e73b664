// src/recipe/kitchen/cook.rs

//! Cook: one recipe being fetched, built and installed
//!
//! A Cook walks its recipe through
//! `UNFETCHED -> FETCHED -> UNPACKED -> PATCHED -> CONFIGURED -> BUILT -> INSTALLED`.
//! Asking for a later step runs the earlier ones first. Nothing is resumable
//! across processes: `build()` always unpacks a fresh copy of the source.

use super::archive::{find_source_dir, unpack};
use super::steps::{BuildSteps, steps_for};
use super::{Kitchen, nway};
use crate::error::{Error, Result};
use crate::platform::Layout;
use crate::recipe::{PatchStage, Recipe};
use crate::runner::CommandSpec;
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use strum_macros::Display;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RecipeState {
    Unfetched,
    Fetched,
    Unpacked,
    Patched,
    Configured,
    Built,
    Installed,
}

/// A single cook operation
#[derive(Clone)]
pub struct Cook<'a> {
    kitchen: &'a Kitchen<'a>,
    recipe: &'a Recipe,
    steps: &'static dyn BuildSteps,
    state: RecipeState,
    archive: Option<PathBuf>,
    /// Tree that configure/make/install run in
    source_dir: Option<PathBuf>,
    context: BTreeMap<String, String>,
    /// Full environment of every step
    env: BTreeMap<String, String>,
}

impl<'a> Cook<'a> {
    pub(super) fn new(kitchen: &'a Kitchen<'a>, recipe: &'a Recipe) -> Self {
        let context = kitchen.context();
        let overrides: BTreeMap<String, String> = recipe
            .env
            .iter()
            .map(|(k, v)| (k.clone(), recipe.substitute(v, &context)))
            .collect();
        let env = kitchen.env().with_overrides(&overrides);

        Self {
            kitchen,
            recipe,
            steps: steps_for(recipe.style),
            state: RecipeState::Unfetched,
            archive: None,
            source_dir: None,
            context,
            env,
        }
    }

    pub fn state(&self) -> RecipeState {
        self.state
    }

    pub fn recipe(&self) -> &Recipe {
        self.recipe
    }

    pub fn kitchen(&self) -> &Kitchen<'a> {
        self.kitchen
    }

    pub fn layout(&self) -> &Layout {
        self.kitchen.layout()
    }

    /// Environment every step of this recipe runs with
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Unpacked source tree
    pub fn source_dir(&self) -> Result<&Path> {
        self.source_dir
            .as_deref()
            .ok_or_else(|| Error::BuildDirMissing(self.recipe.name.clone()))
    }

    /// `%(key)s` substitution with the kitchen's keys
    pub fn substitute(&self, template: &str) -> String {
        self.recipe.substitute(template, &self.context)
    }

    /// A command carrying this recipe's environment
    pub fn command(&self, program: impl AsRef<OsStr>) -> CommandSpec {
        CommandSpec::new(program).env_map(self.env.clone())
    }

    pub fn run(&self, cmd: &CommandSpec) -> Result<()> {
        self.kitchen.runner().run(cmd)
    }

    /// Directory configure runs in
    pub fn configure_dir(&self, tree: &Path) -> PathBuf {
        match &self.recipe.configure.dir {
            Some(dir) => tree.join(self.substitute(dir)),
            None => tree.to_path_buf(),
        }
    }

    /// Copy of this cook building in `tree` with a different environment
    pub(super) fn variant(&self, tree: PathBuf, env: BTreeMap<String, String>) -> Self {
        Self {
            source_dir: Some(tree),
            env,
            ..self.clone()
        }
    }

    /// Download the source archive into the shared cache
    pub fn fetch(&mut self) -> Result<()> {
        if self.state >= RecipeState::Fetched {
            return Ok(());
        }

        if let Some(source) = &self.recipe.source
            && self.steps.needs_source()
        {
            info!("FETCHING {}", self.recipe.name);
            let path = self
                .kitchen
                .cache()
                .fetch(&source.url, source.checksum.as_ref())?;
            self.archive = Some(path);
        }

        self.state = RecipeState::Fetched;
        Ok(())
    }

    /// Unpack, patch, configure and make
    pub fn build(&mut self) -> Result<()> {
        self.fetch()?;
        info!("BUILDING {}", self.recipe.name);

        if !self.steps.needs_source() {
            self.state = RecipeState::Built;
            return Ok(());
        }

        let tree = self.unpack()?;
        self.state = RecipeState::Unpacked;

        self.apply_patches(PatchStage::PreConfigure, &tree)?;
        self.state = RecipeState::Patched;

        if self.recipe.nway && self.kitchen.multi_arch() {
            let primary = nway::build(self, &tree)?;
            self.source_dir = Some(primary);
            self.state = RecipeState::Built;
            return Ok(());
        }

        self.steps.configure(self, &tree)?;
        self.apply_patches(PatchStage::PostConfigure, &tree)?;
        self.state = RecipeState::Configured;

        self.steps.make(self, &tree)?;
        self.state = RecipeState::Built;
        Ok(())
    }

    /// Copy build results into the prefix
    pub fn install(&mut self) -> Result<()> {
        if self.state < RecipeState::Built {
            self.build()?;
        }
        info!("INSTALLING {}", self.recipe.name);

        let tree = if self.steps.needs_source() {
            self.source_dir()?.to_path_buf()
        } else {
            self.layout().prefix.clone()
        };
        self.steps.install(self, &tree)?;

        let prefix = self.layout().prefix.clone();
        self.apply_patches(PatchStage::PostInstall, &prefix)?;
        self.state = RecipeState::Installed;
        Ok(())
    }

    pub(super) fn steps(&self) -> &'static dyn BuildSteps {
        self.steps
    }

    pub(super) fn apply_patches(&self, stage: PatchStage, base: &Path) -> Result<()> {
        for patch in self.recipe.patches_for(stage) {
            debug!("Applying {:?} patch to {}", stage, patch.file);
            patch.apply_in(base)?;
        }
        Ok(())
    }

    fn unpack(&mut self) -> Result<PathBuf> {
        let archive = self
            .archive
            .clone()
            .ok_or_else(|| Error::BuildDirMissing(self.recipe.name.clone()))?;
        let work_dir = self.kitchen.work_dir(self.recipe)?;

        unpack(self.kitchen.runner(), &self.env, &archive, &work_dir)?;

        let tree = find_source_dir(&work_dir, &self.kitchen.config.archs)?
            .ok_or_else(|| Error::BuildDirMissing(self.recipe.name.clone()))?;
        debug!("Source directory: {}", tree.display());
        self.source_dir = Some(tree.clone());
        Ok(tree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_order_and_names() {
        assert!(RecipeState::Unfetched < RecipeState::Fetched);
        assert!(RecipeState::Configured < RecipeState::Built);
        assert!(RecipeState::Built < RecipeState::Installed);
        assert_eq!(RecipeState::Unfetched.to_string(), "UNFETCHED");
        assert_eq!(RecipeState::Installed.to_string(), "INSTALLED");
    }
}
