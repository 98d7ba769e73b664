// src/recipe/mod.rs

//! Recipes: what to build and how
//!
//! - [`format`]: catalogue TOML as written on disk
//! - [`registry`]: composes inheritance and platform sections into [`Recipe`]s
//! - [`graph`]: dependency ordering and cycle detection
//! - [`patch`]: line patches applied to sources or installed files
//! - [`kitchen`]: the execution engine driving fetch, build and install
//!
//! # Culinary Terminology
//!
//! - **Recipe**: the resolved build description
//! - **Kitchen**: the per-environment build context
//! - **Cook**: one recipe being prepared, built and installed

pub mod builtin;
pub mod format;
pub mod graph;
pub mod kitchen;
pub mod patch;
pub mod registry;

pub use format::{BuildStyle, DataFile, RecipeDef};
pub use graph::RecipeGraph;
pub use kitchen::{Cook, Kitchen, RecipeState};
pub use patch::{Patch, PatchOp, PatchStage};
pub use registry::RecipeRegistry;

use crate::hash::Checksum;
use format::{ConfigureSection, InstallerSection, MakeSection};
use std::collections::BTreeMap;

/// Source archive of a resolved recipe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub url: String,
    pub checksum: Option<Checksum>,
}

/// A recipe with its inheritance chain and platform section folded in
#[derive(Debug, Clone)]
pub struct Recipe {
    pub name: String,
    pub version: Option<String>,
    pub style: BuildStyle,
    /// Effective runtime dependencies, own first, deduplicated
    pub depends: Vec<String>,
    pub build_depends: Vec<String>,
    pub conflicts: Vec<String>,
    pub source: Option<Source>,
    pub configure: ConfigureSection,
    pub make: MakeSection,
    pub setup_args: Vec<String>,
    pub installer: Option<InstallerSection>,
    pub patches: Vec<Patch>,
    pub files: Vec<DataFile>,
    pub env: BTreeMap<String, String>,
    pub variables: BTreeMap<String, String>,
    pub postprocess: bool,
    pub nway: bool,
}

impl Recipe {
    /// Substitute `%(key)s` placeholders
    ///
    /// Keys in `context` (prefix, root, jobs, ...) win over the recipe's own
    /// `variables`, which win over `name` and `version`.
    pub fn substitute(&self, template: &str, context: &BTreeMap<String, String>) -> String {
        if !template.contains("%(") {
            return template.to_string();
        }

        let mut result = template.to_string();
        for (key, value) in context {
            result = result.replace(&format!("%({})s", key), value);
        }
        for (key, value) in &self.variables {
            result = result.replace(&format!("%({})s", key), value);
        }
        result = result.replace("%(name)s", &self.name);
        if let Some(version) = &self.version {
            result = result.replace("%(version)s", version);
        }
        result
    }

    /// Patches that run at `stage`
    pub fn patches_for(&self, stage: PatchStage) -> impl Iterator<Item = &Patch> {
        self.patches.iter().filter(move |p| p.stage == stage)
    }

    /// Runtime then build dependencies, without self-references
    pub fn all_dependencies(&self) -> Vec<&str> {
        let mut deps: Vec<&str> = Vec::new();
        for dep in self.depends.iter().chain(&self.build_depends) {
            if dep != &self.name && !deps.contains(&dep.as_str()) {
                deps.push(dep);
            }
        }
        deps
    }
}
