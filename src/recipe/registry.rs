// src/recipe/registry.rs

//! Recipe registry
//!
//! Maps recipe names to their catalogue definitions and composes the
//! effective [`Recipe`] on demand: the definition's `extends` chain is
//! walked once and merged field by field, with the section for the current
//! platform folded into each level.
//!
//! Merge rules:
//! - dependency, build-dependency and conflict lists: ordered union, own
//!   entries first (platform additions ahead of common ones), then each
//!   ancestor's
//! - configure args, setup args, patches, files: ancestor entries first
//! - maps (`env`, `variables`, configure/make vars): union, nearer wins
//! - everything else: the nearest definition that sets it
//!
//! Catalogues are layered: built-ins, then each `KILN_RECIPE_PATH` dir,
//! then `<root>/recipes/`. A later definition with the same name replaces
//! the earlier one outright.

use super::builtin;
use super::format::{Catalogue, ConfigureSection, MakeSection, PlatformSection, RecipeDef};
use super::graph::RecipeGraph;
use super::{BuildStyle, Recipe, Source};
use crate::config::recipe_search_path;
use crate::error::{Error, Result};
use crate::hash::Checksum;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct RecipeRegistry {
    defs: BTreeMap<String, RecipeDef>,
    platform: String,
}

/// Append `items` to `out`, skipping names already present
fn ordered_union(out: &mut Vec<String>, items: &[String]) {
    for item in items {
        if !out.contains(item) {
            out.push(item.clone());
        }
    }
}

fn merge_map(out: &mut BTreeMap<String, String>, items: &BTreeMap<String, String>) {
    for (key, value) in items {
        out.insert(key.clone(), value.clone());
    }
}

impl RecipeRegistry {
    /// Empty registry for `platform`
    pub fn new(platform: &str) -> Self {
        Self {
            defs: BTreeMap::new(),
            platform: platform.to_string(),
        }
    }

    /// Registry holding the built-in catalogue
    pub fn builtin(platform: &str) -> Result<Self> {
        let mut registry = Self::new(platform);
        for (origin, content) in builtin::CATALOGUES {
            registry.add_catalogue(content, origin)?;
        }
        Ok(registry)
    }

    /// Built-ins plus every catalogue directory that applies to `root`
    pub fn load_for_root(platform: &str, root: &Path) -> Result<Self> {
        let mut registry = Self::builtin(platform)?;
        for dir in recipe_search_path() {
            registry.add_dir(&dir)?;
        }
        let local = root.join("recipes");
        if local.is_dir() {
            registry.add_dir(&local)?;
        }
        Ok(registry)
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    /// Parse a catalogue and add its recipes; returns how many were added
    pub fn add_catalogue(&mut self, content: &str, origin: &str) -> Result<usize> {
        let catalogue = Catalogue::from_toml_str(content)
            .map_err(|e| Error::Config(format!("{}: {}", origin, e)))?;
        let count = catalogue.recipes.len();
        for def in catalogue.recipes {
            self.insert(def);
        }
        debug!("Loaded {} recipes from {}", count, origin);
        Ok(count)
    }

    /// Add every `*.toml` catalogue in `dir`, in file name order
    pub fn add_dir(&mut self, dir: &Path) -> Result<usize> {
        let mut paths: Vec<_> = match fs::read_dir(dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.extension().is_some_and(|ext| ext == "toml"))
                .collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        paths.sort();

        let mut total = 0;
        for path in paths {
            let content = fs::read_to_string(&path)?;
            total += self.add_catalogue(&content, &path.display().to_string())?;
        }
        if total > 0 {
            info!("Loaded {} recipes from {}", total, dir.display());
        }
        Ok(total)
    }

    pub fn insert(&mut self, def: RecipeDef) {
        if self.defs.contains_key(&def.name) {
            debug!("Recipe {} overridden", def.name);
        }
        self.defs.insert(def.name.clone(), def);
    }

    /// True for installable (non-abstract) recipes
    pub fn contains(&self, name: &str) -> bool {
        self.defs.get(name).is_some_and(|d| !d.is_abstract)
    }

    /// Installable recipe names, sorted
    pub fn names(&self) -> Vec<&str> {
        self.defs
            .values()
            .filter(|d| !d.is_abstract)
            .map(|d| d.name.as_str())
            .collect()
    }

    pub fn definition(&self, name: &str) -> Option<&RecipeDef> {
        self.defs.get(name)
    }

    /// Definition of `name` followed by its ancestors
    fn chain(&self, name: &str) -> Result<Vec<&RecipeDef>> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut current = self
            .defs
            .get(name)
            .ok_or_else(|| Error::RecipeNotFound(name.to_string()))?;

        loop {
            if !seen.insert(current.name.as_str()) {
                return Err(Error::Config(format!(
                    "recipe '{}' has an inheritance loop through '{}'",
                    name, current.name
                )));
            }
            chain.push(current);

            let Some(parent) = &current.extends else {
                break;
            };
            current = self.defs.get(parent).ok_or_else(|| {
                Error::Config(format!(
                    "recipe '{}' extends unknown recipe '{}'",
                    current.name, parent
                ))
            })?;
        }

        Ok(chain)
    }

    fn platform_section<'a>(&self, def: &'a RecipeDef) -> Option<&'a PlatformSection> {
        def.platform.get(&self.platform)
    }

    /// Compose the effective recipe for `name`
    pub fn resolve(&self, name: &str) -> Result<Recipe> {
        let chain = self.chain(name)?;
        if chain[0].is_abstract {
            return Err(Error::Config(format!(
                "recipe '{}' is an abstract template",
                name
            )));
        }

        let mut depends = Vec::new();
        let mut build_depends = Vec::new();
        let mut conflicts = Vec::new();
        for def in &chain {
            if let Some(plat) = self.platform_section(def) {
                ordered_union(&mut depends, &plat.depends);
                ordered_union(&mut build_depends, &plat.build_depends);
                ordered_union(&mut conflicts, &plat.conflicts);
            }
            ordered_union(&mut depends, &def.depends);
            ordered_union(&mut build_depends, &def.build_depends);
            ordered_union(&mut conflicts, &def.conflicts);
        }

        let mut configure = ConfigureSection {
            script: chain.iter().find_map(|d| d.configure.script.clone()),
            dir: chain.iter().find_map(|d| d.configure.dir.clone()),
            prefix_arg: chain.iter().find_map(|d| d.configure.prefix_arg),
            ..Default::default()
        };
        let mut make = MakeSection {
            relpath: chain.iter().find_map(|d| d.make.relpath.clone()),
            targets: chain
                .iter()
                .map(|d| &d.make.targets)
                .find(|t| !t.is_empty())
                .cloned()
                .unwrap_or_default(),
            install_target: chain.iter().find_map(|d| d.make.install_target.clone()),
            ..Default::default()
        };
        let mut setup_args = Vec::new();
        let mut patches = Vec::new();
        let mut files = Vec::new();
        let mut env = BTreeMap::new();
        let mut variables = BTreeMap::new();

        for def in chain.iter().rev() {
            let plat = self.platform_section(def);

            configure.args.extend(def.configure.args.iter().cloned());
            merge_map(&mut configure.vars, &def.configure.vars);
            merge_map(&mut make.vars, &def.make.vars);
            setup_args.extend(def.setup_args.iter().cloned());
            patches.extend(def.patches.iter().cloned());
            files.extend(def.files.iter().cloned());
            merge_map(&mut env, &def.env);
            merge_map(&mut variables, &def.variables);

            if let Some(plat) = plat {
                configure.args.extend(plat.configure_args.iter().cloned());
                patches.extend(plat.patches.iter().cloned());
                merge_map(&mut env, &plat.env);
            }
        }

        let style = chain
            .iter()
            .find_map(|d| d.style)
            .unwrap_or_default();
        let postprocess = chain
            .iter()
            .find_map(|d| d.postprocess)
            .unwrap_or(style != BuildStyle::Prebuilt);
        let nway = chain
            .iter()
            .filter_map(|d| self.platform_section(d))
            .find_map(|p| p.nway)
            .unwrap_or(false);

        let source = match chain.iter().find_map(|d| d.source.as_ref()) {
            Some(src) => {
                let checksum = src
                    .checksum
                    .as_deref()
                    .map(Checksum::parse)
                    .transpose()
                    .map_err(|e| {
                        Error::Config(format!("recipe '{}' has a bad checksum: {}", name, e))
                    })?;
                Some(Source {
                    url: src.url.clone(),
                    checksum,
                })
            }
            None => None,
        };

        if style.needs_source() && source.is_none() {
            return Err(Error::Config(format!(
                "recipe '{}' ({} style) has no source",
                name, style
            )));
        }

        let mut recipe = Recipe {
            name: name.to_string(),
            version: chain.iter().find_map(|d| d.version.clone()),
            style,
            depends,
            build_depends,
            conflicts,
            source,
            configure,
            make,
            setup_args,
            installer: chain.iter().find_map(|d| d.installer.clone()),
            patches,
            files,
            env,
            variables,
            postprocess,
            nway,
        };

        if let Some(src) = &recipe.source {
            let url = recipe.substitute(&src.url, &BTreeMap::new());
            if let Some(src) = recipe.source.as_mut() {
                src.url = url;
            }
        }

        Ok(recipe)
    }

    /// Graph of every installable recipe over runtime and build dependencies
    pub fn graph(&self) -> Result<RecipeGraph> {
        let mut graph = RecipeGraph::new();
        for name in self.names() {
            let recipe = self.resolve(name)?;
            graph.add_recipe(name, &recipe.all_dependencies());
        }
        Ok(graph)
    }

    /// Graph of every installable recipe over runtime dependencies only
    pub fn runtime_graph(&self) -> Result<RecipeGraph> {
        let mut graph = RecipeGraph::new();
        for name in self.names() {
            let recipe = self.resolve(name)?;
            let deps: Vec<&str> = recipe
                .depends
                .iter()
                .map(String::as_str)
                .filter(|d| *d != name)
                .collect();
            graph.add_recipe(name, &deps);
        }
        Ok(graph)
    }

    /// Check that every reference resolves and the graph is acyclic
    pub fn validate(&self) -> Result<()> {
        for name in self.names() {
            let recipe = self.resolve(name)?;
            for dep in recipe
                .depends
                .iter()
                .chain(&recipe.build_depends)
                .chain(&recipe.conflicts)
            {
                if !self.contains(dep) {
                    return Err(Error::Config(format!(
                        "recipe '{}' references unknown recipe '{}'",
                        name, dep
                    )));
                }
            }
        }
        self.graph()?.topological_sort()?;
        Ok(())
    }

    /// Recipes `name` needs, in the order they would be built, ending with `name`
    pub fn plan(&self, name: &str) -> Result<Vec<String>> {
        self.resolve(name)?;
        self.graph()?.build_order(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::PatchStage;

    const CATALOGUE: &str = r#"
        [[recipe]]
        name = "_base"
        abstract = true
        depends = ["lib_zlib"]
        env = { LC_ALL = "C" }

        [recipe.configure]
        args = ["--enable-shared"]

        [recipe.platform.linux]
        depends = ["patchelf"]

        [[recipe]]
        name = "lib_zlib"
        version = "1.2.7"
        style = "make"

        [recipe.source]
        url = "http://zlib.net/zlib-%(version)s.tar.gz"
        checksum = "60df6a37c56e7c1366cca812414f7b85"

        [[recipe]]
        name = "patchelf"
        [recipe.source]
        url = "http://example.com/patchelf-0.6.tar.gz"

        [[recipe]]
        name = "lib_png"
        extends = "_base"
        version = "1.5.13"
        depends = ["lib_jpeg", "lib_zlib"]

        [recipe.source]
        url = "http://example.com/libpng-%(version)s.tar.gz"

        [recipe.configure]
        args = ["--disable-static"]

        [[recipe.patches]]
        file = "Makefile.in"
        op = "replace"
        from = "-O2"
        to = "-Os"

        [recipe.platform.linux]
        configure_args = ["--with-pic"]

        [recipe.platform.macos]
        depends = ["lib_iconv"]
        nway = true

        [[recipe]]
        name = "lib_jpeg"
        [recipe.source]
        url = "http://example.com/jpegsrc.v8d.tar.gz"
    "#;

    fn registry(platform: &str) -> RecipeRegistry {
        let mut registry = RecipeRegistry::new(platform);
        registry.add_catalogue(CATALOGUE, "test").unwrap();
        registry
    }

    #[test]
    fn test_inheritance_merges_lists() {
        let png = registry("linux").resolve("lib_png").unwrap();
        assert_eq!(png.depends, vec!["lib_jpeg", "lib_zlib", "patchelf"]);
        assert_eq!(
            png.configure.args,
            vec!["--enable-shared", "--disable-static", "--with-pic"]
        );
        assert_eq!(png.env.get("LC_ALL").map(String::as_str), Some("C"));
        assert_eq!(png.style, BuildStyle::Autotools);
        assert_eq!(png.patches_for(PatchStage::PreConfigure).count(), 1);
        assert!(!png.nway);
        assert_eq!(
            png.source.unwrap().url,
            "http://example.com/libpng-1.5.13.tar.gz"
        );
    }

    #[test]
    fn test_platform_section_selects_host() {
        let png = registry("macos").resolve("lib_png").unwrap();
        assert_eq!(png.depends, vec!["lib_iconv", "lib_jpeg", "lib_zlib"]);
        assert!(png.nway);
    }

    #[test]
    fn test_resolve_errors() {
        let registry = registry("linux");
        assert!(matches!(
            registry.resolve("nope"),
            Err(Error::RecipeNotFound(_))
        ));
        assert!(matches!(registry.resolve("_base"), Err(Error::Config(_))));
        assert!(!registry.contains("_base"));
        assert!(registry.contains("lib_png"));
    }

    #[test]
    fn test_checksum_and_url_substitution() {
        let zlib = registry("linux").resolve("lib_zlib").unwrap();
        let source = zlib.source.unwrap();
        assert_eq!(source.url, "http://zlib.net/zlib-1.2.7.tar.gz");
        assert_eq!(
            source.checksum.unwrap().to_string(),
            "md5:60df6a37c56e7c1366cca812414f7b85"
        );
    }

    #[test]
    fn test_plan_and_validation() {
        let linux = registry("linux");
        linux.validate().unwrap();
        assert_eq!(
            linux.plan("lib_png").unwrap(),
            vec!["lib_jpeg", "lib_zlib", "patchelf", "lib_png"]
        );

        // lib_iconv is only referenced on macos and does not exist
        assert!(matches!(registry("macos").validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_runtime_graph_follows_depends() {
        let graph = registry("linux").runtime_graph().unwrap();
        assert_eq!(
            graph.transitive_dependencies("lib_png").into_iter().collect::<Vec<_>>(),
            vec!["lib_jpeg", "lib_zlib", "patchelf"]
        );
        assert!(graph.dependents("lib_zlib").unwrap().contains("lib_png"));
    }

    #[test]
    fn test_cycle_is_fatal() {
        let mut registry = RecipeRegistry::new("linux");
        registry
            .add_catalogue(
                r#"
                [[recipe]]
                name = "a"
                style = "data"
                depends = ["b"]

                [[recipe]]
                name = "b"
                style = "data"
                build_depends = ["a"]
                "#,
                "cycle",
            )
            .unwrap();
        assert!(matches!(registry.validate(), Err(Error::DependencyCycle(_))));
        assert!(matches!(registry.plan("a"), Err(Error::DependencyCycle(_))));
    }

    #[test]
    fn test_later_catalogue_overrides() {
        let mut registry = registry("linux");
        registry
            .add_catalogue(
                r#"
                [[recipe]]
                name = "lib_jpeg"
                version = "9"
                [recipe.source]
                url = "http://example.com/jpegsrc.v9.tar.gz"
                "#,
                "override",
            )
            .unwrap();
        assert_eq!(
            registry.resolve("lib_jpeg").unwrap().version.as_deref(),
            Some("9")
        );
    }

    #[test]
    fn test_add_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("local.toml"),
            "[[recipe]]\nname = \"site_config\"\nstyle = \"data\"\n",
        )
        .unwrap();
        fs::write(dir.path().join("notes.txt"), "not a catalogue").unwrap();

        let mut registry = RecipeRegistry::new("linux");
        assert_eq!(registry.add_dir(dir.path()).unwrap(), 1);
        assert!(registry.contains("site_config"));
        assert_eq!(registry.add_dir(&dir.path().join("missing")).unwrap(), 0);
    }

    #[test]
    fn test_builtin_catalogue_is_consistent() {
        for platform in ["linux", "macos"] {
            let registry = RecipeRegistry::builtin(platform).unwrap();
            registry.validate().unwrap();
            let python = registry.resolve("python27").unwrap();
            for dep in ["lib_zlib", "lib_bz2", "lib_readline", "lib_sqlite3"] {
                assert!(python.depends.iter().any(|d| d == dep), "{} missing", dep);
            }
        }
    }
}
