// src/recipe/kitchen/steps.rs

//! Build steps per recipe style
//!
//! Each [`BuildStyle`] maps to one [`BuildSteps`] implementation. The trait's
//! default methods are the generic autotools/make behaviour; styles override
//! only the steps that differ.

use super::Cook;
use crate::error::{Error, Result};
use crate::recipe::BuildStyle;
use crate::runner::CommandSpec;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Out-of-tree build directory used by cmake styles
pub const CMAKE_BUILD_DIR: &str = "KILN-BUILD";

pub trait BuildSteps: Sync {
    /// Whether the style downloads and unpacks a source archive
    fn needs_source(&self) -> bool {
        true
    }

    /// Directory make runs in, before the recipe's `relpath`
    fn make_root(&self, tree: &Path) -> PathBuf {
        tree.to_path_buf()
    }

    fn configure(&self, cook: &Cook<'_>, tree: &Path) -> Result<()> {
        run_configure_script(cook, tree)
    }

    fn make(&self, cook: &Cook<'_>, tree: &Path) -> Result<()> {
        let targets = cook.recipe().make.targets.clone();
        cook.run(&make_command(cook, &self.make_root(tree), &targets, true))
    }

    fn install(&self, cook: &Cook<'_>, tree: &Path) -> Result<()> {
        let target = cook
            .recipe()
            .make
            .install_target
            .clone()
            .unwrap_or_else(|| "install".to_string());
        cook.run(&make_command(cook, &self.make_root(tree), &[target], false))
    }
}

/// Steps for `style`
pub fn steps_for(style: BuildStyle) -> &'static dyn BuildSteps {
    match style {
        BuildStyle::Autotools => &Autotools,
        BuildStyle::Cmake => &Cmake,
        BuildStyle::Python => &Python,
        BuildStyle::PythonCmake => &PythonCmake,
        BuildStyle::Make => &MakeOnly,
        BuildStyle::Data => &Data,
        BuildStyle::Prebuilt => &Prebuilt,
    }
}

/// Resolve a script path relative to the directory it runs in
fn script_path(dir: &Path, script: &str) -> PathBuf {
    let path = Path::new(script);
    if path.is_relative() && script.contains('/') {
        dir.join(path)
    } else {
        path.to_path_buf()
    }
}

/// `make [VAR=value ...] -C <dir> [-jN] [targets]`
pub fn make_command(cook: &Cook<'_>, root: &Path, targets: &[String], parallel: bool) -> CommandSpec {
    let make = &cook.recipe().make;
    let dir = match &make.relpath {
        Some(rel) => root.join(cook.substitute(rel)),
        None => root.to_path_buf(),
    };

    let mut cmd = cook.command("make");
    for (key, value) in &make.vars {
        cmd = cmd.arg(format!("{}={}", key, cook.substitute(value)));
    }
    cmd = cmd.arg("-C").arg(&dir);

    let jobs = cook.kitchen().config.jobs;
    if parallel && jobs > 1 {
        cmd = cmd.arg(format!("-j{}", jobs));
    }
    cmd.args(targets.iter().map(|t| cook.substitute(t)))
}

fn run_configure_script(cook: &Cook<'_>, tree: &Path) -> Result<()> {
    let recipe = cook.recipe();
    let dir = cook.configure_dir(tree);
    let script = cook.substitute(recipe.configure.script.as_deref().unwrap_or("./configure"));

    let mut cmd = cook.command(script_path(&dir, &script)).cwd(&dir);
    for (key, value) in &recipe.configure.vars {
        cmd = cmd.env(key.clone(), cook.substitute(value));
    }
    if recipe.configure.prefix_arg.unwrap_or(true) {
        cmd = cmd.arg(format!("--prefix={}", cook.layout().prefix.display()));
    }
    cmd = cmd.args(recipe.configure.args.iter().map(|a| cook.substitute(a)));
    cook.run(&cmd)
}

fn run_cmake(cook: &Cook<'_>, tree: &Path, extra: Vec<String>) -> Result<()> {
    let recipe = cook.recipe();
    let layout = cook.layout();
    let build_dir = tree.join(CMAKE_BUILD_DIR);
    if build_dir.exists() {
        fs::remove_dir_all(&build_dir)?;
    }
    fs::create_dir_all(&build_dir)?;

    let mut cmd = cook
        .command("cmake")
        .cwd(&build_dir)
        .arg(format!("-DCMAKE_INSTALL_PREFIX={}", layout.prefix.display()))
        .arg(format!(
            "-DCMAKE_MODULE_PATH={}",
            layout.prefix.join("share/cmake").display()
        ))
        .arg("-DCMAKE_VERBOSE_MAKEFILE=ON")
        .arg("-DBUILD_TESTS=False")
        .arg("-DCMAKE_BUILD_TYPE=MinSizeRel")
        .args(extra)
        .args(recipe.configure.args.iter().map(|a| cook.substitute(a)));
    for (key, value) in &recipe.configure.vars {
        cmd = cmd.env(key.clone(), cook.substitute(value));
    }
    cook.run(&cmd.arg(cook.configure_dir(tree)))
}

struct Autotools;

impl BuildSteps for Autotools {}

struct MakeOnly;

impl BuildSteps for MakeOnly {
    fn configure(&self, _cook: &Cook<'_>, _tree: &Path) -> Result<()> {
        Ok(())
    }
}

struct Cmake;

impl BuildSteps for Cmake {
    fn make_root(&self, tree: &Path) -> PathBuf {
        tree.join(CMAKE_BUILD_DIR)
    }

    fn configure(&self, cook: &Cook<'_>, tree: &Path) -> Result<()> {
        run_cmake(cook, tree, Vec::new())
    }
}

struct PythonCmake;

impl BuildSteps for PythonCmake {
    fn make_root(&self, tree: &Path) -> PathBuf {
        tree.join(CMAKE_BUILD_DIR)
    }

    fn configure(&self, cook: &Cook<'_>, tree: &Path) -> Result<()> {
        let layout = cook.layout();
        let lib_ext = &cook.kitchen().config.lib_ext;
        let extra = vec![
            format!("-DPYTHON_EXECUTABLE={}", layout.python().display()),
            format!(
                "-DPYTHON_INCLUDE_DIR={}",
                layout.include_dir().join("python2.7").display()
            ),
            format!(
                "-DPYTHON_LIBRARY={}",
                layout.lib_dir().join(format!("libpython2.7.{}", lib_ext)).display()
            ),
        ];
        run_cmake(cook, tree, extra)
    }
}

/// `python setup.py install` with the environment's interpreter
struct Python;

impl BuildSteps for Python {
    fn configure(&self, _cook: &Cook<'_>, _tree: &Path) -> Result<()> {
        Ok(())
    }

    fn make(&self, _cook: &Cook<'_>, _tree: &Path) -> Result<()> {
        Ok(())
    }

    fn install(&self, cook: &Cook<'_>, tree: &Path) -> Result<()> {
        let recipe = cook.recipe();
        let cmd = cook
            .command(cook.layout().python())
            .cwd(cook.configure_dir(tree))
            .arg("setup.py")
            .arg("install")
            .args(recipe.setup_args.iter().map(|a| cook.substitute(a)));
        cook.run(&cmd)
    }
}

/// Writes declared files under the prefix, then runs the optional installer
struct Data;

impl BuildSteps for Data {
    fn needs_source(&self) -> bool {
        false
    }

    fn configure(&self, _cook: &Cook<'_>, _tree: &Path) -> Result<()> {
        Ok(())
    }

    fn make(&self, _cook: &Cook<'_>, _tree: &Path) -> Result<()> {
        Ok(())
    }

    fn install(&self, cook: &Cook<'_>, prefix: &Path) -> Result<()> {
        let recipe = cook.recipe();
        for file in &recipe.files {
            let rel = cook.substitute(&file.path);
            if Path::new(&rel).is_absolute() {
                return Err(Error::Config(format!(
                    "recipe '{}' writes outside the prefix: {}",
                    recipe.name, rel
                )));
            }

            let path = prefix.join(&rel);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            debug!("Writing {}", path.display());
            fs::write(&path, cook.substitute(&file.content))?;
            fs::set_permissions(&path, fs::Permissions::from_mode(file.mode.unwrap_or(0o644)))?;
        }

        if let Some(installer) = &recipe.installer {
            let cmd = cook
                .command(cook.substitute(&installer.script))
                .cwd(prefix)
                .args(installer.args.iter().map(|a| cook.substitute(a)));
            cook.run(&cmd)?;
        }
        Ok(())
    }
}

/// Runs the archive's own installer script
struct Prebuilt;

impl BuildSteps for Prebuilt {
    fn configure(&self, _cook: &Cook<'_>, _tree: &Path) -> Result<()> {
        Ok(())
    }

    fn make(&self, _cook: &Cook<'_>, _tree: &Path) -> Result<()> {
        Ok(())
    }

    fn install(&self, cook: &Cook<'_>, tree: &Path) -> Result<()> {
        let recipe = cook.recipe();
        let installer = recipe.installer.as_ref().ok_or_else(|| {
            Error::Config(format!("prebuilt recipe '{}' has no installer", recipe.name))
        })?;

        let script = cook.substitute(&installer.script);
        let program = if Path::new(&script).is_absolute() {
            PathBuf::from(script)
        } else {
            tree.join(script)
        };
        let cmd = cook
            .command(program)
            .cwd(tree)
            .args(installer.args.iter().map(|a| cook.substitute(a)));
        cook.run(&cmd)
    }
}
