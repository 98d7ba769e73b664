// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.
//!
//! Environments built here use a scripted [`FakeRunner`] instead of real
//! build tools: `tar` creates a source tree named after the archive,
//! `configure` and `make` are logged, and `make install` drops a couple of
//! files into the prefix. Sources are empty local files fetched through
//! `file://` URLs. A do-nothing `patchelf` sits on `PATH` so the ELF
//! post-processor finds one.

#![allow(dead_code)]

use kiln::config::{BuildEnv, EnvSettings};
use kiln::platform;
use kiln::runner::{CommandRunner, CommandSpec};
use kiln::{Environment, Error, RecipeRegistry, Result};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tempfile::TempDir;

/// What the fake runner saw and what it should break
#[derive(Default)]
pub struct RunnerState {
    /// One line per command: program name and arguments
    pub log: Vec<String>,
    /// Source tree names whose `make install` fails after writing its files
    pub fail_install: HashSet<String>,
    /// Source tree names whose `make install` also writes ELF binaries
    pub elf_install: HashSet<String>,
    /// What `objdump` prints
    pub objdump_output: String,
}

/// Smallest header goblin recognises as a 64-bit little-endian ELF
pub const ELF_HEADER: [u8; 16] = [0x7f, b'E', b'L', b'F', 2, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0];

#[derive(Clone)]
pub struct FakeRunner {
    prefix: PathBuf,
    state: Rc<RefCell<RunnerState>>,
}

impl FakeRunner {
    pub fn new(prefix: PathBuf) -> Self {
        Self {
            prefix,
            state: Rc::new(RefCell::new(RunnerState::default())),
        }
    }

    pub fn state(&self) -> Rc<RefCell<RunnerState>> {
        Rc::clone(&self.state)
    }

    fn tar(&self, args: &[String]) -> Result<()> {
        let archive = PathBuf::from(&args[1]);
        let dest = PathBuf::from(&args[3]);
        let name = archive
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("source")
            .trim_end_matches(".tar.gz")
            .to_string();
        let tree = dest.join(name);
        fs::create_dir_all(&tree)?;
        fs::write(tree.join("configure"), "#!/bin/sh\n")?;
        Ok(())
    }

    fn make(&self, cmd: &CommandSpec, args: &[String]) -> Result<()> {
        let Some(pos) = args.iter().position(|a| a == "-C") else {
            return Ok(());
        };
        let dir = PathBuf::from(&args[pos + 1]);
        if !args[pos + 2..].iter().any(|a| a == "install") {
            return Ok(());
        }

        let tree = dir
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();
        let share = self.prefix.join("share").join(&tree);
        fs::create_dir_all(&share)?;
        fs::write(share.join("installed.txt"), &tree)?;
        fs::create_dir_all(self.prefix.join("lib"))?;
        fs::write(self.prefix.join("lib").join(format!("lib{}.a", tree)), "!<arch>\n")?;

        if self.state.borrow().elf_install.contains(&tree) {
            fs::write(self.prefix.join("lib").join(format!("lib{}.so", tree)), ELF_HEADER)?;
            fs::create_dir_all(self.prefix.join("bin"))?;
            fs::write(self.prefix.join("bin").join(&tree), ELF_HEADER)?;
        }

        if self.state.borrow().fail_install.contains(&tree) {
            return Err(Error::CommandFailed {
                command: cmd.to_string(),
                code: Some(2),
            });
        }
        Ok(())
    }
}

impl CommandRunner for FakeRunner {
    fn run(&self, cmd: &CommandSpec) -> Result<()> {
        let program = cmd.program_name();
        let args = cmd.arg_strings();
        self.state
            .borrow_mut()
            .log
            .push(format!("{} {}", program, args.join(" ")).trim_end().to_string());

        match program.as_str() {
            "tar" => self.tar(&args),
            "make" => self.make(cmd, &args),
            _ => Ok(()),
        }
    }

    fn capture(&self, cmd: &CommandSpec) -> Result<Vec<u8>> {
        self.run(cmd)?;
        if cmd.program_name() == "objdump" {
            return Ok(self.state.borrow().objdump_output.clone().into_bytes());
        }
        Ok(Vec::new())
    }

    fn status(&self, cmd: &CommandSpec) -> Result<i32> {
        self.run(cmd)?;
        Ok(0)
    }
}

/// A throwaway environment wired to a [`FakeRunner`]
pub struct TestEnv {
    /// Keep alive for the lifetime of the test
    pub dir: TempDir,
    pub root: PathBuf,
    pub sources: PathBuf,
    pub runner: FakeRunner,
    pub env: Environment,
}

impl TestEnv {
    /// Root-relative paths the ledger holds for `recipe`
    pub fn files(&self, recipe: &str) -> Vec<String> {
        self.env.ledger().files_for(recipe).unwrap()
    }

    pub fn log(&self) -> Vec<String> {
        self.runner.state().borrow().log.clone()
    }

    /// Names of the trees `make install` ran for, in order
    pub fn installs(&self) -> Vec<String> {
        self.log()
            .iter()
            .filter(|line| line.starts_with("make ") && line.ends_with(" install"))
            .filter_map(|line| {
                let dir = line.split_whitespace().skip_while(|a| *a != "-C").nth(1)?;
                Path::new(dir).file_name()?.to_str().map(str::to_string)
            })
            .collect()
    }

    pub fn fail_install_of(&self, tree: &str) {
        self.runner
            .state()
            .borrow_mut()
            .fail_install
            .insert(tree.to_string());
    }

    pub fn elf_install_of(&self, tree: &str) {
        self.runner
            .state()
            .borrow_mut()
            .elf_install
            .insert(tree.to_string());
    }

    pub fn set_objdump_output(&self, output: &str) {
        self.runner.state().borrow_mut().objdump_output = output.to_string();
    }
}

/// Recipe `[[recipe]]` with an autotools build from a local archive
pub fn autotools_recipe(sources: &Path, name: &str, extra: &str) -> String {
    recipe_text(sources, name, false, extra)
}

/// Like [`autotools_recipe`] but with post-processing left on
pub fn portable_recipe(sources: &Path, name: &str, extra: &str) -> String {
    recipe_text(sources, name, true, extra)
}

fn recipe_text(sources: &Path, name: &str, postprocess: bool, extra: &str) -> String {
    let archive = sources.join(format!("{}-1.0.tar.gz", name));
    fs::write(&archive, "").unwrap();
    format!(
        "[[recipe]]\nname = \"{name}\"\nversion = \"1.0\"\npostprocess = {postprocess}\n{extra}\n\n\
         [recipe.source]\nurl = \"file://{}\"\n\n",
        archive.display()
    )
}

/// Build a linux environment from catalogue text produced by `catalogue`
///
/// The closure gets the directory local archives should be written to.
pub fn test_env<F>(base: &[&str], catalogue: F) -> TestEnv
where
    F: FnOnce(&Path) -> String,
{
    test_env_on("linux", base, catalogue)
}

/// Like [`test_env`] for the named platform
pub fn test_env_on<F>(platform_name: &str, base: &[&str], catalogue: F) -> TestEnv
where
    F: FnOnce(&Path) -> String,
{
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap().join("env");
    let sources = dir.path().canonicalize().unwrap().join("sources");
    let tools = dir.path().canonicalize().unwrap().join("tools");
    fs::create_dir_all(&root).unwrap();
    fs::create_dir_all(&sources).unwrap();
    fs::create_dir_all(&tools).unwrap();
    fs::write(tools.join("patchelf"), "#!/bin/sh\n").unwrap();
    fs::set_permissions(tools.join("patchelf"), fs::Permissions::from_mode(0o755)).unwrap();

    let mut registry = RecipeRegistry::new(platform_name);
    registry
        .add_catalogue(&catalogue(&sources), "test.toml")
        .unwrap();

    let settings = EnvSettings {
        cache_dir: Some(root.join("cache")),
        ..EnvSettings::default()
    };
    let platform = platform::by_name(platform_name, &settings).unwrap();
    let runner = FakeRunner::new(root.join(platform.prefix_subpath()));

    let mut vars = BTreeMap::new();
    vars.insert("PATH".to_string(), format!("{}:/usr/bin:/bin", tools.display()));

    let env = Environment::builder(&root)
        .settings(settings)
        .platform(platform)
        .registry(registry)
        .runner(Box::new(runner.clone()))
        .base_recipes(base.iter().map(|s| s.to_string()).collect())
        .process_env(BuildEnv::from_vars(vars))
        .open()
        .unwrap();

    TestEnv {
        dir,
        root,
        sources,
        runner,
        env,
    }
}
