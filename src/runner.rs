// src/runner.rs

//! Subprocess execution for build steps
//!
//! Every external tool (tar, configure, make, cmake, objdump, patchelf, lipo,
//! install_name_tool, ...) goes through a [`CommandRunner`]. Commands always
//! carry an explicit environment; the child never inherits ambient process
//! state. Execution is synchronous and a non-zero exit is an error.

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

/// A fully described subprocess invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: OsString,
    pub args: Vec<OsString>,
    /// Complete environment of the child
    pub env: BTreeMap<String, String>,
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            program: program.as_ref().to_os_string(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    /// Replace the whole environment
    pub fn env_map(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Set one variable on top of the current environment
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn cwd(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Name of the program without its directory
    pub fn program_name(&self) -> String {
        Path::new(&self.program)
            .file_name()
            .unwrap_or(&self.program)
            .to_string_lossy()
            .into_owned()
    }

    /// Arguments as lossy strings, for matching and logging
    pub fn arg_strings(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).env_clear().envs(&self.env);
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        cmd
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.to_string_lossy())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Executes subprocesses on behalf of the engine and post-processors
pub trait CommandRunner {
    /// Run to completion with inherited stdio; non-zero exit is an error
    fn run(&self, cmd: &CommandSpec) -> Result<()>;

    /// Run and return stdout; non-zero exit is an error
    fn capture(&self, cmd: &CommandSpec) -> Result<Vec<u8>>;

    /// Run interactively and return the exit code instead of failing on it
    fn status(&self, cmd: &CommandSpec) -> Result<i32>;
}

/// Runs commands on the host with `std::process`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl SystemRunner {
    fn spawn_error(cmd: &CommandSpec, source: std::io::Error) -> Error {
        Error::Spawn {
            command: cmd.to_string(),
            source,
        }
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, cmd: &CommandSpec) -> Result<()> {
        debug!("Running: {}", cmd);
        let status = cmd
            .to_command()
            .stdin(Stdio::null())
            .status()
            .map_err(|e| Self::spawn_error(cmd, e))?;

        if !status.success() {
            return Err(Error::CommandFailed {
                command: cmd.to_string(),
                code: status.code(),
            });
        }
        Ok(())
    }

    fn capture(&self, cmd: &CommandSpec) -> Result<Vec<u8>> {
        debug!("Capturing: {}", cmd);
        let output = cmd
            .to_command()
            .stdin(Stdio::null())
            .stderr(Stdio::inherit())
            .output()
            .map_err(|e| Self::spawn_error(cmd, e))?;

        if !output.status.success() {
            return Err(Error::CommandFailed {
                command: cmd.to_string(),
                code: output.status.code(),
            });
        }
        Ok(output.stdout)
    }

    fn status(&self, cmd: &CommandSpec) -> Result<i32> {
        debug!("Running interactively: {}", cmd);
        let status = cmd
            .to_command()
            .status()
            .map_err(|e| Self::spawn_error(cmd, e))?;
        Ok(status.code().unwrap_or(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_env() -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert("PATH".to_string(), "/usr/bin:/bin".to_string());
        env
    }

    #[test]
    fn test_display_and_names() {
        let cmd = CommandSpec::new("/usr/bin/make")
            .args(["-C", "/tmp/build"])
            .arg("install");
        assert_eq!(cmd.to_string(), "/usr/bin/make -C /tmp/build install");
        assert_eq!(cmd.program_name(), "make");
        assert_eq!(cmd.arg_strings(), vec!["-C", "/tmp/build", "install"]);
    }

    #[test]
    fn test_capture_uses_explicit_env() {
        let cmd = CommandSpec::new("sh")
            .args(["-c", "printf %s \"$KILN_PROBE\""])
            .env_map(base_env())
            .env("KILN_PROBE", "hello");
        let out = SystemRunner.capture(&cmd).unwrap();
        assert_eq!(out, b"hello");
    }

    #[test]
    fn test_nonzero_exit_is_command_failed() {
        let cmd = CommandSpec::new("sh")
            .args(["-c", "exit 3"])
            .env_map(base_env());
        match SystemRunner.run(&cmd) {
            Err(Error::CommandFailed { code, .. }) => assert_eq!(code, Some(3)),
            other => panic!("expected CommandFailed, got {:?}", other),
        }
        assert_eq!(SystemRunner.status(&cmd).unwrap(), 3);
    }

    #[test]
    fn test_missing_program_is_spawn_error() {
        let cmd = CommandSpec::new("/nonexistent/kiln-tool").env_map(base_env());
        assert!(matches!(SystemRunner.run(&cmd), Err(Error::Spawn { .. })));
    }
}
