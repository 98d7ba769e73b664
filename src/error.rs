// src/error.rs

//! Error types for kiln
//!
//! Errors fall into a few families: static configuration defects in recipe
//! data (never retried), conflicts the operator must resolve, failures of the
//! external build tools, integrity failures of downloaded sources, and
//! ledger/filesystem errors. All of them unwind to the orchestrator's ledger
//! scope, which rolls back, and then surface to the CLI.

use std::io;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Static defect in recipe data or settings
    #[error("configuration error: {0}")]
    Config(String),

    #[error("unknown recipe: {0}")]
    RecipeNotFound(String),

    #[error("dependency cycle detected: {0}")]
    DependencyCycle(String),

    /// An explicitly installed recipe stands in the way
    #[error("recipe '{recipe}' conflicts with '{conflict}', which is explicitly installed")]
    Conflict { recipe: String, conflict: String },

    #[error("recipe '{recipe}' is still required by: {}", dependents.join(", "))]
    HasDependents {
        recipe: String,
        dependents: Vec<String>,
    },

    /// External tool exited unsuccessfully
    #[error("command failed (exit code {}): {command}", code.map_or_else(|| "none".to_string(), |c| c.to_string()))]
    CommandFailed { command: String, code: Option<i32> },

    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("checksum mismatch for {url}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        url: String,
        expected: String,
        actual: String,
    },

    #[error("download failed for {url}: {reason}")]
    Download { url: String, reason: String },

    /// A binary would not run on the oldest supported platform
    #[error("portability check failed for {path}: {reason}")]
    Portability { path: String, reason: String },

    #[error("build directory not found for recipe '{0}'")]
    BuildDirMissing(String),

    #[error("transaction rolled back: {0}")]
    TransactionAborted(String),

    #[error("environment {0} is locked by another process")]
    Locked(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("ledger error: {0}")]
    Ledger(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Process exit code to report for this error
    ///
    /// Failed subprocesses propagate their own exit code; everything else is 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::CommandFailed { code: Some(code), .. } if *code != 0 => *code,
            _ => 1,
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Parse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_propagates_command_status() {
        let err = Error::CommandFailed {
            command: "make install".to_string(),
            code: Some(2),
        };
        assert_eq!(err.exit_code(), 2);

        let err = Error::CommandFailed {
            command: "make".to_string(),
            code: None,
        };
        assert_eq!(err.exit_code(), 1);

        assert_eq!(Error::Config("bad".to_string()).exit_code(), 1);
    }

    #[test]
    fn test_display_lists_dependents() {
        let err = Error::HasDependents {
            recipe: "lib_zlib".to_string(),
            dependents: vec!["python27".to_string(), "lib_png".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "recipe 'lib_zlib' is still required by: python27, lib_png"
        );
    }
}
