// src/cli.rs
//! CLI definitions for kiln
//!
//! This module contains the command-line interface definitions using clap.
//! The actual command implementations are in the `commands` module.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "kiln")]
#[command(author = "Kiln Contributors")]
#[command(version)]
#[command(about = "Builds self-relocatable portable Python environments", long_about = None)]
pub struct Cli {
    /// Environment root directory
    pub root: PathBuf,

    /// Show debug output
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only show warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Install the platform base recipes
    Init,

    /// Remove build products, implicit installs and untracked files
    Clean,

    /// Install recipes and their dependencies
    Install {
        /// Recipe names
        #[arg(required = true)]
        recipes: Vec<String>,
    },

    /// Uninstall recipes nothing else depends on
    Uninstall {
        /// Recipe names
        #[arg(required = true)]
        recipes: Vec<String>,
    },

    /// Start an interactive shell inside the build environment
    Shell,

    /// Run a command line inside the build environment
    Do {
        /// Command line, joined with spaces and run with `sh -c`
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        cmdline: Vec<String>,
    },

    /// Record untracked files as belonging to a recipe
    Record {
        /// Recipe name (need not be a known recipe)
        recipe: String,
    },

    /// List installed recipes
    List,

    /// Show the build order for a recipe
    Plan {
        /// Recipe name
        recipe: String,
    },
}

impl Commands {
    /// Whether the command changes the environment and needs the root lock
    pub fn mutates(&self) -> bool {
        !matches!(self, Commands::List | Commands::Plan { .. })
    }
}
