// src/lib.rs

//! kiln: portable Python environment builder
//!
//! kiln builds a self-contained Python installation inside a single root
//! directory from pinned source recipes. The result can be moved to another
//! machine (or another path) and still run.
//!
//! # Architecture
//!
//! - Ledger-first: which files belong to which recipe is recorded in SQLite
//!   inside the root, so the tree can be uninstalled and cleaned precisely
//! - Recipes: declarative TOML catalogues resolved per platform, with
//!   templates, patches and build styles
//! - Kitchen: fetch, unpack, patch, configure, make and install one recipe,
//!   with n-way builds for multi-architecture targets
//! - Post-processing: rewrite binaries so they only reference libraries
//!   inside the root by relative paths

pub mod config;
pub mod db;
pub mod environment;
mod error;
pub mod fetch;
pub mod hash;
pub mod lock;
pub mod platform;
pub mod postprocess;
pub mod recipe;
pub mod runner;

pub use environment::{Environment, EnvironmentBuilder, InstalledEntry};
pub use error::{Error, Result};
pub use recipe::{Recipe, RecipeRegistry};
