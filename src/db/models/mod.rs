// src/db/models/mod.rs

//! Row models for the ledger tables

mod installed_file;
mod installed_recipe;

pub use installed_file::InstalledFile;
pub use installed_recipe::InstalledRecipe;
