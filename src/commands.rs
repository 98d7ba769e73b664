// src/commands.rs
//! Command handlers for the kiln CLI
//!
//! Each handler returns the process exit code. Library errors are wrapped
//! with context here and reported by `main`.

use anyhow::{Context, Result};
use kiln::Environment;
use tracing::info;

/// Install the base recipe set
pub fn cmd_init(env: &Environment) -> Result<i32> {
    env.init().context("Failed to initialise environment")?;
    println!("Environment initialised at {}", env.root().display());
    Ok(0)
}

pub fn cmd_clean(env: &Environment) -> Result<i32> {
    env.clean().context("Failed to clean environment")?;
    Ok(0)
}

/// Install each recipe explicitly, in the order given
pub fn cmd_install(env: &Environment, recipes: &[String]) -> Result<i32> {
    for name in recipes {
        info!("Installing {}", name);
        env.install(name, true)
            .with_context(|| format!("Failed to install '{}'", name))?;
    }
    Ok(0)
}

pub fn cmd_uninstall(env: &Environment, recipes: &[String]) -> Result<i32> {
    for name in recipes {
        env.uninstall(name)
            .with_context(|| format!("Failed to uninstall '{}'", name))?;
    }
    Ok(0)
}

pub fn cmd_shell(env: &Environment) -> Result<i32> {
    Ok(env.shell()?)
}

pub fn cmd_do(env: &Environment, cmdline: &[String]) -> Result<i32> {
    Ok(env.do_command(cmdline)?)
}

pub fn cmd_record(env: &Environment, recipe: &str) -> Result<i32> {
    let count = env
        .record(recipe)
        .with_context(|| format!("Failed to record files for '{}'", recipe))?;
    println!("Recorded {} files for {}", count, recipe);
    Ok(0)
}

/// Print installed recipes with their explicit/required flags
pub fn cmd_list(env: &Environment) -> Result<i32> {
    let entries = env.list()?;
    if entries.is_empty() {
        println!("No recipes installed");
        return Ok(0);
    }

    let width = entries.iter().map(|e| e.name.len()).max().unwrap_or(0);
    for entry in entries {
        let mut flags = Vec::new();
        if entry.explicit {
            flags.push("explicit");
        }
        if entry.required {
            flags.push("required");
        }
        println!(
            "{:width$}  {:>5} files  {}",
            entry.name,
            entry.files,
            flags.join(","),
            width = width
        );
    }
    Ok(0)
}

pub fn cmd_plan(env: &Environment, recipe: &str) -> Result<i32> {
    for (name, installed) in env.plan(recipe)? {
        let status = if installed { "installed" } else { "build" };
        println!("{:10} {}", status, name);
    }
    Ok(0)
}
