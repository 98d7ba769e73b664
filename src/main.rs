// src/main.rs

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use kiln::Environment;
use kiln::lock::EnvLock;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    match run(cli) {
        Ok(code) => ExitCode::from(clamp_code(code)),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            let code = e
                .chain()
                .find_map(|cause| cause.downcast_ref::<kiln::Error>())
                .map(kiln::Error::exit_code)
                .unwrap_or(1);
            ExitCode::from(clamp_code(code))
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let _lock = if cli.command.mutates() {
        Some(EnvLock::try_acquire(&cli.root)?)
    } else {
        None
    };
    let env = Environment::open(&cli.root)?;

    match &cli.command {
        Commands::Init => commands::cmd_init(&env),
        Commands::Clean => commands::cmd_clean(&env),
        Commands::Install { recipes } => commands::cmd_install(&env, recipes),
        Commands::Uninstall { recipes } => commands::cmd_uninstall(&env, recipes),
        Commands::Shell => commands::cmd_shell(&env),
        Commands::Do { cmdline } => commands::cmd_do(&env, cmdline),
        Commands::Record { recipe } => commands::cmd_record(&env, recipe),
        Commands::List => commands::cmd_list(&env),
        Commands::Plan { recipe } => commands::cmd_plan(&env, recipe),
    }
}

/// Exit statuses outside 1..=255 (signals, wrapped codes) become 1
fn clamp_code(code: i32) -> u8 {
    match code {
        0 => 0,
        1..=255 => code as u8,
        _ => 1,
    }
}
