// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Common argument: one or more recipe names
fn recipes_arg() -> Arg {
    Arg::new("recipes")
        .required(true)
        .num_args(1..)
        .help("Recipe names")
}

fn build_cli() -> Command {
    Command::new("kiln")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Kiln Contributors")
        .about("Builds self-relocatable portable Python environments")
        .arg(Arg::new("root").required(true).help("Environment root directory"))
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Show debug output"),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .action(ArgAction::SetTrue)
                .help("Only show warnings and errors"),
        )
        .subcommand_required(true)
        .subcommand(Command::new("init").about("Install the platform base recipes"))
        .subcommand(
            Command::new("clean").about("Remove build products, implicit installs and untracked files"),
        )
        .subcommand(
            Command::new("install")
                .about("Install recipes and their dependencies")
                .arg(recipes_arg()),
        )
        .subcommand(
            Command::new("uninstall")
                .about("Uninstall recipes nothing else depends on")
                .arg(recipes_arg()),
        )
        .subcommand(Command::new("shell").about("Start an interactive shell inside the build environment"))
        .subcommand(
            Command::new("do")
                .about("Run a command line inside the build environment")
                .arg(
                    Arg::new("cmdline")
                        .required(true)
                        .num_args(1..)
                        .trailing_var_arg(true)
                        .allow_hyphen_values(true)
                        .help("Command line, run with sh -c"),
                ),
        )
        .subcommand(
            Command::new("record")
                .about("Record untracked files as belonging to a recipe")
                .arg(Arg::new("recipe").required(true).help("Recipe name")),
        )
        .subcommand(Command::new("list").about("List installed recipes"))
        .subcommand(
            Command::new("plan")
                .about("Show the build order for a recipe")
                .arg(Arg::new("recipe").required(true).help("Recipe name")),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // CARGO_MANIFEST_DIR is always set by cargo
    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = manifest_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();
    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = manifest_dir.join("man").join("kiln.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
