//! Vigil — keep local files synchronized with remote data, and the
//! processes that consume them alive.
//!
//! # Usage
//!
//! ```text
//! vigil run --config <path> [--onetime] [--pid-file <path>]
//! vigil check --config <path>
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{check::CheckArgs, run::RunArgs};

#[derive(Parser, Debug)]
#[command(
    name = "vigil",
    version,
    about = "Synchronize local configuration files with remote sources and supervise the processes that read them",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run every configured resource until interrupted.
    Run(RunArgs),

    /// Parse and validate a configuration, then print a summary.
    Check(CheckArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => args.run(),
        Commands::Check(args) => args.run(),
    }
}
