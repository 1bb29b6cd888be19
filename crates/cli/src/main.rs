//! ensura: programming by guarantees, not instructions.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// EnsuraScript toolchain.
#[derive(Parser)]
#[command(
    name = "ensura",
    version,
    about = "EnsuraScript: declare system-state guarantees and keep them enforced"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a .ens file and print the resolved guarantee graph
    Compile {
        /// Path to the .ens source file
        file: PathBuf,
        /// Output the plan in JSON format
        #[arg(long)]
        json: bool,
        /// Output the dependency graph in DOT format
        #[arg(long)]
        graph: bool,
    },

    /// Show implied guarantees and chosen handlers
    Explain {
        /// Path to the .ens source file
        file: PathBuf,
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Print the deterministic sequential execution plan
    Plan {
        /// Path to the .ens source file
        file: PathBuf,
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Run the continuous enforcement loop
    Run {
        /// Path to the .ens source file
        file: PathBuf,
        /// Interval between enforcement passes (e.g. 30s, 5m)
        #[arg(long, default_value = "30s")]
        interval: humantime::Duration,
        /// Maximum repair attempts per step
        #[arg(long, default_value_t = 3)]
        retries: u32,
    },

    /// Check guarantees without enforcing (dry run)
    Check {
        /// Path to the .ens source file
        file: PathBuf,
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Print version information
    Version,
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Compile { file, json, graph } => commands::compile::run(&file, json, graph),
        Commands::Explain { file, json } => commands::explain::run(&file, json),
        Commands::Plan { file, json } => commands::plan::run(&file, json),
        Commands::Run {
            file,
            interval,
            retries,
        } => commands::run::run(&file, interval.into(), retries),
        Commands::Check { file, json } => commands::check::run(&file, json),
        Commands::Version => {
            println!("ensura version {}", env!("CARGO_PKG_VERSION"));
        }
    }
}
