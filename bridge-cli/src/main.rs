//! github-bridge — MongoDB push intents to GitHub commits.
//!
//! # Usage
//!
//! ```text
//! github-bridge [--config <file>] [--env-file <file>] run [--dry-run] [--use-feed]
//! github-bridge check-config
//! github-bridge pending [--limit <n>] [--json]
//! github-bridge health [--url <url>]
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    check_config::CheckConfigArgs, health::HealthArgs, pending::PendingArgs, run::RunArgs,
    GlobalArgs,
};

#[derive(Parser, Debug)]
#[command(
    name = "github-bridge",
    version,
    about = "Turn pending push intents from MongoDB into commits on GitHub",
    long_about = None,
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the bridge in the foreground until SIGINT or SIGTERM.
    Run(RunArgs),

    /// Validate configuration and print it with secrets redacted.
    CheckConfig(CheckConfigArgs),

    /// List unprocessed push intents, oldest first.
    Pending(PendingArgs),

    /// Probe the health endpoint of a running bridge.
    Health(HealthArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => args.run(&cli.global),
        Commands::CheckConfig(args) => args.run(&cli.global),
        Commands::Pending(args) => args.run(&cli.global),
        Commands::Health(args) => args.run(&cli.global),
    }
}
