mod commands;
mod logging;
mod output;

use clap::{Parser, Subcommand};
use color_eyre::Result;

use commands::run::RunArgs;
use commands::validate::ValidateArgs;

/// gantry - run GitHub-Actions-style CI workflows locally
#[derive(Parser, Debug)]
#[command(name = "gantry")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Increase diagnostic logging (-v debug, -vv trace); RUST_LOG takes precedence
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a workflow
    Run(RunArgs),

    /// Parse and check a workflow without running it
    Validate(ValidateArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    logging::init(match cli.verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    });

    match cli.command {
        Commands::Run(args) => commands::run::execute(args).await,
        Commands::Validate(args) => commands::validate::execute(args),
    }
}
