//! Reagent CLI, the main entry point.
//!
//! Commands:
//! - `run`     Drive one goal through the ReAct loop
//! - `approve` Approve a tool call waiting for confirmation
//! - `reject`  Reject a tool call waiting for confirmation
//! - `stop`    Ask a running request to stop
//! - `config`  Print, locate or validate the configuration

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "reagent", about = "Reagent: a ReAct agent engine", version, author)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a goal to completion
    Run(commands::run::RunArgs),

    /// Approve a pending tool call
    Approve {
        /// Tool execution id shown when the call was proposed
        id: String,
    },

    /// Reject a pending tool call
    Reject {
        /// Tool execution id shown when the call was proposed
        id: String,
    },

    /// Stop a running request
    Stop {
        /// Request id the run was started with
        request_id: String,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: Option<commands::config_cmd::ConfigAction>,
    },
}

fn init_tracing(verbose: bool, json: bool) {
    let filter = if verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json_logs);

    match cli.command {
        Commands::Run(args) => commands::run::run(args).await?,
        Commands::Approve { id } => commands::decide::run(&id, true).await?,
        Commands::Reject { id } => commands::decide::run(&id, false).await?,
        Commands::Stop { request_id } => commands::stop::run(&request_id).await?,
        Commands::Config { action } => commands::config_cmd::run(action.unwrap_or_default()).await?,
    }

    Ok(())
}
