//! Helmsman CLI: the main entry point.
//!
//! Commands:
//! - `run`: Interactive session, single message, or a task list
//! - `servers`: List known tool servers
//! - `start`: Start one tool server and show its tools
//! - `config`: Show, locate or initialise the configuration

use clap::{Parser, Subcommand};

mod commands;
mod log_writer;

#[derive(Parser)]
#[command(
    name = "helmsman",
    about = "Helmsman: tool-driven agent over MCP tool servers",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent (interactive unless a message or tasks are given)
    Run {
        /// Start with this message
        #[arg(short, long)]
        message: Option<String>,

        /// Run these tasks in order without prompting (repeatable)
        #[arg(long = "task")]
        tasks: Vec<String>,

        /// Skip the response cache
        #[arg(long)]
        fast: bool,

        /// Stream model output as it is generated
        #[arg(long)]
        live: bool,
    },

    /// List known tool servers and whether they are running
    Servers,

    /// Start a tool server and list the tools it serves
    Start {
        /// Server name as shown by `helmsman servers`
        name: String,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration (credentials redacted)
    Show,
    /// Print the config file path
    Path,
    /// Write a default config file if none exists
    Init,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr so they never interleave with agent output; the
    // writer adds carriage returns while a turn holds the terminal in raw mode
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(log_writer::TerminalWriter::stderr)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Run {
            message,
            tasks,
            fast,
            live,
        } => commands::run::run(message, tasks, fast, live).await?,
        Commands::Servers => commands::servers::list().await?,
        Commands::Start { name } => commands::servers::start(&name).await?,
        Commands::Config { action } => match action.unwrap_or(ConfigAction::Show) {
            ConfigAction::Show => commands::config_cmd::show().await?,
            ConfigAction::Path => commands::config_cmd::path().await?,
            ConfigAction::Init => commands::config_cmd::init().await?,
        },
    }

    Ok(())
}
