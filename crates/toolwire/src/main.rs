//! toolwire - operator CLI for MCP tool workers.
//!
//! This is the main entry point for the toolwire CLI.

mod commands;
mod logging;

use clap::{Parser, Subcommand};
use logging::{LogConfig, LogLevel};
use toolwire_mcp::{ClientManager, McpSettings};
use tracing::debug;

#[derive(Parser)]
#[command(name = "toolwire")]
#[command(author, version, about = "Talk to MCP tool workers", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, value_parser = parse_log_level)]
    log_level: Option<LogLevel>,

    /// Subcommand
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List logical servers and how they are launched
    Servers,
    /// Start a server and list its tools
    Tools {
        /// Logical server name
        server: String,
    },
    /// Call a tool and print its output
    Call {
        /// Logical server name
        server: String,
        /// Tool name
        tool: String,
        /// Tool arguments as a JSON object
        #[arg(short, long)]
        args: Option<String>,
    },
}

fn parse_log_level(s: &str) -> Result<LogLevel, String> {
    LogLevel::parse(s).ok_or_else(|| format!("unknown log level '{s}'"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(LogConfig::from_flags(cli.verbose, cli.log_level));

    let settings = McpSettings::load().await?;
    debug!(transport = %settings.transport, "Loaded settings");

    if let Commands::Servers = cli.command {
        return commands::handle_servers(&settings);
    }

    let manager = ClientManager::with_default_factory(settings);
    let result = match &cli.command {
        Commands::Tools { server } => commands::handle_tools(&manager, server).await,
        Commands::Call { server, tool, args } => {
            commands::handle_call(&manager, server, tool, args.as_deref()).await
        }
        Commands::Servers => Ok(()),
    };

    manager.stop_all().await;
    result
}
