use std::{path::PathBuf, process::ExitCode};

use anyhow::Result;
use clap::{Parser, Subcommand};
use mcpxcode::{
    catalog::Registry,
    commands::{ListArgs, ToolArgs, list_tools, run_tool},
    config::ServerConfig,
    dispatch::Dispatcher,
    error::INTERNAL_ERROR_EXIT_CODE,
    mcp::run_mcp_server,
};

// ----------------------------------------------------------------------------
// Command-line Interface

#[derive(Debug, Parser)]
#[command(version, about = "Xcode command-line tools as MCP tools")]
struct Cli {
    /// TOML configuration file.
    #[arg(long, global = true, env = "MCPXCODE_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the tool catalog over MCP on stdio.
    Serve,
    /// Run a single tool and print its JSON result.
    Tool(ToolArgs),
    /// List the available tools and their arguments.
    List(ListArgs),
}

// ----------------------------------------------------------------------------
// Application

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::new()
        .filter_module("mcpxcode", log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let code = match run(Cli::parse()).await {
        Ok(code) => code,
        Err(e) => {
            log::error!("{e:#}");
            INTERNAL_ERROR_EXIT_CODE
        }
    };
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

async fn run(cli: Cli) -> Result<i32> {
    let config = ServerConfig::load(cli.config.as_deref())?;
    let dispatcher = Dispatcher::new(Registry::builtin(), config);

    match cli.command {
        Command::Serve => {
            run_mcp_server(dispatcher).await?;
            Ok(0)
        }
        Command::Tool(args) => run_tool(&dispatcher, args).await,
        Command::List(args) => {
            list_tools(dispatcher.registry(), args);
            Ok(0)
        }
    }
}
