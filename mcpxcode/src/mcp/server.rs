//! MCP server entry point.

use anyhow::{Context, Result};
use rmcp::{ServiceExt, transport::stdio};

use super::tools::XcodeMcpServer;
use crate::dispatch::Dispatcher;

/// Run the MCP server over stdio until the client disconnects or the process
/// is asked to stop.
///
/// Running tools are cancelled and reaped before this returns.
pub async fn run_mcp_server(dispatcher: Dispatcher) -> Result<()> {
    log::info!(
        "serving {} tools over stdio",
        dispatcher.registry().len()
    );

    let server = XcodeMcpServer::new(dispatcher);

    let service = server
        .clone()
        .serve(stdio())
        .await
        .context("Failed to start MCP service")?;

    let outcome = tokio::select! {
        quit = service.waiting() => {
            log::info!("client disconnected, shutting down");
            quit.map(drop).context("MCP service stopped unexpectedly")
        }
        signal = shutdown_signal() => {
            log::info!("received {signal}, shutting down");
            Ok(())
        }
    };

    server.shutdown().await;
    outcome
}

/// Resolves with the name of the first termination signal received.
#[cfg(unix)]
async fn shutdown_signal() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(e) => {
            log::warn!("cannot listen for SIGTERM: {e}");
            return ctrl_c().await;
        }
    };

    tokio::select! {
        _ = terminate.recv() => "SIGTERM",
        name = ctrl_c() => name,
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> &'static str {
    ctrl_c().await
}

async fn ctrl_c() -> &'static str {
    match tokio::signal::ctrl_c().await {
        Ok(()) => "SIGINT",
        Err(e) => {
            log::warn!("cannot listen for Ctrl-C: {e}");
            std::future::pending().await
        }
    }
}
