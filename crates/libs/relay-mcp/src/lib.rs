//! MCP surface for Agent Relay.
//!
//! The stdio transport is the canonical one; HTTP and other transports
//! are thin external adapters over the same [`tools::RelayService`].

use anyhow::Result;
use relay_common::Settings;
use rmcp::ServiceExt;
use std::sync::Arc;
use tokio::io::{stdin, stdout};

pub mod tools;
pub use tools::RelayService;

/// Serve the tool surface over stdio until the client disconnects.
///
/// Logging must already be wired to stderr; stdout belongs to the
/// protocol stream.
pub async fn run_stdio(service: RelayService) -> Result<()> {
    tracing::info!("starting Agent Relay server (stdio mode)");

    let transport = (stdin(), stdout());
    let server = service.serve(transport).await?;

    tracing::info!("MCP server initialized, waiting for requests");

    let quit_reason = server.waiting().await?;
    tracing::info!("server shutting down: {:?}", quit_reason);

    Ok(())
}

/// Convenience constructor + run for the common startup path.
pub async fn run_stdio_with_settings(settings: Arc<Settings>) -> Result<()> {
    let service = RelayService::new(settings).await?;
    run_stdio(service).await
}

/// Resolve on SIGINT/SIGTERM; used for graceful shutdown.
#[allow(clippy::expect_used)] // signal handler setup is infallible in practice
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("signal received, starting graceful shutdown");
}
