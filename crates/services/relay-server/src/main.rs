//! Agent Relay server binary.
//!
//! Builds the core once from environment settings, spawns the
//! background workers, then serves the MCP tool surface over stdio.
//! Exit codes: 0 on clean shutdown, 1 on configuration or storage
//! bootstrap failure.

use clap::Parser;
use relay_common::Settings;
use relay_core::workers::WorkerSet;
use relay_mcp::RelayService;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "relay-server", about = "Asynchronous coordination bus for coding agents")]
struct Args {
    /// Log filter when RUST_LOG is unset
    #[arg(long, default_value = "info", env = "LOG_LEVEL")]
    log_level: String,

    /// Skip background workers (debugging aid)
    #[arg(long, default_value_t = false)]
    no_workers: bool,
}

fn main() -> std::process::ExitCode {
    let args = Args::parse();
    relay_common::tracing::init(&args.log_level);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start runtime: {e}");
            return std::process::ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(args)) {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "fatal");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let settings = Arc::new(Settings::from_env());
    tracing::info!(
        storage_root = %settings.storage.root.display(),
        database = %settings.database.path.display(),
        "starting agent relay"
    );

    let service = RelayService::new(settings).await?;
    let mm = service.model_manager();

    let workers = if args.no_workers {
        None
    } else {
        Some(WorkerSet::spawn((*mm).clone()))
    };

    let serve = relay_mcp::run_stdio(service);
    tokio::select! {
        result = serve => result?,
        () = relay_mcp::shutdown_signal() => {}
    }

    // Drain workers, then dispose the core in reverse construction order.
    if let Some(workers) = workers {
        workers.shutdown().await;
    }
    mm.shutdown().await;

    tracing::info!("shutdown complete");
    Ok(())
}
