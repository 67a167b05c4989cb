//! Tracing subscriber setup.
//!
//! Logs always go to stderr: the MCP stdio transport owns stdout, and a
//! single stray log line there corrupts the protocol stream. Setting
//! `LOG_DIR` additionally writes a daily-rolling plaintext log file.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the global subscriber. `RUST_LOG` overrides the default
/// filter. Safe to call once per process; returns quietly if a
/// subscriber is already installed (tests set their own).
pub fn init(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let json = std::env::var("LOG_JSON_ENABLED")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    let log_dir = std::env::var("LOG_DIR").ok();

    let registry = tracing_subscriber::registry().with(filter);
    let result = match (json, log_dir) {
        (true, _) => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        (false, Some(dir)) => {
            let file_appender = tracing_appender::rolling::daily(dir, "relay.log");
            registry
                .with(fmt::layer().with_writer(std::io::stderr))
                .with(fmt::layer().with_ansi(false).with_writer(file_appender))
                .try_init()
        }
        (false, None) => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init(),
    };

    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
