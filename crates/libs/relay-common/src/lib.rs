//! Shared configuration and logging setup for the Agent Relay workspace.

pub mod config;
pub mod tracing;

pub use config::Settings;
