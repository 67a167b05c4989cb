//! # relay-core: Coordination Bus Core for Agent Relay
//!
//! `relay-core` is the message + reservation + identity state machine behind
//! the Agent Relay coordination bus. Autonomous coding agents exchange
//! structured messages, declare advisory file reservations, and negotiate
//! cross-project contact; every mutation is dual-written to a SQL catalog
//! (queries) and a per-project Git archive (audit journal).
//!
//! ## Architecture
//!
//! - **BMC Layer**: stateless controllers for all catalog operations
//! - **Model Structs**: serializable rows for every entity
//! - **ModelManager**: database handle, storage root, git serialization,
//!   repo cache and archive lock in one injected object
//! - **Workers**: background sweeps (reservations, ACK TTL, FD health,
//!   retention, metrics, archive reconciliation)
//!
//! ## Key Modules
//!
//! - [`model`]: BMC controllers and data models
//! - [`store`]: low-level database, git, lock and cache primitives
//! - [`workers`]: long-running background tasks
//! - [`ctx`]: request context
//!
//! ## Example
//!
//! ```no_run
//! use relay_core::model::{ModelManager, project::ProjectBmc};
//! use relay_core::ctx::Ctx;
//! use relay_common::Settings;
//! use std::sync::Arc;
//!
//! async fn example() -> relay_core::Result<()> {
//!     let mm = ModelManager::new(Arc::new(Settings::from_env())).await?;
//!     let ctx = Ctx::root_ctx();
//!     let project = ProjectBmc::ensure(&ctx, &mm, "/backend").await?;
//!     println!("project slug: {}", project.slug);
//!     Ok(())
//! }
//! ```

/// Request context for attribution.
pub mod ctx;

/// Error types and Result alias for relay-core operations.
pub mod error;

/// Backend Model Controllers (BMC) and data models for all entities.
pub mod model;

/// Low-level storage operations: database, git, locks, caches.
pub mod store;

/// Utility functions and helpers.
pub mod utils;

/// Background workers: sweeps, monitors, reconciliation.
pub mod workers;

// Re-export core types
pub use ctx::Ctx;
pub use error::{Error, Result};
pub use model::ModelManager;
