//! Low-level storage operations for database and Git.
//!
//! All coordination state lives in two places:
//! 1. **SQLite catalog** (libsql): source of truth for queries
//! 2. **Git archive**: append-only journal of every mutation
//!
//! # Database configuration
//!
//! The catalog is tuned for many concurrent agents:
//! - WAL mode for concurrent reads during writes
//! - 60-second busy timeout for lock contention
//! - 64MB page cache
//! - passive WAL checkpoint on demand (see [`checkpoint_passive`])

use crate::Result;
use libsql::{Builder, Connection};
use std::path::Path;

/// Type alias for database connections.
pub type Db = Connection;

/// Git storage operations for the archive journal.
pub mod git_store;

/// Advisory archive lock with stale-holder healing.
pub mod archive_lock;

/// LRU cache of open git repository handles with deferred close.
pub mod repo_cache;

/// Lock-retry wrapper and circuit breaker for catalog writes.
pub mod retry;

/// Creates a database connection at the given path with migrations applied.
///
/// Creates parent directories as needed, applies concurrency pragmas and
/// runs all embedded migrations (idempotent via `IF NOT EXISTS`).
pub async fn new_db_pool(db_path: &Path) -> Result<Db> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db = Builder::new_local(db_path).build().await?;
    let conn = db.connect()?;

    // WAL mode: concurrent reads during writes
    let _ = conn.execute("PRAGMA journal_mode=WAL;", ()).await;
    // Wait up to 60 seconds when the database is locked instead of failing
    let _ = conn.execute("PRAGMA busy_timeout=60000;", ()).await;
    // Good balance of safety and performance with WAL
    let _ = conn.execute("PRAGMA synchronous=NORMAL;", ()).await;
    // Negative value = KB, so -64000 = 64MB page cache
    let _ = conn.execute("PRAGMA cache_size=-64000;", ()).await;

    apply_migrations(&conn).await?;

    Ok(conn)
}

/// Apply all embedded migrations in order.
pub async fn apply_migrations(conn: &Db) -> Result<()> {
    let migrations = [
        include_str!("../../../../../migrations/001_initial_schema.sql"),
        include_str!("../../../../../migrations/002_products.sql"),
        include_str!("../../../../../migrations/003_tool_metrics.sql"),
        include_str!("../../../../../migrations/004_window_identities.sql"),
    ];

    for migration in &migrations {
        conn.execute_batch(migration).await?;
    }
    Ok(())
}

/// Run a passive WAL checkpoint. Called when a connection returns to an
/// idle state so the WAL does not grow without bound under sustained
/// multi-agent write load. Passive mode never blocks writers.
pub async fn checkpoint_passive(conn: &Db) {
    if let Err(e) = conn.execute("PRAGMA wal_checkpoint(PASSIVE);", ()).await {
        tracing::debug!(error = %e, "passive WAL checkpoint failed");
    }
}
