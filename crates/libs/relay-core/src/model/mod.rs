//! # Model Layer - BMC Pattern
//!
//! Every entity has a data struct, a ForCreate struct where creation
//! takes input, and a stateless Bmc controller with async methods.
//!
//! | BMC | Description |
//! |-----|-------------|
//! | `project::ProjectBmc` | Project identity and archive bootstrap |
//! | `agent::AgentBmc` | Agent registration, profiles, activity |
//! | `message::MessageBmc` | Messaging engine: send, inbox, ack, search |
//! | `file_reservation::FileReservationBmc` | Advisory path reservations |
//! | `agent_link::AgentLinkBmc` | Cross-project contact links |
//! | `product::ProductBmc` | Project groupings for product-wide queries |
//! | `window_identity::WindowIdentityBmc` | Per-terminal-window identity |
//! | `tool_metric::ToolMetricBmc` | Tool usage analytics |
//!
//! ## ModelManager
//!
//! [`ModelManager`] is the dependency-injected core object: database
//! handle, storage root, git write serialization, repo cache, archive
//! lock, circuit breaker and frozen settings. Constructed once at
//! startup and passed to every handler; no process-wide singletons.

pub mod agent;
pub mod agent_link;
pub mod attachment;
pub mod file_reservation;
pub mod message;
pub mod product;
pub mod project;
pub mod summary;
pub mod tool_metric;
pub mod window_identity;

use crate::Result;
use crate::store::archive_lock::{ArchiveLock, LockGuard};
use crate::store::repo_cache::RepoCache;
use crate::store::retry::CircuitBreaker;
use crate::store::{self, Db};
use git2::Repository;
use relay_common::Settings;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// Default archive lock timeout in seconds
const DEFAULT_ARCHIVE_LOCK_TIMEOUT_SECS: u64 = 30;

#[derive(Clone)]
pub struct ModelManager {
    pub(crate) db: Db,
    /// Root directory of the git archive (`projects/<slug>/` trees).
    pub storage_root: PathBuf,
    /// Mutex to serialize git operations - git2's index locking doesn't
    /// handle high concurrency well, so commits are serialized at the
    /// application level.
    pub git_lock: Arc<Mutex<()>>,
    /// LRU cache for git repositories to prevent FD exhaustion.
    repo_cache: Arc<RepoCache>,
    /// File-based advisory lock for cross-process archive coordination.
    archive_lock: Arc<ArchiveLock>,
    /// Circuit breaker shared by catalog write paths.
    breaker: Arc<CircuitBreaker>,
    /// Frozen application settings.
    pub settings: Arc<Settings>,
}

impl ModelManager {
    /// Constructor
    pub async fn new(settings: Arc<Settings>) -> Result<Self> {
        let storage_root = settings.storage.root.clone();
        std::fs::create_dir_all(&storage_root)?;

        let db = store::new_db_pool(&settings.database.path).await?;

        // Auto-initialize the archive repository if not present.
        crate::store::git_store::init_or_open_repo(&storage_root)?;

        let archive_lock = Arc::new(ArchiveLock::new(&storage_root));
        Self::check_stale_locks(&archive_lock).await;

        Ok(ModelManager {
            db,
            storage_root,
            git_lock: Arc::new(Mutex::new(())),
            repo_cache: Arc::new(RepoCache::new(settings.repo_cache_size)),
            archive_lock,
            breaker: Arc::new(CircuitBreaker::new()),
            settings,
        })
    }

    /// Constructor for testing with custom db connection and paths.
    pub fn new_for_test(db: Db, storage_root: PathBuf, settings: Arc<Settings>) -> Self {
        let archive_lock = Arc::new(ArchiveLock::new(&storage_root));
        ModelManager {
            db,
            storage_root,
            git_lock: Arc::new(Mutex::new(())),
            repo_cache: Arc::new(RepoCache::default()),
            archive_lock,
            breaker: Arc::new(CircuitBreaker::new()),
            settings,
        }
    }

    /// Startup probe: acquiring with a short timeout heals any stale lock
    /// left behind by a crashed process.
    async fn check_stale_locks(archive_lock: &ArchiveLock) {
        let timeout = std::time::Duration::from_millis(100);
        match archive_lock
            .acquire(Some("startup-cleanup".into()), timeout)
            .await
        {
            Ok(_guard) => {
                info!("archive lock check passed, no stale locks");
            }
            Err(crate::Error::LockTimeout { path, owner_pid }) => {
                info!(
                    path = %path,
                    pid = owner_pid,
                    "archive lock held by a live process"
                );
            }
            Err(e) => {
                info!(error = %e, "error checking archive lock on startup");
            }
        }
    }

    /// Get a cached repository handle for the storage root.
    ///
    /// The returned `Arc<Mutex<Repository>>` must be locked before use.
    pub async fn get_repo(&self) -> Result<Arc<Mutex<Repository>>> {
        self.repo_cache.get(&self.storage_root).await
    }

    /// Acquire the advisory archive lock for multi-commit operations.
    pub async fn acquire_archive_lock(&self, agent: Option<String>) -> Result<LockGuard<'_>> {
        let timeout = std::time::Duration::from_secs(DEFAULT_ARCHIVE_LOCK_TIMEOUT_SECS);
        self.archive_lock.acquire(agent, timeout).await
    }

    /// Git author identity for archive commits.
    pub fn git_author(&self) -> (&str, &str) {
        (
            &self.settings.storage.git_author_name,
            &self.settings.storage.git_author_email,
        )
    }

    /// Returns the db handle (model layer only).
    pub(in crate::model) fn db(&self) -> &Db {
        &self.db
    }

    /// Returns the db connection for integration tests.
    pub fn db_for_test(&self) -> &Db {
        &self.db
    }

    /// Circuit breaker for catalog writes.
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Repo cache (used by the FD-health monitor).
    pub fn repo_cache(&self) -> &RepoCache {
        &self.repo_cache
    }

    /// Health check - verify database connectivity
    pub async fn health_check(&self) -> Result<bool> {
        let stmt = self.db.prepare("SELECT 1").await?;
        let mut rows = stmt.query(()).await?;
        Ok(rows.next().await?.is_some())
    }

    /// Dispose resources in reverse construction order.
    pub async fn shutdown(&self) {
        self.repo_cache.clear().await;
        store::checkpoint_passive(&self.db).await;
    }
}
