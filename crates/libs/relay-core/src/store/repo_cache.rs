//! LRU repository cache with deferred close.
//!
//! Opening a git working tree costs tens of file descriptors, and an
//! unbounded set of open handles will eventually EMFILE the process
//! under sustained multi-agent load. The cache keeps a bounded LRU of
//! open handles; eviction does not close a handle immediately but parks
//! it on a pending-close list for a grace period, tolerating in-flight
//! operations that still hold a reference. Opportunistic sweeps on every
//! Nth `get` close pending handles past their grace.

use crate::error::Result;
use git2::Repository;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// Default capacity: 16 repos, each worth ~10-50 FDs.
const DEFAULT_CAPACITY: usize = 16;

/// How long an evicted handle lingers before the sweep drops it.
const DEFAULT_CLOSE_GRACE: Duration = Duration::from_secs(30);

/// Sweep the pending-close list on every Nth `get`.
const SWEEP_EVERY: u64 = 8;

struct PendingClose {
    path: PathBuf,
    repo: Arc<Mutex<Repository>>,
    evicted_at: Instant,
}

struct CacheInner {
    cache: LruCache<PathBuf, Arc<Mutex<Repository>>>,
    pending_close: Vec<PendingClose>,
    gets: u64,
}

/// Thread-safe LRU cache of open git repositories.
pub struct RepoCache {
    inner: Mutex<CacheInner>,
    capacity: usize,
    close_grace: Duration,
}

impl RepoCache {
    /// Create cache with specified capacity.
    pub fn new(capacity: usize) -> Self {
        Self::with_grace(capacity, DEFAULT_CLOSE_GRACE)
    }

    /// Create cache with explicit close grace (tests shrink it).
    pub fn with_grace(capacity: usize, close_grace: Duration) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(CacheInner {
                cache: LruCache::new(cap),
                pending_close: Vec::new(),
                gets: 0,
            }),
            capacity: cap.get(),
            close_grace,
        }
    }

    /// Get or open the repository at `path`.
    ///
    /// The returned `Arc<Mutex<Repository>>` must be locked before use.
    pub async fn get(&self, path: &Path) -> Result<Arc<Mutex<Repository>>> {
        let canonical = path.canonicalize()?;

        let mut inner = self.inner.lock().await;
        inner.gets += 1;
        if inner.gets % SWEEP_EVERY == 0 {
            Self::sweep_pending(&mut inner, self.close_grace);
        }

        if let Some(repo) = inner.cache.get(&canonical) {
            debug!(path = %canonical.display(), "repo cache hit");
            return Ok(Arc::clone(repo));
        }

        debug!(path = %canonical.display(), "repo cache miss, opening");
        let repo = Arc::new(Mutex::new(Repository::open(&canonical)?));

        if inner.cache.len() >= self.capacity {
            if let Some((evicted_path, evicted_repo)) = inner.cache.pop_lru() {
                debug!(path = %evicted_path.display(), "evicted repo to pending-close");
                inner.pending_close.push(PendingClose {
                    path: evicted_path,
                    repo: evicted_repo,
                    evicted_at: Instant::now(),
                });
            }
        }

        inner.cache.put(canonical, Arc::clone(&repo));
        Ok(repo)
    }

    fn sweep_pending(inner: &mut CacheInner, grace: Duration) {
        let now = Instant::now();
        let before = inner.pending_close.len();
        inner
            .pending_close
            .retain(|p| now.duration_since(p.evicted_at) < grace);
        let closed = before - inner.pending_close.len();
        if closed > 0 {
            debug!(closed, "closed pending repo handles past grace");
        }
    }

    /// Get cached repo without opening (for fast paths)
    pub async fn get_if_cached(&self, path: &Path) -> Option<Arc<Mutex<Repository>>> {
        let canonical = path.canonicalize().ok()?;
        let inner = self.inner.lock().await;
        inner.cache.peek(&canonical).cloned()
    }

    /// Evict up to `count` least-recently-used handles immediately.
    ///
    /// Used by the FD-health monitor under pressure; evicted handles skip
    /// the grace period.
    pub async fn evict_oldest(&self, count: usize) -> usize {
        let mut inner = self.inner.lock().await;
        let mut evicted = 0;
        for _ in 0..count {
            match inner.cache.pop_lru() {
                Some((path, _repo)) => {
                    debug!(path = %path.display(), "force-evicted repo handle");
                    evicted += 1;
                }
                None => break,
            }
        }
        evicted
    }

    /// Current cache size (excluding pending-close handles).
    pub async fn len(&self) -> usize {
        self.inner.lock().await.cache.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Handles parked on the pending-close list.
    pub async fn pending_len(&self) -> usize {
        self.inner.lock().await.pending_close.len()
    }

    /// Close all handles immediately, pending list included.
    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.cache.clear();
        inner.pending_close.clear();
        debug!("repo cache cleared");
    }
}

impl Default for RepoCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
