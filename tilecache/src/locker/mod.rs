//! Named cross-process locks serializing expensive tile renders.
//!
//! A locker hands out advisory locks on canonicalized resource names. The
//! disk locker synchronizes workers sharing a filesystem, the memcache
//! locker synchronizes across hosts, and the fallback locker chains several
//! of them for resilience.
//!
//! Callers go through [`lock_or_wait`]: either they win the lock and must
//! run the protected work (then [`Locker::release`]), or the work was done
//! by another worker and they should re-read the cache.

mod disk;
mod fallback;
mod memcache;

pub use disk::DiskLocker;
pub use fallback::FallbackLocker;
pub use memcache::MemcacheLocker;

use crate::error::Result;
use crate::memcached::MemcachedClient;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// Prefix shared by lock file names and memcached lock keys.
pub const LOCK_PREFIX: &str = "_gc_lock";

/// Suffix shared by lock file names and memcached lock keys.
pub const LOCK_SUFFIX: &str = ".lck";

/// Default pause between lock pings.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Default total wait before a held lock is presumed stale.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Observation returned by [`Locker::acquire`] and [`Locker::ping`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    /// The caller now owns the lock.
    Acquired,
    /// Someone else holds the lock.
    Locked,
    /// No lock exists for the resource.
    Noent,
}

/// Everything needed to ping or release one acquired or observed lock.
pub enum LockToken {
    Disk {
        path: PathBuf,
    },
    Memcache {
        key: String,
        client: MemcachedClient,
    },
    /// Which fallback child produced the inner token.
    Fallback {
        child_index: usize,
        inner: Box<LockToken>,
    },
}

impl std::fmt::Debug for LockToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockToken::Disk { path } => f.debug_struct("Disk").field("path", path).finish(),
            LockToken::Memcache { key, .. } => {
                f.debug_struct("Memcache").field("key", key).finish()
            }
            LockToken::Fallback { child_index, inner } => f
                .debug_struct("Fallback")
                .field("child_index", child_index)
                .field("inner", inner)
                .finish(),
        }
    }
}

/// Named-resource lock provider.
#[async_trait::async_trait]
pub trait Locker: Send + Sync {
    /// Try to take the lock for `resource` without waiting.
    ///
    /// The token is returned for every non-error outcome so that a `Locked`
    /// observation can be pinged and, eventually, force-released.
    async fn acquire(&self, resource: &str) -> Result<(LockStatus, LockToken)>;

    /// Re-observe a lock previously returned by [`Locker::acquire`].
    async fn ping(&self, token: &mut LockToken) -> Result<LockStatus>;

    /// Release a lock. Safe to call on a lock that already disappeared.
    async fn release(&self, token: LockToken) -> Result<()>;

    fn retry_interval(&self) -> Duration;

    fn timeout(&self) -> Duration;
}

/// Take the lock for `resource`, or wait until whoever holds it finishes.
///
/// Returns `Ok(Some(token))` when the caller owns the critical section and
/// must release the token afterwards. Returns `Ok(None)` when the protected
/// work was performed by another worker (or the wait timed out and the stale
/// lock was discarded); the caller should re-read the cache before redoing
/// any work.
pub async fn lock_or_wait(locker: &dyn Locker, resource: &str) -> Result<Option<LockToken>> {
    let (status, mut token) = locker.acquire(resource).await?;
    match status {
        LockStatus::Acquired => {
            debug!(resource = resource, "lock acquired");
            Ok(Some(token))
        }
        LockStatus::Noent => Ok(None),
        LockStatus::Locked => {
            let start = Instant::now();
            loop {
                if start.elapsed() > locker.timeout() {
                    error!(
                        resource = resource,
                        "deleting a possibly stale lock after waiting on it for {:.1} seconds",
                        start.elapsed().as_secs_f64()
                    );
                    if let Err(e) = locker.release(token).await {
                        debug!(resource = resource, error = %e, "stale lock release failed");
                    }
                    return Ok(None);
                }
                tokio::time::sleep(locker.retry_interval()).await;
                match locker.ping(&mut token).await? {
                    LockStatus::Noent => {
                        debug!(resource = resource, "lock released by another worker");
                        return Ok(None);
                    }
                    _ => continue,
                }
            }
        }
    }
}

/// Canonical persisted name for a lock resource:
/// `<prefix>_gc_lock<sanitized-resource>.lck`.
pub(crate) fn lock_name(prefix: &str, resource: &str) -> String {
    format!(
        "{prefix}{LOCK_PREFIX}{}{LOCK_SUFFIX}",
        crate::util::sanitize_resource(resource)
    )
}
