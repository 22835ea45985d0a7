//! Ordered chain of lockers: the first child that answers wins.
//!
//! Useful when the preferred locker (say memcached) can disappear: as long
//! as a later child remains to try, an earlier child's failure is logged
//! and suppressed. The token remembers which child actually produced it so
//! pings and releases reach the right backend.

use super::{LockStatus, LockToken, Locker, DEFAULT_RETRY_INTERVAL, DEFAULT_TIMEOUT};
use crate::error::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub struct FallbackLocker {
    children: Vec<Arc<dyn Locker>>,
    retry_interval: Duration,
    timeout: Duration,
}

impl std::fmt::Debug for FallbackLocker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackLocker")
            .field("retry_interval", &self.retry_interval)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl FallbackLocker {
    pub fn new(children: Vec<Arc<dyn Locker>>) -> Result<Self> {
        if children.is_empty() {
            return Err(Error::BadRequest(
                "fallback locker does not reference any child lockers".into(),
            ));
        }
        Ok(Self {
            children,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn child(&self, token: &LockToken) -> Result<(Arc<dyn Locker>, usize)> {
        let LockToken::Fallback { child_index, .. } = token else {
            return Err(Error::Internal(
                "fallback locker given a foreign token".into(),
            ));
        };
        let child = self.children.get(*child_index).cloned().ok_or_else(|| {
            Error::Internal(format!("fallback locker has no child {child_index}"))
        })?;
        Ok((child, *child_index))
    }
}

#[async_trait::async_trait]
impl Locker for FallbackLocker {
    async fn acquire(&self, resource: &str) -> Result<(LockStatus, LockToken)> {
        let last = self.children.len() - 1;
        for (i, child) in self.children.iter().enumerate() {
            match child.acquire(resource).await {
                Ok((status, inner)) => {
                    return Ok((
                        status,
                        LockToken::Fallback {
                            child_index: i,
                            inner: Box::new(inner),
                        },
                    ))
                }
                Err(e) if i < last => {
                    // Suppressed: a later child may still answer.
                    warn!(resource = resource, child = i, error = %e,
                        "fallback locker child failed, trying next");
                }
                Err(e) => return Err(e),
            }
        }
        unreachable!("fallback locker children cannot be empty")
    }

    async fn ping(&self, token: &mut LockToken) -> Result<LockStatus> {
        let (child, _) = self.child(token)?;
        let LockToken::Fallback { inner, .. } = token else {
            unreachable!("validated by child()")
        };
        child.ping(inner).await
    }

    async fn release(&self, token: LockToken) -> Result<()> {
        let (child, _) = self.child(&token)?;
        let LockToken::Fallback { inner, .. } = token else {
            unreachable!("validated by child()")
        };
        child.release(*inner).await
    }

    fn retry_interval(&self) -> Duration {
        self.retry_interval
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}
