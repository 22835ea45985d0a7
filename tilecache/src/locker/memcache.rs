//! Locks held as memcached keys, for multi-host deployments.
//!
//! Acquisition is a create-only `add` of the canonicalized key; the entry
//! expiry equals the locker timeout, so a crashed owner's lock evaporates
//! on its own even if nobody force-releases it.

use super::{lock_name, LockStatus, LockToken, Locker, DEFAULT_RETRY_INTERVAL, DEFAULT_TIMEOUT};
use crate::error::{Error, Result};
use crate::memcached::{AddOutcome, MemcachedClient, ServerAddr};
use std::time::Duration;

pub struct MemcacheLocker {
    servers: Vec<ServerAddr>,
    key_prefix: String,
    retry_interval: Duration,
    timeout: Duration,
}

impl MemcacheLocker {
    pub fn new(servers: Vec<ServerAddr>) -> Self {
        Self {
            servers,
            key_prefix: String::new(),
            retry_interval: DEFAULT_RETRY_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn lock_key(&self, resource: &str) -> String {
        lock_name(&self.key_prefix, resource)
    }
}

#[async_trait::async_trait]
impl Locker for MemcacheLocker {
    async fn acquire(&self, resource: &str) -> Result<(LockStatus, LockToken)> {
        let key = self.lock_key(resource);
        let mut client = MemcachedClient::connect(&self.servers).await?;

        let outcome = client
            .add(&key, b"1", self.timeout.as_secs().max(1) as u32)
            .await
            .map_err(|e| Error::Internal(format!("failed to lock resource {resource}: {e}")))?;
        let status = match outcome {
            AddOutcome::Stored => LockStatus::Acquired,
            AddOutcome::Exists => LockStatus::Locked,
        };
        Ok((status, LockToken::Memcache { key, client }))
    }

    async fn ping(&self, token: &mut LockToken) -> Result<LockStatus> {
        let LockToken::Memcache { key, client } = token else {
            return Err(Error::Internal(
                "memcache locker given a foreign token".into(),
            ));
        };
        match client.get(key).await? {
            Some(_) => Ok(LockStatus::Locked),
            None => Ok(LockStatus::Noent),
        }
    }

    async fn release(&self, token: LockToken) -> Result<()> {
        let LockToken::Memcache { key, mut client } = token else {
            return Err(Error::Internal(
                "memcache locker given a foreign token".into(),
            ));
        };
        // A missing key is fine: the lock may have expired on its own.
        client.delete(&key).await?;
        Ok(())
    }

    fn retry_interval(&self) -> Duration {
        self.retry_interval
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}
