//! Lock files on a shared directory.
//!
//! Acquisition is an exclusive-create open: whoever creates the file owns
//! the lock. The file holds the owner's process id as a debugging aid. The
//! directory must be shared (network-mounted if need be) by every worker
//! that must synchronize.

use super::{lock_name, LockStatus, LockToken, Locker, DEFAULT_RETRY_INTERVAL, DEFAULT_TIMEOUT};
use crate::error::{Error, Result};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

pub struct DiskLocker {
    dir: PathBuf,
    retry_interval: Duration,
    timeout: Duration,
}

impl DiskLocker {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn lock_path(&self, resource: &str) -> PathBuf {
        self.dir.join(lock_name("", resource))
    }
}

#[async_trait::async_trait]
impl Locker for DiskLocker {
    async fn acquire(&self, resource: &str) -> Result<(LockStatus, LockToken)> {
        let path = self.lock_path(resource);
        let token = LockToken::Disk { path: path.clone() };

        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(mut file) => {
                // Owner pid, for postmortems on abandoned locks.
                let _ = write!(file, "{}", std::process::id());
                Ok((LockStatus::Acquired, token))
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Ok((LockStatus::Locked, token))
            }
            Err(e) => Err(Error::Internal(format!(
                "failed to create lockfile {}: {e}",
                path.display()
            ))),
        }
    }

    async fn ping(&self, token: &mut LockToken) -> Result<LockStatus> {
        let LockToken::Disk { path } = token else {
            return Err(Error::Internal("disk locker given a foreign token".into()));
        };
        match fs::metadata(&path) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(LockStatus::Noent),
            _ => Ok(LockStatus::Locked),
        }
    }

    async fn release(&self, token: LockToken) -> Result<()> {
        let LockToken::Disk { path } = token else {
            return Err(Error::Internal("disk locker given a foreign token".into()));
        };
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "failed to remove lockfile");
            }
        }
        Ok(())
    }

    fn retry_interval(&self) -> Duration {
        self.retry_interval
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}
