//! Keyed connection pool for cache backends.
//!
//! Each backend name owns an independent sub-pool of reusable connections.
//! A `tokio` semaphore enforces the hard cap with FIFO fairness; idle
//! connections carry timestamps so expired ones can be retired on touch.
//!
//! Connections are type-erased (`Box<dyn Any + Send>`) so heterogeneous
//! backends can share one pool instance; borrowers downcast through
//! [`PooledConnection::conn_mut`].

use crate::error::{Error, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::any::Any;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

/// Pool sizing and lifetime knobs.
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// Idle floor: expired connections are kept if destroying them would
    /// leave fewer than this many idle.
    pub min: usize,
    /// Soft cap: when more than this many connections are idle, expired
    /// ones are retired eagerly on release.
    pub smax: usize,
    /// Hard cap on live connections per key; acquirers beyond it wait.
    pub hmax: usize,
    /// Maximum idle age before a connection is considered expired.
    pub ttl: Duration,
    /// How long an acquirer waits at the hard cap before giving up (503).
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min: 1,
            smax: 5,
            hmax: 200,
            ttl: Duration::from_secs(60),
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

impl PoolConfig {
    pub fn new(min: usize, smax: usize, hmax: usize, ttl: Duration) -> Self {
        Self {
            min,
            smax,
            hmax: hmax.max(1),
            ttl,
            ..Self::default()
        }
    }
}

/// Builds fresh connections for one backend.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Any + Send>>;
}

struct IdleConn {
    conn: Box<dyn Any + Send>,
    last_used: Instant,
}

struct KeyPool {
    idle: Mutex<VecDeque<IdleConn>>,
    limit: Arc<Semaphore>,
}

/// An exclusively-borrowed connection.
///
/// Return it with [`ConnectionPool::release`] on the healthy path or
/// [`ConnectionPool::invalidate`] when the backend misbehaved. Dropping it
/// without either destroys the connection: an abnormal exit must not leak
/// a possibly-poisoned connection back into rotation.
#[derive(Debug)]
pub struct PooledConnection {
    key: String,
    conn: Option<Box<dyn Any + Send>>,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    /// Backend key this connection belongs to.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Downcast the connection to its concrete type.
    pub fn conn_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.conn.as_mut()?.downcast_mut::<T>()
    }
}

/// Keyed pool of reusable backend connections.
pub struct ConnectionPool {
    keys: DashMap<String, Arc<KeyPool>>,
    config: PoolConfig,
}

impl ConnectionPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            keys: DashMap::new(),
            config,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(PoolConfig::default())
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    fn key_pool(&self, key: &str) -> Arc<KeyPool> {
        self.keys
            .entry(key.to_string())
            .or_insert_with(|| {
                Arc::new(KeyPool {
                    idle: Mutex::new(VecDeque::new()),
                    limit: Arc::new(Semaphore::new(self.config.hmax)),
                })
            })
            .clone()
    }

    /// Borrow a connection for `key`, creating one through `connector` if no
    /// reusable idle connection exists.
    ///
    /// Waits up to the configured acquisition timeout when the hard cap is
    /// saturated, then fails with 503.
    pub async fn get(&self, key: &str, connector: &dyn Connector) -> Result<PooledConnection> {
        let key_pool = self.key_pool(key);

        let permit = match tokio::time::timeout(
            self.config.acquire_timeout,
            key_pool.limit.clone().acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                return Err(Error::Internal(format!(
                    "connection pool for \"{key}\" is closed"
                )))
            }
            Err(_) => {
                warn!(key = key, "connection pool saturated, acquisition timed out");
                return Err(Error::Unavailable(format!(
                    "connection pool for \"{key}\" is saturated"
                )));
            }
        };

        // Reuse the most recently released idle connection; retire expired
        // ones along the way unless that would breach the idle floor.
        loop {
            let mut idle = key_pool.idle.lock().expect("pool mutex poisoned");
            let expired = match idle.back() {
                Some(entry) => {
                    entry.last_used.elapsed() > self.config.ttl && idle.len() > self.config.min
                }
                None => break,
            };
            let entry = idle.pop_back().expect("idle entry checked above");
            drop(idle);
            if expired {
                debug!(key = key, "retiring expired idle connection");
                continue;
            }
            return Ok(PooledConnection {
                key: key.to_string(),
                conn: Some(entry.conn),
                _permit: permit,
            });
        }

        let conn = connector.connect().await?;
        Ok(PooledConnection {
            key: key.to_string(),
            conn: Some(conn),
            _permit: permit,
        })
    }

    /// Return a healthy connection to its sub-pool.
    pub fn release(&self, mut pc: PooledConnection) {
        let Some(conn) = pc.conn.take() else { return };
        let key_pool = self.key_pool(&pc.key);
        let mut idle = key_pool.idle.lock().expect("pool mutex poisoned");
        idle.push_back(IdleConn {
            conn,
            last_used: Instant::now(),
        });

        // Above the soft cap, eagerly retire expired idle connections.
        while idle.len() > self.config.smax {
            match idle.front() {
                Some(entry) if entry.last_used.elapsed() > self.config.ttl => {
                    idle.pop_front();
                }
                _ => break,
            }
        }
        // Permit drops with `pc`, freeing a hard-cap slot.
    }

    /// Destroy a connection that is known or suspected to be broken.
    pub fn invalidate(&self, mut pc: PooledConnection) {
        debug!(key = pc.key(), "invalidating pooled connection");
        drop(pc.conn.take());
    }

    /// Number of idle connections currently held for `key`.
    pub fn idle_count(&self, key: &str) -> usize {
        self.keys
            .get(key)
            .map(|kp| kp.idle.lock().expect("pool mutex poisoned").len())
            .unwrap_or(0)
    }
}
