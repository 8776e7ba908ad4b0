use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{Mutex, RwLock};

use super::session::ConnectionParams;
use super::SshConnection;

/// Authenticated SSH sessions shared by every target of a run, keyed by
/// `user@host:port`.
///
/// Only successfully authenticated sessions are stored, so a failed login
/// for one caller never leaves a half-open session behind for the next.
/// Closed sessions are evicted on lookup and re-established on demand.
/// Per-key connect locks keep concurrent targets from racing to open
/// duplicate sessions.
pub struct SessionCache {
    connections: RwLock<HashMap<String, Arc<SshConnection>>>,
    connect_locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

impl Default for SessionCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            connect_locks: RwLock::new(HashMap::new()),
        }
    }

    /// Get a live session by key. Returns `None` if absent or closed
    /// (closed sessions are removed).
    pub async fn get(&self, key: &str) -> Option<Arc<SshConnection>> {
        let conn = {
            let guard = self.connections.read().await;
            guard.get(key).cloned()
        };

        if let Some(ref c) = conn {
            if c.is_closed().await {
                tracing::debug!("Session {} is closed, evicting", key);
                self.evict(key, c).await;
                return None;
            }
        }

        conn
    }

    /// Return the cached session for `params`, connecting if needed.
    ///
    /// # Errors
    /// Returns the connection or authentication error; nothing is cached
    /// in that case.
    pub async fn get_or_connect(&self, params: &ConnectionParams) -> Result<Arc<SshConnection>> {
        let key = params.key();
        if let Some(conn) = self.get(&key).await {
            return Ok(conn);
        }

        let lock = self.connect_lock(&key).await;
        let _guard = lock.lock().await;

        // Another task may have connected while we waited.
        if let Some(conn) = self.get(&key).await {
            return Ok(conn);
        }

        let conn = SshConnection::connect(params.clone()).await?;
        Ok(self.insert(key, conn).await)
    }

    async fn insert(&self, key: String, conn: SshConnection) -> Arc<SshConnection> {
        let arc = Arc::new(conn);
        let mut guard = self.connections.write().await;
        guard.insert(key, Arc::clone(&arc));
        arc
    }

    /// Remove `conn` if it is still the session stored under `key`.
    pub async fn evict(&self, key: &str, conn: &Arc<SshConnection>) {
        let mut guard = self.connections.write().await;
        // Another task may already have replaced it with a fresh one.
        if let Some(current) = guard.get(key) {
            if Arc::ptr_eq(current, conn) {
                guard.remove(key);
            }
        }
    }

    async fn connect_lock(&self, key: &str) -> Arc<Mutex<()>> {
        {
            let guard = self.connect_locks.read().await;
            if let Some(lock) = guard.get(key) {
                return Arc::clone(lock);
            }
        }
        let mut guard = self.connect_locks.write().await;
        Arc::clone(guard.entry(key.to_string()).or_default())
    }
}
