//! A pooled SSH session plus the bookkeeping the pool needs.

use super::session::SshSession;
use super::types::PoolKey;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::OwnedSemaphorePermit;
use uuid::Uuid;

/// One live SSH session owned by the pool and lent to a single execution at a time
pub struct Connection {
    id: Uuid,
    key: PoolKey,
    pub(crate) session: Box<dyn SshSession>,
    created_at: DateTime<Utc>,
    last_health_check: Mutex<Option<Instant>>,
    last_used: Mutex<Instant>,
    connected: AtomicBool,
    /// Held while the connection is leased; released back to the key's semaphore on return
    pub(crate) permit: Option<OwnedSemaphorePermit>,
}

impl Connection {
    pub(crate) fn new(key: PoolKey, session: Box<dyn SshSession>) -> Self {
        Self {
            id: Uuid::new_v4(),
            key,
            session,
            created_at: Utc::now(),
            last_health_check: Mutex::new(None),
            last_used: Mutex::new(Instant::now()),
            connected: AtomicBool::new(true),
            permit: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn key(&self) -> &PoolKey {
        &self.key
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// False once a transport failure was observed or the session closed
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire) && !self.session.is_closed()
    }

    pub(crate) fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::Release);
    }

    pub(crate) fn touch(&self) {
        *self.last_used.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_used.lock().elapsed()
    }

    pub(crate) fn record_health_check(&self) {
        *self.last_health_check.lock() = Some(Instant::now());
    }

    pub fn since_last_health_check(&self) -> Option<Duration> {
        self.last_health_check.lock().map(|at| at.elapsed())
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("created_at", &self.created_at)
            .field("connected", &self.is_connected())
            .field("leased", &self.permit.is_some())
            .finish()
    }
}
