//! Registry of in-flight transfer sessions, keyed by cookie ID.
//!
//! Sessions expire after a fixed lifetime or after sitting idle. When the
//! registry is full the least recently used session is evicted.

use crate::observability::METRICS;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Limits applied to every session in a registry.
#[derive(Debug, Clone, Copy)]
pub struct SessionLimits {
    pub ttl: Duration,
    pub idle_timeout: Duration,
    pub max_sessions: usize,
}

struct Entry<S> {
    session: Arc<tokio::sync::Mutex<S>>,
    created_at: Instant,
    last_activity: Instant,
}

impl<S> Entry<S> {
    fn is_live(&self, limits: &SessionLimits, now: Instant) -> bool {
        now.duration_since(self.created_at) < limits.ttl
            && now.duration_since(self.last_activity) < limits.idle_timeout
    }
}

/// Sessions of one kind (upload-pack or receive-pack).
pub struct SessionRegistry<S> {
    kind: &'static str,
    limits: SessionLimits,
    sessions: Mutex<HashMap<Uuid, Entry<S>>>,
}

impl<S: Send + 'static> SessionRegistry<S> {
    pub fn new(kind: &'static str, limits: SessionLimits) -> Self {
        Self {
            kind,
            limits,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Session kind, used as a metrics label.
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Registers a new session and returns its ID.
    pub fn insert(&self, session: S) -> (Uuid, Arc<tokio::sync::Mutex<S>>) {
        let id = Uuid::new_v4();
        let session = Arc::new(tokio::sync::Mutex::new(session));
        let now = Instant::now();

        let mut sessions = self.sessions.lock();
        if sessions.len() >= self.limits.max_sessions {
            let limits = self.limits;
            sessions.retain(|_, e| e.is_live(&limits, now));
        }
        while sessions.len() >= self.limits.max_sessions {
            let Some(oldest) = sessions
                .iter()
                .min_by_key(|(_, e)| e.last_activity)
                .map(|(id, _)| *id)
            else {
                break;
            };
            sessions.remove(&oldest);
            tracing::debug!(kind = self.kind, session = %oldest, "Evicted least recently used session");
        }
        sessions.insert(
            id,
            Entry {
                session: session.clone(),
                created_at: now,
                last_activity: now,
            },
        );
        self.report(sessions.len());
        (id, session)
    }

    /// Looks up a live session and marks it active. Expired sessions are
    /// dropped and reported as missing.
    pub fn get(&self, id: &Uuid) -> Option<Arc<tokio::sync::Mutex<S>>> {
        let now = Instant::now();
        let mut sessions = self.sessions.lock();
        let entry = sessions.get_mut(id)?;
        if !entry.is_live(&self.limits, now) {
            sessions.remove(id);
            self.report(sessions.len());
            tracing::debug!(kind = self.kind, session = %id, "Session expired");
            return None;
        }
        entry.last_activity = now;
        Some(entry.session.clone())
    }

    /// Drops a session. Returns true if it existed.
    pub fn remove(&self, id: &Uuid) -> bool {
        let mut sessions = self.sessions.lock();
        let removed = sessions.remove(id).is_some();
        if removed {
            self.report(sessions.len());
        }
        removed
    }

    /// Drops every expired session and returns how many were dropped.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let limits = self.limits;
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, e| e.is_live(&limits, now));
        let removed = before - sessions.len();
        if removed > 0 {
            self.report(sessions.len());
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Runs [`cleanup_expired`](Self::cleanup_expired) on a timer.
    pub fn spawn_sweeper(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                let removed = self.cleanup_expired();
                if removed > 0 {
                    tracing::info!(kind = self.kind, removed, "Swept expired sessions");
                }
            }
        })
    }

    fn report(&self, count: usize) {
        METRICS.set_active_sessions(self.kind, count);
    }
}
