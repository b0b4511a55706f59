use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use metrics::{counter, gauge};
use scrum_poker_core::SessionId;
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::session::Session;
use crate::telemetry::{SESSIONS_ACTIVE, SESSIONS_EXPIRED_TOTAL};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("session {0} not found")]
    SessionNotFound(SessionId),
}

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub session_ttl: Duration,
    pub recycle_interval: Duration,
    pub heartbeat_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            session_ttl: Duration::from_secs(3600),
            recycle_interval: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub session_id: SessionId,
    pub connections: usize,
    pub members: usize,
}

/// All live sessions, keyed by id.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    sessions: DashMap<SessionId, Arc<Session>>,
    config: RegistryConfig,
}

impl SessionRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                sessions: DashMap::new(),
                config,
            }),
        }
    }

    pub fn create(&self) -> SessionId {
        let session_id = SessionId::from(Uuid::new_v4());
        let session = Arc::new(Session::new(session_id.clone(), Instant::now()));
        self.inner.sessions.insert(session_id.clone(), session);
        gauge!(SESSIONS_ACTIVE, self.len() as f64);
        info!(%session_id, "session created");
        session_id
    }

    pub fn get(&self, session_id: &SessionId) -> Result<Arc<Session>, RegistryError> {
        self.inner
            .sessions
            .get(session_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| RegistryError::SessionNotFound(session_id.clone()))
    }

    pub fn len(&self) -> usize {
        self.inner.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.sessions.is_empty()
    }

    /// Removes sessions that have had no connections for longer than the
    /// TTL. Returns how many were removed.
    pub fn expire_idle(&self, now: Instant) -> usize {
        let ttl = self.inner.config.session_ttl;
        let expired: Vec<SessionId> = self
            .inner
            .sessions
            .iter()
            .filter(|entry| entry.value().idle_for(now).is_some_and(|idle| idle > ttl))
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0usize;
        for session_id in expired {
            // a client may have attached since the scan
            let gone = self
                .inner
                .sessions
                .remove_if(&session_id, |_, session| {
                    session.idle_for(now).is_some_and(|idle| idle > ttl)
                })
                .is_some();
            if gone {
                removed += 1;
                info!(%session_id, "session expired");
            }
        }
        if removed > 0 {
            counter!(SESSIONS_EXPIRED_TOTAL, removed as u64);
            gauge!(SESSIONS_ACTIVE, self.len() as f64);
        }
        removed
    }

    /// Pings every open channel in every session.
    pub fn ping_all(&self) -> usize {
        let sessions: Vec<Arc<Session>> = self
            .inner
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        sessions.iter().map(|session| session.ping()).sum()
    }

    pub fn snapshot(&self) -> Vec<SessionStats> {
        self.inner
            .sessions
            .iter()
            .map(|entry| SessionStats {
                session_id: entry.key().clone(),
                connections: entry.value().connection_count(),
                members: entry.value().snapshot().members.len(),
            })
            .collect()
    }

    pub fn spawn_recycler(&self) -> JoinHandle<()> {
        let registry = self.clone();
        let mut interval = tokio::time::interval(self.inner.config.recycle_interval);
        tokio::spawn(async move {
            loop {
                interval.tick().await;
                registry.expire_idle(Instant::now());
            }
        })
    }

    pub fn spawn_heartbeat(&self) -> JoinHandle<()> {
        let registry = self.clone();
        let mut interval = tokio::time::interval(self.inner.config.heartbeat_interval);
        tokio::spawn(async move {
            loop {
                interval.tick().await;
                let pinged = registry.ping_all();
                debug!(pinged, "heartbeat sent");
            }
        })
    }
}
