//! Server-side session registry
//!
//! Sessions are keyed by a connection-scoped [`SessionId`], so one identity
//! may hold several sessions at once. The map sits behind a tokio `RwLock`:
//! accepts take the write half, broadcast and lookups the read half.
//! Broadcast snapshots the map and releases the lock before sending, so a
//! slow peer never holds up an accept.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::{Event, Session};
use crate::crypto::PublicKey;
use crate::error::{AuthSocketError, Result};

/// Connection-scoped session identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Outcome of a broadcast
#[derive(Debug, Default)]
pub struct BroadcastReport {
    /// Sessions the event was handed to
    pub delivered: usize,
    /// Sessions whose send failed, with the reason
    pub failed: Vec<(SessionId, AuthSocketError)>,
}

impl BroadcastReport {
    /// True when no session failed
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Live sessions, shared between accept loop and emitters
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<SessionId, Arc<Session>>>>,
    next_id: Arc<AtomicU64>,
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session and watch it
    ///
    /// The entry is dropped again once the session's receive loop ends.
    pub async fn insert(&self, session: Arc<Session>) -> SessionId {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);

        self.sessions.write().await.insert(id, session.clone());
        info!(%id, peer = ?session.peer(), "session registered");

        let registry = self.clone();
        tokio::spawn(async move {
            session.closed().await;
            drop(session);
            if registry.remove(id).await.is_some() {
                debug!(%id, "session ended, removed");
            }
        });

        id
    }

    /// Remove a session without closing it
    pub async fn remove(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.write().await.remove(&id)
    }

    /// Look up a session
    pub async fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.read().await.get(&id).cloned()
    }

    /// Number of registered sessions
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Whether no session is registered
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Registered ids in ascending order
    pub async fn ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.sessions.read().await.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Sessions authenticated as `key`
    pub async fn sessions_for(&self, key: &PublicKey) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self
            .sessions
            .read()
            .await
            .iter()
            .filter(|(_, session)| session.peer() == Some(key))
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }

    /// Send one event to every registered session
    ///
    /// A failing session is recorded in the report and does not stop
    /// delivery to the others. Only an unencodable event is an error.
    pub async fn broadcast<T: Serialize + ?Sized>(
        &self,
        event: &str,
        data: &T,
    ) -> Result<BroadcastReport> {
        let payload = Event::from_data(event, data)?.to_payload()?;

        let targets: Vec<(SessionId, Arc<Session>)> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(id, session)| (*id, session.clone()))
            .collect();

        let sends = targets.iter().map(|(id, session)| {
            let payload = payload.clone();
            async move { (*id, session.send_payload(payload).await) }
        });

        let mut report = BroadcastReport::default();
        for (id, outcome) in join_all(sends).await {
            match outcome {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(%id, event, error = %e, "broadcast delivery failed");
                    report.failed.push((id, e));
                }
            }
        }

        debug!(event, delivered = report.delivered, failed = report.failed.len(), "broadcast");
        Ok(report)
    }

    /// Close every session and empty the registry
    pub async fn close_all(&self) {
        let sessions: Vec<Arc<Session>> =
            self.sessions.write().await.drain().map(|(_, s)| s).collect();
        join_all(sessions.iter().map(|s| s.close())).await;
    }
}

impl fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("issued", &self.next_id.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
