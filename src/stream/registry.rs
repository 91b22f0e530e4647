//! Process-wide set of live viewer sessions
//!
//! Thread-safe via `RwLock`. Iteration works on a snapshot taken under the
//! read lock, so visitors run without holding the lock and concurrent
//! add/remove (a viewer leaving mid-broadcast) never disturbs a pass.

use super::session::ViewerSession;
use super::StreamError;
use futures::future::join_all;
use log::{info, warn};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of live sessions keyed by session ID
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<ViewerSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session; false if the ID is already taken
    pub fn add(&self, session: Arc<ViewerSession>) -> bool {
        let mut sessions = self.sessions.write();
        if sessions.contains_key(session.id()) {
            return false;
        }
        sessions.insert(session.id().to_string(), session);
        true
    }

    /// Register a session unless `max_sessions` are already live (0 = no limit)
    ///
    /// A taken ID is an error and leaves the existing entry in place.
    pub fn try_add(&self, session: Arc<ViewerSession>, max_sessions: usize) -> Result<(), StreamError> {
        let mut sessions = self.sessions.write();
        if sessions.contains_key(session.id()) {
            return Err(StreamError::DuplicateSession(session.id().to_string()));
        }
        if max_sessions > 0 && sessions.len() >= max_sessions {
            return Err(StreamError::SessionLimit(max_sessions));
        }
        sessions.insert(session.id().to_string(), session);
        Ok(())
    }

    /// Remove a session
    ///
    /// Only the first removal of an ID returns the session.
    pub fn remove(&self, session_id: &str) -> Option<Arc<ViewerSession>> {
        self.sessions.write().remove(session_id)
    }

    /// Get a session by ID
    pub fn get(&self, session_id: &str) -> Option<Arc<ViewerSession>> {
        self.sessions.read().get(session_id).cloned()
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.read().contains_key(session_id)
    }

    /// Get number of live sessions
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Get all live sessions
    pub fn snapshot(&self) -> Vec<Arc<ViewerSession>> {
        self.sessions.read().values().cloned().collect()
    }

    /// Visit every session registered at the start of the call, once each
    pub fn for_each<F>(&self, mut visitor: F)
    where
        F: FnMut(&Arc<ViewerSession>),
    {
        for session in self.snapshot() {
            visitor(&session);
        }
    }

    /// Whether any live session matches
    pub fn any<F>(&self, predicate: F) -> bool
    where
        F: Fn(&ViewerSession) -> bool,
    {
        self.sessions.read().values().any(|session| predicate(session))
    }

    /// Close every session concurrently and empty the registry
    ///
    /// Sessions are drained first so the fan-out stops feeding them while
    /// they close. A failing close is logged and does not stop the others.
    pub async fn shutdown_all(&self) {
        let drained: Vec<Arc<ViewerSession>> = {
            let mut sessions = self.sessions.write();
            sessions.drain().map(|(_, session)| session).collect()
        };

        if drained.is_empty() {
            return;
        }

        info!("Closing {} sessions", drained.len());
        let results = join_all(drained.iter().map(|session| session.close())).await;
        for (session, result) in drained.iter().zip(results) {
            if let Err(e) = result {
                warn!("Session {} did not close cleanly: {}", session.id(), e);
            }
        }
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.len())
            .finish()
    }
}
