//! Live session registry.
//!
//! A session is an authenticated connection. The registry maps its id to the
//! outbound frame queue of the connection so that any task can write to any
//! session without touching its socket directly.

use beacon_protocol::Frame;
use dashmap::DashMap;
use std::fmt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use uuid::Uuid;

/// Outbound frame queue of one connection.
pub type Outbox = mpsc::UnboundedSender<Frame>;

/// Opaque session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    /// Wrap an existing id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random session id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Registry entry for one live session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    outbox: Outbox,
    remote_addr: Option<String>,
    shutdown: CancellationToken,
}

impl SessionHandle {
    /// Create a handle.
    #[must_use]
    pub fn new(outbox: Outbox, remote_addr: Option<String>) -> Self {
        Self {
            outbox,
            remote_addr,
            shutdown: CancellationToken::new(),
        }
    }

    /// Remote peer address, when known.
    #[must_use]
    pub fn remote_addr(&self) -> Option<&str> {
        self.remote_addr.as_deref()
    }

    /// Token cancelled when the session must be torn down.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

/// Concurrent map of live sessions.
#[derive(Debug, Default)]
pub struct Sessions {
    live: DashMap<SessionId, SessionHandle>,
}

impl Sessions {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session.
    pub fn insert(&self, id: SessionId, handle: SessionHandle) {
        debug!(session = %id, remote = ?handle.remote_addr, "Session registered");
        self.live.insert(id, handle);
    }

    /// Remove a session, returning its handle if it was live.
    pub fn remove(&self, id: &SessionId) -> Option<SessionHandle> {
        let removed = self.live.remove(id).map(|(_, handle)| handle);
        if removed.is_some() {
            debug!(session = %id, "Session removed");
        }
        removed
    }

    /// Queue a frame for a session.
    ///
    /// Returns `false` if the session is unknown or its connection is gone.
    pub fn deliver(&self, id: &SessionId, frame: Frame) -> bool {
        let Some(handle) = self.live.get(id) else {
            trace!(session = %id, "Delivery to unknown session");
            return false;
        };
        handle.outbox.send(frame).is_ok()
    }

    /// Ask a session's task to shut down.
    pub fn kick(&self, id: &SessionId) -> bool {
        match self.live.get(id) {
            Some(handle) => {
                handle.shutdown.cancel();
                true
            }
            None => false,
        }
    }

    /// Ask every session's task to shut down.
    pub fn kick_all(&self) {
        for entry in self.live.iter() {
            entry.shutdown.cancel();
        }
    }

    /// Whether a session is live.
    #[must_use]
    pub fn contains(&self, id: &SessionId) -> bool {
        self.live.contains_key(id)
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.live.len()
    }

    /// Whether no session is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Ids of all live sessions.
    #[must_use]
    pub fn ids(&self) -> Vec<SessionId> {
        self.live.iter().map(|e| e.key().clone()).collect()
    }
}
