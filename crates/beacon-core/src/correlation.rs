//! Request/response correlation.
//!
//! Every outgoing call parks a single-use waiter under a fresh correlation
//! id. The waiter is retired exactly once: by the matching response, or by
//! the timeout, whichever removes the entry from the pending table first.

use dashmap::DashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, trace};
use uuid::Uuid;

/// Fixed wait for ping round-trips.
pub const PING_TIMEOUT: Duration = Duration::from_secs(1);

/// Payload and error text carried by a response frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reply {
    /// Response payload.
    pub payload: String,
    /// Response error, empty on success.
    pub error: String,
}

impl Reply {
    /// Create a reply.
    #[must_use]
    pub fn new(payload: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            error: error.into(),
        }
    }
}

/// Call errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CallError {
    /// No response arrived in time.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// The responder reported an error.
    #[error("Remote error: {0}")]
    Remote(String),

    /// The outgoing frame could not be handed to its target.
    #[error("Undeliverable: {0}")]
    Undeliverable(String),
}

/// Generate a fresh correlation id.
#[must_use]
pub fn correlation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Table of calls awaiting a response.
#[derive(Debug, Default)]
pub struct Correlator {
    pending: DashMap<String, oneshot::Sender<Reply>>,
}

/// Removes the pending entry when the calling future goes away early.
struct PendingGuard<'a> {
    pending: &'a DashMap<String, oneshot::Sender<Reply>>,
    id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(self.id);
    }
}

impl Correlator {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Send a frame and wait for its response.
    ///
    /// `send` receives the generated correlation id and must emit the
    /// outgoing frame carrying it; it returns `false` if the frame could not
    /// be handed off.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::Timeout`] when `timeout` elapses first and
    /// [`CallError::Undeliverable`] when `send` fails.
    pub async fn call<F>(&self, timeout: Duration, send: F) -> Result<Reply, CallError>
    where
        F: FnOnce(&str) -> bool,
    {
        let id = correlation_id();
        let (tx, mut rx) = oneshot::channel();
        self.pending.insert(id.clone(), tx);
        let _guard = PendingGuard {
            pending: &self.pending,
            id: &id,
        };

        if !send(&id) {
            return Err(CallError::Undeliverable(format!("call {id} was not sent")));
        }
        trace!(correlation = %id, "Call sent");

        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(CallError::Undeliverable(format!("call {id} was abandoned"))),
            Err(_) => {
                if self.pending.remove(&id).is_some() {
                    debug!(correlation = %id, ?timeout, "Call timed out");
                    return Err(CallError::Timeout(timeout));
                }
                // A response claimed the waiter just before the deadline and
                // is being handed over; take it instead of reporting both.
                rx.await
                    .map_err(|_| CallError::Undeliverable(format!("call {id} was abandoned")))
            }
        }
    }

    /// Deliver a response to its waiter.
    ///
    /// Returns `false` if no call is pending under `id` (unknown, already
    /// answered, or timed out); the reply is then dropped.
    pub fn resolve(&self, id: &str, reply: Reply) -> bool {
        match self.pending.remove(id) {
            Some((_, waiter)) => waiter.send(reply).is_ok(),
            None => {
                debug!(correlation = %id, "Response without pending call");
                false
            }
        }
    }

    /// Whether a call is pending under `id`.
    #[must_use]
    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }

    /// Number of pending calls.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_call_resolved_by_response() {
        let correlator = Arc::new(Correlator::new());
        let sent = Arc::new(Mutex::new(None::<String>));

        let c = correlator.clone();
        let s = sent.clone();
        let responder = tokio::spawn(async move {
            loop {
                let id = s.lock().unwrap().clone();
                if let Some(id) = id {
                    assert!(c.resolve(&id, Reply::new("pong", "")));
                    break;
                }
                tokio::task::yield_now().await;
            }
        });

        let reply = correlator
            .call(Duration::from_secs(5), |id| {
                *sent.lock().unwrap() = Some(id.to_string());
                true
            })
            .await
            .unwrap();

        responder.await.unwrap();
        assert_eq!(reply.payload, "pong");
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_times_out_once() {
        let correlator = Correlator::new();
        let mut sent = String::new();

        let result = correlator
            .call(Duration::from_millis(50), |id| {
                sent = id.to_string();
                true
            })
            .await;

        assert_eq!(result, Err(CallError::Timeout(Duration::from_millis(50))));
        assert!(!correlator.is_pending(&sent));
        // A late response finds no waiter and is discarded.
        assert!(!correlator.resolve(&sent, Reply::new("late", "")));
    }

    #[tokio::test]
    async fn test_unsent_call_is_retired() {
        let correlator = Correlator::new();
        let result = correlator.call(Duration::from_secs(1), |_| false).await;
        assert!(matches!(result, Err(CallError::Undeliverable(_))));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_out_of_order_responses() {
        let correlator = Arc::new(Correlator::new());
        let (id_tx, mut id_rx) = tokio::sync::mpsc::unbounded_channel::<(u8, String)>();

        let first = {
            let c = correlator.clone();
            let tx = id_tx.clone();
            tokio::spawn(async move {
                c.call(Duration::from_secs(5), |id| tx.send((1, id.to_string())).is_ok())
                    .await
            })
        };
        let second = {
            let c = correlator.clone();
            let tx = id_tx.clone();
            tokio::spawn(async move {
                c.call(Duration::from_secs(5), |id| tx.send((2, id.to_string())).is_ok())
                    .await
            })
        };

        let mut ids = Vec::new();
        ids.push(id_rx.recv().await.unwrap());
        ids.push(id_rx.recv().await.unwrap());
        ids.sort();

        // Answer the second call first.
        assert!(correlator.resolve(&ids[1].1, Reply::new("two", "")));
        assert!(correlator.resolve(&ids[0].1, Reply::new("one", "")));

        assert_eq!(first.await.unwrap().unwrap().payload, "one");
        assert_eq!(second.await.unwrap().unwrap().payload, "two");
    }

    #[tokio::test]
    async fn test_double_resolve_is_rejected() {
        let correlator = Arc::new(Correlator::new());
        let c = correlator.clone();
        let reply = correlator
            .call(Duration::from_secs(5), move |id| {
                assert!(c.resolve(id, Reply::new("first", "")));
                assert!(!c.resolve(id, Reply::new("second", "")));
                true
            })
            .await
            .unwrap();
        assert_eq!(reply.payload, "first");
    }

    #[tokio::test]
    async fn test_dropped_call_cleans_up() {
        let correlator = Correlator::new();
        let call = correlator.call(Duration::from_secs(60), |_| true);
        let _ = tokio::time::timeout(Duration::from_millis(10), call).await;
        assert_eq!(correlator.pending_count(), 0);
    }
}
