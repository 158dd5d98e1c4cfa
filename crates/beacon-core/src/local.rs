//! In-process client API.
//!
//! The broker subscribes, serves, publishes and calls through the same
//! tables remote sessions use. Local targets are addressed by the `self`
//! route and their callbacks run on their own tasks.

use crate::correlation::{CallError, PING_TIMEOUT};
use crate::router::{Router, RouterError};
use crate::session::SessionId;
use crate::target::{Replier, Route};
use beacon_protocol::{Frame, SELF_ROUTE};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

impl Router {
    /// Subscribe a local callback to a pattern. Returns its registration id.
    ///
    /// # Errors
    ///
    /// Returns an error if the pattern is invalid.
    pub fn subscribe_local<F>(&self, pattern: &str, callback: F) -> Result<u64, RouterError>
    where
        F: Fn(Frame) + Send + Sync + 'static,
    {
        self.subscribe_callback(pattern, Arc::new(callback))
    }

    /// Serve `topic` with a local handler, replacing any previous handler.
    ///
    /// # Errors
    ///
    /// Returns an error if the topic is invalid.
    pub fn serve_local<F>(&self, topic: &str, handler: F) -> Result<(), RouterError>
    where
        F: Fn(Frame, Replier) + Send + Sync + 'static,
    {
        self.register_handler(topic, Arc::new(handler))
    }

    /// Publish from the broker itself.
    pub fn publish_local(&self, topic: &str, payload: &str) -> usize {
        self.publish(&Route::Local, topic, payload)
    }

    /// Call the service registered for `topic` and wait for its answer.
    ///
    /// `timeout` defaults to the configured request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::Timeout`] when no response arrives in time and
    /// [`CallError::Remote`] when the responder reports an error, including
    /// when no service is registered.
    pub async fn request(
        &self,
        topic: &str,
        payload: &str,
        timeout: Option<Duration>,
    ) -> Result<String, CallError> {
        let timeout = timeout.unwrap_or(self.config.request_timeout);
        let reply = self
            .correlator
            .call(timeout, |correlation| {
                self.route_request(&Route::Local, Frame::request(topic, payload, correlation));
                true
            })
            .await?;

        if reply.error.is_empty() {
            Ok(reply.payload)
        } else {
            Err(CallError::Remote(reply.error))
        }
    }

    /// Ping a session and measure the round trip.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::Undeliverable`] for unknown sessions and
    /// [`CallError::Timeout`] when no `PONG` arrives within `timeout`
    /// (default one second).
    pub async fn ping(
        &self,
        session: &SessionId,
        timeout: Option<Duration>,
    ) -> Result<Duration, CallError> {
        let started = Instant::now();
        self.correlator
            .call(timeout.unwrap_or(PING_TIMEOUT), |correlation| {
                self.sessions
                    .deliver(session, Frame::ping(correlation).with_reply_route(SELF_ROUTE))
            })
            .await?;
        let rtt = started.elapsed();
        debug!(session = %session, ?rtt, "Ping answered");
        Ok(rtt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::RouterConfig;
    use crate::session::SessionHandle;
    use beacon_protocol::Command;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_local_request_to_local_service() {
        let router = Router::new();
        router
            .serve_local("math.double", |req, replier| {
                let n: i64 = req.payload.parse().unwrap_or(0);
                replier.reply((n * 2).to_string());
            })
            .unwrap();

        let answer = router.request("math.double", "21", None).await.unwrap();
        assert_eq!(answer, "42");
        assert_eq!(router.correlator().pending_count(), 0);
    }

    #[tokio::test]
    async fn test_local_request_surfaces_remote_error() {
        let router = Router::new();
        router
            .serve_local("svc.fail", |_, replier| {
                replier.fail("boom");
            })
            .unwrap();

        assert_eq!(
            router.request("svc.fail", "", None).await,
            Err(CallError::Remote("boom".to_string()))
        );
    }

    #[tokio::test]
    async fn test_local_request_without_handler() {
        let router = Router::new();
        assert_eq!(
            router.request("nobody.home", "", None).await,
            Err(CallError::Remote("no handler for topic".to_string()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_request_times_out() {
        let router = Router::with_config(RouterConfig {
            request_timeout: Duration::from_millis(100),
            ..RouterConfig::default()
        });
        // Never answers.
        router.serve_local("svc.silent", |_, _replier| {}).unwrap();

        assert_eq!(
            router.request("svc.silent", "", None).await,
            Err(CallError::Timeout(Duration::from_millis(100)))
        );
    }

    #[tokio::test]
    async fn test_second_local_handler_wins() {
        let router = Router::new();
        router.serve_local("t", |_, r| {
            r.reply("first");
        })
        .unwrap();
        router.serve_local("t", |_, r| {
            r.reply("second");
        })
        .unwrap();

        assert_eq!(router.request("t", "", None).await.unwrap(), "second");
    }

    #[tokio::test]
    async fn test_concurrent_requests_are_isolated() {
        let router = Arc::new(Router::new());
        router
            .serve_local("echo", |req, replier| {
                let payload = req.payload.clone();
                tokio::spawn(async move {
                    // Answer larger payloads sooner to reorder responses.
                    let delay = 50u64.saturating_sub(payload.parse::<u64>().unwrap_or(0));
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    replier.reply(payload);
                });
            })
            .unwrap();

        let calls: Vec<_> = (0..20u64)
            .map(|i| {
                let router = router.clone();
                tokio::spawn(async move { (i, router.request("echo", &i.to_string(), None).await) })
            })
            .collect();

        for call in calls {
            let (i, result) = call.await.unwrap();
            assert_eq!(result.unwrap(), i.to_string());
        }
    }

    #[tokio::test]
    async fn test_remote_service_answers_local_request() {
        let router = Arc::new(Router::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        router
            .sessions()
            .insert("worker".into(), SessionHandle::new(tx, None));
        router.register_service(&"worker".into(), "jobs.run").unwrap();

        let worker_router = router.clone();
        tokio::spawn(async move {
            let req = rx.recv().await.unwrap();
            assert_eq!(req.command, Command::Request);
            assert_eq!(req.reply_route, "self");
            let res = Frame::response_to(&req, "done", "");
            worker_router.route_response(&Route::Remote("worker".into()), &res);
        });

        assert_eq!(router.request("jobs.run", "{}", None).await.unwrap(), "done");
    }

    #[tokio::test]
    async fn test_ping_resolved_by_pong() {
        let router = Arc::new(Router::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        router.sessions().insert("s1".into(), SessionHandle::new(tx, None));

        let peer = router.clone();
        tokio::spawn(async move {
            let ping = rx.recv().await.unwrap();
            assert_eq!(ping.command, Command::Ping);
            assert!(peer.resolve_pong(&Frame::pong(&ping)));
        });

        assert!(router.ping(&"s1".into(), None).await.is_ok());
    }

    #[tokio::test]
    async fn test_ping_unknown_session() {
        let router = Router::new();
        assert!(matches!(
            router.ping(&"ghost".into(), None).await,
            Err(CallError::Undeliverable(_))
        ));
    }
}
