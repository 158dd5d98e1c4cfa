//! Topic router for Beacon.
//!
//! The router owns the subscription table (pattern → targets) and the
//! service table (exact topic → one target). Publishes fan out to every
//! matching pattern; requests resolve to the single registered service.

use crate::correlation::{Correlator, Reply};
use crate::session::{SessionId, Sessions};
use crate::target::{
    deliver_response, HandlerFn, LocalSubscriber, Replier, Route, ServiceTarget, Subscriber,
    SubscriberFn, Target,
};
use crate::topic::{validate_topic, TopicPattern};
use beacon_protocol::{Command, Frame};
use dashmap::{DashMap, DashSet};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Router errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouterError {
    /// Invalid topic or pattern.
    #[error("Invalid topic: {0}")]
    InvalidTopic(&'static str),

    /// No service is registered for the topic.
    #[error("no handler for topic")]
    NoHandler(String),

    /// Maximum subscriptions reached.
    #[error("Maximum subscriptions reached")]
    MaxSubscriptionsReached,
}

/// Router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Maximum patterns one session may subscribe to.
    pub max_subscriptions_per_session: usize,
    /// Timeout applied to in-process requests that do not name one.
    pub request_timeout: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_subscriptions_per_session: 1_000,
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// Subscription table entry: compiled pattern plus its targets.
struct PatternEntry {
    pattern: TopicPattern,
    targets: Vec<Subscriber>,
}

/// The central topic router.
pub struct Router {
    /// Live sessions, shared with the session manager.
    pub(crate) sessions: Arc<Sessions>,
    /// Calls awaiting a response.
    pub(crate) correlator: Arc<Correlator>,
    /// Subscriptions indexed by pattern.
    patterns: DashMap<String, PatternEntry>,
    /// Session subscriptions (session id -> set of patterns).
    session_patterns: DashMap<SessionId, DashSet<String>>,
    /// Services indexed by exact topic.
    services: DashMap<String, ServiceTarget>,
    next_local_id: AtomicU64,
    pub(crate) config: RouterConfig,
}

impl Router {
    /// Create a new router with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RouterConfig::default())
    }

    /// Create a new router with custom configuration.
    #[must_use]
    pub fn with_config(config: RouterConfig) -> Self {
        info!("Creating router with config: {:?}", config);
        Self {
            sessions: Arc::new(Sessions::new()),
            correlator: Arc::new(Correlator::new()),
            patterns: DashMap::new(),
            session_patterns: DashMap::new(),
            services: DashMap::new(),
            next_local_id: AtomicU64::new(1),
            config,
        }
    }

    /// Live session registry.
    #[must_use]
    pub fn sessions(&self) -> &Arc<Sessions> {
        &self.sessions
    }

    /// Pending-call table.
    #[must_use]
    pub fn correlator(&self) -> &Arc<Correlator> {
        &self.correlator
    }

    /// Get router statistics.
    #[must_use]
    pub fn stats(&self) -> RouterStats {
        RouterStats {
            session_count: self.sessions.len(),
            pattern_count: self.patterns.len(),
            total_subscriptions: self.patterns.iter().map(|e| e.targets.len()).sum(),
            service_count: self.services.len(),
            pending_calls: self.correlator.pending_count(),
        }
    }

    /// Subscribe a session to a pattern. Repeated subscriptions are no-ops.
    ///
    /// # Errors
    ///
    /// Returns an error if the pattern is invalid or limits are exceeded.
    pub fn subscribe(&self, session: &SessionId, pattern: &str) -> Result<(), RouterError> {
        let compiled = TopicPattern::parse(pattern).map_err(RouterError::InvalidTopic)?;

        let session_subs = self.session_patterns.entry(session.clone()).or_default();
        if session_subs.contains(pattern) {
            return Ok(());
        }
        if session_subs.len() >= self.config.max_subscriptions_per_session {
            return Err(RouterError::MaxSubscriptionsReached);
        }

        let target = Target::Remote(session.clone());
        let mut entry = self.entry_for(compiled);
        if !entry.targets.contains(&target) {
            entry.targets.push(target);
        }
        session_subs.insert(pattern.to_string());

        debug!(
            pattern = %pattern,
            session = %session,
            subscribers = entry.targets.len(),
            "Subscribed"
        );
        Ok(())
    }

    /// Subscribe an in-process callback to a pattern.
    ///
    /// # Errors
    ///
    /// Returns an error if the pattern is invalid.
    pub fn subscribe_callback(&self, pattern: &str, callback: SubscriberFn) -> Result<u64, RouterError> {
        let compiled = TopicPattern::parse(pattern).map_err(RouterError::InvalidTopic)?;
        let id = self.next_local_id.fetch_add(1, Ordering::Relaxed);
        let mut entry = self.entry_for(compiled);
        entry.targets.push(Target::Local(LocalSubscriber { id, callback }));
        debug!(pattern = %pattern, local = id, "Local subscription added");
        Ok(id)
    }

    fn entry_for(&self, pattern: TopicPattern) -> dashmap::mapref::one::RefMut<'_, String, PatternEntry> {
        self.patterns
            .entry(pattern.as_str().to_string())
            .or_insert_with(|| {
                trace!(pattern = %pattern, "Creating pattern entry");
                PatternEntry {
                    pattern,
                    targets: Vec::new(),
                }
            })
    }

    /// Register a session as the service for `topic`, replacing any
    /// previous handler.
    ///
    /// # Errors
    ///
    /// Returns an error if the topic is invalid.
    pub fn register_service(&self, session: &SessionId, topic: &str) -> Result<(), RouterError> {
        self.insert_service(topic, Target::Remote(session.clone()))
    }

    /// Register an in-process handler as the service for `topic`.
    ///
    /// # Errors
    ///
    /// Returns an error if the topic is invalid.
    pub fn register_handler(&self, topic: &str, handler: HandlerFn) -> Result<(), RouterError> {
        self.insert_service(topic, Target::Local(handler))
    }

    fn insert_service(&self, topic: &str, target: ServiceTarget) -> Result<(), RouterError> {
        validate_topic(topic).map_err(RouterError::InvalidTopic)?;
        let route = target.route();
        if let Some(previous) = self.services.insert(topic.to_string(), target) {
            debug!(topic = %topic, previous = %previous.route(), "Service handler replaced");
        }
        debug!(topic = %topic, handler = %route, "Service registered");
        Ok(())
    }

    /// Resolve the handler for an exact topic.
    #[must_use]
    pub fn resolve(&self, topic: &str) -> Option<ServiceTarget> {
        self.services.get(topic).map(|t| t.clone())
    }

    /// Publish a payload to every pattern matching `topic`.
    ///
    /// Remote targets get a queued `PUB` frame; local callbacks each run on
    /// their own task. Returns the number of targets reached.
    pub fn publish(&self, origin: &Route, topic: &str, payload: &str) -> usize {
        let mut deliveries = Vec::new();
        for entry in self.patterns.iter() {
            if !entry.pattern.matches(topic) {
                continue;
            }
            let frame = Frame::publish(topic, payload)
                .with_pattern(entry.pattern.as_str())
                .with_origin(origin.as_wire());
            for target in &entry.targets {
                deliveries.push((target.clone(), frame.clone()));
            }
        }

        let mut delivered = 0;
        for (target, frame) in deliveries {
            match target {
                Target::Remote(id) => {
                    if self.sessions.deliver(&id, frame) {
                        delivered += 1;
                    }
                }
                Target::Local(subscriber) => {
                    let callback = subscriber.callback;
                    tokio::spawn(async move { callback(frame) });
                    delivered += 1;
                }
            }
        }

        trace!(topic = %topic, recipients = delivered, "Published");
        delivered
    }

    /// Route a request to the service registered for its topic.
    ///
    /// `origin` is where the response must go. A request with no registered
    /// service is answered immediately with a `no handler` error.
    pub fn route_request(&self, origin: &Route, request: Frame) {
        let request = request
            .with_reply_route(origin.as_wire())
            .with_origin(origin.as_wire());

        match self.resolve(&request.topic) {
            Some(Target::Remote(id)) => {
                let topic = request.topic.clone();
                if !self.sessions.deliver(&id, request.clone()) {
                    warn!(topic = %topic, session = %id, "Service session gone");
                    let response = Frame::response_to(&request, "", "service unavailable");
                    self.route_response(&Route::Local, &response);
                    return;
                }
                debug!(topic = %topic, service = %id, "Request forwarded");
            }
            Some(Target::Local(handler)) => {
                let replier = Replier::new(self.sessions.clone(), self.correlator.clone(), request.clone());
                tokio::spawn(async move { handler(request, replier) });
            }
            None => {
                debug!(topic = %request.topic, "No handler for request");
                let error = RouterError::NoHandler(request.topic.clone()).to_string();
                let response = Frame::response_to(&request, "", error);
                self.route_response(&Route::Local, &response);
            }
        }
    }

    /// Deliver a response along its `replyRoute`, stamped with `responder`.
    pub fn route_response(&self, responder: &Route, response: &Frame) -> bool {
        deliver_response(&self.sessions, &self.correlator, responder, response)
    }

    /// Resolve a broker-initiated ping.
    pub fn resolve_pong(&self, pong: &Frame) -> bool {
        debug_assert_eq!(pong.command, Command::Pong);
        self.correlator
            .resolve(&pong.correlation_id, Reply::new(pong.payload.clone(), ""))
    }

    /// Remove a session and every subscription and service referencing it.
    pub fn disconnect(&self, session: &SessionId) {
        self.sessions.remove(session);

        if let Some((_, patterns)) = self.session_patterns.remove(session) {
            let target = Target::Remote(session.clone());
            for pattern in patterns.iter() {
                if let Some(mut entry) = self.patterns.get_mut(pattern.as_str()) {
                    entry.targets.retain(|t| *t != target);
                    if entry.targets.is_empty() {
                        let name = pattern.clone();
                        drop(entry);
                        self.patterns.remove_if(&name, |_, e| e.targets.is_empty());
                    }
                }
            }
        }

        self.services
            .retain(|_, target| target.session() != Some(session));

        debug!(session = %session, "Session deregistered");
    }

    /// Patterns a session is subscribed to.
    #[must_use]
    pub fn session_patterns(&self, session: &SessionId) -> Vec<String> {
        self.session_patterns
            .get(session)
            .map(|s| s.iter().map(|p| p.clone()).collect())
            .unwrap_or_default()
    }

    /// Whether any target is subscribed to exactly this pattern.
    #[must_use]
    pub fn has_pattern(&self, pattern: &str) -> bool {
        self.patterns.contains_key(pattern)
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

/// Router statistics.
#[derive(Debug, Clone, Serialize)]
pub struct RouterStats {
    /// Number of live sessions.
    pub session_count: usize,
    /// Number of distinct subscribed patterns.
    pub pattern_count: usize,
    /// Total number of subscription targets.
    pub total_subscriptions: usize,
    /// Number of registered services.
    pub service_count: usize,
    /// Calls awaiting a response.
    pub pending_calls: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionHandle;
    use tokio::sync::mpsc;

    fn connect(router: &Router, id: &str) -> mpsc::UnboundedReceiver<Frame> {
        let (tx, rx) = mpsc::unbounded_channel();
        router
            .sessions()
            .insert(SessionId::from(id), SessionHandle::new(tx, None));
        rx
    }

    #[test]
    fn test_wildcard_publish_carries_pattern() {
        let router = Router::new();
        let mut rx = connect(&router, "s1");
        router.subscribe(&"s1".into(), "test.*.test").unwrap();

        assert_eq!(router.publish(&Route::Local, "test.abc.test", "x"), 1);
        assert_eq!(router.publish(&Route::Local, "test.abc.def.test", "x"), 0);

        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.command, Command::Publish);
        assert_eq!(frame.topic, "test.abc.test");
        assert_eq!(frame.topic_pattern, "test.*.test");
        assert_eq!(frame.origin_id, "self");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_publish_reaches_every_matching_pattern() {
        let router = Router::new();
        let mut rx1 = connect(&router, "s1");
        let mut rx2 = connect(&router, "s2");
        router.subscribe(&"s1".into(), "orders.*").unwrap();
        router.subscribe(&"s2".into(), "orders.created").unwrap();
        router.subscribe(&"s2".into(), "orders.*").unwrap();

        let count = router.publish(&Route::Remote("s3".into()), "orders.created", "{}");
        assert_eq!(count, 3);
        assert_eq!(rx1.try_recv().unwrap().origin_id, "s3");
        assert!(rx2.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn test_duplicate_subscription_is_idempotent() {
        let router = Router::new();
        let _rx = connect(&router, "s1");
        router.subscribe(&"s1".into(), "a.b").unwrap();
        router.subscribe(&"s1".into(), "a.b").unwrap();
        assert_eq!(router.stats().total_subscriptions, 1);
    }

    #[test]
    fn test_invalid_pattern() {
        let router = Router::new();
        assert!(matches!(
            router.subscribe(&"s1".into(), ""),
            Err(RouterError::InvalidTopic(_))
        ));
        assert!(router.register_service(&"s1".into(), "a..b").is_err());
    }

    #[test]
    fn test_subscription_limit() {
        let router = Router::with_config(RouterConfig {
            max_subscriptions_per_session: 1,
            ..RouterConfig::default()
        });
        router.subscribe(&"s1".into(), "a").unwrap();
        assert_eq!(
            router.subscribe(&"s1".into(), "b"),
            Err(RouterError::MaxSubscriptionsReached)
        );
    }

    #[test]
    fn test_last_service_registration_wins() {
        let router = Router::new();
        let mut first = connect(&router, "first");
        let mut second = connect(&router, "second");
        router.register_service(&"first".into(), "t").unwrap();
        router.register_service(&"second".into(), "t").unwrap();

        router.route_request(&Route::Local, Frame::request("t", "p", "c-1"));

        assert!(first.try_recv().is_err());
        let req = second.try_recv().unwrap();
        assert_eq!(req.command, Command::Request);
        assert_eq!(req.reply_route, "self");
        assert_eq!(req.correlation_id, "c-1");
    }

    #[test]
    fn test_request_without_handler_gets_error_response() {
        let router = Router::new();
        let mut caller = connect(&router, "caller");

        router.route_request(&Route::Remote("caller".into()), Frame::request("missing", "", "c-9"));

        let res = caller.try_recv().unwrap();
        assert_eq!(res.command, Command::Response);
        assert_eq!(res.correlation_id, "c-9");
        assert_eq!(res.error, "no handler for topic");
    }

    #[test]
    fn test_response_routed_to_requesting_session() {
        let router = Router::new();
        let mut caller = connect(&router, "caller");
        let mut service = connect(&router, "service");
        router.register_service(&"service".into(), "math.add").unwrap();

        router.route_request(&Route::Remote("caller".into()), Frame::request("math.add", "[1,2]", "c-1"));
        let forwarded = service.try_recv().unwrap();
        assert_eq!(forwarded.reply_route, "caller");

        let answer = Frame::response_to(&forwarded, "3", "");
        assert!(router.route_response(&Route::Remote("service".into()), &answer));

        let res = caller.try_recv().unwrap();
        assert_eq!(res.payload, "3");
        assert_eq!(res.correlation_id, "c-1");
        assert_eq!(res.reply_route, "service");
    }

    #[test]
    fn test_disconnect_removes_all_references() {
        let router = Router::new();
        let _rx1 = connect(&router, "s1");
        let mut rx2 = connect(&router, "s2");
        router.subscribe(&"s1".into(), "a.*").unwrap();
        router.subscribe(&"s1".into(), "b").unwrap();
        router.subscribe(&"s2".into(), "a.*").unwrap();
        router.register_service(&"s1".into(), "svc").unwrap();

        router.disconnect(&"s1".into());

        assert!(!router.sessions().contains(&"s1".into()));
        assert!(router.has_pattern("a.*"));
        assert!(!router.has_pattern("b"));
        assert!(router.resolve("svc").is_none());
        assert!(router.session_patterns(&"s1".into()).is_empty());

        assert_eq!(router.publish(&Route::Local, "a.x", ""), 1);
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn test_disconnect_keeps_other_services() {
        let router = Router::new();
        router.register_service(&"s1".into(), "one").unwrap();
        router.register_service(&"s2".into(), "two").unwrap();
        router.disconnect(&"s1".into());
        assert!(router.resolve("one").is_none());
        assert_eq!(
            router.resolve("two").and_then(|t| t.session().cloned()),
            Some(SessionId::from("s2"))
        );
    }

    #[tokio::test]
    async fn test_local_callback_runs_on_own_task() {
        let router = Router::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        router
            .subscribe_callback(
                "events.*",
                Arc::new(move |frame: Frame| {
                    let _ = tx.send(frame);
                }),
            )
            .unwrap();

        assert_eq!(router.publish(&Route::Local, "events.login", "u1"), 1);
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.payload, "u1");
        assert_eq!(frame.topic_pattern, "events.*");
    }

    #[test]
    fn test_stats() {
        let router = Router::new();
        let _rx = connect(&router, "s1");
        router.subscribe(&"s1".into(), "a").unwrap();
        router.subscribe(&"s1".into(), "b").unwrap();
        router.register_service(&"s1".into(), "svc").unwrap();

        let stats = router.stats();
        assert_eq!(stats.session_count, 1);
        assert_eq!(stats.pattern_count, 2);
        assert_eq!(stats.total_subscriptions, 2);
        assert_eq!(stats.service_count, 1);
    }
}
