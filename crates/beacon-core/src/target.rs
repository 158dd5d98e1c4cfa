//! Delivery targets and reply routing.
//!
//! Subscription and service tables hold [`Target`]s: either an in-process
//! callback or a remote session. Responses travel the other way, addressed
//! by a [`Route`] parsed from the request's `replyRoute` field.

use crate::correlation::{Correlator, Reply};
use crate::session::{SessionId, Sessions};
use beacon_protocol::{Command, Frame, SELF_ROUTE};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Callback invoked for each publish matching a local subscription.
pub type SubscriberFn = Arc<dyn Fn(Frame) + Send + Sync>;

/// Callback invoked for each request addressed to a local service.
pub type HandlerFn = Arc<dyn Fn(Frame, Replier) + Send + Sync>;

/// Where a frame is delivered.
#[derive(Clone)]
pub enum Target<F> {
    /// In-process callback.
    Local(F),
    /// A connected session.
    Remote(SessionId),
}

impl<F> Target<F> {
    /// The session behind a remote target.
    #[must_use]
    pub fn session(&self) -> Option<&SessionId> {
        match self {
            Self::Local(_) => None,
            Self::Remote(id) => Some(id),
        }
    }

    /// The route responses to this target travel back on.
    #[must_use]
    pub fn route(&self) -> Route {
        match self {
            Self::Local(_) => Route::Local,
            Self::Remote(id) => Route::Remote(id.clone()),
        }
    }
}

impl<F> fmt::Debug for Target<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(_) => f.write_str("Local(..)"),
            Self::Remote(id) => f.debug_tuple("Remote").field(id).finish(),
        }
    }
}

/// A local subscription callback with its registration id.
#[derive(Clone)]
pub struct LocalSubscriber {
    pub(crate) id: u64,
    pub(crate) callback: SubscriberFn,
}

/// Subscription table entry.
pub type Subscriber = Target<LocalSubscriber>;

/// Service table entry.
pub type ServiceTarget = Target<HandlerFn>;

impl PartialEq for Subscriber {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Local(a), Self::Local(b)) => a.id == b.id,
            (Self::Remote(a), Self::Remote(b)) => a == b,
            _ => false,
        }
    }
}

/// Addressee of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// The broker's own correlation table.
    Local,
    /// A connected session.
    Remote(SessionId),
}

impl Route {
    /// Parse a `replyRoute` field. Empty routes address nobody.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "" => None,
            SELF_ROUTE => Some(Self::Local),
            id => Some(Self::Remote(SessionId::from(id))),
        }
    }

    /// Wire form of the route.
    #[must_use]
    pub fn as_wire(&self) -> &str {
        match self {
            Self::Local => SELF_ROUTE,
            Self::Remote(id) => id.as_str(),
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// Send a response back along its `replyRoute`.
///
/// Local routes resolve the pending call in `correlator`; remote routes
/// forward a `RES` to the requesting session, stamped with `responder`.
pub(crate) fn deliver_response(
    sessions: &Sessions,
    correlator: &Correlator,
    responder: &Route,
    response: &Frame,
) -> bool {
    match Route::parse(&response.reply_route) {
        Some(Route::Local) => correlator.resolve(
            &response.correlation_id,
            Reply::new(response.payload.clone(), response.error.clone()),
        ),
        Some(Route::Remote(id)) => {
            let forwarded = Frame::new(Command::Response)
                .with_topic(response.topic.clone())
                .with_payload(response.payload.clone())
                .with_correlation(response.correlation_id.clone())
                .with_error(response.error.clone())
                .with_reply_route(responder.as_wire())
                .with_origin(responder.as_wire());
            let delivered = sessions.deliver(&id, forwarded);
            if !delivered {
                debug!(session = %id, topic = %response.topic, "Requester gone, response dropped");
            }
            delivered
        }
        None => {
            warn!(topic = %response.topic, correlation = %response.correlation_id, "Response without reply route");
            false
        }
    }
}

/// Single-use handle a local service uses to answer one request.
pub struct Replier {
    sessions: Arc<Sessions>,
    correlator: Arc<Correlator>,
    request: Frame,
}

impl Replier {
    pub(crate) fn new(sessions: Arc<Sessions>, correlator: Arc<Correlator>, request: Frame) -> Self {
        Self {
            sessions,
            correlator,
            request,
        }
    }

    /// The request being answered.
    #[must_use]
    pub fn request(&self) -> &Frame {
        &self.request
    }

    /// Answer successfully.
    pub fn reply(self, payload: impl Into<String>) -> bool {
        self.respond(payload, "")
    }

    /// Answer with an error.
    pub fn fail(self, error: impl Into<String>) -> bool {
        self.respond("", error)
    }

    /// Answer with both fields. Returns `false` if the requester is gone.
    pub fn respond(self, payload: impl Into<String>, error: impl Into<String>) -> bool {
        let response = Frame::response_to(&self.request, payload, error);
        deliver_response(&self.sessions, &self.correlator, &Route::Local, &response)
    }
}

impl fmt::Debug for Replier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Replier")
            .field("topic", &self.request.topic)
            .field("correlation_id", &self.request.correlation_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionHandle;
    use tokio::sync::mpsc;

    #[test]
    fn test_route_parsing() {
        assert_eq!(Route::parse("self"), Some(Route::Local));
        assert_eq!(Route::parse("abc"), Some(Route::Remote("abc".into())));
        assert_eq!(Route::parse(""), None);
        assert_eq!(Route::Local.as_wire(), "self");
    }

    #[test]
    fn test_replier_forwards_to_session() {
        let sessions = Arc::new(Sessions::new());
        let correlator = Arc::new(Correlator::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        sessions.insert("caller".into(), SessionHandle::new(tx, None));

        let request = Frame::request("svc.echo", "hi", "c-1").with_reply_route("caller");
        let replier = Replier::new(sessions, correlator, request);
        assert!(replier.reply("hi back"));

        let res = rx.try_recv().unwrap();
        assert_eq!(res.command, Command::Response);
        assert_eq!(res.topic, "svc.echo");
        assert_eq!(res.correlation_id, "c-1");
        assert_eq!(res.payload, "hi back");
        assert_eq!(res.reply_route, "self");
    }

    #[test]
    fn test_response_without_route_is_dropped() {
        let sessions = Sessions::new();
        let correlator = Correlator::new();
        let response = Frame::new(Command::Response).with_correlation("c-2");
        assert!(!deliver_response(&sessions, &correlator, &Route::Local, &response));
    }
}
