//! Protocol dispatcher.
//!
//! Maps each inbound frame of an authenticated session to the router or the
//! stores. Replies are queued on the session's outbox, so dispatch never
//! writes to a socket directly.

use crate::metrics;
use crate::server::AppState;
use beacon_core::{Route, SessionId};
use beacon_protocol::{Command, Frame};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Handle one frame received from `session`.
pub async fn dispatch(state: &Arc<AppState>, session: &SessionId, frame: Frame) {
    let router = &state.router;
    let origin = Route::Remote(session.clone());

    match frame.command.clone() {
        Command::Subscribe => {
            let result = router.subscribe(session, &frame.topic);
            acknowledge(state, session, &frame, result.err());
        }
        Command::Service => {
            let result = router.register_service(session, &frame.topic);
            acknowledge(state, session, &frame, result.err());
        }
        Command::Publish => {
            let delivered = router.publish(&origin, &frame.topic, &frame.payload);
            trace!(session = %session, topic = %frame.topic, delivered, "Published");
            metrics::record_deliveries(delivered);
        }
        Command::Request => router.route_request(&origin, frame),
        Command::Response => {
            if !router.route_response(&origin, &frame) {
                metrics::record_error("undeliverable_response");
            }
        }
        Command::Ping => send(state, session, Frame::pong(&frame)),
        Command::Pong => {
            if !router.resolve_pong(&frame) {
                debug!(session = %session, correlation = %frame.correlation_id, "Late or unsolicited PONG");
            }
        }
        command if command.is_kv() || command.is_document() => {
            let docs = state.clone();
            let owner = session.clone();
            let reply = tokio::task::spawn_blocking(move || {
                crate::storage::handle(&docs.docs, &frame, owner.as_str())
            })
            .await;
            match reply {
                Ok(Some(reply)) => send(state, session, reply),
                Ok(None) => {}
                Err(e) => {
                    warn!(session = %session, error = %e, "Storage task failed");
                    metrics::record_error("storage_task");
                }
            }
        }
        Command::Auth => debug!(session = %session, "Ignoring AUTH on an authenticated session"),
        Command::Unknown(name) => debug!(session = %session, command = %name, "Ignoring unknown command"),
        other => debug!(session = %session, command = %other, "Ignoring server-only command"),
    }
}

/// Answer a registration with `OK`, carrying the error when it failed.
fn acknowledge<E: std::fmt::Display>(
    state: &AppState,
    session: &SessionId,
    frame: &Frame,
    error: Option<E>,
) {
    let mut ok = Frame::ok(frame.topic.clone()).with_correlation(frame.correlation_id.clone());
    if let Some(e) = error {
        warn!(session = %session, topic = %frame.topic, error = %e, "Registration rejected");
        ok = ok.with_error(e.to_string());
    }
    send(state, session, ok);
}

fn send(state: &AppState, session: &SessionId, frame: Frame) {
    metrics::record_frame(frame.command.as_str(), "outbound");
    if !state.router.sessions().deliver(session, frame) {
        debug!(session = %session, "Session gone before reply");
    }
}
