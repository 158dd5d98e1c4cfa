//! Session manager.
//!
//! Accepts connections, runs the AUTH handshake, and drives one dispatch
//! loop per authenticated session until the peer leaves, a read fails, or
//! the session is kicked.

use crate::config::{AuthConfig, Config};
use crate::dispatch::dispatch;
use crate::metrics::{self, SessionMetricsGuard};
use anyhow::{Context, Result};
use beacon_core::{CallError, Router, SessionHandle, SessionId};
use beacon_protocol::{Command, Frame};
use beacon_store::{BucketStore, DocumentStore};
use beacon_transport::{Connection, TcpConfig, TcpTransport, Transport, TransportError};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Topic of the built-in statistics service.
pub const INFO_TOPIC: &str = "$broker.info";

/// Shared server state.
pub struct AppState {
    /// The topic router.
    pub router: Router,
    /// Document store, which also owns the bucket store.
    pub docs: DocumentStore,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Open storage and build the router.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage file cannot be opened.
    pub fn open(config: Config) -> Result<Arc<Self>> {
        let path = config.storage_path();
        let buckets = BucketStore::open(&path)
            .with_context(|| format!("Failed to open storage file: {}", path.display()))?;

        let state = Arc::new(Self {
            router: Router::with_config(config.router_config()),
            docs: DocumentStore::new(Arc::new(buckets)),
            config,
        });
        register_info_service(&state)?;
        Ok(state)
    }
}

fn register_info_service(state: &Arc<AppState>) -> Result<()> {
    let weak = Arc::downgrade(state);
    state.router.serve_local(INFO_TOPIC, move |_, replier| {
        let Some(state) = weak.upgrade() else {
            replier.fail("broker is shutting down");
            return;
        };
        let info = json!({
            "version": env!("CARGO_PKG_VERSION"),
            "stats": state.router.stats(),
        });
        replier.reply(info.to_string());
    })?;
    Ok(())
}

/// Why a connection never became a session.
#[derive(Debug, Error)]
enum AuthError {
    #[error("invalid credentials")]
    Rejected(String),

    #[error("connection closed before AUTH")]
    Closed,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// A bound broker, ready to run.
pub struct Server {
    transport: TcpTransport,
    state: Arc<AppState>,
    shutdown: CancellationToken,
}

impl Server {
    /// Open storage and bind the listener.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be opened or the address cannot
    /// be bound.
    pub async fn bind(config: Config) -> Result<Self> {
        let addr = config.bind_addr()?;
        let max_frame_size = config.limits.max_frame_size;
        let state = AppState::open(config)?;
        let transport = TcpTransport::new(TcpConfig {
            bind_addr: addr,
            max_frame_size,
        })
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

        Ok(Self {
            transport,
            state,
            shutdown: CancellationToken::new(),
        })
    }

    /// Address the listener is bound to.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.transport.local_addr()
    }

    /// Shared state.
    #[must_use]
    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Token that stops the accept loop and every session when cancelled.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Accept connections until shutdown.
    ///
    /// # Errors
    ///
    /// Currently infallible once bound; accept errors are logged and skipped.
    pub async fn run(self) -> Result<()> {
        info!(
            addr = ?self.local_addr(),
            transport = self.transport.name(),
            "Beacon server listening"
        );

        if let Some(interval) = self.state.config.heartbeat_interval() {
            tokio::spawn(heartbeat(
                self.state.clone(),
                interval,
                self.state.config.heartbeat_timeout(),
                self.shutdown.clone(),
            ));
        }

        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                accepted = self.transport.accept() => match accepted {
                    Ok(conn) => {
                        metrics::record_connection();
                        tokio::spawn(handle_connection(conn, self.state.clone()));
                    }
                    Err(e) => {
                        warn!(error = %e, "Accept failed");
                        metrics::record_error("accept");
                    }
                }
            }
        }

        info!(sessions = self.state.router.sessions().len(), "Shutting down");
        self.state.router.sessions().kick_all();
        Ok(())
    }
}

/// Read frames until a valid AUTH arrives, returning its correlation id.
async fn authenticate(conn: &mut dyn Connection, auth: &AuthConfig) -> Result<String, AuthError> {
    loop {
        let Some(frame) = conn.recv().await? else {
            return Err(AuthError::Closed);
        };
        if frame.command != Command::Auth {
            debug!(command = %frame.command, "Ignoring frame before AUTH");
            continue;
        }
        if frame.topic == auth.username && frame.payload == auth.password {
            return Ok(frame.correlation_id);
        }
        return Err(AuthError::Rejected(frame.correlation_id));
    }
}

async fn handle_connection(mut conn: Box<dyn Connection>, state: Arc<AppState>) {
    let remote = conn.remote_addr();
    let handshake = tokio::time::timeout(
        state.config.auth_timeout(),
        authenticate(conn.as_mut(), &state.config.auth),
    )
    .await;

    let correlation = match handshake {
        Ok(Ok(correlation)) => correlation,
        Ok(Err(AuthError::Rejected(correlation))) => {
            warn!(remote = ?remote, "Authentication failed");
            metrics::record_auth_failure();
            let _ = conn
                .send(Frame::auth_failed(correlation, "invalid credentials"))
                .await;
            let _ = conn.close().await;
            return;
        }
        Ok(Err(e)) => {
            debug!(remote = ?remote, error = %e, "Connection ended during handshake");
            let _ = conn.close().await;
            return;
        }
        Err(_) => {
            warn!(remote = ?remote, "Authentication timed out");
            metrics::record_auth_failure();
            let _ = conn
                .send(Frame::auth_failed("", "authentication timed out"))
                .await;
            let _ = conn.close().await;
            return;
        }
    };

    let id = SessionId::generate();
    if conn
        .send(Frame::connected(correlation, id.as_str()))
        .await
        .is_err()
    {
        return;
    }

    let handle = SessionHandle::new(conn.outbound(), remote.clone());
    let kicked = handle.shutdown_token();
    state.router.sessions().insert(id.clone(), handle);
    let _metrics_guard = SessionMetricsGuard::new();
    info!(session = %id, remote = ?remote, "Session opened");

    let reason = loop {
        tokio::select! {
            () = kicked.cancelled() => break "kicked",
            received = conn.recv() => match received {
                Ok(Some(frame)) => {
                    metrics::record_frame(frame.command.as_str(), "inbound");
                    let started = Instant::now();
                    dispatch(&state, &id, frame).await;
                    metrics::record_dispatch(started.elapsed().as_secs_f64());
                }
                Ok(None) => break "closed by peer",
                Err(e) => {
                    warn!(session = %id, error = %e, "Dropping session after read error");
                    metrics::record_error("protocol");
                    break "read error";
                }
            }
        }
    };

    state.router.disconnect(&id);
    let _ = conn.close().await;
    info!(session = %id, reason, "Session closed");
}

/// Ping every session each `interval`; kick those that miss the deadline.
async fn heartbeat(
    state: Arc<AppState>,
    interval: Duration,
    deadline: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        for id in state.router.sessions().ids() {
            let state = state.clone();
            tokio::spawn(async move {
                match state.router.ping(&id, Some(deadline)).await {
                    Ok(rtt) => trace!(session = %id, ?rtt, "Heartbeat answered"),
                    Err(CallError::Timeout(_)) => {
                        warn!(session = %id, "Heartbeat missed, dropping session");
                        metrics::record_request_timeout();
                        state.router.sessions().kick(&id);
                    }
                    Err(e) => debug!(session = %id, error = %e, "Heartbeat not sent"),
                }
            });
        }
    }
}
