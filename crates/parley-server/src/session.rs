//! Connection lifecycle.
//!
//! Every accepted connection is driven by one [`Session`] task through
//! `Connecting -> Authenticating -> Registered -> Closing -> Closed`.
//! A connection that fails authentication never reaches the registry and
//! is sent nothing.

use crate::handlers::AppState;
use crate::metrics::{self, ConnectionMetricsGuard};
use parley_core::{
    extract_credential, ConnectionHandle, ConnectionId, ConnectionRecord, Credential,
    MessageBody, TypingEvent, UserIdentity, VerificationError,
};
use parley_protocol::{EventKind, InboundEvent, OutboundEvent, TypingTarget};
use parley_transport::Connection;
use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticating,
    Registered,
    Closing,
    Closed,
}

impl SessionState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Connecting => "connecting",
            SessionState::Authenticating => "authenticating",
            SessionState::Registered => "registered",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One accepted connection and the task state that drives it.
pub struct Session {
    id: ConnectionId,
    conn: Box<dyn Connection>,
    state: SessionState,
    app: Arc<AppState>,
}

impl Session {
    #[must_use]
    pub fn new(conn: Box<dyn Connection>, app: Arc<AppState>) -> Self {
        let id = ConnectionId::generate();
        debug!(
            connection = %id,
            remote = conn.remote_addr().as_deref().unwrap_or("unknown"),
            "Connection accepted"
        );
        app.sessions.fetch_add(1, Ordering::Relaxed);
        Self {
            id,
            conn,
            state: SessionState::Connecting,
            app,
        }
    }

    /// Drive the connection until it is closed.
    ///
    /// Returns the final state, which is always [`SessionState::Closed`].
    pub async fn run(mut self) -> SessionState {
        self.transition(SessionState::Authenticating);

        let credential = extract_credential(self.conn.handshake());
        let identity = match authenticate(&self.app, credential).await {
            Ok(identity) => identity,
            Err(e) => {
                warn!(connection = %self.id, reason = e.reason(), error = %e, "Handshake rejected");
                metrics::record_auth_failure(e.reason());
                self.close_transport().await;
                self.transition(SessionState::Closed);
                return self.state;
            }
        };

        let (handle, outbound) = ConnectionHandle::with_close_token(
            self.id.clone(),
            self.app.config.limits.outbound_buffer,
            self.app.shutdown.child_token(),
        );
        let record = ConnectionRecord::new(identity.clone(), handle.clone());

        // Queued before registration so it precedes the first presence update.
        if let Err(e) = self.app.presence.confirm(&record) {
            warn!(connection = %self.id, error = %e, "Failed to queue connection confirmation");
        }
        if !self.app.registry.register(record) {
            self.close_transport().await;
            self.transition(SessionState::Closed);
            return self.state;
        }
        let _metrics_guard = ConnectionMetricsGuard::new();
        metrics::set_online_users(self.app.registry.stats().identities);
        self.transition(SessionState::Registered);
        info!(connection = %self.id, user = %identity, "User connected");

        self.serve(&identity, &handle, outbound).await;

        self.transition(SessionState::Closing);
        handle.close();
        if self.app.registry.deregister(&handle).is_some() {
            metrics::set_online_users(self.app.registry.stats().identities);
        }
        self.close_transport().await;
        self.transition(SessionState::Closed);
        info!(connection = %self.id, user = %identity, "User disconnected");

        self.state
    }

    async fn serve(
        &mut self,
        identity: &UserIdentity,
        handle: &ConnectionHandle,
        mut outbound: mpsc::Receiver<Arc<OutboundEvent>>,
    ) {
        loop {
            tokio::select! {
                biased;

                _ = handle.closed() => {
                    debug!(connection = %self.id, "Close signalled");
                    break;
                }

                event = outbound.recv() => {
                    let Some(event) = event else { break };
                    if let Err(e) = self.conn.send(&event).await {
                        debug!(connection = %self.id, error = %e, "Write failed");
                        metrics::record_error("transport");
                        break;
                    }
                }

                inbound = self.conn.recv() => match inbound {
                    Ok(Some(event)) => dispatch(&self.app, identity, handle, event).await,
                    Ok(None) => {
                        debug!(connection = %self.id, "Client closed connection");
                        break;
                    }
                    Err(e) if e.is_recoverable() => {
                        warn!(connection = %self.id, error = %e, "Dropping bad frame");
                        metrics::record_error("protocol");
                    }
                    Err(e) => {
                        debug!(connection = %self.id, error = %e, "Read failed");
                        metrics::record_error("transport");
                        break;
                    }
                },
            }
        }
    }

    async fn close_transport(&mut self) {
        if !self.conn.is_open() {
            return;
        }
        if let Err(e) = self.conn.close().await {
            debug!(connection = %self.id, error = %e, "Error while closing transport");
        }
    }

    fn transition(&mut self, next: SessionState) {
        debug!(connection = %self.id, from = %self.state, to = %next, "Session state");
        self.state = next;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.app.sessions.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Verify the handshake credential, bounded by the handshake timeout.
async fn authenticate(
    app: &AppState,
    credential: Option<Credential>,
) -> Result<UserIdentity, VerificationError> {
    let credential = credential.ok_or(VerificationError::MissingCredential)?;
    debug!(source = credential.source.as_str(), "Verifying credential");

    tokio::time::timeout(
        app.config.auth.handshake_timeout(),
        app.verifier.verify(&credential.token),
    )
    .await
    .map_err(|_| VerificationError::Timeout)?
}

async fn dispatch(
    app: &AppState,
    identity: &UserIdentity,
    handle: &ConnectionHandle,
    event: InboundEvent,
) {
    metrics::record_inbound(event.kind().as_str());

    match event {
        InboundEvent::SendMessage(message) => {
            let receiver = UserIdentity::new(message.receiver_id);
            let body = MessageBody {
                text: message.text,
                image: message.image,
            };
            if let Err(e) = app.chat.send(identity, &receiver, body).await {
                debug!(user = %identity, receiver = %receiver, error = %e, "Message rejected");
                let reply = Arc::new(OutboundEvent::error(e.status(), e.to_string()));
                if let Err(e) = handle.deliver(reply) {
                    debug!(connection = %handle.id(), reason = e.as_str(), "Error reply not delivered");
                }
            }
        }
        InboundEvent::Typing(target) => route_typing(app, identity, target, true),
        InboundEvent::StopTyping(target) => route_typing(app, identity, target, false),
    }
}

fn route_typing(app: &AppState, identity: &UserIdentity, target: TypingTarget, is_typing: bool) {
    let typing = TypingEvent::new(identity.clone(), target.receiver_id.into(), is_typing);
    let report = app.router.deliver_typing(&typing);
    metrics::record_delivery(EventKind::UserTyping.as_str(), report.delivered, report.failed);
}
