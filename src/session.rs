//! Duplex session
//!
//! One instance per connected SSE client. Pairs the outbound event
//! queue (server → client, drained by the GET stream) with the inbound
//! message sink (client → server, fed by POST), and drives the
//! JSON-RPC message loop against the application handler.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{BridgeError, Result};
use crate::registry::SessionRegistry;
use crate::rpc::{methods, RpcEnvelope, RpcError, RpcRequest, RpcResponse};
use crate::sse::SseEvent;

/// Opaque session identifier. Treated as a capability token: whoever
/// holds it may post into the session.
pub type SessionId = String;

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Draining,
    Closed,
}

/// Application handler boundary.
///
/// The transport owns envelope validation and correlation; the handler
/// only ever sees well-formed method calls. `initialize` is invoked
/// once per session before any other method is serviced.
#[async_trait]
pub trait RpcHandler: Send + Sync + 'static {
    /// Handshake, called for the session's `initialize` request
    async fn initialize(
        &self,
        params: Value,
        ctx: &SessionContext,
    ) -> std::result::Result<Value, RpcError>;

    /// Service one request, returning a result value or a structured
    /// error. Must not assume any call ordering beyond the handshake.
    async fn call(
        &self,
        method: &str,
        params: Value,
        ctx: &SessionContext,
    ) -> std::result::Result<Value, RpcError>;

    /// Service a notification. No response is produced either way.
    async fn notify(&self, method: &str, params: Value, ctx: &SessionContext) {
        let _ = (method, params, ctx);
    }
}

/// Session-scoped context handed to the application handler
#[derive(Clone)]
pub struct SessionContext {
    id: SessionId,
    created_at: DateTime<Utc>,
    outbound: mpsc::Sender<SseEvent>,
}

impl SessionContext {
    pub fn session_id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Push a server-initiated notification onto this session's stream
    pub async fn send_notification(&self, method: &str, params: Value) -> Result<()> {
        let notification = RpcRequest {
            jsonrpc: "2.0".to_string(),
            id: None,
            method: method.to_string(),
            params,
        };
        let json = serde_json::to_string(&notification)?;
        self.outbound
            .send(SseEvent::named("message", json))
            .await
            .map_err(|_| BridgeError::SessionClosed(self.id.clone()))
    }
}

/// A duplex session binding one SSE stream to its POST channel
pub struct Session {
    id: SessionId,
    created_at: DateTime<Utc>,
    state: Mutex<SessionState>,
    announced: AtomicBool,
    initialized: AtomicBool,
    inbound_tx: mpsc::Sender<RpcEnvelope>,
    outbound_tx: mpsc::Sender<SseEvent>,
}

/// Receiver halves of a session's queues, consumed by the transport:
/// the stream adapter drains `outbound_rx`, the message loop drains
/// `inbound_rx`.
pub struct SessionChannels {
    pub inbound_rx: mpsc::Receiver<RpcEnvelope>,
    pub outbound_rx: mpsc::Receiver<SseEvent>,
}

impl Session {
    pub(crate) fn new(id: SessionId, inbound_capacity: usize, outbound_capacity: usize) -> (Arc<Self>, SessionChannels) {
        let (inbound_tx, inbound_rx) = mpsc::channel(inbound_capacity);
        let (outbound_tx, outbound_rx) = mpsc::channel(outbound_capacity);
        let session = Arc::new(Self {
            id,
            created_at: Utc::now(),
            state: Mutex::new(SessionState::Open),
            announced: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
            inbound_tx,
            outbound_tx,
        });
        (
            session,
            SessionChannels {
                inbound_rx,
                outbound_rx,
            },
        )
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock() = state;
    }

    /// Emit the endpoint announcement. Must be called exactly once,
    /// before the stream carries anything else; the queue is empty at
    /// creation so this event is guaranteed first.
    pub fn announce(&self, endpoint_url: &str) -> Result<()> {
        if self.announced.swap(true, Ordering::SeqCst) {
            return Err(BridgeError::AlreadyAnnounced(self.id.clone()));
        }
        self.outbound_tx
            .try_send(SseEvent::named("endpoint", endpoint_url))
            .map_err(|_| BridgeError::SessionClosed(self.id.clone()))
    }

    /// Enqueue a validated envelope onto the inbound channel.
    ///
    /// Rejects when the session is draining/closed or the queue is
    /// full; the POST adapter maps the rejection to a client error
    /// status without touching any other session.
    pub fn post(&self, envelope: RpcEnvelope) -> Result<()> {
        if self.state() != SessionState::Open {
            return Err(BridgeError::SessionClosed(self.id.clone()));
        }
        match self.inbound_tx.try_send(envelope) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                Err(BridgeError::Backpressure(self.id.clone()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(BridgeError::SessionClosed(self.id.clone()))
            }
        }
    }

    /// Enqueue a protocol-level error response for a recovered request
    /// id (malformed envelope whose id survived).
    pub fn send_protocol_error(&self, id: Value, error: RpcError) -> Result<()> {
        let response = RpcResponse::error(Some(id), error);
        let json = serde_json::to_string(&response)?;
        self.outbound_tx
            .try_send(SseEvent::named("message", json))
            .map_err(|_| BridgeError::SessionClosed(self.id.clone()))
    }

    /// Run the message loop until the stream side hangs up.
    ///
    /// Each inbound envelope is dispatched to the handler; a Request
    /// yields exactly one Response on the outbound queue, a
    /// Notification yields none. Handler failures become JSON-RPC
    /// error responses, never loop termination. On disconnect the
    /// session drains: an in-flight dispatch finishes but its output
    /// is discarded when the send fails.
    pub async fn run(
        self: Arc<Self>,
        mut inbound_rx: mpsc::Receiver<RpcEnvelope>,
        handler: Arc<dyn RpcHandler>,
        registry: Arc<SessionRegistry>,
    ) {
        let ctx = SessionContext {
            id: self.id.clone(),
            created_at: self.created_at,
            outbound: self.outbound_tx.clone(),
        };

        loop {
            let envelope = tokio::select! {
                _ = self.outbound_tx.closed() => {
                    self.set_state(SessionState::Draining);
                    break;
                }
                maybe = inbound_rx.recv() => match maybe {
                    Some(envelope) => envelope,
                    None => break,
                },
            };

            let Some(response) = self.dispatch(envelope, handler.as_ref(), &ctx).await else {
                continue;
            };

            let json = match serde_json::to_string(&response) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!(session_id = %self.id, "failed to serialize response: {}", e);
                    continue;
                }
            };
            if self
                .outbound_tx
                .send(SseEvent::named("message", json))
                .await
                .is_err()
            {
                self.set_state(SessionState::Draining);
                break;
            }
        }

        self.set_state(SessionState::Closed);
        registry.remove(&self.id);
        tracing::info!(session_id = %self.id, "session closed");
    }

    async fn dispatch(
        &self,
        envelope: RpcEnvelope,
        handler: &dyn RpcHandler,
        ctx: &SessionContext,
    ) -> Option<RpcResponse> {
        match envelope {
            RpcEnvelope::Request(request) => {
                let id = request.id.clone();
                let outcome = if request.method == methods::INITIALIZE {
                    let outcome = self
                        .guarded(handler.initialize(request.params, ctx))
                        .await;
                    if matches!(outcome, Ok(_)) {
                        self.initialized.store(true, Ordering::SeqCst);
                    }
                    outcome
                } else if !self.initialized.load(Ordering::SeqCst) {
                    Err(RpcError::new(-32002, "server not initialized"))
                } else {
                    self.guarded(handler.call(&request.method, request.params, ctx))
                        .await
                };

                Some(match outcome {
                    Ok(result) => RpcResponse::success(id, result),
                    Err(error) => RpcResponse::error(id, error),
                })
            }
            RpcEnvelope::Notification(notification) => {
                // Failures servicing a notification are logged by the
                // guard; there is nothing to respond to.
                let method = notification.method.clone();
                if let Err(panic) = AssertUnwindSafe(handler.notify(
                    &notification.method,
                    notification.params,
                    ctx,
                ))
                .catch_unwind()
                .await
                {
                    tracing::warn!(
                        session_id = %self.id,
                        method = %method,
                        "handler panicked servicing notification: {}",
                        panic_message(&panic)
                    );
                }
                None
            }
            RpcEnvelope::Response(response) => {
                // This bridge never issues server-initiated requests,
                // so there is nothing to correlate against.
                tracing::debug!(session_id = %self.id, "dropping unsolicited response: {:?}", response.id);
                None
            }
        }
    }

    /// Contain handler panics so no fault can terminate the loop
    async fn guarded(
        &self,
        fut: impl std::future::Future<Output = std::result::Result<Value, RpcError>>,
    ) -> std::result::Result<Value, RpcError> {
        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic) => {
                tracing::error!(
                    session_id = %self.id,
                    "handler panicked: {}",
                    panic_message(&panic)
                );
                Err(RpcError::internal("handler panicked"))
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "<non-string panic payload>"
    }
}
