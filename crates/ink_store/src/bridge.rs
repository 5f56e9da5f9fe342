//! Worker RPC bridge.
//!
//! Request/response message passing across an isolation boundary, with
//! correlation ids. The client side keeps a pending-request table mapping
//! each in-flight id to a oneshot sender; the hosted side is a dispatch
//! loop handing `{id, type, params}` envelopes to a [`BridgeHandler`] and
//! answering with `{id, type: "success", data}` or
//! `{id, type: "error", error}`.
//!
//! Replies for abandoned or unknown correlation ids are dropped silently.
//! When the transport closes, every pending call is rejected with a
//! transport failure.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{ErrorKind, StoreError, WireError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub id: String,
    #[serde(rename = "type")]
    pub op: String,
    pub params: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseEnvelope {
    Success { id: String, data: Value },
    Error { id: String, error: WireError },
}

/// Implemented by the hosted side; one registered operation per name.
#[async_trait]
pub trait BridgeHandler: Send + Sync {
    async fn handle(&self, op: &str, params: Value) -> Result<Value, StoreError>;
}

/// Dispatch loop for the hosted context. Runs until the request channel
/// closes or the reply channel is gone.
pub async fn serve(
    handler: Arc<dyn BridgeHandler>,
    mut requests: mpsc::UnboundedReceiver<RequestEnvelope>,
    replies: mpsc::UnboundedSender<ResponseEnvelope>,
) {
    while let Some(req) = requests.recv().await {
        // Each request gets its own task so the dispatch loop itself never
        // blocks on a handler. Whether requests actually overlap is up to
        // the handler; the engine host still serializes statements on its
        // session lock.
        let handler = handler.clone();
        let replies = replies.clone();
        tokio::spawn(async move {
            let response = match handler.handle(&req.op, req.params).await {
                Ok(data) => ResponseEnvelope::Success { id: req.id, data },
                Err(err) => ResponseEnvelope::Error {
                    id: req.id,
                    error: WireError::from(&err),
                },
            };
            let _ = replies.send(response);
        });
    }
    tracing::debug!("bridge host loop terminated");
}

type PendingMap = HashMap<String, oneshot::Sender<Result<Value, WireError>>>;

/// Client half of the bridge. Cheap to clone.
#[derive(Clone)]
pub struct BridgeClient {
    requests: mpsc::UnboundedSender<RequestEnvelope>,
    pending: Arc<parking_lot::Mutex<PendingMap>>,
    closed: Arc<AtomicBool>,
}

impl BridgeClient {
    /// Attach to a transport. Must be called on a runtime: a reader task
    /// is spawned to resolve replies against the pending table.
    pub fn connect(
        requests: mpsc::UnboundedSender<RequestEnvelope>,
        mut replies: mpsc::UnboundedReceiver<ResponseEnvelope>,
    ) -> Self {
        let pending: Arc<parking_lot::Mutex<PendingMap>> = Arc::default();
        let closed = Arc::new(AtomicBool::new(false));

        {
            let pending = pending.clone();
            let closed = closed.clone();
            tokio::spawn(async move {
                while let Some(reply) = replies.recv().await {
                    let (id, result) = match reply {
                        ResponseEnvelope::Success { id, data } => (id, Ok(data)),
                        ResponseEnvelope::Error { id, error } => (id, Err(error)),
                    };
                    match pending.lock().remove(&id) {
                        Some(waiter) => {
                            let _ = waiter.send(result);
                        }
                        None => {
                            tracing::trace!(%id, "dropping reply for unknown correlation id");
                        }
                    }
                }

                closed.store(true, Ordering::SeqCst);
                let waiters: Vec<_> = pending.lock().drain().collect();
                for (_, waiter) in waiters {
                    let _ = waiter.send(Err(WireError {
                        kind: ErrorKind::Transport,
                        message: "bridge transport closed".to_string(),
                    }));
                }
            });
        }

        Self {
            requests,
            pending,
            closed,
        }
    }

    /// Send one request and await its correlated reply.
    pub async fn call(
        &self,
        op: &str,
        params: Value,
        cancel: &CancellationToken,
    ) -> Result<Value, StoreError> {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Transport("bridge transport closed".to_string()));
        }

        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id.clone(), tx);

        // The reader may have drained the pending table between the check
        // above and the insert; a waiter registered after that would never
        // be rejected.
        if self.closed.load(Ordering::SeqCst) {
            self.pending.lock().remove(&id);
            return Err(StoreError::Transport("bridge transport closed".to_string()));
        }

        let envelope = RequestEnvelope {
            id: id.clone(),
            op: op.to_string(),
            params,
        };
        if self.requests.send(envelope).is_err() {
            self.pending.lock().remove(&id);
            return Err(StoreError::Transport("bridge transport closed".to_string()));
        }

        tokio::select! {
            reply = rx => match reply {
                Ok(Ok(data)) => Ok(data),
                Ok(Err(wire)) => Err(wire.into()),
                Err(_) => Err(StoreError::Transport("reply channel dropped".to_string())),
            },
            _ = cancel.cancelled() => {
                // Abandon the correlation id; a late reply is dropped.
                self.pending.lock().remove(&id);
                Err(StoreError::Cancelled)
            }
        }
    }
}

/// Build an in-process transport pair: the client half and the host half.
pub fn transport_pair() -> (BridgeClientTransport, BridgeHostTransport) {
    let (req_tx, req_rx) = mpsc::unbounded_channel();
    let (resp_tx, resp_rx) = mpsc::unbounded_channel();
    (
        BridgeClientTransport {
            requests: req_tx,
            replies: resp_rx,
        },
        BridgeHostTransport {
            requests: req_rx,
            replies: resp_tx,
        },
    )
}

pub struct BridgeClientTransport {
    pub requests: mpsc::UnboundedSender<RequestEnvelope>,
    pub replies: mpsc::UnboundedReceiver<ResponseEnvelope>,
}

impl BridgeClientTransport {
    pub fn into_client(self) -> BridgeClient {
        BridgeClient::connect(self.requests, self.replies)
    }
}

pub struct BridgeHostTransport {
    pub requests: mpsc::UnboundedReceiver<RequestEnvelope>,
    pub replies: mpsc::UnboundedSender<ResponseEnvelope>,
}
