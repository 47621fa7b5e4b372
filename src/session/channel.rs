//! The primary control channel: one comm, one active handler.
//!
//! The channel owns a pump task that reads inbound comm events. Reserved
//! `reload` probes are answered here and never reach the handler; everything
//! else is forwarded to whichever handler is currently installed. Installing a
//! handler is a destructive overwrite: the previous one is orphaned, so two
//! handlers are never invoked for one message.

use crate::protocol::{ControlRequest, METHOD_RELOAD, ReplyEnvelope};
use crate::transport::{CommEvent, CommSink, KernelConnection, TransportError};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Inbound control traffic as the handler sees it: a decoded envelope, or the
/// decode failure for a message that had no usable shape. Undecodable traffic
/// must reach the handler too, or a call waiting on it would never resolve.
pub type MsgHandler = Box<dyn FnMut(Result<ReplyEnvelope, MalformedReply>) + Send>;
pub type CloseHandler = Box<dyn FnOnce() + Send>;

/// Why an inbound message could not be decoded.
#[derive(Debug, Clone)]
pub struct MalformedReply {
    pub detail: String,
}

struct HandlerSlot {
    on_msg: MsgHandler,
    on_close: Option<CloseHandler>,
}

pub struct ControlChannel {
    target: String,
    sink: Arc<dyn CommSink>,
    handler: Arc<Mutex<HandlerSlot>>,
    call_gate: tokio::sync::Mutex<()>,
    pump: JoinHandle<()>,
}

impl ControlChannel {
    pub async fn open(
        connection: &dyn KernelConnection,
        target: &str,
    ) -> Result<Self, TransportError> {
        let comm = connection.open_comm(target).await?;
        let sink: Arc<dyn CommSink> = Arc::from(comm.tx);
        let handler = Arc::new(Mutex::new(HandlerSlot {
            on_msg: Box::new(|reply| match reply {
                Ok(reply) => tracing::warn!(
                    target: "mooring::channel",
                    method = %reply.method,
                    "control message dropped: no handler installed"
                ),
                Err(err) => tracing::warn!(
                    target: "mooring::channel",
                    detail = %err.detail,
                    "malformed control message dropped: no handler installed"
                ),
            }),
            on_close: Some(Box::new(|| {})),
        }));
        let pump = tokio::spawn(pump_comm(
            comm.rx,
            Arc::clone(&sink),
            Arc::clone(&handler),
            target.to_string(),
        ));
        tracing::debug!(target: "mooring::channel", comm_target = %target, comm_id = %comm.comm_id, "control channel open");
        Ok(Self {
            target: target.to_string(),
            sink,
            handler,
            call_gate: tokio::sync::Mutex::new(()),
            pump,
        })
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Replace the active handler. Atomic: the old handler is discarded and
    /// will not see any further messages or the close callback.
    pub fn set_handler(&self, on_msg: MsgHandler, on_close: CloseHandler) {
        let mut slot = self.handler.lock();
        *slot = HandlerSlot {
            on_msg,
            on_close: Some(on_close),
        };
    }

    /// Fire-and-forget send. Correlation is the caller's problem; see
    /// [`pending::round_trip`](crate::session::pending::round_trip).
    pub async fn send(&self, request: &ControlRequest) -> Result<(), TransportError> {
        let message =
            serde_json::to_value(request).map_err(|err| TransportError::Send(err.to_string()))?;
        self.sink.send(message).await
    }

    pub(crate) fn call_gate(&self) -> &tokio::sync::Mutex<()> {
        &self.call_gate
    }

    pub async fn close(&self) {
        self.sink.close().await;
    }
}

impl Drop for ControlChannel {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

async fn pump_comm(
    mut rx: mpsc::UnboundedReceiver<CommEvent>,
    sink: Arc<dyn CommSink>,
    handler: Arc<Mutex<HandlerSlot>>,
    target: String,
) {
    loop {
        match rx.recv().await {
            Some(CommEvent::Message(value)) => {
                if value.get("method").and_then(Value::as_str) == Some(METHOD_RELOAD) {
                    // Liveness probe from the kernel: answer at the channel
                    // layer without disturbing any in-flight exchange.
                    tracing::trace!(target: "mooring::channel", comm_target = %target, "answering reload probe");
                    if let Err(err) = sink.send(json!({ "method": METHOD_RELOAD })).await {
                        tracing::warn!(
                            target: "mooring::channel",
                            comm_target = %target,
                            error = %err,
                            "failed to answer reload probe"
                        );
                    }
                    continue;
                }
                let decoded = serde_json::from_value::<ReplyEnvelope>(value).map_err(|err| {
                    tracing::warn!(
                        target: "mooring::channel",
                        comm_target = %target,
                        error = %err,
                        "malformed control message"
                    );
                    MalformedReply {
                        detail: err.to_string(),
                    }
                });
                let mut slot = handler.lock();
                (slot.on_msg)(decoded);
            }
            Some(CommEvent::Closed) | None => {
                let close = handler.lock().on_close.take();
                if let Some(close) = close {
                    close();
                }
                tracing::debug!(target: "mooring::channel", comm_target = %target, "control channel closed");
                break;
            }
        }
    }
}
