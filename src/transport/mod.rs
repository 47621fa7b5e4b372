//! The kernel transport seam.
//!
//! Everything above this boundary is transport-agnostic: a kernel connection
//! only has to hand out named comms with a send side and an event stream, and
//! report status changes. The concrete wire protocol lives behind these traits.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

pub mod mock;

/// Connection state of the underlying kernel socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
}

/// Execution state reported by the kernel itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelStatus {
    Idle,
    Busy,
    Unknown,
}

/// Inbound event on a comm.
#[derive(Debug, Clone)]
pub enum CommEvent {
    Message(Value),
    Closed,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("kernel connection failed: {0}")]
    ConnectFailed(String),
    #[error("comm is closed")]
    CommClosed,
    #[error("comm send failed: {0}")]
    Send(String),
}

/// A bidirectional comm opened on a kernel connection. The send side is
/// shareable; the event stream is consumed by whoever pumps the comm.
pub struct Comm {
    pub comm_id: String,
    pub tx: Box<dyn CommSink>,
    pub rx: mpsc::UnboundedReceiver<CommEvent>,
}

#[async_trait]
pub trait CommSink: Send + Sync {
    async fn send(&self, message: Value) -> Result<(), TransportError>;
    async fn close(&self);
}

/// Factory for kernel connections, keyed by kernel id.
#[async_trait]
pub trait KernelTransport: Send + Sync {
    async fn connect(&self, kernel_id: &str) -> Result<Arc<dyn KernelConnection>, TransportError>;
}

/// An attached kernel. Owned by the session for its lifetime and disposed on
/// teardown. Status subscriptions deliver every transition, not just the
/// latest value, so the reconnect supervisor never misses a disconnect.
#[async_trait]
pub trait KernelConnection: Send + Sync {
    fn kernel_id(&self) -> &str;

    /// Identifier of this client against the kernel; distinguishes tabs or
    /// windows that share one kernel.
    fn client_session_id(&self) -> &str;

    fn connection_status(&self) -> ConnectionStatus;

    fn kernel_status(&self) -> KernelStatus;

    fn subscribe_connection_status(&self) -> broadcast::Receiver<ConnectionStatus>;

    fn subscribe_kernel_status(&self) -> broadcast::Receiver<KernelStatus>;

    /// Open a new comm for the given target name. Each call creates an
    /// independent comm with a fresh comm id.
    async fn open_comm(&self, target: &str) -> Result<Comm, TransportError>;

    /// Release the connection. Closes every comm opened on it.
    async fn dispose(&self);
}
