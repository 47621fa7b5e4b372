//! Session control: the primary channel, request round trips, the lifecycle
//! manager, the reconnect supervisor, and the widget mount broker.

use thiserror::Error;

pub mod channel;
pub mod manager;
pub mod mount;
pub mod pending;
pub mod supervisor;

pub use channel::ControlChannel;
pub use manager::SessionManager;
pub use mount::{MountBroker, WidgetHandle};
pub use supervisor::{ReconnectSupervisor, SessionPhase, UiBridge};

use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),
    #[error("control channel closed before reply")]
    ChannelClosed,
    #[error("timed out waiting for '{method}' reply")]
    Timeout { method: &'static str },
    #[error("kernel rejected '{method}': {detail}")]
    Remote {
        method: &'static str,
        detail: String,
    },
    #[error("malformed '{method}' reply: {detail}")]
    InvalidReply {
        method: &'static str,
        detail: String,
    },
}
