//! One control-channel round trip with exactly-once resolution.
//!
//! A round trip installs its own exclusive handler on the channel and races
//! the reply against channel close and an optional deadline. Whichever
//! resolves first wins; the losers find the slot already taken and become
//! no-ops. Concurrent callers are serialized through the channel's call gate
//! rather than treated as a caller error, so one slow request queues the next
//! instead of corrupting it.

use super::SessionError;
use super::channel::ControlChannel;
use crate::protocol::{ControlRequest, ReplyEnvelope};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// Send `request` and wait for its reply. `deadline: None` waits forever,
/// which is only appropriate for `run` (the initial app start has no bound).
pub async fn round_trip(
    channel: &ControlChannel,
    request: &ControlRequest,
    deadline: Option<Duration>,
) -> Result<ReplyEnvelope, SessionError> {
    let _in_flight = channel.call_gate().lock().await;
    let method = request.method_name();

    let (reply_tx, reply_rx) = oneshot::channel::<Result<ReplyEnvelope, SessionError>>();
    let slot = Arc::new(Mutex::new(Some(reply_tx)));
    let msg_slot = Arc::clone(&slot);
    let close_slot = Arc::clone(&slot);
    channel.set_handler(
        Box::new(move |reply| {
            if let Some(tx) = msg_slot.lock().take() {
                let _ = tx.send(reply.map_err(|err| SessionError::InvalidReply {
                    method,
                    detail: err.detail,
                }));
            }
        }),
        Box::new(move || {
            if let Some(tx) = close_slot.lock().take() {
                let _ = tx.send(Err(SessionError::ChannelClosed));
            }
        }),
    );

    channel.send(request).await?;

    let resolved = match deadline {
        Some(limit) => match tokio::time::timeout(limit, reply_rx).await {
            Ok(received) => received,
            Err(_) => {
                tracing::debug!(
                    target: "mooring::pending",
                    method,
                    timeout_ms = limit.as_millis() as u64,
                    "request timed out"
                );
                return Err(SessionError::Timeout { method });
            }
        },
        None => reply_rx.await,
    };

    match resolved {
        // Sender dropped without resolving: our handler was orphaned.
        Err(_) => Err(SessionError::ChannelClosed),
        Ok(Err(err)) => Err(err),
        Ok(Ok(reply)) if reply.is_finished() => Ok(reply),
        Ok(Ok(reply)) => Err(SessionError::Remote {
            method,
            detail: reply.error_detail(),
        }),
    }
}
