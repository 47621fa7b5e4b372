//! Reconnect supervision.
//!
//! Watches the connection-status stream and decides, after every reconnect,
//! whether the live UI can resume in place or the page must be refreshed. A
//! reconnect may land on a kernel that silently lost this session's state
//! (server restart, different worker); the only safe way to find out is to
//! ask, and the only safe answer to a non-answer is a reload.

use super::SessionError;
use super::manager::SessionManager;
use crate::transport::ConnectionStatus;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

/// Phase of the session as seen by the supervisor. Only the supervisor
/// transitions this; nothing else may set it directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Never connected yet.
    Fresh,
    /// Connected, app verified (or nothing to verify).
    Active,
    /// Just reconnected, verification in flight.
    StaleUnconfirmed,
    /// Verification failed after a real reconnect. Terminal.
    NeedsReload,
}

/// The rendering collaborator the supervisor drives. How widgets are
/// refetched or the page refreshed is not this crate's business.
#[async_trait]
pub trait UiBridge: Send + Sync {
    /// Re-fetch all current widget state after the kernel confirmed the app
    /// survived the reconnect.
    async fn resync(&self) -> Result<(), SessionError>;

    /// Recommend a full page refresh to the user. Terminal for the session.
    async fn force_reload(&self);
}

pub struct ReconnectSupervisor {
    phase: watch::Receiver<SessionPhase>,
    unloading: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl ReconnectSupervisor {
    pub fn spawn(manager: Arc<SessionManager>, ui: Arc<dyn UiBridge>) -> Self {
        // Subscribe before sampling the status: the transport is usually
        // already up by the time the control channel opened, and that connect
        // predates the subscription. It still counts as the first connect, so
        // the next Connected event after a disconnect must verify.
        let events = manager.subscribe_connection_status();
        let already_connected = manager.connection_status() == ConnectionStatus::Connected;
        let initial = if already_connected {
            SessionPhase::Active
        } else {
            SessionPhase::Fresh
        };
        let (phase_tx, phase_rx) = watch::channel(initial);
        let unloading = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&unloading);
        let task = tokio::spawn(supervise(
            manager,
            ui,
            events,
            phase_tx,
            flag,
            already_connected,
        ));
        Self {
            phase: phase_rx,
            unloading,
            task,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        *self.phase.borrow()
    }

    pub fn watch_phase(&self) -> watch::Receiver<SessionPhase> {
        self.phase.clone()
    }

    /// The client is intentionally tearing down (navigation away, tab close).
    /// Suppresses verification so a normal unload never prompts a reload.
    pub fn begin_unload(&self) {
        self.unloading.store(true, Ordering::SeqCst);
    }
}

impl Drop for ReconnectSupervisor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn supervise(
    manager: Arc<SessionManager>,
    ui: Arc<dyn UiBridge>,
    mut events: broadcast::Receiver<ConnectionStatus>,
    phase: watch::Sender<SessionPhase>,
    unloading: Arc<AtomicBool>,
    mut ever_connected: bool,
) {
    let mut saw_disconnect = false;
    loop {
        let status = match events.recv().await {
            Ok(status) => status,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(
                    target: "mooring::supervisor",
                    skipped,
                    "connection status stream lagged"
                );
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        if unloading.load(Ordering::SeqCst) {
            continue;
        }
        match status {
            ConnectionStatus::Disconnected => {
                saw_disconnect = true;
                tracing::debug!(target: "mooring::supervisor", "kernel disconnected");
            }
            ConnectionStatus::Connecting => {}
            ConnectionStatus::Connected if !ever_connected => {
                // Nothing to verify on the very first connect.
                ever_connected = true;
                let _ = phase.send(SessionPhase::Active);
            }
            ConnectionStatus::Connected => {
                if !saw_disconnect {
                    // Duplicate connected notification, not a reconnect.
                    continue;
                }
                saw_disconnect = false;
                if *phase.borrow() == SessionPhase::NeedsReload {
                    // First failure wins; no flapping.
                    continue;
                }
                let _ = phase.send(SessionPhase::StaleUnconfirmed);
                verify_after_reconnect(&manager, &ui, &phase).await;
            }
        }
    }
}

async fn verify_after_reconnect(
    manager: &SessionManager,
    ui: &Arc<dyn UiBridge>,
    phase: &watch::Sender<SessionPhase>,
) {
    // We expect the app to still be started on the kernel we reconnected to.
    // If it is not (server restarted, reconnected to a different worker), the
    // widget state is gone and only a full page reload recovers.
    let status = manager.app_status().await;
    if status.started {
        match ui.resync().await {
            Ok(()) => {
                tracing::info!(target: "mooring::supervisor", "resynced after reconnect");
                let _ = phase.send(SessionPhase::Active);
                return;
            }
            Err(err) => {
                tracing::warn!(
                    target: "mooring::supervisor",
                    error = %err,
                    "resync failed after reconnect"
                );
            }
        }
    }
    tracing::warn!(
        target: "mooring::supervisor",
        started = status.started,
        "session is stale, requesting page reload"
    );
    let _ = phase.send(SessionPhase::NeedsReload);
    // The kernel no longer matches the page; shut it down so the backend can
    // reclaim it. Best-effort, the reload recommendation stands either way.
    manager.shutdown().await;
    ui.force_reload().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::transport::mock::MockKernel;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct RecordingUi {
        resyncs: AtomicUsize,
        reloads: AtomicUsize,
    }

    impl RecordingUi {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                resyncs: AtomicUsize::new(0),
                reloads: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl UiBridge for RecordingUi {
        async fn resync(&self) -> Result<(), SessionError> {
            self.resyncs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn force_reload(&self) {
            self.reloads.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !cond() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    async fn wait_for_phase(supervisor: &ReconnectSupervisor, wanted: SessionPhase) {
        let mut rx = supervisor.watch_phase();
        tokio::time::timeout(Duration::from_secs(2), async {
            while *rx.borrow() != wanted {
                rx.changed().await.expect("phase channel closed");
            }
        })
        .await
        .unwrap_or_else(|_| panic!("never reached phase {wanted:?}"));
    }

    async fn connected_supervisor(
        kernel: &MockKernel,
    ) -> (Arc<SessionManager>, Arc<RecordingUi>, ReconnectSupervisor) {
        let manager = Arc::new(
            SessionManager::connect(kernel, SessionConfig::default(), Some("K1"))
                .await
                .unwrap(),
        );
        let ui = RecordingUi::new();
        let supervisor = ReconnectSupervisor::spawn(Arc::clone(&manager), ui.clone());
        (manager, ui, supervisor)
    }

    #[tokio::test]
    async fn first_connected_activates_without_verification() {
        let kernel = MockKernel::new();
        let probes = Arc::new(AtomicUsize::new(0));
        let probe_count = Arc::clone(&probes);
        kernel.respond_with(move |_, msg| {
            if msg["method"] == "app-status" {
                probe_count.fetch_add(1, Ordering::SeqCst);
            }
            vec![]
        });
        let (_manager, ui, supervisor) = connected_supervisor(&kernel).await;
        assert_eq!(supervisor.phase(), SessionPhase::Fresh);

        kernel.set_connection_status(ConnectionStatus::Connected);
        wait_for_phase(&supervisor, SessionPhase::Active).await;

        assert_eq!(probes.load(Ordering::SeqCst), 0);
        assert_eq!(ui.resyncs.load(Ordering::SeqCst), 0);
        assert_eq!(ui.reloads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn connect_before_spawn_still_counts_as_first_connect() {
        let kernel = MockKernel::new();
        let probes = Arc::new(AtomicUsize::new(0));
        let probe_count = Arc::clone(&probes);
        kernel.respond_with(move |_, msg| match msg["method"].as_str() {
            Some("app-status") => {
                probe_count.fetch_add(1, Ordering::SeqCst);
                vec![json!({ "method": "finished", "started": false })]
            }
            Some("shutdown") => vec![json!({ "method": "finished" })],
            _ => vec![],
        });
        let manager = Arc::new(
            SessionManager::connect(&kernel, SessionConfig::default(), Some("K1"))
                .await
                .unwrap(),
        );
        // The transport comes up before anyone supervises it.
        kernel.set_connection_status(ConnectionStatus::Connected);
        let ui = RecordingUi::new();
        let supervisor = ReconnectSupervisor::spawn(Arc::clone(&manager), ui.clone());
        assert_eq!(supervisor.phase(), SessionPhase::Active);

        kernel.set_connection_status(ConnectionStatus::Disconnected);
        kernel.set_connection_status(ConnectionStatus::Connected);
        wait_for_phase(&supervisor, SessionPhase::NeedsReload).await;
        wait_until(|| ui.reloads.load(Ordering::SeqCst) == 1).await;

        assert_eq!(probes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn duplicate_connected_does_not_verify() {
        let kernel = MockKernel::new();
        let probes = Arc::new(AtomicUsize::new(0));
        let probe_count = Arc::clone(&probes);
        kernel.respond_with(move |_, msg| {
            if msg["method"] == "app-status" {
                probe_count.fetch_add(1, Ordering::SeqCst);
            }
            vec![]
        });
        let (_manager, _ui, supervisor) = connected_supervisor(&kernel).await;

        kernel.set_connection_status(ConnectionStatus::Connected);
        kernel.set_connection_status(ConnectionStatus::Connected);
        wait_for_phase(&supervisor, SessionPhase::Active).await;
        tokio::task::yield_now().await;

        assert_eq!(probes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn begin_unload_suppresses_verification() {
        let kernel = MockKernel::new();
        let (_manager, ui, supervisor) = connected_supervisor(&kernel).await;

        kernel.set_connection_status(ConnectionStatus::Connected);
        wait_for_phase(&supervisor, SessionPhase::Active).await;

        supervisor.begin_unload();
        kernel.set_connection_status(ConnectionStatus::Disconnected);
        kernel.set_connection_status(ConnectionStatus::Connected);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(supervisor.phase(), SessionPhase::Active);
        assert_eq!(ui.reloads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn reconnect_with_surviving_app_resyncs() {
        let kernel = MockKernel::new();
        kernel.respond_with(|_, msg| match msg["method"].as_str() {
            Some("app-status") => vec![json!({ "method": "finished", "started": true })],
            _ => vec![],
        });
        let (_manager, ui, supervisor) = connected_supervisor(&kernel).await;

        kernel.set_connection_status(ConnectionStatus::Connected);
        wait_for_phase(&supervisor, SessionPhase::Active).await;

        kernel.set_connection_status(ConnectionStatus::Disconnected);
        kernel.set_connection_status(ConnectionStatus::Connected);
        wait_until(|| ui.resyncs.load(Ordering::SeqCst) == 1).await;
        wait_for_phase(&supervisor, SessionPhase::Active).await;

        assert_eq!(ui.reloads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn reconnect_to_lost_state_needs_reload() {
        let kernel = MockKernel::new();
        kernel.respond_with(|_, msg| match msg["method"].as_str() {
            Some("app-status") => vec![json!({ "method": "finished", "started": false })],
            Some("shutdown") => vec![json!({ "method": "finished" })],
            _ => vec![],
        });
        let (_manager, ui, supervisor) = connected_supervisor(&kernel).await;

        kernel.set_connection_status(ConnectionStatus::Connected);
        wait_for_phase(&supervisor, SessionPhase::Active).await;

        kernel.set_connection_status(ConnectionStatus::Disconnected);
        kernel.set_connection_status(ConnectionStatus::Connected);
        wait_for_phase(&supervisor, SessionPhase::NeedsReload).await;
        wait_until(|| ui.reloads.load(Ordering::SeqCst) == 1).await;

        assert_eq!(ui.resyncs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn needs_reload_is_terminal() {
        let kernel = MockKernel::new();
        let probes = Arc::new(AtomicUsize::new(0));
        let probe_count = Arc::clone(&probes);
        kernel.respond_with(move |_, msg| match msg["method"].as_str() {
            Some("app-status") => {
                probe_count.fetch_add(1, Ordering::SeqCst);
                vec![json!({ "method": "finished", "started": false })]
            }
            Some("shutdown") => vec![json!({ "method": "finished" })],
            _ => vec![],
        });
        let (_manager, ui, supervisor) = connected_supervisor(&kernel).await;

        kernel.set_connection_status(ConnectionStatus::Connected);
        wait_for_phase(&supervisor, SessionPhase::Active).await;

        kernel.set_connection_status(ConnectionStatus::Disconnected);
        kernel.set_connection_status(ConnectionStatus::Connected);
        wait_for_phase(&supervisor, SessionPhase::NeedsReload).await;
        wait_until(|| ui.reloads.load(Ordering::SeqCst) == 1).await;

        // Further flapping is ignored: one probe, one reload request.
        kernel.set_connection_status(ConnectionStatus::Disconnected);
        kernel.set_connection_status(ConnectionStatus::Connected);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(supervisor.phase(), SessionPhase::NeedsReload);
        assert_eq!(probes.load(Ordering::SeqCst), 1);
        assert_eq!(ui.reloads.load(Ordering::SeqCst), 1);
    }
}
