//! Session lifecycle: owns the kernel connection and the primary control
//! channel, and speaks the control vocabulary on behalf of the page.

use super::channel::ControlChannel;
use super::pending;
use super::SessionError;
use crate::config::SessionConfig;
use crate::protocol::{
    AppStatus, CheckFinished, ControlRequest, RouteContext, RunFinished,
};
use crate::transport::{ConnectionStatus, KernelConnection, KernelStatus, KernelTransport};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

pub struct SessionManager {
    config: SessionConfig,
    connection: Arc<dyn KernelConnection>,
    control: ControlChannel,
}

impl SessionManager {
    /// Attach to a kernel and open the primary control channel. When no
    /// kernel id is given a fresh one is generated client-side, matching how
    /// a first page load starts a brand-new kernel.
    pub async fn connect(
        transport: &dyn KernelTransport,
        config: SessionConfig,
        kernel_id: Option<&str>,
    ) -> Result<Self, SessionError> {
        let kernel_id = match kernel_id {
            Some(id) => id.to_string(),
            None => Uuid::new_v4().to_string(),
        };
        let connection = transport.connect(&kernel_id).await?;
        let control = ControlChannel::open(connection.as_ref(), &config.control_target).await?;
        tracing::debug!(
            target: "mooring::session",
            kernel_id = %kernel_id,
            client_session_id = %connection.client_session_id(),
            "session connected"
        );
        Ok(Self {
            config,
            connection,
            control,
        })
    }

    pub fn kernel_id(&self) -> &str {
        self.connection.kernel_id()
    }

    pub fn client_session_id(&self) -> &str {
        self.connection.client_session_id()
    }

    pub fn connection(&self) -> &Arc<dyn KernelConnection> {
        &self.connection
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.connection.connection_status()
    }

    pub fn subscribe_connection_status(&self) -> broadcast::Receiver<ConnectionStatus> {
        self.connection.subscribe_connection_status()
    }

    /// Busy/idle transitions, for UI spinners and the like.
    pub fn subscribe_kernel_status(&self) -> broadcast::Receiver<KernelStatus> {
        self.connection.subscribe_kernel_status()
    }

    /// Start the application and return the root widget id. The initial run
    /// may take arbitrarily long, so there is no deadline; any control-channel
    /// failure is fatal to this run and propagated.
    pub async fn run(
        &self,
        app_name: Option<&str>,
        route: RouteContext,
    ) -> Result<String, SessionError> {
        let request = ControlRequest::Run {
            app_name: app_name.map(str::to_string),
            route,
        };
        let reply = pending::round_trip(&self.control, &request, None).await?;
        let finished: RunFinished =
            reply
                .parse_body()
                .map_err(|err| SessionError::InvalidReply {
                    method: "run",
                    detail: err.to_string(),
                })?;
        tracing::info!(
            target: "mooring::session",
            widget_id = %finished.widget_id,
            "app started"
        );
        Ok(finished.widget_id)
    }

    /// Validity probe on the primary channel: does the kernel still hold
    /// widget state for this session?
    pub async fn check(&self) -> Result<bool, SessionError> {
        let reply = pending::round_trip(
            &self.control,
            &ControlRequest::Check,
            Some(self.config.call_timeout),
        )
        .await?;
        let finished: CheckFinished =
            reply
                .parse_body()
                .map_err(|err| SessionError::InvalidReply {
                    method: "check",
                    detail: err.to_string(),
                })?;
        Ok(finished.ok)
    }

    /// Ask whether the app is still started, on a fresh throwaway comm so the
    /// probe can never collide with a handler on the primary channel. Every
    /// failure mode coerces to not-started: the supervisor must fail toward a
    /// reload, never toward a silently broken session.
    pub async fn app_status(&self) -> AppStatus {
        match self.app_status_inner().await {
            Ok(status) => status,
            Err(err) => {
                tracing::warn!(
                    target: "mooring::session",
                    error = %err,
                    "app-status probe failed, treating app as not started"
                );
                AppStatus { started: false }
            }
        }
    }

    async fn app_status_inner(&self) -> Result<AppStatus, SessionError> {
        let probe = ControlChannel::open(self.connection.as_ref(), self.control.target()).await?;
        let result = pending::round_trip(
            &probe,
            &ControlRequest::AppStatus,
            Some(self.config.status_timeout),
        )
        .await;
        probe.close().await;
        let reply = result?;
        reply
            .parse_body()
            .map_err(|err| SessionError::InvalidReply {
                method: "app-status",
                detail: err.to_string(),
            })
    }

    /// Request final kernel teardown (not a restart). Best-effort: a missing
    /// acknowledgement must never block page unload.
    pub async fn shutdown(&self) {
        let request = ControlRequest::Shutdown { restart: false };
        match pending::round_trip(&self.control, &request, Some(self.config.call_timeout)).await {
            Ok(_) => {
                tracing::debug!(target: "mooring::session", "kernel acknowledged shutdown");
            }
            Err(err) => {
                tracing::warn!(
                    target: "mooring::session",
                    error = %err,
                    "kernel shutdown not acknowledged"
                );
            }
        }
    }

    /// Release the kernel connection. Called on page unload.
    pub async fn dispose(&self) {
        self.connection.dispose().await;
    }
}
