use std::env;
use std::time::Duration;

/// How long `app-status` probes wait before the kernel is considered
/// unreachable.
pub const DEFAULT_STATUS_TIMEOUT: Duration = Duration::from_millis(500);

/// Bound on acknowledged calls that should never take long (check, shutdown).
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Comm target name for the control channel. One well-known target per
    /// session; concurrent sessions use distinct kernel ids, not targets.
    pub control_target: String,
    /// Deadline for the disposable `app-status` probe.
    pub status_timeout: Duration,
    /// Deadline for bounded calls on the primary channel.
    pub call_timeout: Duration,
}

impl SessionConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let control_target = env::var("MOORING_CONTROL_TARGET")
            .unwrap_or_else(|_| "mooring.control".to_string());
        let status_timeout = env_millis("MOORING_STATUS_TIMEOUT_MS", DEFAULT_STATUS_TIMEOUT);
        let call_timeout = env_millis("MOORING_CALL_TIMEOUT_MS", DEFAULT_CALL_TIMEOUT);
        Self {
            control_target,
            status_timeout,
            call_timeout,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            control_target: "mooring.control".to_string(),
            status_timeout: DEFAULT_STATUS_TIMEOUT,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

fn env_millis(var: &str, default: Duration) -> Duration {
    env::var(var)
        .ok()
        .and_then(|raw| raw.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}
