//! Control-channel wire envelopes.
//!
//! Outbound requests are tagged with a `method` field; inbound replies carry
//! `method: "finished"` on success or any other method name plus an `error`
//! field on failure. These shapes must stay identical across client
//! implementations, so everything here is plain tagged serde.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Reply method name signalling a successful round trip.
pub const METHOD_FINISHED: &str = "finished";

/// Reserved method name for the channel-level liveness probe.
pub const METHOD_RELOAD: &str = "reload";

/// Requests the client sends on a control channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "kebab-case")]
pub enum ControlRequest {
    /// Start the named application and return the root widget id.
    Run {
        #[serde(rename = "appName")]
        app_name: Option<String>,
        #[serde(flatten)]
        route: RouteContext,
    },
    /// Ask whether the kernel still has a started application for this session.
    AppStatus,
    /// Validity probe on the primary channel.
    Check,
    /// Echo of the channel-level liveness probe.
    Reload,
    /// Final kernel teardown. `restart: false` means shut down for good.
    Shutdown { restart: bool },
}

impl ControlRequest {
    pub fn method_name(&self) -> &'static str {
        match self {
            ControlRequest::Run { .. } => "run",
            ControlRequest::AppStatus => "app-status",
            ControlRequest::Check => "check",
            ControlRequest::Reload => METHOD_RELOAD,
            ControlRequest::Shutdown { .. } => "shutdown",
        }
    }
}

/// Routing context sent along with `run`: where the browser currently is and
/// how it wants the app themed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteContext {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dark: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub themes: Option<Value>,
}

impl RouteContext {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            dark: None,
            themes: None,
        }
    }
}

/// An inbound control-channel message, split into its method tag and the rest
/// of the payload. Error replies keep their details in `error`; success
/// replies carry their result fields in `body`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyEnvelope {
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl ReplyEnvelope {
    pub fn is_finished(&self) -> bool {
        self.method == METHOD_FINISHED
    }

    pub fn error_detail(&self) -> String {
        match &self.error {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => format!("unexpected reply method '{}'", self.method),
        }
    }

    /// Deserialize the result fields of a `finished` reply.
    pub fn parse_body<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.body.clone()))
    }
}

/// Result fields of a `finished` reply to `run`.
#[derive(Debug, Clone, Deserialize)]
pub struct RunFinished {
    pub widget_id: String,
}

/// Result fields of a `finished` reply to `app-status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppStatus {
    pub started: bool,
}

/// Result fields of a `finished` reply to `check`.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckFinished {
    pub ok: bool,
}
