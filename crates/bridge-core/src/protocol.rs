//! JSON-RPC 2.0 protocol types for host/extension communication.
//!
//! Payloads are `serde_json::Value`: self-describing, so neither side needs the
//! other's type definitions beyond what is declared here.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::fmt;

use crate::error::BridgeResult;
use crate::types::{CallbackId, CommandSpec, HandlerKind, Priority};

/// Protocol revision spoken by this build.
pub const PROTOCOL_VERSION: ApiVersion = ApiVersion::new(1, 0, 0);

/// Method names, grouped by the side that serves them.
pub mod methods {
    /// Served by the extension.
    pub const PLUGIN_INIT: &str = "plugin.init";
    pub const PLUGIN_START: &str = "plugin.start";
    pub const PLUGIN_STOP: &str = "plugin.stop";
    pub const PLUGIN_INFO: &str = "plugin.info";

    /// Served by the host.
    pub const CONTEXT_LOG: &str = "context.log";
    pub const CONTEXT_QUERY: &str = "context.query";
    pub const CONTEXT_REGISTER_HANDLER: &str = "context.register_handler";
    pub const CONTEXT_CANCEL_MESSAGE: &str = "context.cancel_message";
    pub const CONTEXT_WAIT_FOR_INPUT: &str = "context.wait_for_input";
    pub const CONTEXT_WAIT_FOR_PACKET: &str = "context.wait_for_packet";
    pub const CONTEXT_TRIGGER_BROADCAST: &str = "context.trigger_broadcast";
    pub const CONTEXT_SAY_TO: &str = "context.say_to";

    /// Served by the extension once its callback endpoint is up.
    pub const CALLBACK_DISPATCH_EVENT: &str = "callback.dispatch_event";
}

/// Custom JSON-RPC error codes (server-defined range -32000 to -32099).
pub mod error_codes {
    pub const TRANSPORT: i32 = -32010;
    pub const TIMEOUT: i32 = -32011;
    pub const HANDLER_NOT_FOUND: i32 = -32012;
    pub const SERIALIZATION: i32 = -32013;
    pub const REGISTRATION: i32 = -32014;
    pub const HANDSHAKE: i32 = -32015;
    pub const LINK_ALREADY_ESTABLISHED: i32 = -32016;
    pub const HANDLER: i32 = -32017;
    pub const REMOTE: i32 = -32018;
}

// ============================================================================
// Versioning
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApiVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ApiVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Versions sharing a major number speak the same wire protocol.
    pub fn is_compatible(&self, other: &ApiVersion) -> bool {
        self.major == other.major
    }
}

impl PartialOrd for ApiVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ApiVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch).cmp(&(other.major, other.minor, other.patch))
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

// ============================================================================
// Handshake
// ============================================================================

/// Sent by the host to bootstrap the extension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitRequest {
    /// Where the extension can reach the host's context service.
    pub context_endpoint: String,
    pub host_version: ApiVersion,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitResponse {
    pub success: bool,
    /// Where the host can reach the extension's callback registry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl InitResponse {
    pub fn ready(callback_endpoint: impl Into<String>) -> Self {
        Self {
            success: true,
            callback_endpoint: Some(callback_endpoint.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            callback_endpoint: None,
            error: Some(error.into()),
        }
    }
}

// ============================================================================
// Registration
// ============================================================================

/// Kind-specific narrowing of a registration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HandlerFilter {
    #[default]
    None,
    /// Only packets with these type ids.
    Packets { ids: Vec<u32> },
    /// Console command metadata.
    Command(CommandSpec),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterHandlerRequest {
    pub kind: HandlerKind,
    pub callback_id: CallbackId,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub filter: HandlerFilter,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterHandlerResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RegisterHandlerResponse {
    pub fn accepted() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

// ============================================================================
// Dispatch
// ============================================================================

/// One event occurrence addressed to one extension handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub kind: HandlerKind,
    pub callback_id: CallbackId,
    #[serde(default)]
    pub payload: Value,
}

impl EventEnvelope {
    pub fn new<T: Serialize>(
        kind: HandlerKind,
        callback_id: CallbackId,
        payload: &T,
    ) -> BridgeResult<Self> {
        Ok(Self {
            kind,
            callback_id,
            payload: serde_json::to_value(payload)?,
        })
    }

    pub fn decode<T: DeserializeOwned>(&self) -> BridgeResult<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DispatchResponse {
    pub fn ack() -> Self {
        Self {
            success: true,
            payload: None,
            error: None,
        }
    }

    pub fn with_payload(payload: Value) -> Self {
        Self {
            success: true,
            payload: Some(payload),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            payload: None,
            error: Some(error.into()),
        }
    }

    /// Decode the payload of a successful response.
    pub fn decode<T: DeserializeOwned>(&self) -> BridgeResult<Option<T>> {
        match (&self.success, &self.payload) {
            (true, Some(payload)) => Ok(Some(serde_json::from_value(payload.clone())?)),
            _ => Ok(None),
        }
    }
}

// ============================================================================
// Host capabilities
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Success,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRequest {
    pub level: LogLevel,
    pub message: String,
}

/// Read-only host state an extension can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    PluginName,
    BotInfo,
    ServerInfo,
    QqInfo,
    InterworkInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelMessageRequest {
    pub sender: String,
    pub message: String,
}

/// Block until `player` says something. The budget is a duration, never a
/// wall-clock deadline, so the two processes need not agree on time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitForInputRequest {
    pub player: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitForPacketRequest {
    pub packet_id: u32,
    pub timeout_ms: u64,
}

/// Outcome of a blocking wait on the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub timed_out: bool,
}

impl<T> WaitResponse<T> {
    pub fn received(value: T) -> Self {
        Self {
            success: true,
            value: Some(value),
            error: None,
            timed_out: false,
        }
    }

    pub fn timed_out(error: impl Into<String>) -> Self {
        Self {
            success: false,
            value: None,
            error: Some(error.into()),
            timed_out: true,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            value: None,
            error: Some(error.into()),
            timed_out: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerBroadcastRequest {
    pub name: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SayToRequest {
    pub player: String,
    pub message: String,
}
