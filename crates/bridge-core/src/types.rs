//! Value types mirrored across the process boundary.
//!
//! Everything here is plain data: copied by value on every call, never
//! referenced across processes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;

// ============================================================================
// Identifiers
// ============================================================================

/// Handle naming one registered handler within one extension process.
///
/// Allocated by the extension only, starting at 1, and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallbackId(pub u64);

impl fmt::Display for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Ordering weight of a registration. Larger values run earlier.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Priority(pub i32);

impl Priority {
    pub const DEFAULT: Priority = Priority(0);
}

impl From<i32> for Priority {
    fn from(value: i32) -> Self {
        Priority(value)
    }
}

// ============================================================================
// Handler kinds
// ============================================================================

/// Whether a dispatch expects a meaningful answer from the extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Fire-and-forget; the response is a bare acknowledgment.
    Notify,
    /// The handler's result flows back and is applied to the host event.
    RequestResponse,
}

/// Category of host event a handler subscribes to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HandlerKind {
    PreLoad,
    Active,
    PlayerJoin,
    PlayerLeave,
    Chat,
    FrameExit,
    Packet,
    PacketAny,
    Broadcast { name: String },
    ConsoleCommand,
}

impl HandlerKind {
    pub fn broadcast(name: impl Into<String>) -> Self {
        HandlerKind::Broadcast { name: name.into() }
    }

    pub fn mode(&self) -> DispatchMode {
        match self {
            HandlerKind::Chat | HandlerKind::Broadcast { .. } | HandlerKind::ConsoleCommand => {
                DispatchMode::RequestResponse
            }
            _ => DispatchMode::Notify,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            HandlerKind::PreLoad => "pre_load",
            HandlerKind::Active => "active",
            HandlerKind::PlayerJoin => "player_join",
            HandlerKind::PlayerLeave => "player_leave",
            HandlerKind::Chat => "chat",
            HandlerKind::FrameExit => "frame_exit",
            HandlerKind::Packet => "packet",
            HandlerKind::PacketAny => "packet_any",
            HandlerKind::Broadcast { .. } => "broadcast",
            HandlerKind::ConsoleCommand => "console_command",
        }
    }
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerKind::Broadcast { name } => write!(f, "broadcast({})", name),
            other => f.write_str(other.label()),
        }
    }
}

// ============================================================================
// Event payloads
// ============================================================================

/// A chat line. Setting `cancelled` suppresses it on the host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatEvent {
    pub sender: String,
    pub message: String,
    #[serde(default)]
    pub cancelled: bool,
}

impl ChatEvent {
    pub fn new(sender: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            message: message.into(),
            cancelled: false,
        }
    }

    pub fn cancel(&mut self) {
        self.cancelled = true;
    }
}

/// A player joining or leaving.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerEvent {
    pub player: PlayerSnapshot,
}

/// A game packet with its numeric type id and decoded body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PacketEvent {
    pub id: u32,
    #[serde(default)]
    pub raw: Value,
}

/// The host framework is shutting down.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameExitEvent {
    #[serde(default)]
    pub signal: String,
    #[serde(default)]
    pub reason: String,
}

/// A named key/value message fanned out to every listener of that name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Broadcast {
    pub name: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl Broadcast {
    pub fn new(name: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

/// Console command metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandSpec {
    pub name: String,
    pub triggers: Vec<String>,
    pub argument_hint: String,
    pub usage: String,
    pub description: String,
}

impl CommandSpec {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            triggers: vec![name.clone()],
            name,
            ..Default::default()
        }
    }

    pub fn with_triggers<I, S>(mut self, triggers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.triggers = triggers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_usage(mut self, usage: impl Into<String>) -> Self {
        self.usage = usage.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

// ============================================================================
// Snapshots
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotInfo {
    pub name: String,
    pub xuid: String,
    pub entity_unique_id: i64,
    pub entity_runtime_id: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerInfo {
    pub code: String,
    pub passcode_set: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QqInfo {
    pub adapter: String,
    pub ws_url: String,
    pub has_access_token: bool,
}

/// Chat groups linked to the server, keyed by display name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterworkInfo {
    pub linked_groups: HashMap<String, i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerSnapshot {
    pub name: String,
    pub uuid: String,
    pub xuid: String,
    pub entity_unique_id: i64,
    pub entity_runtime_id: u64,
    pub online: bool,
}

impl PlayerSnapshot {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            online: true,
            ..Default::default()
        }
    }
}

/// Descriptive metadata an extension reports about itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginInfo {
    pub name: String,
    pub display_name: String,
    pub version: String,
    pub description: String,
    pub author: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dispatch_modes() {
        assert_eq!(HandlerKind::Chat.mode(), DispatchMode::RequestResponse);
        assert_eq!(
            HandlerKind::broadcast("shop").mode(),
            DispatchMode::RequestResponse
        );
        assert_eq!(
            HandlerKind::ConsoleCommand.mode(),
            DispatchMode::RequestResponse
        );
        assert_eq!(HandlerKind::Packet.mode(), DispatchMode::Notify);
        assert_eq!(HandlerKind::PreLoad.mode(), DispatchMode::Notify);
        assert_eq!(HandlerKind::FrameExit.mode(), DispatchMode::Notify);
    }

    #[test]
    fn test_handler_kind_wire_shape() {
        let value = serde_json::to_value(HandlerKind::broadcast("shop.buy")).unwrap();
        assert_eq!(value, json!({"type": "broadcast", "name": "shop.buy"}));

        let value = serde_json::to_value(HandlerKind::PreLoad).unwrap();
        assert_eq!(value, json!({"type": "pre_load"}));

        let kind: HandlerKind = serde_json::from_value(json!({"type": "packet_any"})).unwrap();
        assert_eq!(kind, HandlerKind::PacketAny);
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let result = serde_json::from_value::<HandlerKind>(json!({"type": "teleport"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority(10) > Priority(5));
        assert_eq!(Priority::default(), Priority::DEFAULT);
    }

    #[test]
    fn test_chat_event_defaults_not_cancelled() {
        let event: ChatEvent =
            serde_json::from_value(json!({"sender": "Alice", "message": "hi"})).unwrap();
        assert!(!event.cancelled);
    }

    #[test]
    fn test_command_spec_defaults_trigger_to_name() {
        let spec = CommandSpec::new("info").with_usage("show status");
        assert_eq!(spec.triggers, vec!["info".to_string()]);
        assert_eq!(spec.usage, "show status");
    }
}
