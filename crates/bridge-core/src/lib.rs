//! # bridge-core
//!
//! Shared contract between a host process and an out-of-process extension.
//!
//! This crate provides:
//! - Identifier and event types that cross the process boundary
//! - The JSON-RPC wire protocol (requests, responses, method names)
//! - The error taxonomy shared by both sides
//! - The [`ContextService`] and [`CallbackService`] seams, with jsonrpsee
//!   server and client adapters for each
//! - The [`ChannelBroker`] used to open listeners and dial peers
//!
//! ## Handshake
//!
//! ```text
//!   host                                   extension
//!    │  serve context endpoint                 │
//!    │ ── plugin.init(context endpoint) ─────▶ │ dial context, serve callbacks,
//!    │ ◀── context.register_handler ────────── │ run plugin init
//!    │     (queued: no reverse link yet)       │
//!    │ ◀──────── init response (callback ep) ─ │
//!    │  dial callbacks, flush queued           │
//!    │ ── callback.dispatch_event ───────────▶ │
//! ```

pub mod broker;
pub mod error;
pub mod protocol;
pub mod rpc;
pub mod service;
pub mod timeouts;
pub mod types;

pub use broker::{ChannelBroker, ServedEndpoint, TcpBroker};
pub use error::{BridgeError, BridgeResult};
pub use protocol::{
    ApiVersion, CancelMessageRequest, DispatchResponse, EventEnvelope, HandlerFilter, InitRequest,
    InitResponse, LogLevel, LogRequest, QueryKind, RegisterHandlerRequest,
    RegisterHandlerResponse, SayToRequest, TriggerBroadcastRequest, WaitForInputRequest,
    WaitForPacketRequest, WaitResponse, PROTOCOL_VERSION,
};
pub use service::{CallbackService, ContextService};
pub use timeouts::{with_timeout, BridgeTimeouts};
pub use types::{
    BotInfo, Broadcast, CallbackId, ChatEvent, CommandSpec, DispatchMode, FrameExitEvent,
    HandlerKind, InterworkInfo, PacketEvent, PlayerEvent, PlayerSnapshot, PluginInfo, Priority,
    QqInfo, ServerInfo,
};
