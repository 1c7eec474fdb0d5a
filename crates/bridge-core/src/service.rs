//! Seams between the bridge adapters and whatever carries their calls.
//!
//! The remote context facade talks to a [`ContextService`]; the host event
//! adapter talks to a [`CallbackService`]. In production both are backed by
//! jsonrpsee clients (see [`crate::rpc`]); in tests they can be wired directly
//! to the in-process implementation on the other side.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::BridgeResult;
use crate::protocol::{
    CancelMessageRequest, DispatchResponse, EventEnvelope, LogRequest, QueryKind,
    RegisterHandlerRequest, RegisterHandlerResponse, SayToRequest, TriggerBroadcastRequest,
    WaitForInputRequest, WaitForPacketRequest, WaitResponse,
};
use crate::types::PacketEvent;

/// Host capabilities an extension programs against.
#[async_trait]
pub trait ContextService: Send + Sync {
    async fn log(&self, request: LogRequest) -> BridgeResult<()>;

    async fn query(&self, kind: QueryKind) -> BridgeResult<Value>;

    async fn register_handler(
        &self,
        request: RegisterHandlerRequest,
    ) -> BridgeResult<RegisterHandlerResponse>;

    async fn cancel_message(&self, request: CancelMessageRequest) -> BridgeResult<()>;

    async fn wait_for_input(&self, request: WaitForInputRequest)
        -> BridgeResult<WaitResponse<String>>;

    async fn wait_for_packet(
        &self,
        request: WaitForPacketRequest,
    ) -> BridgeResult<WaitResponse<PacketEvent>>;

    /// Results come back in the order the host ran its listeners.
    async fn trigger_broadcast(&self, request: TriggerBroadcastRequest)
        -> BridgeResult<Vec<Value>>;

    async fn say_to(&self, request: SayToRequest) -> BridgeResult<()>;
}

/// Delivers one event occurrence to one extension handler.
#[async_trait]
pub trait CallbackService: Send + Sync {
    async fn dispatch(&self, envelope: EventEnvelope) -> BridgeResult<DispatchResponse>;
}
