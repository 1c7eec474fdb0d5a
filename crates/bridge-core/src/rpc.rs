//! jsonrpsee bindings for the three bridge channels.
//!
//! Each channel has a `#[rpc(server)]` trait, a server wrapper that forwards to
//! the matching service trait, and a hand-written client adapter. Errors cross
//! the wire as custom JSON-RPC codes and are rebuilt into [`BridgeError`] on the
//! calling side, so a `HandlerNotFound` raised in one process is still a
//! `HandlerNotFound` in the other.

use async_trait::async_trait;
use jsonrpsee::core::client::{ClientT, Error as ClientError};
use jsonrpsee::core::RpcResult;
use jsonrpsee::http_client::HttpClient;
use jsonrpsee::proc_macros::rpc;
use jsonrpsee::rpc_params;
use jsonrpsee::types::error::{INVALID_PARAMS_CODE, METHOD_NOT_FOUND_CODE};
use jsonrpsee::types::ErrorObjectOwned;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::error::{BridgeError, BridgeResult};
use crate::protocol::{
    error_codes, methods, CancelMessageRequest, DispatchResponse, EventEnvelope, InitRequest,
    InitResponse, LogRequest, QueryKind, RegisterHandlerRequest, RegisterHandlerResponse,
    SayToRequest, TriggerBroadcastRequest, WaitForInputRequest, WaitForPacketRequest,
    WaitResponse,
};
use crate::service::{CallbackService, ContextService};
use crate::types::{CallbackId, PacketEvent, PluginInfo};

// ============================================================================
// Server traits
// ============================================================================

/// Lifecycle surface served by an extension process.
#[rpc(server)]
pub trait PluginApi {
    /// Bootstrap the bridge. Returns where the extension's callbacks live.
    #[method(name = "plugin.init")]
    async fn init(&self, request: InitRequest) -> RpcResult<InitResponse>;

    #[method(name = "plugin.start")]
    async fn start(&self) -> RpcResult<()>;

    #[method(name = "plugin.stop")]
    async fn stop(&self) -> RpcResult<()>;

    #[method(name = "plugin.info")]
    async fn info(&self) -> RpcResult<PluginInfo>;
}

/// Host capabilities served by the host process.
#[rpc(server)]
pub trait ContextApi {
    #[method(name = "context.log")]
    async fn log(&self, request: LogRequest) -> RpcResult<()>;

    #[method(name = "context.query")]
    async fn query(&self, kind: QueryKind) -> RpcResult<Value>;

    #[method(name = "context.register_handler")]
    async fn register_handler(
        &self,
        request: RegisterHandlerRequest,
    ) -> RpcResult<RegisterHandlerResponse>;

    #[method(name = "context.cancel_message")]
    async fn cancel_message(&self, request: CancelMessageRequest) -> RpcResult<()>;

    #[method(name = "context.wait_for_input")]
    async fn wait_for_input(&self, request: WaitForInputRequest)
        -> RpcResult<WaitResponse<String>>;

    #[method(name = "context.wait_for_packet")]
    async fn wait_for_packet(
        &self,
        request: WaitForPacketRequest,
    ) -> RpcResult<WaitResponse<PacketEvent>>;

    #[method(name = "context.trigger_broadcast")]
    async fn trigger_broadcast(&self, request: TriggerBroadcastRequest) -> RpcResult<Vec<Value>>;

    #[method(name = "context.say_to")]
    async fn say_to(&self, request: SayToRequest) -> RpcResult<()>;
}

/// Callback dispatch served by an extension process.
#[rpc(server)]
pub trait CallbackApi {
    #[method(name = "callback.dispatch_event")]
    async fn dispatch_event(&self, envelope: EventEnvelope) -> RpcResult<DispatchResponse>;
}

// ============================================================================
// Error mapping
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct MissingHandler {
    kind: String,
    callback_id: CallbackId,
}

/// Encode a bridge error as a JSON-RPC error object.
pub fn to_rpc_error(err: BridgeError) -> ErrorObjectOwned {
    let (code, message) = match &err {
        BridgeError::Transport(msg) => (error_codes::TRANSPORT, msg.clone()),
        BridgeError::Timeout(msg) => (error_codes::TIMEOUT, msg.clone()),
        BridgeError::HandlerNotFound { kind, id } => {
            return ErrorObjectOwned::owned(
                error_codes::HANDLER_NOT_FOUND,
                err.to_string(),
                Some(MissingHandler {
                    kind: kind.clone(),
                    callback_id: *id,
                }),
            );
        }
        BridgeError::Serialization(msg) => (error_codes::SERIALIZATION, msg.clone()),
        BridgeError::Registration(msg) => (error_codes::REGISTRATION, msg.clone()),
        BridgeError::Handshake(msg) => (error_codes::HANDSHAKE, msg.clone()),
        BridgeError::LinkAlreadyEstablished => {
            (error_codes::LINK_ALREADY_ESTABLISHED, err.to_string())
        }
        BridgeError::Handler(msg) => (error_codes::HANDLER, msg.clone()),
        BridgeError::Remote(msg) => (error_codes::REMOTE, msg.clone()),
    };
    ErrorObjectOwned::owned(code, message, None::<()>)
}

/// Rebuild a bridge error from a JSON-RPC error object.
pub fn from_error_object(obj: &ErrorObjectOwned) -> BridgeError {
    let message = obj.message().to_string();
    match obj.code() {
        error_codes::TRANSPORT => BridgeError::Transport(message),
        error_codes::TIMEOUT => BridgeError::Timeout(message),
        error_codes::HANDLER_NOT_FOUND => obj
            .data()
            .and_then(|raw| serde_json::from_str::<MissingHandler>(raw.get()).ok())
            .map(|missing| BridgeError::HandlerNotFound {
                kind: missing.kind,
                id: missing.callback_id,
            })
            .unwrap_or(BridgeError::Remote(message)),
        error_codes::SERIALIZATION | INVALID_PARAMS_CODE => BridgeError::Serialization(message),
        error_codes::REGISTRATION => BridgeError::Registration(message),
        error_codes::HANDSHAKE => BridgeError::Handshake(message),
        error_codes::LINK_ALREADY_ESTABLISHED => BridgeError::LinkAlreadyEstablished,
        error_codes::HANDLER => BridgeError::Handler(message),
        METHOD_NOT_FOUND_CODE => BridgeError::Transport(format!("peer does not serve: {}", message)),
        _ => BridgeError::Remote(message),
    }
}

/// Map a client-side failure of `method` into the bridge taxonomy.
pub fn from_client_error(method: &str, err: ClientError) -> BridgeError {
    match err {
        ClientError::Call(obj) => from_error_object(&obj),
        ClientError::RequestTimeout => {
            BridgeError::Timeout(format!("{} request timed out", method))
        }
        ClientError::ParseError(e) => BridgeError::Serialization(e.to_string()),
        other => BridgeError::Transport(format!("{}: {}", method, other)),
    }
}

async fn call<T: DeserializeOwned>(
    client: &HttpClient,
    method: &str,
    params: jsonrpsee::core::params::ArrayParams,
) -> BridgeResult<T> {
    client
        .request(method, params)
        .await
        .map_err(|e| from_client_error(method, e))
}

// ============================================================================
// Server wrappers
// ============================================================================

/// Serves a [`ContextService`] over JSON-RPC.
pub struct ContextRpc {
    inner: Arc<dyn ContextService>,
}

impl ContextRpc {
    pub fn new(inner: Arc<dyn ContextService>) -> Self {
        Self { inner }
    }
}

#[jsonrpsee::core::async_trait]
impl ContextApiServer for ContextRpc {
    async fn log(&self, request: LogRequest) -> RpcResult<()> {
        self.inner.log(request).await.map_err(to_rpc_error)
    }

    async fn query(&self, kind: QueryKind) -> RpcResult<Value> {
        self.inner.query(kind).await.map_err(to_rpc_error)
    }

    async fn register_handler(
        &self,
        request: RegisterHandlerRequest,
    ) -> RpcResult<RegisterHandlerResponse> {
        self.inner
            .register_handler(request)
            .await
            .map_err(to_rpc_error)
    }

    async fn cancel_message(&self, request: CancelMessageRequest) -> RpcResult<()> {
        self.inner.cancel_message(request).await.map_err(to_rpc_error)
    }

    async fn wait_for_input(
        &self,
        request: WaitForInputRequest,
    ) -> RpcResult<WaitResponse<String>> {
        self.inner.wait_for_input(request).await.map_err(to_rpc_error)
    }

    async fn wait_for_packet(
        &self,
        request: WaitForPacketRequest,
    ) -> RpcResult<WaitResponse<PacketEvent>> {
        self.inner
            .wait_for_packet(request)
            .await
            .map_err(to_rpc_error)
    }

    async fn trigger_broadcast(&self, request: TriggerBroadcastRequest) -> RpcResult<Vec<Value>> {
        self.inner
            .trigger_broadcast(request)
            .await
            .map_err(to_rpc_error)
    }

    async fn say_to(&self, request: SayToRequest) -> RpcResult<()> {
        self.inner.say_to(request).await.map_err(to_rpc_error)
    }
}

/// Serves a [`CallbackService`] over JSON-RPC.
pub struct CallbackRpc {
    inner: Arc<dyn CallbackService>,
}

impl CallbackRpc {
    pub fn new(inner: Arc<dyn CallbackService>) -> Self {
        Self { inner }
    }
}

#[jsonrpsee::core::async_trait]
impl CallbackApiServer for CallbackRpc {
    async fn dispatch_event(&self, envelope: EventEnvelope) -> RpcResult<DispatchResponse> {
        self.inner.dispatch(envelope).await.map_err(to_rpc_error)
    }
}

// ============================================================================
// Client adapters
// ============================================================================

/// The host's context service, seen from the extension.
#[derive(Clone)]
pub struct RemoteContextService {
    client: HttpClient,
}

impl RemoteContextService {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ContextService for RemoteContextService {
    async fn log(&self, request: LogRequest) -> BridgeResult<()> {
        call(&self.client, methods::CONTEXT_LOG, rpc_params![request]).await
    }

    async fn query(&self, kind: QueryKind) -> BridgeResult<Value> {
        call(&self.client, methods::CONTEXT_QUERY, rpc_params![kind]).await
    }

    async fn register_handler(
        &self,
        request: RegisterHandlerRequest,
    ) -> BridgeResult<RegisterHandlerResponse> {
        call(
            &self.client,
            methods::CONTEXT_REGISTER_HANDLER,
            rpc_params![request],
        )
        .await
    }

    async fn cancel_message(&self, request: CancelMessageRequest) -> BridgeResult<()> {
        call(
            &self.client,
            methods::CONTEXT_CANCEL_MESSAGE,
            rpc_params![request],
        )
        .await
    }

    async fn wait_for_input(
        &self,
        request: WaitForInputRequest,
    ) -> BridgeResult<WaitResponse<String>> {
        call(
            &self.client,
            methods::CONTEXT_WAIT_FOR_INPUT,
            rpc_params![request],
        )
        .await
    }

    async fn wait_for_packet(
        &self,
        request: WaitForPacketRequest,
    ) -> BridgeResult<WaitResponse<PacketEvent>> {
        call(
            &self.client,
            methods::CONTEXT_WAIT_FOR_PACKET,
            rpc_params![request],
        )
        .await
    }

    async fn trigger_broadcast(
        &self,
        request: TriggerBroadcastRequest,
    ) -> BridgeResult<Vec<Value>> {
        call(
            &self.client,
            methods::CONTEXT_TRIGGER_BROADCAST,
            rpc_params![request],
        )
        .await
    }

    async fn say_to(&self, request: SayToRequest) -> BridgeResult<()> {
        call(&self.client, methods::CONTEXT_SAY_TO, rpc_params![request]).await
    }
}

/// The extension's callback registry, seen from the host.
#[derive(Clone)]
pub struct RemoteCallbackService {
    client: HttpClient,
}

impl RemoteCallbackService {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CallbackService for RemoteCallbackService {
    async fn dispatch(&self, envelope: EventEnvelope) -> BridgeResult<DispatchResponse> {
        call(
            &self.client,
            methods::CALLBACK_DISPATCH_EVENT,
            rpc_params![envelope],
        )
        .await
    }
}

/// An extension's lifecycle surface, seen from the host.
#[derive(Clone)]
pub struct RemotePlugin {
    client: HttpClient,
}

impl RemotePlugin {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }

    pub async fn init(&self, request: InitRequest) -> BridgeResult<InitResponse> {
        call(&self.client, methods::PLUGIN_INIT, rpc_params![request]).await
    }

    pub async fn start(&self) -> BridgeResult<()> {
        call(&self.client, methods::PLUGIN_START, rpc_params![]).await
    }

    pub async fn stop(&self) -> BridgeResult<()> {
        call(&self.client, methods::PLUGIN_STOP, rpc_params![]).await
    }

    pub async fn info(&self) -> BridgeResult<PluginInfo> {
        call(&self.client, methods::PLUGIN_INFO, rpc_params![]).await
    }
}
