//! The extension's lifecycle endpoint and the handshake behind `plugin.init`.

use bridge_core::rpc::{
    to_rpc_error, CallbackApiServer, CallbackRpc, PluginApiServer, RemoteContextService,
};
use bridge_core::{
    BridgeError, BridgeResult, BridgeTimeouts, ChannelBroker, InitRequest, InitResponse,
    PluginInfo, ServedEndpoint, PROTOCOL_VERSION,
};
use jsonrpsee::core::RpcResult;
use jsonrpsee::Methods;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info};

use crate::context::RemoteContext;
use crate::ids::CallbackIdAllocator;
use crate::plugin::Plugin;
use crate::registry::CallbackRegistry;

struct Session {
    context: Arc<RemoteContext>,
    callbacks: ServedEndpoint,
}

/// Serves `plugin.init/start/stop/info` for one [`Plugin`].
pub struct PluginServer {
    plugin: Arc<dyn Plugin>,
    broker: Arc<dyn ChannelBroker>,
    timeouts: BridgeTimeouts,
    /// Shared by every session so ids stay unique across re-initialization.
    ids: Arc<CallbackIdAllocator>,
    initialized: AtomicBool,
    session: RwLock<Option<Session>>,
}

impl PluginServer {
    pub fn new(plugin: Arc<dyn Plugin>, broker: Arc<dyn ChannelBroker>) -> Self {
        Self {
            plugin,
            broker,
            timeouts: BridgeTimeouts::default(),
            ids: Arc::new(CallbackIdAllocator::new()),
            initialized: AtomicBool::new(false),
            session: RwLock::new(None),
        }
    }

    pub fn with_timeouts(mut self, timeouts: BridgeTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn into_methods(self) -> Methods {
        self.into_rpc().into()
    }

    /// Serve on an address chosen by the broker.
    pub async fn serve(self) -> BridgeResult<ServedEndpoint> {
        let broker = Arc::clone(&self.broker);
        broker.serve(self.into_methods()).await
    }

    /// Dial the host, open the callback endpoint, run the plugin's `init`.
    async fn bootstrap(&self, request: InitRequest) -> BridgeResult<String> {
        if !PROTOCOL_VERSION.is_compatible(&request.host_version) {
            return Err(BridgeError::Handshake(format!(
                "host speaks protocol {}, extension speaks {}",
                request.host_version, PROTOCOL_VERSION
            )));
        }

        let host = RemoteContextService::new(self.broker.dial(&request.context_endpoint)?);
        let registry = Arc::new(CallbackRegistry::new());
        let callbacks = self
            .broker
            .serve(CallbackRpc::new(registry.clone()).into_rpc().into())
            .await?;

        let info = self.plugin.info();
        let context = Arc::new(RemoteContext::new(
            info.name.clone(),
            Arc::new(host),
            registry,
            Arc::clone(&self.ids),
            self.timeouts,
        ));

        if let Err(e) = self.plugin.init(Arc::clone(&context)).await {
            callbacks.stop();
            return Err(BridgeError::Handshake(format!(
                "{} failed to initialize: {:#}",
                info.name, e
            )));
        }

        let location = callbacks.location.clone();
        *self.session.write().await = Some(Session { context, callbacks });
        Ok(location)
    }

    async fn require_session(&self) -> RpcResult<()> {
        if self.session.read().await.is_some() {
            Ok(())
        } else {
            Err(to_rpc_error(BridgeError::Handshake(
                "plugin.init has not completed".to_string(),
            )))
        }
    }
}

#[jsonrpsee::core::async_trait]
impl PluginApiServer for PluginServer {
    async fn init(&self, request: InitRequest) -> RpcResult<InitResponse> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Ok(InitResponse::failed("extension is already initialized"));
        }

        info!(
            "Host {} at {} requested init",
            request.host_version, request.context_endpoint
        );

        match self.bootstrap(request).await {
            Ok(location) => {
                info!("Callback endpoint ready at {}", location);
                Ok(InitResponse::ready(location))
            }
            Err(e) => {
                error!("Handshake failed: {}", e);
                self.initialized.store(false, Ordering::SeqCst);
                Ok(InitResponse::failed(e.to_string()))
            }
        }
    }

    async fn start(&self) -> RpcResult<()> {
        self.require_session().await?;
        self.plugin
            .start()
            .await
            .map_err(|e| to_rpc_error(BridgeError::Handler(format!("{:#}", e))))
    }

    async fn stop(&self) -> RpcResult<()> {
        let result = self
            .plugin
            .stop()
            .await
            .map_err(|e| to_rpc_error(BridgeError::Handler(format!("{:#}", e))));

        if let Some(session) = self.session.write().await.take() {
            let handlers = session.context.registry().len().await;
            info!("Stopping; {} handlers were registered", handlers);
            session.callbacks.stop();
        }
        self.initialized.store(false, Ordering::SeqCst);
        result
    }

    async fn info(&self) -> RpcResult<PluginInfo> {
        Ok(self.plugin.info())
    }
}
