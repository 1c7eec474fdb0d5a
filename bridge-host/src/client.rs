//! Drives one extension through its lifecycle.

use bridge_core::rpc::{ContextApiServer, ContextRpc, RemoteCallbackService, RemotePlugin};
use bridge_core::{
    with_timeout, BridgeError, BridgeResult, BridgeTimeouts, ChannelBroker, InitRequest,
    PluginInfo, ServedEndpoint, PROTOCOL_VERSION,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::adapter::HostEventAdapter;
use crate::deferred::FlushReport;

/// Connection to an extension's `plugin.*` endpoint.
pub struct PluginClient {
    location: String,
    remote: RemotePlugin,
    broker: Arc<dyn ChannelBroker>,
    timeouts: BridgeTimeouts,
    context: Option<ServedEndpoint>,
    callback_endpoint: Option<String>,
}

impl PluginClient {
    pub fn connect(
        location: impl Into<String>,
        broker: Arc<dyn ChannelBroker>,
        timeouts: BridgeTimeouts,
    ) -> BridgeResult<Self> {
        let location = location.into();
        let remote = RemotePlugin::new(broker.dial(&location)?);
        Ok(Self {
            location,
            remote,
            broker,
            timeouts,
            context: None,
            callback_endpoint: None,
        })
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    /// Where the extension serves `callback.*`, once initialized.
    pub fn callback_endpoint(&self) -> Option<&str> {
        self.callback_endpoint.as_deref()
    }

    pub async fn info(&self) -> BridgeResult<PluginInfo> {
        with_timeout(self.timeouts.rpc(), "plugin.info", self.remote.info()).await
    }

    /// Serve the context endpoint, run the extension's init, then open the
    /// reverse link and activate everything it registered meanwhile.
    pub async fn init(&mut self, adapter: Arc<HostEventAdapter>) -> BridgeResult<FlushReport> {
        if self.context.is_some() {
            return Err(BridgeError::Handshake(
                "extension is already initialized".to_string(),
            ));
        }

        let context = self
            .broker
            .serve(ContextRpc::new(adapter.clone()).into_rpc().into())
            .await?;
        debug!("Context endpoint listening on {}", context.location);

        let request = InitRequest {
            context_endpoint: context.location.clone(),
            host_version: PROTOCOL_VERSION,
        };
        let response =
            match with_timeout(self.timeouts.init(), "plugin.init", self.remote.init(request))
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    context.stop();
                    return Err(e);
                }
            };

        let callback_endpoint = match (response.success, response.callback_endpoint) {
            (true, Some(endpoint)) => endpoint,
            (true, None) => {
                context.stop();
                return Err(BridgeError::Handshake(
                    "extension did not report a callback endpoint".to_string(),
                ));
            }
            (false, _) => {
                context.stop();
                return Err(BridgeError::Handshake(
                    response
                        .error
                        .unwrap_or_else(|| "extension refused init".to_string()),
                ));
            }
        };

        let link = match self.broker.dial(&callback_endpoint) {
            Ok(client) => Arc::new(RemoteCallbackService::new(client)),
            Err(e) => {
                context.stop();
                return Err(e);
            }
        };

        let report = adapter.establish_link(link).await?;
        info!(
            "Extension at {} initialized; callbacks at {}",
            self.location, callback_endpoint
        );
        self.context = Some(context);
        self.callback_endpoint = Some(callback_endpoint);
        Ok(report)
    }

    pub async fn start(&self) -> BridgeResult<()> {
        with_timeout(self.timeouts.rpc(), "plugin.start", self.remote.start()).await
    }

    /// Ask the extension to stop, then close the context endpoint.
    pub async fn stop(&mut self) -> BridgeResult<()> {
        let result = with_timeout(self.timeouts.rpc(), "plugin.stop", self.remote.stop()).await;
        if let Err(e) = &result {
            warn!("Extension did not stop cleanly: {}", e);
        }
        if let Some(context) = self.context.take() {
            context.stop();
        }
        result
    }
}
