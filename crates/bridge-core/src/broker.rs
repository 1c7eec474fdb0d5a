//! Opening listeners and dialing peers.

use async_trait::async_trait;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::Methods;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{BridgeError, BridgeResult};

/// Upper bound on any single HTTP request. Per-call budgets are enforced above
/// this by [`crate::with_timeout`]; this only keeps a wedged peer from holding
/// a connection forever.
const REQUEST_CEILING: Duration = Duration::from_secs(300);

/// A running listener and the location peers dial to reach it.
#[derive(Debug, Clone)]
pub struct ServedEndpoint {
    pub location: String,
    pub handle: ServerHandle,
}

impl ServedEndpoint {
    /// Stop accepting requests. Safe to call more than once.
    pub fn stop(&self) {
        if self.handle.stop().is_ok() {
            debug!("Stopped endpoint {}", self.location);
        }
    }

    pub async fn stopped(self) {
        self.handle.stopped().await
    }
}

/// Hands out endpoints and connections for the bridge's channels.
#[async_trait]
pub trait ChannelBroker: Send + Sync {
    /// Start serving `methods` and report where they can be reached.
    async fn serve(&self, methods: Methods) -> BridgeResult<ServedEndpoint>;

    /// Open a client to a location previously returned by [`serve`](Self::serve).
    fn dial(&self, location: &str) -> BridgeResult<HttpClient>;
}

/// Loopback TCP broker. Each `serve` binds a fresh ephemeral port.
#[derive(Debug, Clone)]
pub struct TcpBroker {
    bind_address: String,
}

impl TcpBroker {
    pub fn new(bind_address: impl Into<String>) -> Self {
        Self {
            bind_address: bind_address.into(),
        }
    }

    /// Serve `methods` on a fixed address, for endpoints a peer must find
    /// without being told.
    pub async fn serve_on(&self, address: &str, methods: Methods) -> BridgeResult<ServedEndpoint> {
        let server = Server::builder()
            .build(address)
            .await
            .map_err(|e| BridgeError::Transport(format!("Failed to bind listener: {}", e)))?;

        let addr: SocketAddr = server
            .local_addr()
            .map_err(|e| BridgeError::Transport(format!("Failed to get listener address: {}", e)))?;

        let handle = server.start(methods);
        info!("Serving bridge endpoint on {}", addr);

        Ok(ServedEndpoint {
            location: addr.to_string(),
            handle,
        })
    }
}

impl Default for TcpBroker {
    fn default() -> Self {
        Self::new("127.0.0.1")
    }
}

#[async_trait]
impl ChannelBroker for TcpBroker {
    async fn serve(&self, methods: Methods) -> BridgeResult<ServedEndpoint> {
        self.serve_on(&format!("{}:0", self.bind_address), methods)
            .await
    }

    fn dial(&self, location: &str) -> BridgeResult<HttpClient> {
        let url = if location.starts_with("http://") {
            location.to_string()
        } else {
            format!("http://{}", location)
        };

        HttpClientBuilder::default()
            .request_timeout(REQUEST_CEILING)
            .build(&url)
            .map_err(|e| BridgeError::Transport(format!("Failed to dial {}: {}", url, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonrpsee::core::client::ClientT;
    use jsonrpsee::rpc_params;
    use jsonrpsee::RpcModule;

    #[tokio::test]
    async fn test_serve_and_dial_loopback() {
        let mut module = RpcModule::new(());
        module
            .register_method("ping", |_, _, _| String::from("pong"))
            .unwrap();

        let broker = TcpBroker::default();
        let endpoint = broker.serve(module.into()).await.unwrap();
        assert!(endpoint.location.starts_with("127.0.0.1:"));

        let client = broker.dial(&endpoint.location).unwrap();
        let reply: String = client.request("ping", rpc_params![]).await.unwrap();
        assert_eq!(reply, "pong");

        endpoint.stop();
        endpoint.stop();
    }

    #[tokio::test]
    async fn test_dial_rejects_garbage() {
        let broker = TcpBroker::default();
        assert!(matches!(
            broker.dial("127.0.0.1:notaport"),
            Err(BridgeError::Transport(_))
        ));
    }
}
