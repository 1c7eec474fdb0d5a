//! The trait an extension implements.

use async_trait::async_trait;
use bridge_core::PluginInfo;
use std::sync::Arc;

use crate::context::RemoteContext;

/// An out-of-process extension.
///
/// `init` is where handlers get registered. The host queues registrations
/// made here until it can reach the extension's callback endpoint, so
/// registering from `init` is always safe.
#[async_trait]
pub trait Plugin: Send + Sync + 'static {
    fn info(&self) -> PluginInfo;

    async fn init(&self, ctx: Arc<RemoteContext>) -> anyhow::Result<()>;

    /// Called after the handshake completes and queued registrations are live.
    async fn start(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
