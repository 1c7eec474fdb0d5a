//! # bridge-plugin-sdk
//!
//! Everything an out-of-process extension needs to take part in the host's
//! event model.
//!
//! An extension implements [`Plugin`] and hands it to a [`PluginServer`]. When
//! the host calls `plugin.init`, the server dials the host's context endpoint,
//! opens an endpoint for its [`CallbackRegistry`], and passes the plugin a
//! [`RemoteContext`]. Every `on_*` call on that context allocates a
//! [`CallbackId`](bridge_core::CallbackId), stores the handler locally, and asks
//! the host to invoke it when the matching event fires.
//!
//! ```ignore
//! #[async_trait]
//! impl Plugin for Greeter {
//!     fn info(&self) -> PluginInfo { /* ... */ }
//!
//!     async fn init(&self, ctx: Arc<RemoteContext>) -> anyhow::Result<()> {
//!         let greeter = ctx.clone();
//!         ctx.on_player_join(Priority::DEFAULT, move |event| {
//!             let ctx = greeter.clone();
//!             async move {
//!                 let _ = ctx.say_to(&event.player.name, "welcome").await;
//!             }
//!         })
//!         .await?;
//!         Ok(())
//!     }
//! }
//! ```

pub mod context;
pub mod ids;
pub mod plugin;
pub mod registry;
pub mod server;

pub use context::RemoteContext;
pub use ids::CallbackIdAllocator;
pub use plugin::Plugin;
pub use registry::{CallbackRegistry, ErasedHandler};
pub use server::PluginServer;

// Re-export the shared contract so extensions need only one dependency.
pub use bridge_core;
