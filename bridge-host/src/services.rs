//! Host collaborators the bridge reads from and acts through.

use async_trait::async_trait;
use bridge_core::{BotInfo, BridgeResult, InterworkInfo, LogLevel, QqInfo, ServerInfo};
use std::sync::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::config::IdentityConfig;

/// What the host offers an extension beyond events: identity snapshots, a log
/// sink, and messaging.
#[async_trait]
pub trait HostServices: Send + Sync {
    fn bot_info(&self) -> BotInfo;

    fn server_info(&self) -> ServerInfo;

    fn qq_info(&self) -> QqInfo;

    fn interwork_info(&self) -> InterworkInfo;

    /// Re-emit an extension's log line on the host.
    fn log(&self, plugin: &str, level: LogLevel, message: &str) {
        match level {
            LogLevel::Trace => trace!(plugin, "{}", message),
            LogLevel::Debug => debug!(plugin, "{}", message),
            LogLevel::Info => info!(plugin, "{}", message),
            LogLevel::Success => info!(plugin, success = true, "{}", message),
            LogLevel::Warn => warn!(plugin, "{}", message),
            LogLevel::Error => error!(plugin, "{}", message),
        }
    }

    async fn say_to(&self, player: &str, message: &str) -> BridgeResult<()>;
}

/// Services backed by fixed identity values, with an outbox in place of a
/// game connection.
pub struct StaticHostServices {
    bot: BotInfo,
    server: ServerInfo,
    qq: QqInfo,
    interwork: InterworkInfo,
    outbox: Mutex<Vec<(String, String)>>,
}

impl StaticHostServices {
    pub fn new(bot: BotInfo, server: ServerInfo, qq: QqInfo, interwork: InterworkInfo) -> Self {
        Self {
            bot,
            server,
            qq,
            interwork,
            outbox: Mutex::new(Vec::new()),
        }
    }

    pub fn from_config(identity: &IdentityConfig) -> Self {
        Self::new(
            BotInfo {
                name: identity.bot_name.clone(),
                xuid: identity.bot_xuid.clone(),
                entity_unique_id: identity.bot_entity_unique_id,
                entity_runtime_id: identity.bot_entity_runtime_id,
            },
            ServerInfo {
                code: identity.server_code.clone(),
                passcode_set: identity.server_passcode_set,
            },
            QqInfo {
                adapter: identity.qq_adapter.clone(),
                ws_url: identity.qq_ws_url.clone(),
                has_access_token: identity.qq_has_access_token,
            },
            InterworkInfo {
                linked_groups: identity.linked_groups.clone(),
            },
        )
    }

    /// Messages sent so far, as `(player, message)`.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.outbox
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl HostServices for StaticHostServices {
    fn bot_info(&self) -> BotInfo {
        self.bot.clone()
    }

    fn server_info(&self) -> ServerInfo {
        self.server.clone()
    }

    fn qq_info(&self) -> QqInfo {
        self.qq.clone()
    }

    fn interwork_info(&self) -> InterworkInfo {
        self.interwork.clone()
    }

    async fn say_to(&self, player: &str, message: &str) -> BridgeResult<()> {
        info!(player, "-> {}", message);
        self.outbox
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push((player.to_string(), message.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshots_come_from_config() {
        let mut identity = IdentityConfig::default();
        identity.bot_name = "relay".to_string();
        identity.linked_groups.insert("main".to_string(), 1234);

        let services = StaticHostServices::from_config(&identity);
        assert_eq!(services.bot_info().name, "relay");
        assert_eq!(services.interwork_info().linked_groups["main"], 1234);
    }

    #[tokio::test]
    async fn test_say_to_records_outbox() {
        let services = StaticHostServices::from_config(&IdentityConfig::default());
        services.say_to("Alice", "hi").await.unwrap();
        assert_eq!(
            services.sent(),
            vec![("Alice".to_string(), "hi".to_string())]
        );
    }
}
