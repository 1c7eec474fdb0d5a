//! # plugin-info
//!
//! A small extension that exercises each direction of the bridge:
//!
//! - `info` / `botinfo` console command printing the host's identity
//! - a chat filter that suppresses lines containing a blocked word
//! - a `plugin-info.ping` broadcast responder
//! - a welcome message for joining players

use async_trait::async_trait;
use bridge_plugin_sdk::bridge_core::{
    Broadcast, ChatEvent, CommandSpec, PlayerEvent, PluginInfo, Priority,
};
use bridge_plugin_sdk::{Plugin, RemoteContext};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

pub const PING_BROADCAST: &str = "plugin-info.ping";

pub struct InfoPlugin {
    blocked_words: Vec<String>,
}

impl InfoPlugin {
    pub fn new<I, S>(blocked_words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            blocked_words: blocked_words
                .into_iter()
                .map(|w| w.into().to_lowercase())
                .collect(),
        }
    }

    pub fn is_blocked(&self, message: &str) -> bool {
        is_blocked(&self.blocked_words, message)
    }
}

impl Default for InfoPlugin {
    fn default() -> Self {
        Self::new(["griefing"])
    }
}

fn is_blocked(blocked: &[String], message: &str) -> bool {
    let message = message.to_lowercase();
    blocked.iter().any(|word| message.contains(word.as_str()))
}

fn pong(plugin: &str, broadcast: &Broadcast) -> Value {
    json!({
        "plugin": plugin,
        "pong": true,
        "echo": Value::Object(broadcast.data.clone()),
    })
}

#[async_trait]
impl Plugin for InfoPlugin {
    fn info(&self) -> PluginInfo {
        PluginInfo {
            name: "plugin-info".to_string(),
            display_name: "Info".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            description: "Identity lookups, a chat filter and a ping responder".to_string(),
            author: "raibid-labs".to_string(),
        }
    }

    async fn init(&self, ctx: Arc<RemoteContext>) -> anyhow::Result<()> {
        let command_ctx = Arc::clone(&ctx);
        ctx.register_console_command(
            CommandSpec::new("info")
                .with_triggers(["info", "botinfo"])
                .with_usage("[player]")
                .with_description("Show bot and server identity"),
            move |args: Vec<String>| {
                let ctx = Arc::clone(&command_ctx);
                async move {
                    if args.len() > 1 {
                        anyhow::bail!("usage: info [player]");
                    }
                    let bot = ctx.bot_info().await;
                    let server = ctx.server_info().await;
                    let summary = format!("bot {} on server {}", bot.name, server.code);
                    match args.first() {
                        Some(player) => ctx.say_to(player, summary).await?,
                        None => ctx.log_info(summary).await,
                    }
                    Ok(())
                }
            },
        )
        .await?;

        let blocked = self.blocked_words.clone();
        ctx.on_chat(Priority(100), move |mut event: ChatEvent| {
            let blocked = blocked.clone();
            async move {
                if is_blocked(&blocked, &event.message) {
                    event.cancel();
                }
                event
            }
        })
        .await?;

        let name = self.info().name;
        ctx.on_broadcast(PING_BROADCAST, Priority::DEFAULT, move |broadcast: Broadcast| {
            let reply = pong(&name, &broadcast);
            async move { reply }
        })
        .await?;

        let welcome_ctx = Arc::clone(&ctx);
        ctx.on_player_join(Priority::DEFAULT, move |event: PlayerEvent| {
            let ctx = Arc::clone(&welcome_ctx);
            async move {
                let _ = ctx
                    .say_to(&event.player.name, format!("Welcome, {}", event.player.name))
                    .await;
            }
        })
        .await?;

        let active_ctx = Arc::clone(&ctx);
        ctx.on_active(Priority::DEFAULT, move || {
            let ctx = Arc::clone(&active_ctx);
            async move { ctx.log_success("plugin-info is active").await }
        })
        .await?;

        info!("plugin-info registered its handlers");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    #[test]
    fn test_blocked_words_ignore_case() {
        let plugin = InfoPlugin::new(["Spam"]);
        assert!(plugin.is_blocked("buy SPAM now"));
        assert!(!plugin.is_blocked("hello"));
    }

    #[test]
    fn test_pong_echoes_data() {
        let mut data = Map::new();
        data.insert("n".to_string(), json!(7));
        let reply = pong("plugin-info", &Broadcast::new(PING_BROADCAST, data));
        assert_eq!(reply["pong"], json!(true));
        assert_eq!(reply["echo"]["n"], json!(7));
    }

    #[test]
    fn test_info_uses_package_version() {
        let info = InfoPlugin::default().info();
        assert_eq!(info.name, "plugin-info");
        assert_eq!(info.version, env!("CARGO_PKG_VERSION"));
    }
}
