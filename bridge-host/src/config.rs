//! Configuration file loading and management
//!
//! This module handles loading and parsing the host configuration from
//! `$XDG_CONFIG_HOME/interwork-bridge/config.toml`. If the configuration file
//! doesn't exist, a default configuration is created with documented comments.

use anyhow::{Context, Result};
use bridge_core::BridgeTimeouts;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Main host configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HostConfig {
    /// Host process settings
    pub host: HostSection,
    /// The extension to bridge to
    pub extension: ExtensionSection,
    /// Per-call time budgets
    #[serde(default)]
    pub timeouts: BridgeTimeouts,
    /// Identity values answered to snapshot queries
    #[serde(default)]
    pub identity: IdentityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostSection {
    /// Interface the context endpoint listens on (ephemeral port)
    /// Default: "127.0.0.1"
    pub bind_address: String,
    /// Log level (trace, debug, info, warn, error)
    /// Default: "info"
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtensionSection {
    /// Where the extension serves `plugin.*`
    /// Default: "127.0.0.1:7400"
    pub endpoint: String,
    /// Name the extension is known by on this host
    /// Default: "extension"
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IdentityConfig {
    pub bot_name: String,
    pub bot_xuid: String,
    pub bot_entity_unique_id: i64,
    pub bot_entity_runtime_id: u64,
    pub server_code: String,
    pub server_passcode_set: bool,
    pub qq_adapter: String,
    pub qq_ws_url: String,
    pub qq_has_access_token: bool,
    /// Linked chat groups, display name to group id
    pub linked_groups: HashMap<String, i64>,
}

impl Default for HostSection {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for ExtensionSection {
    fn default() -> Self {
        Self {
            endpoint: "127.0.0.1:7400".to_string(),
            name: "extension".to_string(),
        }
    }
}

impl HostConfig {
    /// Load configuration from the specified path
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: HostConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the default XDG config location
    ///
    /// If the configuration file doesn't exist, creates a default configuration
    /// file with documented comments.
    pub fn load_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if !config_path.exists() {
            Self::create_default_file(&config_path)?;
        }

        Self::load(&config_path)
    }

    /// Returns `$XDG_CONFIG_HOME/interwork-bridge/config.toml`
    pub fn default_config_path() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("", "raibid-labs", "interwork-bridge")
            .context("Failed to determine project directories")?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    fn create_default_file(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, Self::default_config_content())
            .with_context(|| format!("Failed to write default config file: {}", path.display()))?;

        tracing::info!("Created default configuration file at: {}", path.display());
        Ok(())
    }

    fn default_config_content() -> String {
        r#"# Interwork Bridge Host Configuration

[host]
# Interface the host's context endpoint binds to (an ephemeral port is chosen)
# Default: "127.0.0.1"
bind_address = "127.0.0.1"

# Log level: trace, debug, info, warn, error
# RUST_LOG overrides this when set.
# Default: "info"
log_level = "info"

[extension]
# Address where the extension serves plugin.init/start/stop/info
# Default: "127.0.0.1:7400"
endpoint = "127.0.0.1:7400"

# Name reported to the extension when it asks who it is
name = "extension"

[timeouts]
# Millisecond budgets for calls into the extension, by event kind.
# Packets are high frequency; keep their budget short.
packet_ms = 2000
# Lifecycle, join/leave and frame-exit notifications
notify_ms = 5000
chat_ms = 5000
broadcast_ms = 10000
console_ms = 30000
# Ordinary calls from the extension (log, query, register)
rpc_ms = 10000
# The extension's whole init, including its registrations
init_ms = 30000
# Extra time an extension allows on top of a wait's own timeout
wait_grace_ms = 2000

[identity]
# Values answered to snapshot queries
bot_name = ""
bot_xuid = ""
server_code = ""
server_passcode_set = false
qq_adapter = ""
qq_ws_url = ""
qq_has_access_token = false

# Linked chat groups, display name to group id
# [identity.linked_groups]
# main = 123456789
"#
        .to_string()
    }

    /// Ensures all configuration values are valid and within acceptable ranges.
    pub fn validate(&self) -> Result<()> {
        self.host
            .bind_address
            .parse::<std::net::IpAddr>()
            .with_context(|| format!("Invalid bind_address: {}", self.host.bind_address))?;

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.host.log_level.as_str()) {
            anyhow::bail!(
                "Invalid log_level: {}. Must be one of: {}",
                self.host.log_level,
                valid_log_levels.join(", ")
            );
        }

        self.extension
            .endpoint
            .parse::<std::net::SocketAddr>()
            .with_context(|| format!("Invalid extension endpoint: {}", self.extension.endpoint))?;

        if self.extension.name.trim().is_empty() {
            anyhow::bail!("extension.name must not be empty");
        }

        self.timeouts.validate().map_err(anyhow::Error::msg)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = HostConfig::default();
        assert_eq!(config.host.bind_address, "127.0.0.1");
        assert_eq!(config.host.log_level, "info");
        assert_eq!(config.extension.endpoint, "127.0.0.1:7400");
        assert_eq!(config.timeouts, BridgeTimeouts::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_file_parses_to_defaults() {
        let config: HostConfig = toml::from_str(&HostConfig::default_config_content()).unwrap();
        assert_eq!(config, HostConfig::default());
    }

    #[test]
    fn test_load_valid_config() {
        let config_content = r#"
[host]
bind_address = "0.0.0.0"
log_level = "debug"

[extension]
endpoint = "127.0.0.1:9000"
name = "shop"

[timeouts]
packet_ms = 500

[identity]
bot_name = "relay"

[identity.linked_groups]
main = 42
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(config_content.as_bytes()).unwrap();

        let config = HostConfig::load(temp_file.path()).unwrap();
        assert_eq!(config.host.log_level, "debug");
        assert_eq!(config.extension.name, "shop");
        assert_eq!(config.timeouts.packet_ms, 500);
        assert_eq!(config.timeouts.chat_ms, 5000);
        assert_eq!(config.identity.bot_name, "relay");
        assert_eq!(config.identity.linked_groups["main"], 42);
    }

    #[test]
    fn test_load_minimal_config() {
        let config_content = r#"
[host]
bind_address = "127.0.0.1"
log_level = "info"

[extension]
endpoint = "127.0.0.1:7400"
name = "info"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(config_content.as_bytes()).unwrap();

        let config = HostConfig::load(temp_file.path()).unwrap();
        assert_eq!(config.timeouts, BridgeTimeouts::default());
        assert_eq!(config.identity, IdentityConfig::default());
    }

    #[test]
    fn test_validate_invalid_bind_address() {
        let mut config = HostConfig::default();
        config.host.bind_address = "localhost:80".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let mut config = HostConfig::default();
        config.host.log_level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_invalid_endpoint() {
        let mut config = HostConfig::default();
        config.extension.endpoint = "nowhere".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_timeout() {
        let mut config = HostConfig::default();
        config.timeouts.console_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("console_ms"));
    }

    #[test]
    fn test_load_nonexistent_file() {
        assert!(HostConfig::load("/nonexistent/path/config.toml").is_err());
    }
}
