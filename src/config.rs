// Application configuration: optional TOML file, CLI flags win over it.
// Debug builds log at `debug` unless told otherwise.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::peer::types::ServerConfig;
use crate::utils::random_id;

#[cfg(debug_assertions)]
pub fn default_log_level() -> &'static str {
    "debug"
}

#[cfg(not(debug_assertions))]
pub fn default_log_level() -> &'static str {
    "info"
}

pub const DEFAULT_RELAY_URL: &str = "ws://127.0.0.1:3000/ws";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("could not parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    pub url: String,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_RELAY_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Room both peers join on the relay
    pub id: String,
    /// Stable identifier used for glare resolution; random when absent
    pub peer_id: Option<String>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            id: "default".to_string(),
            peer_id: None,
        }
    }
}

impl SessionSettings {
    pub fn peer_id_or_random(&self) -> String {
        self.peer_id.clone().unwrap_or_else(random_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IceSettings {
    pub servers: Vec<ServerConfig>,
}

impl Default for IceSettings {
    fn default() -> Self {
        Self {
            servers: ServerConfig::default_stun(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    /// `text` or `json`
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level().to_string(),
            format: "text".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub relay: RelaySettings,
    pub session: SessionSettings,
    pub ice: IceSettings,
    pub logging: LoggingSettings,
}

impl AppConfig {
    /// Read and validate a TOML config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.relay.url.trim().is_empty() {
            return Err(ConfigError::Invalid("relay.url is empty".into()));
        }
        if self.session.id.trim().is_empty() {
            return Err(ConfigError::Invalid("session.id is empty".into()));
        }
        if matches!(&self.session.peer_id, Some(id) if id.trim().is_empty()) {
            return Err(ConfigError::Invalid("session.peer_id is empty".into()));
        }

        for server in &self.ice.servers {
            if server.url.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "ice server {:?} has no url",
                    server.id
                )));
            }
            match server.r#type.as_str() {
                "stun" => {}
                "turn" => {
                    if server.username.is_none() || server.credential.is_none() {
                        return Err(ConfigError::Invalid(format!(
                            "turn server {:?} needs username and credential",
                            server.id
                        )));
                    }
                }
                other => {
                    return Err(ConfigError::Invalid(format!(
                        "ice server {:?} has unknown type {other:?}",
                        server.id
                    )))
                }
            }
        }

        match self.logging.format.as_str() {
            "text" | "json" => Ok(()),
            other => Err(ConfigError::Invalid(format!(
                "unknown log format {other:?}, expected text or json"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = AppConfig::from_toml_str("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.relay.url, DEFAULT_RELAY_URL);
        assert_eq!(config.ice.servers, ServerConfig::default_stun());
        assert_eq!(config.logging.format, "text");
    }

    #[test]
    fn turn_servers_are_parsed() {
        let config = AppConfig::from_toml_str(
            r#"
            [relay]
            url = "wss://relay.example.org/ws"

            [session]
            id = "room-7"
            peer_id = "alice"

            [[ice.servers]]
            id = "turn-tcp"
            type = "turn"
            url = "turn.example.org:3478?transport=tcp"
            username = "user"
            credential = "secret"

            [logging]
            level = "warn"
            format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.session.peer_id_or_random(), "alice");
        assert_eq!(config.ice.servers.len(), 1);
        assert_eq!(config.ice.servers[0].r#type, "turn");
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn turn_without_credentials_is_rejected() {
        let err = AppConfig::from_toml_str(
            r#"
            [[ice.servers]]
            id = "turn-udp"
            type = "turn"
            url = "turn.example.org:3478"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("credential")));
    }

    #[test]
    fn unknown_log_format_is_rejected() {
        let err = AppConfig::from_toml_str("[logging]\nformat = \"xml\"").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn empty_relay_url_is_rejected() {
        let err = AppConfig::from_toml_str("[relay]\nurl = \"\"").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("relay.url")));
    }

    #[test]
    fn missing_peer_id_is_random() {
        let settings = SessionSettings::default();
        let a = settings.peer_id_or_random();
        let b = settings.peer_id_or_random();
        assert_eq!(a.len(), 16);
        assert_ne!(a, b);
    }

    #[test]
    fn missing_file_reports_path() {
        let err = AppConfig::load(Path::new("/nonexistent/peer-signal.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/peer-signal.toml"));
    }
}
