//! Configuration Module
//!
//! Provides TOML-based configuration for the bridge with support for:
//! - Broker endpoint (host, port, keepalive, reconnect backoff)
//! - Subscribed topics and the command topic
//! - Realtime server bind addresses (WebSocket + HTTP health)
//! - Message journal path
//! - Environment variable overrides (MQBRIDGE_* prefix)

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;

use crate::protocol::QoS;

#[cfg(test)]
mod tests;

/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str) -> String {
    let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").unwrap();
    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(var_name).unwrap_or_else(|_| default.to_string())
    })
    .to_string()
}

/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// Config crate error
    Config(config::ConfigError),
    /// Validation error
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Config(e) => write!(f, "Config error: {}", e),
            ConfigError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Config(e)
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub log: LogConfig,
    /// Broker endpoint configuration
    pub broker: BrokerConfig,
    /// Topic configuration
    pub topics: TopicsConfig,
    /// Realtime server configuration
    pub server: ServerConfig,
    /// Message journal configuration
    pub journal: JournalConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level: error, warn, info, debug, trace
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Broker endpoint configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Broker hostname or IP
    pub host: String,
    /// Broker port
    pub port: u16,
    /// Keep alive interval in seconds
    pub keepalive: u16,
    /// Prefix for the per-role client identifiers
    pub client_id_prefix: String,
    /// Delay before retrying a failed subscriber connection
    #[serde(with = "humantime_serde")]
    pub reconnect_backoff: Duration,
    /// Timeout for a single connect attempt (TCP + CONNACK)
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Timeout applied to a single publish send
    #[serde(with = "humantime_serde")]
    pub send_timeout: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            keepalive: 60,
            client_id_prefix: "workwell-bridge".to_string(),
            reconnect_backoff: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            send_timeout: Duration::from_secs(5),
        }
    }
}

impl BrokerConfig {
    /// `host:port` for TcpStream::connect
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// A single topic subscription
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TopicSubscription {
    /// Topic filter
    pub topic: String,
    /// Requested QoS level (0, 1, or 2)
    #[serde(default)]
    pub qos: u8,
}

impl TopicSubscription {
    pub fn qos_level(&self) -> QoS {
        QoS::from_u8(self.qos).unwrap_or(QoS::AtMostOnce)
    }
}

/// Topic configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TopicsConfig {
    /// Topics the subscriber role subscribes to, in declared order
    pub subscriptions: Vec<TopicSubscription>,
    /// Topic the publisher role sends client commands on
    pub command_topic: String,
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            subscriptions: vec![
                TopicSubscription {
                    topic: "workwell/monitoramento".to_string(),
                    qos: 0,
                },
                TopicSubscription {
                    topic: "workwell/alerts".to_string(),
                    qos: 0,
                },
            ],
            command_topic: "workwell/command".to_string(),
        }
    }
}

/// Realtime server configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// WebSocket bind address for realtime clients
    pub ws_bind: SocketAddr,
    /// HTTP bind address for the health endpoint
    pub http_bind: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ws_bind: "127.0.0.1:5001".parse().unwrap(),
            http_bind: "127.0.0.1:5000".parse().unwrap(),
        }
    }
}

/// Message journal configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    /// Path of the append-only message log
    pub path: PathBuf,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("last_msg.log"),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file with environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let content = substitute_env_vars(&content);

        let cfg = config::Config::builder()
            .add_source(File::from_str(&content, FileFormat::Toml))
            .add_source(Environment::with_prefix("MQBRIDGE").separator("__"))
            .build()?;

        let config: Config = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.host.is_empty() {
            return Err(ConfigError::Validation("broker.host is empty".to_string()));
        }
        if self.topics.command_topic.is_empty() {
            return Err(ConfigError::Validation(
                "topics.command_topic is empty".to_string(),
            ));
        }
        if self.topics.subscriptions.is_empty() {
            return Err(ConfigError::Validation(
                "topics.subscriptions is empty".to_string(),
            ));
        }
        for sub in &self.topics.subscriptions {
            if sub.topic.is_empty() {
                return Err(ConfigError::Validation(
                    "topics.subscriptions contains an empty topic".to_string(),
                ));
            }
            if sub.qos > 2 {
                return Err(ConfigError::Validation(format!(
                    "invalid qos {} for topic {}",
                    sub.qos, sub.topic
                )));
            }
        }
        Ok(())
    }
}
