//! Client configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (RABBITMQ_HOST, CHATTER_*)
//! - TOML configuration file
//! - Command line arguments, applied on top in `cli`

use anyhow::{Context, Result};
use chatter_core::session::{SessionConfig, ANONYMOUS};
use clap::ValueEnum;
use serde::Deserialize;
use std::path::Path;

/// Client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Broker host.
    #[serde(default = "default_host")]
    pub host: String,

    /// Broker port. The broker's default when unset.
    #[serde(default = "default_port")]
    pub port: Option<u16>,

    /// Broker configuration.
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Chat configuration.
    #[serde(default)]
    pub chat: ChatConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Which broker implementation to talk to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BrokerKind {
    /// RabbitMQ over AMQP 0-9-1.
    #[default]
    Amqp,
    /// In-process broker. Only this process's sessions can talk.
    Memory,
}

/// Broker configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    /// Broker implementation.
    #[serde(default)]
    pub kind: BrokerKind,

    /// AMQP virtual host.
    #[serde(default = "default_vhost")]
    pub vhost: String,

    /// AMQP user.
    #[serde(default = "default_credential")]
    pub username: String,

    /// AMQP password.
    #[serde(default = "default_credential")]
    pub password: String,
}

/// Chat configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatConfig {
    /// Channel joined on start.
    #[serde(default = "default_channel")]
    pub channel: String,

    /// Name shown on outgoing messages. Prompted for when unset.
    #[serde(default)]
    pub username: Option<String>,
}

/// Metrics configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Enable the Prometheus exporter.
    #[serde(default)]
    pub enabled: bool,

    /// Exporter port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    std::env::var("RABBITMQ_HOST")
        .or_else(|_| std::env::var("CHATTER_HOST"))
        .unwrap_or_else(|_| chatter_core::session::DEFAULT_HOST.to_string())
}

fn default_port() -> Option<u16> {
    std::env::var("CHATTER_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
}

fn default_vhost() -> String {
    "/".to_string()
}

fn default_credential() -> String {
    "guest".to_string()
}

fn default_channel() -> String {
    std::env::var("CHATTER_CHANNEL")
        .unwrap_or_else(|_| chatter_core::session::DEFAULT_CHANNEL.to_string())
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            broker: BrokerConfig::default(),
            chat: ChatConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            kind: BrokerKind::default(),
            vhost: default_vhost(),
            username: default_credential(),
            password: default_credential(),
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            channel: default_channel(),
            username: None,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from the first config file found, or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let config_paths = [
            "chatter.toml",
            "~/.config/chatter/chatter.toml",
            "/etc/chatter/chatter.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = shellexpand::tilde(&path.as_ref().to_string_lossy()).into_owned();
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {path}"))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;

        Ok(config)
    }

    /// Session settings for `username`.
    ///
    /// A blank username becomes `Anonymous`.
    #[must_use]
    pub fn session_config(&self, username: &str) -> SessionConfig {
        let username = match username.trim() {
            "" => ANONYMOUS,
            name => name,
        };
        SessionConfig::new(username, self.chat.channel.clone())
            .with_endpoint(self.host.clone(), self.port)
    }

    /// AMQP connection settings.
    #[cfg(feature = "amqp")]
    #[must_use]
    pub fn amqp_config(&self) -> chatter_transport::AmqpConfig {
        chatter_transport::AmqpConfig {
            vhost: self.broker.vhost.clone(),
            username: self.broker.username.clone(),
            password: self.broker.password.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.broker.kind, BrokerKind::Amqp);
        assert_eq!(config.broker.vhost, "/");
        assert_eq!(config.broker.username, "guest");
        assert_eq!(config.chat.username, None);
        assert!(!config.metrics.enabled);
        assert_eq!(config.metrics.port, 9090);
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "rabbit.internal"
            port = 5673

            [broker]
            kind = "memory"
            vhost = "/chat"

            [chat]
            channel = "random"
            username = "alice"

            [metrics]
            enabled = true
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "rabbit.internal");
        assert_eq!(config.port, Some(5673));
        assert_eq!(config.broker.kind, BrokerKind::Memory);
        assert_eq!(config.broker.vhost, "/chat");
        assert_eq!(config.broker.password, "guest");
        assert_eq!(config.chat.channel, "random");
        assert_eq!(config.chat.username.as_deref(), Some("alice"));
        assert!(config.metrics.enabled);
        assert_eq!(config.metrics.port, 9090);
    }

    #[test]
    fn test_unknown_broker_kind_is_rejected() {
        let toml_str = r#"
            [broker]
            kind = "kafka"
        "#;

        assert!(toml::from_str::<Config>(toml_str).is_err());
    }

    #[test]
    fn test_from_file_reports_path() {
        let err = Config::from_file("/nonexistent/chatter.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/chatter.toml"));
    }

    #[test]
    fn test_session_config() {
        let mut config = Config::default();
        config.host = "rabbit.internal".to_string();
        config.port = Some(5673);
        config.chat.channel = "random".to_string();

        let session = config.session_config("bob");
        assert_eq!(session.username, "bob");
        assert_eq!(session.channel, "random");
        assert_eq!(session.host, "rabbit.internal");
        assert_eq!(session.port, Some(5673));

        assert_eq!(config.session_config("   ").username, "Anonymous");
    }
}
