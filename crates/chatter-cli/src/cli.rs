use std::path::PathBuf;

use clap::Parser;

use crate::config::{BrokerKind, Config};

/// Multi-channel chat over a fanout message broker.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Broker host. Defaults to RABBITMQ_HOST, then 127.0.0.1.
    pub host: Option<String>,

    /// Channel to join first.
    pub channel: Option<String>,

    /// Read configuration from this file instead of the default locations.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Broker port.
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Name shown on your messages. Prompted for when not set anywhere.
    #[arg(short, long)]
    pub username: Option<String>,

    /// Broker implementation.
    #[arg(long, value_enum)]
    pub broker: Option<BrokerKind>,
}

impl Cli {
    /// Override file and environment settings with the ones given here.
    pub fn apply(&self, config: &mut Config) {
        if let Some(host) = &self.host {
            config.host.clone_from(host);
        }
        if let Some(channel) = &self.channel {
            config.chat.channel.clone_from(channel);
        }
        if let Some(port) = self.port {
            config.port = Some(port);
        }
        if let Some(username) = &self.username {
            config.chat.username = Some(username.clone());
        }
        if let Some(kind) = self.broker {
            config.broker.kind = kind;
        }
    }
}
