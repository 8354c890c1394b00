//! # chatter
//!
//! Terminal chat client for a fanout message broker.
//!
//! ## Usage
//!
//! ```bash
//! # Join "general" on a local RabbitMQ
//! chatter
//!
//! # Join "random" on another host
//! chatter rabbit.internal random
//!
//! # Talk to an in-process broker
//! chatter --broker memory --username alice
//! ```

mod cli;
mod config;
mod metrics;
mod shell;

use anyhow::Result;
use chatter_core::{ChannelSession, OutputSink, StdoutSink};
use chatter_transport::{Broker, MemoryBroker};
use clap::Parser;
use config::{BrokerKind, Config};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::BufReader;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Logs go to stderr; stdout carries the chat.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chatter=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = cli::Cli::parse();
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load()?,
    };
    cli.apply(&mut config);

    if config.metrics.enabled {
        metrics::start_metrics_server(config.metrics.port)?;
    }

    let broker = build_broker(&config)?;
    let mut stdin = BufReader::new(tokio::io::stdin());
    let username = match &config.chat.username {
        Some(name) => name.clone(),
        None => shell::prompt_username(&mut stdin, &mut tokio::io::stdout()).await?,
    };

    let sink: Arc<dyn OutputSink> = Arc::new(StdoutSink);
    let mut session =
        ChannelSession::new(broker, config.session_config(&username), Arc::clone(&sink));

    tracing::info!(
        host = %session.host(),
        channel = %session.current_channel(),
        "Starting chat session"
    );
    if session.connect().await.is_err() {
        session.close().await;
        return Ok(ExitCode::FAILURE);
    }

    shell::print_help(sink.as_ref(), session.username());
    shell::run(&mut session, &mut stdin).await?;

    Ok(ExitCode::SUCCESS)
}

fn build_broker(config: &Config) -> Result<Arc<dyn Broker>> {
    match config.broker.kind {
        BrokerKind::Memory => Ok(Arc::new(MemoryBroker::new())),
        #[cfg(feature = "amqp")]
        BrokerKind::Amqp => Ok(Arc::new(chatter_transport::AmqpBroker::with_config(
            config.amqp_config(),
        ))),
        #[cfg(not(feature = "amqp"))]
        BrokerKind::Amqp => anyhow::bail!("Built without AMQP support; use --broker memory"),
    }
}
