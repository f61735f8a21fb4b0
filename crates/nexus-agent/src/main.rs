//! # nexusd
//!
//! Loads settings, initialises logging, registers the demo handlers and
//! serves them over WebSocket until ctrl-c.

#![deny(unsafe_code)]

mod handlers;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use nexus_core::CodecConfig;
use nexus_server::config::ServerConfig;
use nexus_server::{NexusServer, Router, RouterConfig};
use nexus_settings::NexusSettings;

/// How long shutdown waits for the listener task.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Packet routing server.
#[derive(Parser, Debug)]
#[command(name = "nexusd", about = "Packet routing server over WebSocket")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Wire codec: `json`, `delimited` or `delimited:<delimiter>`.
    #[arg(long)]
    codec: Option<CodecConfig>,

    /// Settings file (default `~/.nexus/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log filter directive, e.g. `debug` or `nexus_server=trace`.
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    /// Apply command-line overrides on top of loaded settings.
    fn apply(&self, settings: &mut NexusSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(codec) = &self.codec {
            settings.router.codec = codec.clone();
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
    }
}

fn load(cli: &Cli) -> Result<NexusSettings> {
    load_with(cli, |key| std::env::var(key).ok())
}

/// File, then `NEXUS_*` values from `lookup`, then command-line flags.
fn load_with<F>(cli: &Cli, lookup: F) -> Result<NexusSettings>
where
    F: Fn(&str) -> Option<String>,
{
    let path = cli
        .settings
        .clone()
        .unwrap_or_else(nexus_settings::settings_path);
    let mut settings = nexus_settings::loader::read_settings_file(&path)
        .with_context(|| format!("failed to load settings from {}", path.display()))?;
    nexus_settings::loader::apply_overrides_from(&mut settings, lookup);
    cli.apply(&mut settings);
    settings.validate().context("invalid settings")?;
    Ok(settings)
}

fn server_config(settings: &NexusSettings) -> ServerConfig {
    ServerConfig {
        host: settings.server.host.clone(),
        port: settings.server.port,
        path: settings.server.path.clone(),
        max_message_size: settings.server.max_message_size,
    }
}

fn router_config(settings: &NexusSettings) -> RouterConfig {
    RouterConfig {
        codec: settings.router.codec.clone(),
        queue_capacity: settings.router.queue_capacity,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = tracing::dispatcher::with_default(&nexus_logging::bootstrap_dispatch(), || {
        load(&cli)
    })?;

    nexus_logging::init_subscriber(&settings.logging.level, settings.logging.format);

    let metrics = nexus_server::metrics::install_recorder()
        .context("failed to install metrics recorder")?;

    let router = Router::new(&router_config(&settings)).context("failed to build router")?;
    handlers::register(&router);

    let server = NexusServer::new(server_config(&settings), router).with_metrics(metrics);
    let (addr, handle) = server.listen().await.context("failed to bind server")?;

    tracing::info!(
        codec = %settings.router.codec,
        "nexusd listening on ws://{addr}{}",
        settings.server.path
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    tracing::info!(
        connections = server.router().pool().len(),
        "shutting down"
    );
    server
        .shutdown()
        .graceful_shutdown(vec![handle], Some(SHUTDOWN_TIMEOUT))
        .await;

    tracing::info!("shutdown complete");
    Ok(())
}
