//! netmond daemon entry point.

use anyhow::Context;
use clap::{Parser, ValueEnum};
use netmon_common::SshTransport;
use netmond::config_file::DEFAULT_CONFIG_PATH;
use netmond::{metrics_server, MetricsCollector, NetmonConfig, Netmond};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Compact,
    Json,
}

/// Network device monitoring and alerting daemon
#[derive(Parser, Debug)]
#[command(name = "netmond")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log output format
    #[arg(long, value_enum, default_value = "compact")]
    log_format: LogFormat,

    /// Validate the configuration and exit
    #[arg(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    let config = NetmonConfig::load_or_default(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    config.validate().context("invalid configuration")?;

    if cli.check_config {
        info!(path = %cli.config.display(), "Configuration OK");
        return Ok(());
    }

    info!(version = env!("CARGO_PKG_VERSION"), "netmond: Starting");

    let metrics = if config.metrics.enabled {
        Some(MetricsCollector::new().context("registering metrics")?)
    } else {
        None
    };

    let transport = Arc::new(SshTransport::new(config.ssh_options()));
    let daemon = Arc::new(
        Netmond::from_config(&config, transport, metrics.clone())
            .await
            .context("building engine")?,
    );

    let shutdown = CancellationToken::new();
    if let Some(collector) = metrics {
        let addr = config.metrics_addr()?;
        let health = daemon.health().clone();
        let token = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = metrics_server::start_metrics_server(collector, health, addr, token).await {
                error!(error = %e, "netmond: Metrics server failed");
            }
        });
    }

    let supervisor = {
        let daemon = daemon.clone();
        tokio::spawn(async move { daemon.run().await })
    };

    wait_for_signal().await;
    info!("netmond: Received shutdown signal");
    shutdown.cancel();
    daemon.shutdown().await;
    if let Err(e) = supervisor.await {
        warn!(error = %e, "netmond: Supervisor task ended abnormally");
    }

    info!("netmond: Graceful shutdown complete");
    Ok(())
}

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    match format {
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        let mut term = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                warn!(error = %e, "netmond: Cannot install SIGTERM handler");
                let _ = signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = signal::ctrl_c().await;
    }
}
