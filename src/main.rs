use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use hotpath::config::{HotpathConfig, LoggingConfig};
use hotpath::context::Context;

/// Cache and rate limiter host for the trading dashboard.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => HotpathConfig::from_file(path)?,
        None => HotpathConfig::default(),
    };
    if args.json_logs {
        config.logging.json = true;
    }

    init_tracing(&config.logging);

    info!("Starting Hotpath");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(config = ?args.config, "Configuration loaded");

    let ctx = Context::from_config(config).await?;

    for name in ctx.limiters().names() {
        let bucket = ctx.limiters().get(&name)?;
        info!(
            bucket = %name,
            capacity = bucket.capacity(),
            refill_rate = bucket.refill_rate(),
            "Rate limiter ready"
        );
    }

    let sweeper = ctx
        .config()
        .cache
        .sweep_interval()
        .map(|interval| ctx.cache().spawn_sweeper(interval));

    shutdown_signal().await;

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }

    let stats = ctx.cache().stats();
    info!(
        memory_hits = stats.memory_hits,
        durable_hits = stats.durable_hits,
        misses = stats.misses,
        evictions = stats.evictions,
        store_faults = stats.store_faults,
        "Hotpath stopped"
    );
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
