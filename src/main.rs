use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use parking_lot::RwLock;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tripgate::config::{StoreBackend, TripgateConfig};
use tripgate::http::{CheckService, HttpServer};
use tripgate::ratelimit::{
    CounterStore, InMemoryStore, KeyBuilder, PolicyTable, RateLimiter, RedisStore,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Rate limit check service for the trip booking API.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "tripgate.yaml")]
    config: String,

    /// Log output format
    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format);

    info!("Starting Tripgate Rate Limiting Service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = TripgateConfig::load(Some(args.config.as_str()))?;
    info!(
        http_addr = %config.server.http_addr,
        backend = ?config.store.backend,
        failure_mode = ?config.limiter.failure_mode,
        window_strategy = ?config.limiter.window_strategy,
        "Configuration loaded"
    );

    let store: Arc<dyn CounterStore> = match config.store.backend {
        StoreBackend::Redis => {
            Arc::new(RedisStore::connect(&config.store.redis_url, config.store.timeout()).await?)
        }
        StoreBackend::Memory => {
            warn!("Using the in-memory counter store; limits are not shared between instances");
            let store = Arc::new(InMemoryStore::new());
            spawn_sweeper(store.clone(), Duration::from_secs(config.store.sweep_interval_secs));
            store
        }
    };

    let limiter = RateLimiter::new(store, config.limiter.failure_mode)
        .with_window_strategy(config.limiter.window_strategy);
    info!("Rate limiter initialized");

    let policies = match &config.limiter.policies_path {
        Some(path) => PolicyTable::from_file(path)?,
        None => PolicyTable::new(),
    };
    info!(routes = policies.routes.len(), "Rate limit policies loaded");

    let service = CheckService::new(
        limiter,
        KeyBuilder::new(config.limiter.key_prefix.clone()),
        Arc::new(RwLock::new(policies)),
    );

    if let Some(path) = config.limiter.policies_path.clone() {
        if config.limiter.policy_reload_interval_secs > 0 {
            spawn_policy_reloader(
                service.clone(),
                path,
                Duration::from_secs(config.limiter.policy_reload_interval_secs),
            );
        }
    }

    let server = HttpServer::new(config.server.http_addr, service);
    server.serve_with_shutdown(shutdown_signal()).await?;

    info!("Tripgate Rate Limiting Service stopped");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Periodically drop expired records from the in-memory store.
fn spawn_sweeper(store: Arc<InMemoryStore>, every: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            let purged = store.purge_expired();
            if purged > 0 {
                info!(purged = purged, remaining = store.len(), "Purged expired counters");
            }
        }
    });
}

/// Periodically reload the policy file, keeping the current table on errors.
fn spawn_policy_reloader(service: CheckService, path: String, every: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        // The first tick fires immediately and the table was just loaded
        interval.tick().await;
        loop {
            interval.tick().await;
            match PolicyTable::load(&path).await {
                Ok(table) => service.set_policies(table),
                Err(e) => warn!(path = %path, error = %e, "Failed to reload policies, keeping previous"),
            }
        }
    });
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
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
