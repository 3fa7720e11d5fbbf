use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use rentlock::config::DaemonConfig;
use rentlock::engine::BookingService;
use rentlock::store::InMemoryStore;
use rentlock::sweeper;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = DaemonConfig::from_env();
    rentlock::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;
    let wal_path = config.wal_path();
    let store = InMemoryStore::open(&wal_path, config.booking.lock_wait_timeout)?;
    let service = Arc::new(BookingService::new(store.clone(), &config.booking));

    info!("rentlock sweeper started");
    info!("  wal: {}", wal_path.display());
    info!("  sweep_interval: {:?}", config.sweep_interval);
    info!("  compact_threshold: {}", config.compact_threshold);
    info!(
        "  retry: {} attempts, base delay {:?}, lock wait {:?}",
        config.booking.max_retries, config.booking.base_delay, config.booking.lock_wait_timeout
    );
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let sweeper = tokio::spawn(sweeper::run_sweeper(service.clone(), config.sweep_interval));
    let compactor = tokio::spawn(sweeper::run_compactor(
        store.clone(),
        config.compact_threshold,
        Duration::from_secs(30),
    ));

    shutdown_signal().await?;
    info!("shutdown signal received, stopping background tasks");
    sweeper.abort();
    compactor.abort();
    let _ = sweeper.await;
    let _ = compactor.await;

    // Leave a compact log behind so the next start replays quickly.
    if let Err(e) = store.compact().await {
        tracing::warn!("final compaction failed: {e}");
    }
    info!("rentlock stopped");
    Ok(())
}

async fn shutdown_signal() -> std::io::Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            r = ctrl_c => r?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await?;
    }
    Ok(())
}
