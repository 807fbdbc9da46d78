use std::sync::Arc;

use tracing::{info, warn};

use parkd::clock::SystemClock;
use parkd::config::{self, Config};
use parkd::directory::InMemoryDirectory;
use parkd::notify::NotifyHub;
use parkd::{ErrorKind, OccupancyService};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    parkd::observability::init(config.metrics_port)?;

    let directory = Arc::new(InMemoryDirectory::default());
    let clock = Arc::new(SystemClock);
    let notify = Arc::new(NotifyHub::new());

    let service = match config.journal_path() {
        Some(path) => {
            if let Some(dir) = &config.data_dir {
                std::fs::create_dir_all(dir)?;
            }
            OccupancyService::open(path, directory, clock, notify, config.engine_config())?
        }
        None => {
            warn!("PARKD_DATA_DIR unset, state is kept in memory only");
            OccupancyService::new(directory, clock, notify, config.engine_config())
        }
    };
    let service = Arc::new(service);

    // Layout entries already known from the journal are left alone.
    if let Some(layout) = &config.layout {
        let mut added = 0usize;
        for space in config::load_layout(layout)? {
            let code = space.code.clone();
            match service.add_space(space).await {
                Ok(()) => added += 1,
                Err(e) if e.kind() == ErrorKind::InvalidState => {}
                Err(e) => return Err(format!("layout space {code}: {e}").into()),
            }
        }
        info!("seeded {added} spaces from {}", layout.display());
    }

    info!("parkd started");
    info!("  journal: {}", config.journal_path().map_or("disabled".to_string(), |p| p.display().to_string()));
    info!("  spaces: {}", service.list_spaces().len());
    info!("  active sessions: {}", service.active_count());
    info!("  occupancy denominator: {}", config.occupancy_denominator);
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    let publisher = tokio::spawn(parkd::publisher::run_publisher(
        service.clone(),
        config.publish_interval,
        config.compact_threshold,
    ));

    // Graceful shutdown on SIGTERM/ctrl-c
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await?;
    }

    info!("shutdown signal received");
    publisher.abort();
    if let Err(e) = service.compact_journal().await {
        warn!("final journal compaction failed: {e}");
    }

    info!("parkd stopped");
    Ok(())
}
