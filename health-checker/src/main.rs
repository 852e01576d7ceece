use health_checker::telemetry::init_tracing;
use health_checker::{AdvisoryLock, CheckExecutor, HealthCheckerConfig, JobScheduler, SqlCheckStore};
use std::sync::Arc;
use tokio::time;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    info!("Starting API check scheduler worker...");

    let config = HealthCheckerConfig::from_env()?;
    config.log_configuration();

    let store = SqlCheckStore::connect(&config.database_url, config.database_max_connections).await?;
    store.init_schema().await?;

    let executor = CheckExecutor::from_config(&config)?;
    let lock = AdvisoryLock::new(&config.database_url, config.scheduler_lock_id)?;
    let scheduler = JobScheduler::new(
        Arc::new(store),
        Arc::new(executor),
        Arc::new(lock),
        config.scheduler_settings(),
    );

    if !config.scheduler_enabled {
        info!("Scheduler disabled; worker has nothing to do");
        return Ok(());
    }

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    // Compete for the lock every retry interval. A leader that loses its
    // lock falls back to standby here.
    loop {
        if !scheduler.is_running().await {
            scheduler.start().await;
            if !scheduler.is_running().await {
                info!(
                    retry_secs = config.standby_retry_interval.as_secs(),
                    "Scheduler in standby"
                );
            }
        }
        tokio::select! {
            _ = time::sleep(config.standby_retry_interval) => {}
            result = &mut shutdown => {
                if let Err(e) = result {
                    error!(error = %e, "Failed to listen for shutdown signal");
                }
                break;
            }
        }
    }

    info!("Shutdown signal received");
    scheduler.stop().await;
    Ok(())
}
