mod error;
mod routes;

use anyhow::Result;
use health_checker::telemetry::init_tracing;
use health_checker::{AdvisoryLock, CheckExecutor, HealthCheckerConfig, JobScheduler, SqlCheckStore};
use std::sync::Arc;
use tracing::{error, info};

use crate::routes::{router, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = HealthCheckerConfig::from_env()?;
    config.log_configuration();

    let store = SqlCheckStore::connect(&config.database_url, config.database_max_connections).await?;
    store.init_schema().await?;
    let store = Arc::new(store);

    let executor = Arc::new(CheckExecutor::from_config(&config)?);
    let lock = AdvisoryLock::new(&config.database_url, config.scheduler_lock_id)?;
    let scheduler = JobScheduler::new(
        store.clone(),
        executor.clone(),
        Arc::new(lock),
        config.scheduler_settings(),
    );
    scheduler.start().await;

    let app = router(AppState {
        store,
        executor,
        scheduler: scheduler.clone(),
    });

    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".to_string());
    let addr = format!("0.0.0.0:{port}");
    info!("Server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    scheduler.stop().await;
    served?;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
