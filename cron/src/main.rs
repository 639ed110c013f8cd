// Cron binary entry point
//
// Hosts the periodic agency-response reconciliation run, the callback
// expiry sweeper, and the HTTP endpoint the crypto service calls back.

use anyhow::Result;
use common::config::Settings;
use common::crypto::registry::run_sweeper;
use common::crypto::{CallbackRegistry, CryptoService, HttpCryptoClient};
use common::reconcile::DownloadOrchestrator;
use common::store::{DbPool, OperationStore, PgOperationStore};
use common::transport::{BlobClient, Ssh2SftpClient};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};

mod applier;
mod routes;

use applier::PgStatusApplier;
use routes::{create_router, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load().map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    common::telemetry::init_logging(&settings.observability.log_level)?;
    settings
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    info!("Starting agency reconciliation service");

    let db_pool = DbPool::new(&settings.database).await.map_err(|e| {
        error!(error = %e, "Failed to initialize database pool");
        anyhow::anyhow!("Database initialization error: {}", e)
    })?;
    db_pool.health_check().await?;
    info!("Database pool initialized");

    let store: Arc<dyn OperationStore> = Arc::new(PgOperationStore::new(db_pool.clone()));

    let blob = Arc::new(BlobClient::new(&settings.blob)?);
    let sftp = Arc::new(Ssh2SftpClient::new(settings.sftp.clone()));
    info!("Transport clients initialized");

    let registry = Arc::new(CallbackRegistry::new(settings.crypto.callback_expiry_minutes));
    let crypto_client = Arc::new(HttpCryptoClient::new(&settings.crypto)?);
    let crypto = Arc::new(CryptoService::new(
        registry.clone(),
        store.clone(),
        crypto_client,
        settings.crypto.clone(),
    ));

    tokio::spawn(run_sweeper(
        registry,
        store.clone(),
        settings.crypto.sweep_interval_minutes,
    ));
    info!(
        expiry_minutes = settings.crypto.callback_expiry_minutes,
        interval_minutes = settings.crypto.sweep_interval_minutes,
        "Callback sweeper started"
    );

    let applier = Arc::new(PgStatusApplier::new(db_pool.clone()));
    let orchestrator = Arc::new(DownloadOrchestrator::new(
        sftp,
        blob,
        crypto.clone(),
        applier,
        settings.download.clone(),
    ));

    let run_interval = settings.download.run_interval_seconds;
    let runner = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(run_interval));
            loop {
                ticker.tick().await;
                let report = orchestrator.run().await;
                if report.failed_groups() > 0 {
                    error!(
                        failed = report.failed_groups(),
                        total = report.groups.len(),
                        "Reconciliation run had failing batches"
                    );
                }
            }
        })
    };

    let state = AppState { crypto };
    let app = create_router(state);
    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid server address: {}", e))?;

    info!(addr = %addr, "Listening for crypto callbacks");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    runner.abort();
    db_pool.close().await;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown signal received");
}
