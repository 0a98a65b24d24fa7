use std::sync::Arc;
use std::time::Duration;

use shared::config::{WorkerConfig, load_dotenv};
use shared::models::DeliveryTable;
use shared::repos::Store;
use sqlx::migrate::{MigrateError, Migrator};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use webhook_worker::{
    DeliveryEngine, EngineSettings, HttpDeliveryExecutor, PgDeliveryStore, SystemClock,
};

#[tokio::main]
async fn main() {
    if let Err(err) = load_dotenv() {
        eprintln!("{err}");
        std::process::exit(1);
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "webhook_worker=info".to_string()),
        )
        .json()
        .flatten_event(true)
        .with_current_span(true)
        .init();

    let config = match WorkerConfig::from_env() {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "failed to read worker config");
            std::process::exit(1);
        }
    };

    let store = match Store::connect(&config.database_url, config.database_max_connections).await
    {
        Ok(store) => store,
        Err(err) => {
            error!(error = %err, "failed to connect to postgres");
            std::process::exit(1);
        }
    };

    if let Err(err) = run_migrations(&store, &config).await {
        error!(error = %err, "failed to apply database migrations");
        std::process::exit(1);
    }

    let executor = match HttpDeliveryExecutor::new(
        Duration::from_millis(config.request_timeout_ms),
        config.max_response_body_length,
    ) {
        Ok(executor) => Arc::new(executor),
        Err(err) => {
            error!(error = %err, "failed to build webhook http client");
            std::process::exit(1);
        }
    };

    let settings = EngineSettings::from_config(&config);
    let engines: Vec<DeliveryEngine> = DeliveryTable::ALL
        .into_iter()
        .map(|table| {
            DeliveryEngine::new(
                Arc::new(PgDeliveryStore::new(store.clone(), table)),
                executor.clone(),
                Arc::new(SystemClock),
                settings.clone(),
            )
        })
        .collect();

    info!(
        scan_interval_seconds = config.scan_interval_seconds,
        worker_concurrency = config.worker_concurrency,
        lease_seconds = config.lease_seconds,
        "webhook worker starting"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scan_interval = Duration::from_secs(config.scan_interval_seconds);
    let scanners: Vec<_> = engines
        .iter()
        .map(|engine| {
            let scanner = engine.scanner();
            let shutdown = shutdown_rx.clone();
            tokio::spawn(async move { scanner.run(scan_interval, shutdown).await })
        })
        .collect();

    if let Err(err) = signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
    }
    info!("shutdown signal received");

    let _ = shutdown_tx.send(true);
    for scanner in scanners {
        if let Err(err) = scanner.await {
            error!(error = %err, "retry scanner task panicked");
        }
    }
    for engine in &engines {
        engine.dispatcher().shutdown().await;
    }

    info!("webhook worker stopped");
}

async fn run_migrations(store: &Store, config: &WorkerConfig) -> Result<(), MigrateError> {
    let migrator = Migrator::new(config.migrations_dir.as_path()).await?;
    migrator.run(store.pool()).await?;
    Ok(())
}
