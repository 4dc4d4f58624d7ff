use std::path::Path;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use roost::config::{ServerConfig, CONFIG_FILE_NAME};
use roost::errors::LicenceResult;
use roost::events::{EventId, EventReporter, TracingReporter};
use roost::jobs::{self, MaintenanceScheduler};
use roost::licence::verify::SignatureVerifier;
use roost::server::manager::SeatManager;
use roost::server::service::SeatService;
use roost::server::store::Store;

/// Public key file the verifier reads at startup.
const PUBLIC_KEY_FILE: &str = "public_key.pem";

async fn run() -> LicenceResult<()> {
    let config = ServerConfig::load(Path::new(CONFIG_FILE_NAME))?;
    config.validate()?;

    let reporter: Arc<dyn EventReporter> = Arc::new(TracingReporter);
    let verifier = Arc::new(SignatureVerifier::from_pem_file(Path::new(PUBLIC_KEY_FILE))?);

    let store = Store::open(&config.data_file(), Arc::clone(&reporter)).await?;
    let manager = Arc::new(SeatManager::new(
        store,
        verifier,
        Arc::clone(&reporter),
        config.heartbeat,
    ));

    jobs::run_startup_maintenance(&manager, &config, &*reporter).await?;

    let config = Arc::new(config);
    let mut scheduler = MaintenanceScheduler::new(
        Arc::clone(&manager),
        Arc::clone(&reporter),
        &config,
    )
    .await
    .map_err(|e| roost::errors::LicenceError::ConfigError(e.to_string()))?;
    scheduler
        .start()
        .await
        .map_err(|e| roost::errors::LicenceError::ConfigError(e.to_string()))?;

    reporter.report(
        EventId::ServiceStart,
        &format!("roost {}", env!("CARGO_PKG_VERSION")),
    );

    let service = SeatService::new(Arc::clone(&manager), Arc::clone(&config));
    let shutdown = service.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            shutdown.cancel();
        }
    });
    let result = service.run().await;

    let _ = scheduler.shutdown().await;
    reporter.report(EventId::ServiceShutdown, "");
    result
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    if let Err(e) = run().await {
        error!("fatal: {e}");
        std::process::exit(1);
    }
}
