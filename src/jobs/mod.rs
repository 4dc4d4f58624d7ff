//! Scheduled maintenance for the licence server.
//!
//! Two responsibilities:
//!
//! - **Startup sequence**: ensure the data and licence folders exist,
//!   create the schema, load licences from disk, reap stale seats, then
//!   `ANALYZE` and `VACUUM`.
//!
//! - **Daily reload**: at the configured wall-clock time (default 02:30
//!   local) re-run the licence loader, reap stale seats, and refresh the
//!   database.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_cron_scheduler::{Job, JobScheduler as TokioJobScheduler};
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::errors::LicenceResult;
use crate::events::{EventId, EventReporter};
use crate::server::manager::SeatManager;

/// Errors from the maintenance scheduler.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("scheduler error: {0}")]
    SchedulerError(String),

    #[error("maintenance error: {0}")]
    MaintenanceError(String),
}

impl From<crate::errors::LicenceError> for JobError {
    fn from(err: crate::errors::LicenceError) -> Self {
        JobError::MaintenanceError(err.to_string())
    }
}

/// Create a folder if it is missing, reporting the creation.
fn ensure_folder(
    path: &Path,
    created_event: EventId,
    reporter: &dyn EventReporter,
) -> LicenceResult<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
        reporter.report(created_event, &path.display().to_string());
        info!("created folder '{}'", path.display());
    }
    Ok(())
}

/// Run the startup sequence.
///
/// Failures here are fatal to the caller: a server that cannot create its
/// database or read its licence folder must not come up.
pub async fn run_startup_maintenance(
    manager: &SeatManager,
    config: &ServerConfig,
    reporter: &dyn EventReporter,
) -> LicenceResult<()> {
    ensure_folder(
        &config.data_folder_path(),
        EventId::DataFolderCreated,
        reporter,
    )?;
    ensure_folder(
        &config.licence_folder_path(),
        EventId::LicenceFolderCreated,
        reporter,
    )?;

    manager.store().create_schema().await?;
    manager.load_licences(&config.licence_folder_path()).await?;
    manager.delete_stale_seats().await?;
    manager.store().analyze().await?;
    manager.store().vacuum().await?;
    Ok(())
}

/// Run one reload pass: licences from disk, stale reaping, database
/// upkeep. Used by the daily job and by operators forcing a reload.
pub async fn run_reload(manager: &SeatManager, licence_folder: &Path) -> Result<(), JobError> {
    manager.load_licences(licence_folder).await?;
    manager.delete_stale_seats().await?;
    manager.store().analyze().await?;
    manager.store().vacuum().await?;
    Ok(())
}

/// Schedules the daily licence reload.
pub struct MaintenanceScheduler {
    scheduler: TokioJobScheduler,
    manager: Arc<SeatManager>,
    reporter: Arc<dyn EventReporter>,
    licence_folder: PathBuf,
    reload_cron: String,
}

impl MaintenanceScheduler {
    pub async fn new(
        manager: Arc<SeatManager>,
        reporter: Arc<dyn EventReporter>,
        config: &ServerConfig,
    ) -> Result<Self, JobError> {
        let scheduler = TokioJobScheduler::new()
            .await
            .map_err(|e| JobError::SchedulerError(e.to_string()))?;
        let reload_cron = config
            .reload_cron()
            .map_err(|e| JobError::SchedulerError(e.to_string()))?;
        Ok(Self {
            scheduler,
            manager,
            reporter,
            licence_folder: config.licence_folder_path(),
            reload_cron,
        })
    }

    /// Register the reload job and start the scheduler.
    pub async fn start(&self) -> Result<(), JobError> {
        let manager = Arc::clone(&self.manager);
        let reporter = Arc::clone(&self.reporter);
        let licence_folder = self.licence_folder.clone();

        let job = Job::new_async(self.reload_cron.as_str(), move |_uuid, _scheduler| {
            let manager = Arc::clone(&manager);
            let reporter = Arc::clone(&reporter);
            let licence_folder = licence_folder.clone();
            Box::pin(async move {
                info!("running daily licence reload");
                reporter.report(EventId::LicenceDailyReload, "");
                if let Err(e) = run_reload(&manager, &licence_folder).await {
                    error!("daily licence reload failed: {e}");
                }
            })
        })
        .map_err(|e| JobError::SchedulerError(e.to_string()))?;

        self.scheduler
            .add(job)
            .await
            .map_err(|e| JobError::SchedulerError(e.to_string()))?;
        self.scheduler
            .start()
            .await
            .map_err(|e| JobError::SchedulerError(e.to_string()))?;

        info!("maintenance scheduler started (reload: {})", self.reload_cron);
        Ok(())
    }

    /// Stop the scheduler.
    pub async fn shutdown(&mut self) -> Result<(), JobError> {
        self.scheduler
            .shutdown()
            .await
            .map_err(|e| JobError::SchedulerError(e.to_string()))?;
        Ok(())
    }

    /// Run the reload immediately, outside the schedule.
    pub async fn run_reload_now(&self) -> Result<(), JobError> {
        run_reload(&self.manager, &self.licence_folder).await
    }
}
