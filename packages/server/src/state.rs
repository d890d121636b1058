use std::sync::Arc;
use std::time::Duration;

use common::storage::{Library, StorageError};
use imaging::ImagingRuntime;
use mq::MessageBus;
use sea_orm::DatabaseConnection;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use worker::{Governors, WorkerPool};

use crate::assets::AssetStore;
use crate::config::AppConfig;
use crate::consumers::{self, HandlerDeps};
use crate::downloads;
use crate::events::EventBroker;
use crate::jobs::{JobBus, JobBusError};
use crate::transforms::TransformEngine;
use crate::transforms::gc::{GcPolicy, run_gc_loop};

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub config: Arc<AppConfig>,
    pub library: Library,
    pub imaging: ImagingRuntime,
    pub jobs: Arc<JobBus>,
    pub events: Arc<EventBroker>,
    /// Client for URL uploads.
    pub http: reqwest::Client,
}

impl AppState {
    pub fn assets(&self) -> AssetStore<'_> {
        AssetStore::new(&self.db, &self.library, &self.imaging)
    }

    pub fn transforms(&self) -> TransformEngine<'_> {
        TransformEngine::new(&self.library, &self.imaging)
    }
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Job recovery failed: {0}")]
    Jobs(#[from] JobBusError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Everything `main` (and the integration tests) run.
pub struct Services {
    pub state: AppState,
    pub pool: WorkerPool,
    /// Stops the background sweeps.
    pub background: CancellationToken,
}

impl Services {
    /// Wire the state, worker pool and handlers over `db` and `bus`.
    ///
    /// `durable_bus` says whether queued messages survive a restart; when
    /// not, queued rows from an earlier run are published again.
    pub async fn build(
        config: AppConfig,
        db: DatabaseConnection,
        bus: Arc<dyn MessageBus>,
        durable_bus: bool,
    ) -> Result<Self, StartupError> {
        let library = Library::open(&config.storage.library_root, &config.storage.trash_root).await?;
        let imaging = ImagingRuntime::new(&config.imaging);
        let events = Arc::new(EventBroker::new(&config.events));
        let governors = Arc::new(Governors::new(&config.jobs.concurrency));

        let jobs = Arc::new(JobBus::new(
            db.clone(),
            Arc::clone(&bus),
            Arc::clone(&governors),
            Arc::clone(&events),
        ));
        jobs.recover_interrupted(!durable_bus).await?;

        let mut pool = WorkerPool::new(bus, jobs.clone(), governors, config.jobs.retry.clone());
        consumers::register(
            &mut pool,
            HandlerDeps {
                db: db.clone(),
                library: library.clone(),
                imaging: imaging.clone(),
                events: Arc::clone(&events),
            },
        );

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.storage.url_upload_timeout_secs))
            .build()?;

        Ok(Self {
            state: AppState {
                db,
                config: Arc::new(config),
                library,
                imaging,
                jobs,
                events,
                http,
            },
            pool,
            background: CancellationToken::new(),
        })
    }

    /// Start the dispatchers and the periodic sweeps.
    pub fn start(&self) {
        self.pool.start();

        let config = &self.state.config;
        tokio::spawn(run_gc_loop(
            self.state.db.clone(),
            self.state.library.clone(),
            GcPolicy::from(&config.transforms),
            Duration::from_secs(config.transforms.gc_interval_secs.max(1)),
            self.background.clone(),
        ));
        tokio::spawn(downloads::run_token_gc_loop(
            self.state.db.clone(),
            Duration::from_secs(config.downloads.token_gc_interval_secs.max(1)),
            self.background.clone(),
        ));
    }

    /// Stop sweeps and dispatchers, then close the imaging runtime and
    /// disconnect event clients.
    pub async fn shutdown(&self, grace: Duration) {
        self.background.cancel();
        self.pool.shutdown(grace).await;
        self.state.imaging.shutdown();
        self.state.events.disconnect_all();
    }
}
