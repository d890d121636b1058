use std::sync::Arc;

use image::Limits;
use serde::Deserialize;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::decode::BYTES_PER_PIXEL;
use crate::error::ImagingError;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImagingConfig {
    /// Concurrent decode/encode operations across the process.
    pub concurrency: usize,
    /// Largest image (in pixels) the decoders will allocate for.
    pub max_pixels: u64,
    /// Level for the `imaging` log target.
    pub log_level: String,
}

impl Default for ImagingConfig {
    fn default() -> Self {
        Self {
            concurrency: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            max_pixels: 200_000_000,
            log_level: "warn".into(),
        }
    }
}

impl ImagingConfig {
    /// `EnvFilter` directive routing this crate's events at the configured level.
    pub fn filter_directive(&self) -> String {
        format!("imaging={}", self.log_level)
    }
}

/// Process-wide handle to the image library.
///
/// Created once at startup and shared; [`shutdown`](Self::shutdown) stops
/// new work from starting while letting running tasks finish.
#[derive(Clone)]
pub struct ImagingRuntime {
    permits: Arc<Semaphore>,
    limits: Limits,
}

impl ImagingRuntime {
    pub fn new(config: &ImagingConfig) -> Self {
        let concurrency = config.concurrency.max(1);
        let mut limits = Limits::default();
        limits.max_alloc = Some(config.max_pixels.saturating_mul(BYTES_PER_PIXEL));

        info!(
            concurrency,
            max_pixels = config.max_pixels,
            "Imaging runtime initialised"
        );
        Self {
            permits: Arc::new(Semaphore::new(concurrency)),
            limits,
        }
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Run CPU-bound imaging work on the blocking pool.
    pub async fn run<F, T>(&self, work: F) -> Result<T, ImagingError>
    where
        F: FnOnce(&Limits) -> Result<T, ImagingError> + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ImagingError::Closed)?;
        let limits = self.limits.clone();

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            work(&limits)
        })
        .await
        .map_err(|e| ImagingError::Task(e.to_string()))?
    }

    pub fn shutdown(&self) {
        if !self.permits.is_closed() {
            self.permits.close();
            debug!("Imaging runtime closed");
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.permits.is_closed()
    }
}
