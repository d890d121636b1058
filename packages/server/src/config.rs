use std::path::PathBuf;

use common::config::{JobsConfig, MqAppConfig};
use config::{Config, ConfigError, Environment, File};
use imaging::ImagingConfig;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Host (optionally with port) the server is reached at. Requests whose
    /// `Referer`/`Origin` name another host count as embeds.
    #[serde(default)]
    pub public_host: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub library_root: PathBuf,
    pub trash_root: PathBuf,
    /// Largest accepted upload in bytes. Default: 200 MiB.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
    /// Whether `POST /images/url` may fetch remote files. Default: false.
    #[serde(default)]
    pub allow_url_upload: bool,
    #[serde(default = "default_url_upload_timeout_secs")]
    pub url_upload_timeout_secs: u64,
}

fn default_max_upload_bytes() -> u64 {
    200 * 1024 * 1024
}
fn default_url_upload_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct TransformsConfig {
    /// Seconds between cache sweeps. Default: 3600.
    #[serde(default = "default_gc_interval_secs")]
    pub gc_interval_secs: u64,
    /// Cached files older than this are removed. Default: 30.
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u64,
    /// Total cache size above which the oldest files are evicted. Default: 10 GiB.
    #[serde(default = "default_max_size_bytes")]
    pub max_size_bytes: u64,
    /// Keep `thumbnail` and `preview` renditions during sweeps. Default: true.
    #[serde(default = "default_true")]
    pub preserve_permanent: bool,
}

fn default_gc_interval_secs() -> u64 {
    3600
}
fn default_max_age_days() -> u64 {
    30
}
fn default_max_size_bytes() -> u64 {
    10 * 1024 * 1024 * 1024
}
fn default_true() -> bool {
    true
}

impl Default for TransformsConfig {
    fn default() -> Self {
        Self {
            gc_interval_secs: default_gc_interval_secs(),
            max_age_days: default_max_age_days(),
            max_size_bytes: default_max_size_bytes(),
            preserve_permanent: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EventsConfig {
    /// Events kept for replay. Default: 512.
    #[serde(default = "default_history_size")]
    pub history_size: usize,
    /// Messages buffered per WebSocket client before drops. Default: 64.
    #[serde(default = "default_client_buffer")]
    pub client_buffer: usize,
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
}

fn default_history_size() -> usize {
    512
}
fn default_client_buffer() -> usize {
    64
}
fn default_ping_interval_secs() -> u64 {
    30
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            history_size: default_history_size(),
            client_buffer: default_client_buffer(),
            ping_interval_secs: default_ping_interval_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DownloadsConfig {
    /// Seconds between sweeps of expired download tokens. Default: 600.
    #[serde(default = "default_token_gc_interval_secs")]
    pub token_gc_interval_secs: u64,
    /// Lifetime of the token minted by `GET /images/{uid}/download`. Default: 300.
    #[serde(default = "default_single_download_ttl_secs")]
    pub single_download_ttl_secs: u64,
}

fn default_token_gc_interval_secs() -> u64 {
    600
}
fn default_single_download_ttl_secs() -> u64 {
    300
}

impl Default for DownloadsConfig {
    fn default() -> Self {
        Self {
            token_gc_interval_secs: default_token_gc_interval_secs(),
            single_download_ttl_secs: default_single_download_ttl_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    /// Default filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub mq: MqAppConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub transforms: TransformsConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub imaging: ImagingConfig,
    #[serde(default)]
    pub downloads: DownloadsConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let s = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 3000)?
            .set_default("storage.library_root", "./data/library")?
            .set_default("storage.trash_root", "./data/trash")?
            // Load from config/config.toml
            .add_source(File::with_name("config/config").required(false))
            // Override from environment (e.g., LUMEN__AUTH__JWT_SECRET)
            .add_source(Environment::with_prefix("LUMEN").separator("__"))
            .build()?;

        s.try_deserialize()
    }

    /// Host used when deciding whether a request is an embed.
    pub fn own_host(&self) -> String {
        self.server
            .public_host
            .clone()
            .unwrap_or_else(|| format!("{}:{}", self.server.host, self.server.port))
    }
}
