use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Listing provider (Onbid open API) configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub service_key: String,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// Pagination and batch configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Safety cap on pages per batch.
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    #[serde(default = "default_page_delay_ms")]
    pub page_delay_ms: u64,

    #[serde(default = "default_region")]
    pub default_region: String,

    /// Batch jobs allowed to run at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl PipelineConfig {
    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_base_url() -> String {
    "http://openapi.onbid.co.kr/openapi/services/ThingInfoInquireSvc".to_string()
}
fn default_connect_timeout_secs() -> u64 {
    5
}
fn default_timeout_secs() -> u64 {
    10
}
fn default_max_retries() -> u32 {
    2
}
fn default_retry_base_ms() -> u64 {
    300
}
fn default_user_agent() -> String {
    "onbid-etl/0.1 (listing sync)".to_string()
}
fn default_db_path() -> PathBuf {
    PathBuf::from("data/onbid.duckdb")
}
fn default_true() -> bool {
    true
}
fn default_page_size() -> u32 {
    200
}
fn default_max_pages() -> u32 {
    50
}
fn default_page_delay_ms() -> u64 {
    500
}
fn default_region() -> String {
    "서울특별시".to_string()
}
fn default_concurrency() -> usize {
    3
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            service_key: String::new(),
            connect_timeout_secs: default_connect_timeout_secs(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            run_migrations: true,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            max_pages: default_max_pages(),
            page_delay_ms: default_page_delay_ms(),
            default_region: default_region(),
            concurrency: default_concurrency(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            storage: StorageConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("ONBID").separator("__"))
            .build()?;

        let app_cfg: AppConfig = match cfg.try_deserialize() {
            Ok(c) => c,
            Err(e) => {
                warn!("Invalid configuration ({}), falling back to defaults", e);
                AppConfig::default()
            }
        };
        Ok(app_cfg)
    }
}
