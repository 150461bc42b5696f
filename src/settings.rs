use std::path::PathBuf;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::fetcher::RetryPolicy;

const CONFIG_FILE: &str = "realty";
const ENV_PREFIX: &str = "REALTY";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database_path: PathBuf,
    /// Search pages fetched, extracted and committed together.
    pub batch_size: usize,
    /// Extraction threads; 0 sizes the pool to the available cores.
    pub workers: usize,
    pub user_agent: String,
    pub request_timeout_secs: u64,
    pub retry: RetrySettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub connection_retries: u32,
}

impl Settings {
    /// Defaults, then `realty.toml` if present, then `REALTY_*` env vars
    /// (nested keys use `__`, e.g. `REALTY_RETRY__MAX_ATTEMPTS`).
    pub fn load() -> Result<Self> {
        let settings: Settings = Config::builder()
            .set_default("database_path", "data/real_estate.sqlite")?
            .set_default("batch_size", 40_i64)?
            .set_default("workers", 0_i64)?
            .set_default("user_agent", concat!("realty_scraper/", env!("CARGO_PKG_VERSION")))?
            .set_default("request_timeout_secs", 30_i64)?
            .set_default("retry.max_attempts", 5_i64)?
            .set_default("retry.base_delay_ms", 100_i64)?
            .set_default("retry.connection_retries", 1_i64)?
            .add_source(File::with_name(CONFIG_FILE).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to load settings")?
            .try_deserialize()
            .context("Invalid settings")?;

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        ensure!(self.batch_size >= 1, "batch_size must be at least 1");
        ensure!(self.retry.max_attempts >= 1, "retry.max_attempts must be at least 1");
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            connection_retries: self.retry.connection_retries,
        }
    }
}
