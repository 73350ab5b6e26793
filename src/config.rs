use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::error::GeneReportError;

pub const DEFAULT_CONFIG_FILE: &str = "gene-report.json";
pub const CDD_MAX_BATCH: usize = 4000;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub database: Option<DatabaseEntry>,
    #[serde(default)]
    pub gene_batch_size: Option<usize>,
    #[serde(default)]
    pub cdd_batch_size: Option<usize>,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub staging_dir: Option<String>,
    #[serde(default)]
    pub cdd_poll_interval_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct DatabaseEntry {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub connect_retries: Option<u32>,
    #[serde(default)]
    pub retry_base_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub connect_retries: u32,
    pub retry_base: Duration,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            host: "pub.microbesonline.org".to_string(),
            port: 3306,
            user: "guest".to_string(),
            password: "guest".to_string(),
            database: "genomics".to_string(),
            connect_retries: 3,
            retry_base: Duration::from_secs(60),
        }
    }
}

impl DatabaseSettings {
    // attempt is 1-based
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.retry_base + Duration::from_secs(2u64.saturating_pow(attempt))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub database: DatabaseSettings,
    pub gene_batch_size: usize,
    pub cdd_batch_size: usize,
    pub workers: usize,
    pub staging_dir: Utf8PathBuf,
    pub cdd_poll_interval: Duration,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            schema_version: 1,
            database: DatabaseSettings::default(),
            gene_batch_size: 250,
            cdd_batch_size: 250,
            workers: 5,
            staging_dir: Utf8PathBuf::from("tmp"),
            cdd_poll_interval: Duration::from_secs(2),
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, GeneReportError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| GeneReportError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| GeneReportError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, GeneReportError> {
        let defaults = ResolvedConfig::default();

        let database = match config.database {
            Some(entry) => {
                let base = defaults.database.clone();
                DatabaseSettings {
                    host: entry.host.unwrap_or(base.host),
                    port: entry.port.unwrap_or(base.port),
                    user: entry.user.unwrap_or(base.user),
                    password: entry.password.unwrap_or(base.password),
                    database: entry.database.unwrap_or(base.database),
                    connect_retries: entry.connect_retries.unwrap_or(base.connect_retries),
                    retry_base: entry
                        .retry_base_secs
                        .map(Duration::from_secs)
                        .unwrap_or(base.retry_base),
                }
            }
            None => defaults.database.clone(),
        };

        let resolved = ResolvedConfig {
            schema_version: config.schema_version.unwrap_or(defaults.schema_version),
            database,
            gene_batch_size: config.gene_batch_size.unwrap_or(defaults.gene_batch_size),
            cdd_batch_size: config.cdd_batch_size.unwrap_or(defaults.cdd_batch_size),
            workers: config.workers.unwrap_or(defaults.workers),
            staging_dir: config
                .staging_dir
                .map(Utf8PathBuf::from)
                .unwrap_or(defaults.staging_dir),
            cdd_poll_interval: config
                .cdd_poll_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.cdd_poll_interval),
        };
        resolved.validate()?;
        Ok(resolved)
    }
}

impl ResolvedConfig {
    pub fn validate(&self) -> Result<(), GeneReportError> {
        if self.gene_batch_size == 0 {
            return Err(GeneReportError::InvalidConfig(
                "gene_batch_size must be greater than zero".to_string(),
            ));
        }
        if self.cdd_batch_size == 0 || self.cdd_batch_size > CDD_MAX_BATCH {
            return Err(GeneReportError::InvalidConfig(format!(
                "cdd_batch_size must be between 1 and {CDD_MAX_BATCH}"
            )));
        }
        if self.workers == 0 {
            return Err(GeneReportError::InvalidConfig(
                "workers must be greater than zero".to_string(),
            ));
        }
        if self.cdd_poll_interval.is_zero() {
            return Err(GeneReportError::InvalidConfig(
                "cdd_poll_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.database.connect_retries == 0 {
            return Err(GeneReportError::InvalidConfig(
                "database.connect_retries must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
