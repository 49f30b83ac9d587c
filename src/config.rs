use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::client::RetryPolicy;
use crate::error::EconError;
use crate::registry::{DatasetConfig, DatasetRegistry};

pub const DEFAULT_CONFIG_FILE: &str = "econ-data.json";
pub const DEFAULT_BASE_URL: &str = "https://sdmx.oecd.org/public/rest/data/";

/// Where a `--latest N` window ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LatestAnchor {
    /// Period containing today's date.
    Calendar,
    /// Latest period already stored for the dataset's metric.
    Storage,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SettingsFile {
    #[serde(default)]
    pub database_path: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_attempts: Option<usize>,
    #[serde(default)]
    pub retry_base_delay_ms: Option<u64>,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub latest_anchor: Option<LatestAnchor>,
    #[serde(default)]
    pub datasets: Vec<DatasetConfig>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub database_path: Utf8PathBuf,
    pub base_url: String,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub batch_size: usize,
    pub latest_anchor: LatestAnchor,
    pub datasets: Vec<DatasetConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: Utf8PathBuf::from("data/economic_data.db"),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
            batch_size: 30,
            latest_anchor: LatestAnchor::Calendar,
            datasets: Vec::new(),
        }
    }
}

impl Settings {
    pub fn registry(&self) -> DatasetRegistry {
        DatasetRegistry::with_builtins().merged(self.datasets.iter().cloned())
    }
}

pub struct SettingsLoader;

impl SettingsLoader {
    /// An explicit path must exist; the default file is optional.
    pub fn resolve(path: Option<&str>) -> Result<Settings, EconError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Ok(Settings::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| EconError::ConfigRead(config_path.clone()))?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Settings, EconError> {
        let file: SettingsFile =
            serde_json::from_str(content).map_err(|err| EconError::ConfigParse(err.to_string()))?;
        Self::resolve_file(file)
    }

    pub fn resolve_file(file: SettingsFile) -> Result<Settings, EconError> {
        let defaults = Settings::default();

        if file.batch_size == Some(0) {
            return Err(EconError::ConfigParse("batch_size must be at least 1".to_string()));
        }
        if file.max_attempts == Some(0) {
            return Err(EconError::ConfigParse(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        for dataset in &file.datasets {
            dataset.validate()?;
        }

        let base_url = file.base_url.unwrap_or(defaults.base_url);
        let base_url = if base_url.ends_with('/') {
            base_url
        } else {
            format!("{base_url}/")
        };

        Ok(Settings {
            database_path: file
                .database_path
                .map(Utf8PathBuf::from)
                .unwrap_or(defaults.database_path),
            base_url,
            timeout: file
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            retry: RetryPolicy {
                max_attempts: file.max_attempts.unwrap_or(defaults.retry.max_attempts),
                base_delay: file
                    .retry_base_delay_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.retry.base_delay),
            },
            batch_size: file.batch_size.unwrap_or(defaults.batch_size),
            latest_anchor: file.latest_anchor.unwrap_or(defaults.latest_anchor),
            datasets: file.datasets,
        })
    }
}
