//! TOML run configuration.
//!
//! Every field has a default, so an empty file (or no file) is a valid
//! configuration: daily Yahoo candles for the Nifty-50 written as CSV under
//! `data/`. Brokerage secrets may come from `FIVEPAISA_*` environment
//! variables instead of the file.

use crate::batch::{BatchOptions, DispatchMode};
use chrono::{NaiveDate, NaiveDateTime};
use niftyfetch_core::data::{Credentials, Exchange, RetryPolicy};
use niftyfetch_core::domain::{default_history_start, Interval};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Csv,
    Sqlite,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(StorageBackend::Csv),
            "sqlite" | "db" => Ok(StorageBackend::Sqlite),
            other => Err(format!("unknown storage backend '{other}' (expected csv or sqlite)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Yahoo,
    FivePaisa,
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "yahoo" => Ok(ProviderKind::Yahoo),
            "fivepaisa" | "5paisa" => Ok(ProviderKind::FivePaisa),
            other => Err(format!("unknown provider '{other}' (expected yahoo or fivepaisa)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Directory of per-symbol CSV files.
    pub data_dir: PathBuf,
    /// SQLite database file for the sqlite backend.
    pub sqlite_path: PathBuf,
    /// Read existing CSV series from here instead of `data_dir` on update.
    pub load_dir: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Csv,
            data_dir: PathBuf::from("data"),
            sqlite_path: PathBuf::from("data/nifty50.db"),
            load_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub provider: ProviderKind,
    pub interval: Interval,
    pub concurrent: bool,
    pub workers: usize,
    /// Calls per window; unset means 50 sequential / 500 concurrent.
    pub rate_ceiling: Option<u32>,
    pub rate_window_secs: u64,
    /// Overrides the provider's own maximum request span.
    pub max_chunk_days: Option<i64>,
    pub reset_budget: bool,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    /// First day fetched for symbols with no persisted data.
    pub history_start: NaiveDate,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Yahoo,
            interval: Interval::Day1,
            concurrent: false,
            workers: 8,
            rate_ceiling: None,
            rate_window_secs: 60,
            max_chunk_days: None,
            reset_budget: true,
            max_retries: RetryPolicy::default().max_retries,
            retry_base_delay_ms: 500,
            history_start: default_history_start().date(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SymbolsConfig {
    /// Symbols to fetch; empty means the built-in Nifty-50 list.
    pub list: Vec<String>,
    /// Two-column `symbol,scrip code` file for the brokerage.
    pub lookup_file: Option<PathBuf>,
}

/// Complete configuration for one `niftyfetch` invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub storage: StorageConfig,
    pub fetch: FetchConfig,
    pub symbols: SymbolsConfig,
    pub fivepaisa: Credentials,
}

impl RunConfig {
    /// Load from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fetch.workers == 0 {
            return Err(ConfigError::Invalid("fetch.workers must be at least 1".into()));
        }
        if self.fetch.rate_window_secs == 0 {
            return Err(ConfigError::Invalid("fetch.rate_window_secs must be positive".into()));
        }
        if self.fetch.rate_ceiling == Some(0) {
            return Err(ConfigError::Invalid("fetch.rate_ceiling must be positive".into()));
        }
        if matches!(self.fetch.max_chunk_days, Some(d) if d <= 0) {
            return Err(ConfigError::Invalid("fetch.max_chunk_days must be positive".into()));
        }
        Ok(())
    }

    /// Fill brokerage credentials from `FIVEPAISA_*` environment variables.
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    /// Same as [`RunConfig::apply_env`] with an injectable lookup.
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let creds = &mut self.fivepaisa;
        let fields: [(&str, &mut String); 8] = [
            ("FIVEPAISA_APP_NAME", &mut creds.app_name),
            ("FIVEPAISA_APP_SOURCE", &mut creds.app_source),
            ("FIVEPAISA_USER_ID", &mut creds.user_id),
            ("FIVEPAISA_PASSWORD", &mut creds.password),
            ("FIVEPAISA_USER_KEY", &mut creds.user_key),
            ("FIVEPAISA_ENCRYPTION_KEY", &mut creds.encryption_key),
            ("FIVEPAISA_CLIENT_CODE", &mut creds.client_code),
            ("FIVEPAISA_PIN", &mut creds.pin),
        ];
        for (key, slot) in fields {
            if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
                *slot = value;
            }
        }
    }

    pub fn dispatch_mode(&self) -> DispatchMode {
        if self.fetch.concurrent {
            DispatchMode::Concurrent {
                workers: self.fetch.workers,
            }
        } else {
            DispatchMode::Sequential
        }
    }

    pub fn batch_options(&self) -> BatchOptions {
        BatchOptions {
            exchange: Exchange::default(),
            mode: self.dispatch_mode(),
            rate_ceiling: self.fetch.rate_ceiling,
            rate_window: Duration::from_secs(self.fetch.rate_window_secs),
            max_chunk: self.fetch.max_chunk_days.map(chrono::Duration::days),
            reset_budget: self.fetch.reset_budget,
            retry: RetryPolicy {
                max_retries: self.fetch.max_retries,
                base_delay: Duration::from_millis(self.fetch.retry_base_delay_ms),
            },
        }
    }

    pub fn history_start(&self) -> NaiveDateTime {
        self.fetch.history_start.and_time(Default::default())
    }
}
