//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{collections::HashMap, path::PathBuf, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::cache::DEFAULT_STORAGE_KEY;
use crate::client::DEFAULT_BASE_URL;

mod cli;

pub use cli::{CliArgs, Command, GetArgs, InvalidatePageArgs, Overrides, PageArgs};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "pagewire";
const DEFAULT_CACHE_TIME_MS: u64 = 5 * 60 * 1000;
const DEFAULT_STORAGE_DIR: &str = ".pagewire";
const DEFAULT_HOUSEKEEPING_INTERVAL_SECS: u64 = 60;
const DEFAULT_REVALIDATE_DELAY_MS: u64 = 100;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub client: ClientSettings,
    pub storage: StorageSettings,
    pub housekeeping: HousekeepingSettings,
    pub swr: SwrSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub base_url: String,
    pub headers: HeaderMap,
    pub default_cache_time: Duration,
    pub enable_cache: bool,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub directory: PathBuf,
    /// When false the cache lives in memory only.
    pub persist: bool,
    pub storage_key: String,
}

#[derive(Debug, Clone)]
pub struct HousekeepingSettings {
    pub interval: Duration,
}

#[derive(Debug, Clone)]
pub struct SwrSettings {
    pub revalidate_delay: Duration,
    pub stale_while_revalidate: bool,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("PAGEWIRE").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    client: RawClientSettings,
    storage: RawStorageSettings,
    housekeeping: RawHousekeepingSettings,
    swr: RawSwrSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(url) = overrides.base_url.as_ref() {
            self.client.base_url = Some(url.clone());
        }
        if let Some(ms) = overrides.default_cache_time_ms {
            self.client.default_cache_time_ms = Some(ms);
        }
        if let Some(enabled) = overrides.enable_cache {
            self.client.enable_cache = Some(enabled);
        }
        if let Some(directory) = overrides.storage_directory.as_ref() {
            self.storage.directory = Some(directory.clone());
        }
        if let Some(persist) = overrides.storage_persist {
            self.storage.persist = Some(persist);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            client,
            storage,
            housekeeping,
            swr,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            client: build_client_settings(client)?,
            storage: build_storage_settings(storage)?,
            housekeeping: build_housekeeping_settings(housekeeping)?,
            swr: build_swr_settings(swr),
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_client_settings(client: RawClientSettings) -> Result<ClientSettings, LoadError> {
    let base_url = client
        .base_url
        .map(|value| value.trim().trim_end_matches('/').to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
    let parsed = Url::parse(&base_url)
        .map_err(|err| LoadError::invalid("client.base_url", format!("`{base_url}`: {err}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(LoadError::invalid(
            "client.base_url",
            "scheme must be http or https",
        ));
    }

    let cache_time_ms = client
        .default_cache_time_ms
        .unwrap_or(DEFAULT_CACHE_TIME_MS);
    if cache_time_ms == 0 {
        return Err(LoadError::invalid(
            "client.default_cache_time_ms",
            "must be greater than zero",
        ));
    }

    let mut headers = HeaderMap::new();
    for (name, value) in client.headers.unwrap_or_default() {
        let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|err| {
            LoadError::invalid("client.headers", format!("invalid header name `{name}`: {err}"))
        })?;
        let header_value = HeaderValue::from_str(&value).map_err(|err| {
            LoadError::invalid(
                "client.headers",
                format!("invalid value for header `{name}`: {err}"),
            )
        })?;
        headers.insert(header_name, header_value);
    }

    Ok(ClientSettings {
        base_url,
        headers,
        default_cache_time: Duration::from_millis(cache_time_ms),
        enable_cache: client.enable_cache.unwrap_or(true),
    })
}

fn build_storage_settings(storage: RawStorageSettings) -> Result<StorageSettings, LoadError> {
    let directory = storage
        .directory
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_DIR));
    if directory.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "storage.directory",
            "path must not be empty",
        ));
    }

    let storage_key = storage
        .storage_key
        .unwrap_or_else(|| DEFAULT_STORAGE_KEY.to_string());
    if storage_key.trim().is_empty() {
        return Err(LoadError::invalid(
            "storage.storage_key",
            "must not be empty",
        ));
    }

    Ok(StorageSettings {
        directory,
        persist: storage.persist.unwrap_or(true),
        storage_key,
    })
}

fn build_housekeeping_settings(
    housekeeping: RawHousekeepingSettings,
) -> Result<HousekeepingSettings, LoadError> {
    let interval_seconds = housekeeping
        .interval_seconds
        .unwrap_or(DEFAULT_HOUSEKEEPING_INTERVAL_SECS);
    if interval_seconds == 0 {
        return Err(LoadError::invalid(
            "housekeeping.interval_seconds",
            "must be greater than zero",
        ));
    }

    Ok(HousekeepingSettings {
        interval: Duration::from_secs(interval_seconds),
    })
}

fn build_swr_settings(swr: RawSwrSettings) -> SwrSettings {
    SwrSettings {
        revalidate_delay: Duration::from_millis(
            swr.revalidate_delay_ms
                .unwrap_or(DEFAULT_REVALIDATE_DELAY_MS),
        ),
        stale_while_revalidate: swr.stale_while_revalidate.unwrap_or(true),
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawClientSettings {
    base_url: Option<String>,
    default_cache_time_ms: Option<u64>,
    enable_cache: Option<bool>,
    headers: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStorageSettings {
    directory: Option<PathBuf>,
    persist: Option<bool>,
    storage_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawHousekeepingSettings {
    interval_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSwrSettings {
    revalidate_delay_ms: Option<u64>,
    stale_while_revalidate: Option<bool>,
}
