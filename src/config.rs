use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::store::is_valid_identifier;

pub const DEFAULT_TICK_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_PUSH_BATCH_SIZE: usize = 100;
pub const DEFAULT_PORT: u16 = 8787;
pub const DEFAULT_PRIMARY_KEY: &str = "id";
pub const DEFAULT_TIMESTAMP_COLUMN: &str = "updated_at";

/// Static description of one replicated table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSyncSpec {
    pub name: String,
    #[serde(default = "default_primary_key", alias = "primary_key")]
    pub primary_key: String,
    #[serde(default = "default_timestamp_column", alias = "timestamp_column")]
    pub timestamp_column: String,
}

fn default_primary_key() -> String {
    DEFAULT_PRIMARY_KEY.to_string()
}

fn default_timestamp_column() -> String {
    DEFAULT_TIMESTAMP_COLUMN.to_string()
}

impl TableSyncSpec {
    pub fn new(name: &str, primary_key: &str, timestamp_column: &str) -> Self {
        Self {
            name: name.to_string(),
            primary_key: primary_key.to_string(),
            timestamp_column: timestamp_column.to_string(),
        }
    }

    /// Parse the `name[:primary_key[:timestamp_column]]` form used by `TABLESYNC_TABLES`.
    pub fn parse(entry: &str) -> Option<Self> {
        let mut parts = entry.trim().split(':').map(str::trim);
        let name = parts.next().filter(|n| !n.is_empty())?;
        let primary_key = parts
            .next()
            .filter(|p| !p.is_empty())
            .unwrap_or(DEFAULT_PRIMARY_KEY);
        let timestamp_column = parts
            .next()
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_TIMESTAMP_COLUMN);
        if parts.next().is_some() {
            return None;
        }
        Some(Self::new(name, primary_key, timestamp_column))
    }
}

/// Validated, immutable engine configuration.
///
/// A new configuration requires a new engine instance.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub remote_url: String,
    pub remote_key: String,
    pub local_url: String,
    pub tick_interval: Duration,
    pub read_only: bool,
    pub push_batch_size: usize,
    pub tables: Vec<TableSyncSpec>,
}

/// Public view of [`SyncConfig`] with credentials masked.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SanitizedConfig {
    pub remote_url: String,
    pub remote_key: String,
    pub local_url: String,
    pub tick_interval_ms: u64,
    pub read_only: bool,
    pub push_batch_size: usize,
    pub tables: Vec<TableSyncSpec>,
}

impl SyncConfig {
    /// Look up a configured table by name.
    pub fn table(&self, name: &str) -> Option<&TableSyncSpec> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn sanitized(&self) -> SanitizedConfig {
        SanitizedConfig {
            remote_url: self.remote_url.clone(),
            remote_key: "***".to_string(),
            local_url: mask_credentials(&self.local_url),
            tick_interval_ms: self.tick_interval.as_millis() as u64,
            read_only: self.read_only,
            push_batch_size: self.push_batch_size,
            tables: self.tables.clone(),
        }
    }
}

/// Replace the userinfo part of a connection URL with `***:***`.
///
/// Strings that are not URLs or carry no credentials are returned as-is.
pub fn mask_credentials(raw: &str) -> String {
    let Ok(mut parsed) = url::Url::parse(raw) else {
        return raw.to_string();
    };
    if parsed.username().is_empty() && parsed.password().is_none() {
        return raw.to_string();
    }
    if parsed.set_username("***").is_err() || parsed.set_password(Some("***")).is_err() {
        return raw.to_string();
    }
    parsed.to_string()
}

/// Application configuration: the engine settings plus process-level options.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub remote_url: Option<String>,
    pub remote_key: Option<String>,
    pub local_url: Option<String>,
    pub tick_interval_ms: u64,
    pub read_only: bool,
    pub push_batch_size: usize,
    /// Port for the control API
    pub port: u16,
    /// Start the sync loop as soon as the server comes up
    pub auto_start: bool,
    pub tables: Vec<TableSyncSpec>,
    /// Config file path used (if any)
    #[serde(skip)]
    pub config_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            remote_url: None,
            remote_key: None,
            local_url: None,
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            read_only: false,
            push_batch_size: DEFAULT_PUSH_BATCH_SIZE,
            port: DEFAULT_PORT,
            auto_start: false,
            tables: Vec::new(),
            config_file: None,
        }
    }
}

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        Self::load_from(config_path, |key| std::env::var(key).ok())
    }

    /// Same as [`Config::load`] with an explicit environment lookup.
    pub fn load_from<F>(config_path: Option<PathBuf>, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        let path = config_path.unwrap_or_else(Self::default_config_path);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
            config = serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(path.clone(), e))?;
            config.config_file = Some(path);
        }

        if let Some(url) = env("TABLESYNC_REMOTE_URL") {
            config.remote_url = Some(url);
        }
        if let Some(key) = env("TABLESYNC_REMOTE_KEY") {
            config.remote_key = Some(key);
        }
        if let Some(url) = env("TABLESYNC_LOCAL_URL") {
            config.local_url = Some(url);
        }
        if let Some(ms) = env("TABLESYNC_INTERVAL_MS") {
            config.tick_interval_ms = parse_env("TABLESYNC_INTERVAL_MS", &ms)?;
        }
        if let Some(flag) = env("TABLESYNC_READ_ONLY") {
            config.read_only = parse_flag("TABLESYNC_READ_ONLY", &flag)?;
        }
        if let Some(size) = env("TABLESYNC_PUSH_BATCH_SIZE") {
            config.push_batch_size = parse_env("TABLESYNC_PUSH_BATCH_SIZE", &size)?;
        }
        if let Some(port) = env("TABLESYNC_PORT") {
            config.port = parse_env("TABLESYNC_PORT", &port)?;
        }
        if let Some(flag) = env("TABLESYNC_AUTO_START") {
            config.auto_start = parse_flag("TABLESYNC_AUTO_START", &flag)?;
        }
        if let Some(list) = env("TABLESYNC_TABLES") {
            config.tables = list
                .split(',')
                .filter(|entry| !entry.trim().is_empty())
                .map(|entry| {
                    TableSyncSpec::parse(entry)
                        .ok_or_else(|| ConfigError::InvalidTable(entry.trim().to_string()))
                })
                .collect::<Result<_, _>>()?;
        }

        Ok(config)
    }

    /// Validate and freeze the engine part of the configuration.
    pub fn sync_config(&self) -> Result<SyncConfig, ConfigError> {
        let remote_url = required(&self.remote_url, "remote_url")?;
        let remote_key = required(&self.remote_key, "remote_key")?;
        let local_url = required(&self.local_url, "local_url")?;

        if self.tick_interval_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "tick_interval_ms".to_string(),
                "must be greater than zero".to_string(),
            ));
        }
        if self.push_batch_size == 0 {
            return Err(ConfigError::InvalidValue(
                "push_batch_size".to_string(),
                "must be greater than zero".to_string(),
            ));
        }
        if self.tables.is_empty() {
            return Err(ConfigError::NoTables);
        }

        let mut seen = std::collections::HashSet::new();
        for table in &self.tables {
            let names = [&table.name, &table.primary_key, &table.timestamp_column];
            if !names.iter().all(|n| is_valid_identifier(n)) {
                return Err(ConfigError::InvalidTable(format!(
                    "{}:{}:{}",
                    table.name, table.primary_key, table.timestamp_column
                )));
            }
            if !seen.insert(table.name.as_str()) {
                return Err(ConfigError::DuplicateTable(table.name.clone()));
            }
        }

        Ok(SyncConfig {
            remote_url: remote_url.trim_end_matches('/').to_string(),
            remote_key,
            local_url,
            tick_interval: Duration::from_millis(self.tick_interval_ms),
            read_only: self.read_only,
            push_batch_size: self.push_batch_size,
            tables: self.tables.clone(),
        })
    }

    /// Default config directory (platform-specific):
    /// - Linux: ~/.config/tablesync/
    /// - macOS: ~/Library/Application Support/tablesync/
    /// - Windows: %APPDATA%/tablesync/
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tablesync")
    }

    /// Default config file path (platform-specific config dir + config.yaml)
    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join("config.yaml")
    }
}

fn required(value: &Option<String>, field: &str) -> Result<String, ConfigError> {
    value
        .as_ref()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ConfigError::Missing(field.to_string()))
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(key.to_string(), raw.to_string()))
}

fn parse_flag(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue(key.to_string(), raw.to_string())),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    ReadError(PathBuf, std::io::Error),
    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    ParseError(PathBuf, serde_yaml::Error),
    #[error("Missing required setting: {0}")]
    Missing(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
    #[error("Invalid table entry: {0}")]
    InvalidTable(String),
    #[error("Table configured more than once: {0}")]
    DuplicateTable(String),
    #[error("No tables configured")]
    NoTables,
}
