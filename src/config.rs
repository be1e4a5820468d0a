//! Application configuration.
//!
//! Layered with the `config` crate: built-in defaults, then an optional
//! `harvest.{toml,json,yaml}` in the working directory, then `HARVEST_*`
//! environment variables (`HARVEST_SINK__API_KEY`, `HARVEST_FETCH__TIMEOUT_SECS`, ...).

use serde::{Deserialize, Serialize};

/// Outbound HTTP settings shared by every source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Honour HTTP(S)_PROXY from the environment.
    #[serde(default)]
    pub trust_env_proxies: bool,
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36"
        .to_string()
}

fn default_timeout_secs() -> u64 {
    20
}

fn default_connect_timeout_secs() -> u64 {
    5
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            trust_env_proxies: false,
            accept_invalid_certs: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    #[default]
    Api,
    Sheet,
    Sqlite,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SheetFormat {
    #[default]
    Tsv,
    Csv,
}

impl SheetFormat {
    pub fn delimiter(self) -> char {
        match self {
            SheetFormat::Tsv => '\t',
            SheetFormat::Csv => ',',
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    #[serde(default)]
    pub kind: SinkKind,
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_api_timeout_secs")]
    pub api_timeout_secs: u64,
    #[serde(default = "default_sheet_path")]
    pub sheet_path: String,
    #[serde(default)]
    pub sheet_format: SheetFormat,
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,
}

fn default_api_timeout_secs() -> u64 {
    20
}

fn default_sheet_path() -> String {
    "profiles.tsv".to_string()
}

fn default_sqlite_path() -> String {
    "profiles.db".to_string()
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            kind: SinkKind::default(),
            api_url: None,
            api_key: None,
            api_timeout_secs: default_api_timeout_secs(),
            sheet_path: default_sheet_path(),
            sheet_format: SheetFormat::default(),
            sqlite_path: default_sqlite_path(),
        }
    }
}

/// HTTP extraction service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("harvest").required(false))
            .add_source(
                config::Environment::with_prefix("HARVEST")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }
}
