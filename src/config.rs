//! Configuration — TOML file defaults + environment variable overrides.
//!
//! Tunables live in `config/default.toml` and can be overridden with
//! `AD__`-prefixed env vars. `DATABASE_URL` is honored directly.

use serde::Deserialize;
use std::env;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub web: WebConfig,
    pub database: DatabaseConfig,
    pub serving: ServingConfig,
    pub rtb: RtbConfig,
    pub fraud: FraudConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_true() -> bool {
    true
}
fn default_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServingConfig {
    /// Base URL prepended to click/impression tracking paths.
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
    /// Daily spend cap applied to campaigns with no explicit daily budget
    /// (0 = uncapped).
    #[serde(default)]
    pub default_daily_budget: f64,
}

fn default_public_base_url() -> String {
    "http://localhost:8080".into()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RtbConfig {
    /// Advisory candidate-loading budget per bid request, milliseconds.
    #[serde(default = "default_rtb_timeout_ms")]
    pub default_timeout_ms: u64,
    /// Bids priced below this floor are discarded.
    #[serde(default)]
    pub default_floor: f64,
}

fn default_rtb_timeout_ms() -> u64 {
    100
}

#[derive(Debug, Clone, Deserialize)]
pub struct FraudConfig {
    /// Score at or above which a click is flagged (still billed).
    #[serde(default = "default_flag_threshold")]
    pub flag_threshold: u8,
    /// Score at or above which a click is blocked (never billed).
    #[serde(default = "default_block_threshold")]
    pub block_threshold: u8,
}

fn default_flag_threshold() -> u8 {
    50
}
fn default_block_threshold() -> u8 {
    80
}

impl Default for FraudConfig {
    fn default() -> Self {
        Self {
            flag_threshold: default_flag_threshold(),
            block_threshold: default_block_threshold(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub json_output: bool,
}

fn default_log_level() -> String {
    "info".into()
}

impl Config {
    /// Load configuration from `config/default.toml` merged with env vars.
    pub fn load() -> anyhow::Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(
                config::Environment::with_prefix("AD")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut cfg: Config = builder.try_deserialize()?;

        // DATABASE_URL wins over anything in TOML
        if let Ok(v) = env::var("DATABASE_URL") {
            cfg.database.url = v;
        }
        if let Ok(v) = env::var("PUBLIC_BASE_URL") {
            cfg.serving.public_base_url = v;
        }

        Ok(cfg)
    }
}
