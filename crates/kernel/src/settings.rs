use std::path::PathBuf;

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};

const DEFAULT_ENV: &str = "local";
const ENV_VAR_NAME: &str = "BOOKSWAP_ENV";
const CONFIG_DIR_ENV: &str = "BOOKSWAP_CONFIG_DIR";

/// Deployment environment the application is running in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Local,
    Staging,
    Production,
}

impl std::str::FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Environment::Local),
            "staging" => Ok(Environment::Staging),
            "production" => Ok(Environment::Production),
            other => Err(anyhow!(
                "unsupported environment '{}'; expected local/staging/production",
                other
            )),
        }
    }
}

/// Top-level configuration structure loaded from layered sources.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub environment: Environment,
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub telemetry: TelemetrySettings,
    #[serde(default)]
    pub catalog: CatalogSettings,
    #[serde(default)]
    pub trades: TradeSettings,
    #[serde(default)]
    pub users: UserSettings,
}

impl Settings {
    /// Load configuration by layering `.env`, base file, and environment overlay.
    pub fn load() -> anyhow::Result<Self> {
        // Allow missing `.env` files without failing.
        let _ = dotenvy::dotenv();

        let environment = std::env::var(ENV_VAR_NAME).unwrap_or_else(|_| DEFAULT_ENV.to_string());
        let config_dir = match std::env::var(CONFIG_DIR_ENV) {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => std::env::current_dir()
                .context("unable to resolve current directory")?
                .join("config"),
        };

        Self::load_from(&config_dir, &environment)
    }

    /// Load configuration from an explicit directory and environment name.
    pub fn load_from(config_dir: &std::path::Path, environment: &str) -> anyhow::Result<Self> {
        let environment_kind: Environment = environment.parse()?;

        let base_path = config_dir.join("base.toml");
        let environment_path = config_dir.join(format!("{}.toml", environment));

        let builder = config::Config::builder()
            .add_source(config::File::from(base_path).required(false))
            .add_source(config::File::from(environment_path).required(false))
            .add_source(config::Environment::with_prefix("BOOKSWAP").separator("__"));

        let cfg = builder
            .build()
            .with_context(|| "failed to build configuration")?;

        let mut settings: Settings = cfg
            .try_deserialize()
            .with_context(|| "failed to deserialize configuration")?;

        settings.environment = environment_kind;

        Ok(settings)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "ServerSettings::default_host")]
    pub host: String,
    #[serde(default = "ServerSettings::default_port")]
    pub port: u16,
    #[serde(default = "ServerSettings::default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl ServerSettings {
    fn default_host() -> String {
        "0.0.0.0".to_string()
    }

    fn default_port() -> u16 {
        8080
    }

    fn default_request_timeout_ms() -> u64 {
        15000
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
            request_timeout_ms: Self::default_request_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySettings {
    #[serde(default)]
    pub log_format: LogFormat,
    /// `EnvFilter` directive used when `RUST_LOG` is not set.
    #[serde(default = "TelemetrySettings::default_filter")]
    pub filter: String,
}

impl TelemetrySettings {
    fn default_filter() -> String {
        "info,tower_http=debug".to_string()
    }
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Pretty,
            filter: Self::default_filter(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Catalog lookup tuning. Every lookup is bounded by `attempt_timeout_ms`
/// and retried at most `max_retries` times with doubling backoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogSettings {
    #[serde(default)]
    pub seed_path: Option<String>,
    #[serde(default = "CatalogSettings::default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
    #[serde(default = "CatalogSettings::default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "CatalogSettings::default_backoff_ms")]
    pub backoff_ms: u64,
}

impl CatalogSettings {
    fn default_attempt_timeout_ms() -> u64 {
        2000
    }

    fn default_max_retries() -> u32 {
        2
    }

    fn default_backoff_ms() -> u64 {
        100
    }
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            seed_path: None,
            attempt_timeout_ms: Self::default_attempt_timeout_ms(),
            max_retries: Self::default_max_retries(),
            backoff_ms: Self::default_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeSettings {
    /// How many times a paired write is re-read and re-attempted after a version conflict.
    #[serde(default = "TradeSettings::default_commit_retries")]
    pub commit_retries: u32,
    /// Interval of the background reconciliation pass; 0 disables it.
    #[serde(default = "TradeSettings::default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,
}

impl TradeSettings {
    fn default_commit_retries() -> u32 {
        5
    }

    fn default_reconcile_interval_secs() -> u64 {
        300
    }
}

impl Default for TradeSettings {
    fn default() -> Self {
        Self {
            commit_retries: Self::default_commit_retries(),
            reconcile_interval_secs: Self::default_reconcile_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSettings {
    #[serde(default = "UserSettings::default_pending_ttl_secs")]
    pub pending_ttl_secs: u64,
}

impl UserSettings {
    fn default_pending_ttl_secs() -> u64 {
        600
    }
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            pending_ttl_secs: Self::default_pending_ttl_secs(),
        }
    }
}
