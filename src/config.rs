//! Configuration management for Gatekeeper.
//!
//! Values are layered: built-in defaults, then an optional file, then
//! `GATEKEEPER__`-prefixed environment variables (for example
//! `GATEKEEPER__LIMITS__LOGIN__RATE=3`).

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{GatekeeperError, Result};
use crate::ratelimit::Policy;

const ENV_PREFIX: &str = "GATEKEEPER";
const ENV_SEPARATOR: &str = "__";

/// Main configuration for Gatekeeper.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatekeeperConfig {
    /// Policies for the named limiters
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Idle bucket eviction
    #[serde(default)]
    pub reaper: ReaperConfig,

    /// Metadata sent with rejections
    #[serde(default)]
    pub rejection: RejectionConfig,

    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Policies for the process-wide named limiters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// All traffic, keyed by client address
    #[serde(default = "default_global")]
    pub global: Policy,

    /// API traffic, keyed by client address and route
    #[serde(default = "default_api")]
    pub api: Policy,

    /// Authentication attempts, keyed by client address
    #[serde(default = "default_login")]
    pub login: Policy,

    /// Uploads, keyed by user or client address
    #[serde(default = "default_upload")]
    pub upload: Policy,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            global: default_global(),
            api: default_api(),
            login: default_login(),
            upload: default_upload(),
        }
    }
}

fn default_global() -> Policy {
    Policy::new(100, 200)
}

fn default_api() -> Policy {
    Policy::new(50, 100)
}

fn default_login() -> Policy {
    Policy::new(5, 10)
}

fn default_upload() -> Policy {
    Policy::new(10, 20)
}

/// Idle bucket eviction settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReaperConfig {
    /// Whether the background sweep runs at all
    #[serde(default = "default_reaper_enabled")]
    pub enabled: bool,

    /// Seconds between sweeps
    #[serde(default = "default_sweep_interval")]
    pub interval_secs: u64,

    /// Seconds a bucket may sit untouched before it is evicted
    #[serde(default = "default_idle_threshold")]
    pub idle_threshold_secs: u64,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            enabled: default_reaper_enabled(),
            interval_secs: default_sweep_interval(),
            idle_threshold_secs: default_idle_threshold(),
        }
    }
}

impl ReaperConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn idle_threshold(&self) -> Duration {
        Duration::from_secs(self.idle_threshold_secs)
    }
}

fn default_reaper_enabled() -> bool {
    true
}

fn default_sweep_interval() -> u64 {
    300
}

fn default_idle_threshold() -> u64 {
    600
}

/// Rejection metadata settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectionConfig {
    /// Fixed retry hint in seconds
    #[serde(default = "default_retry_after")]
    pub retry_after_secs: u64,
}

impl Default for RejectionConfig {
    fn default() -> Self {
        Self {
            retry_after_secs: default_retry_after(),
        }
    }
}

impl RejectionConfig {
    pub fn retry_after(&self) -> Duration {
        Duration::from_secs(self.retry_after_secs)
    }
}

fn default_retry_after() -> u64 {
    60
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Log line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

impl GatekeeperConfig {
    /// Load configuration from defaults, an optional file and the
    /// environment, then validate it.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, Self::environment())
    }

    fn load_with_env(path: Option<&Path>, env: config::Environment) -> Result<Self> {
        let mut builder = Self::defaults()?;

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(config::File::from(path));
        }

        let config: GatekeeperConfig = builder.add_source(env).build()?.try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML string layered over the defaults.
    ///
    /// A policy that sets only one of `rate` or `capacity` keeps the
    /// default for the other.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let document: serde_yaml::Value = serde_yaml::from_str(yaml)
            .map_err(|e| GatekeeperError::Config(format!("Failed to parse configuration: {}", e)))?;

        let mut builder = Self::defaults()?;
        if !document.is_null() {
            builder = builder.add_source(config::Config::try_from(&document)?);
        }

        let config: GatekeeperConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// A builder whose first layer is every built-in default.
    fn defaults() -> Result<config::ConfigBuilder<config::builder::DefaultState>> {
        let defaults = config::Config::try_from(&GatekeeperConfig::default())?;
        Ok(config::Config::builder().add_source(defaults))
    }

    fn environment() -> config::Environment {
        config::Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true)
    }

    /// Reject values that would make a limiter or the reaper meaningless.
    pub fn validate(&self) -> Result<()> {
        let limits = [
            ("global", self.limits.global),
            ("api", self.limits.api),
            ("login", self.limits.login),
            ("upload", self.limits.upload),
        ];

        for (name, policy) in limits {
            if policy.rate == 0 {
                return Err(GatekeeperError::Config(format!(
                    "limits.{}.rate must be greater than zero",
                    name
                )));
            }
            if policy.capacity == 0 {
                return Err(GatekeeperError::Config(format!(
                    "limits.{}.capacity must be greater than zero",
                    name
                )));
            }
        }

        if self.reaper.interval_secs == 0 {
            return Err(GatekeeperError::Config(
                "reaper.interval_secs must be greater than zero".to_string(),
            ));
        }

        if self.rejection.retry_after_secs == 0 {
            return Err(GatekeeperError::Config(
                "rejection.retry_after_secs must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}
