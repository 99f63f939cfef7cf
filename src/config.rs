//! Configuration management for the admission service.
//!
//! Configuration is layered: built-in defaults, then an optional YAML file,
//! then `ADMISSION_`-prefixed environment variables. Nested keys use a double
//! underscore, e.g. `ADMISSION_LIMITER__ALGORITHM=leaky_bucket`.

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::error::{LimiterError, Result};

/// Main configuration for the admission service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Limiter configuration
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Logging level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log output format
    #[serde(default)]
    pub log_format: LogFormat,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            limiter: LimiterConfig::default(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,

    /// How long a request may wait for admission before it is cancelled
    #[serde(default = "default_admission_timeout")]
    pub admission_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            admission_timeout_ms: default_admission_timeout(),
        }
    }
}

impl ServerConfig {
    pub fn admission_timeout(&self) -> Duration {
        Duration::from_millis(self.admission_timeout_ms)
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, 8080))
}

fn default_admission_timeout() -> u64 {
    10_000
}

fn default_log_level() -> String {
    "info".to_string()
}

/// The admission algorithm a limiter runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    #[serde(alias = "token")]
    TokenBucket,
    #[serde(alias = "token_weighted")]
    WeightedTokenBucket,
    #[serde(alias = "leaky")]
    LeakyBucket,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::TokenBucket => "token_bucket",
            Algorithm::WeightedTokenBucket => "weighted_token_bucket",
            Algorithm::LeakyBucket => "leaky_bucket",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = LimiterError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "token_bucket" | "token" => Ok(Algorithm::TokenBucket),
            "weighted_token_bucket" | "token_weighted" => Ok(Algorithm::WeightedTokenBucket),
            "leaky_bucket" | "leaky" => Ok(Algorithm::LeakyBucket),
            other => Err(LimiterError::Config(format!(
                "unsupported algorithm: {other}"
            ))),
        }
    }
}

/// Limiter configuration as read from file or environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    #[serde(default = "default_algorithm")]
    pub algorithm: Algorithm,

    /// Tokens granted to each key per replenish interval
    #[serde(default = "default_max_tokens")]
    pub max_tokens: i64,

    #[serde(default = "default_replenish_interval")]
    pub replenish_interval_ms: u64,

    /// Tokens charged per unit of request weight
    #[serde(default = "default_weight_multiplier")]
    pub weight_multiplier: i64,

    /// Bounded queue length per key for the leaky bucket
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_leak_interval")]
    pub leak_interval_ms: u64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            algorithm: default_algorithm(),
            max_tokens: default_max_tokens(),
            replenish_interval_ms: default_replenish_interval(),
            weight_multiplier: default_weight_multiplier(),
            queue_capacity: default_queue_capacity(),
            leak_interval_ms: default_leak_interval(),
        }
    }
}

fn default_algorithm() -> Algorithm {
    Algorithm::TokenBucket
}

fn default_max_tokens() -> i64 {
    4
}

fn default_replenish_interval() -> u64 {
    1000
}

fn default_weight_multiplier() -> i64 {
    1
}

fn default_queue_capacity() -> usize {
    4
}

fn default_leak_interval() -> u64 {
    250
}

/// Validated, immutable limiter parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimiterSettings {
    pub algorithm: Algorithm,
    pub max_tokens: i64,
    pub replenish_interval: Duration,
    pub weight_multiplier: i64,
    pub queue_capacity: usize,
    pub leak_interval: Duration,
}

impl LimiterConfig {
    /// Check every parameter and produce the settings a limiter is built from.
    ///
    /// Invalid values are reported, never replaced with defaults.
    pub fn validate(&self) -> Result<LimiterSettings> {
        if self.max_tokens <= 0 {
            return Err(LimiterError::Config(format!(
                "max_tokens must be positive, got {}",
                self.max_tokens
            )));
        }
        if self.weight_multiplier <= 0 {
            return Err(LimiterError::Config(format!(
                "weight_multiplier must be positive, got {}",
                self.weight_multiplier
            )));
        }
        if self.queue_capacity == 0 {
            return Err(LimiterError::Config(
                "queue_capacity must be positive".to_string(),
            ));
        }
        if self.replenish_interval_ms == 0 {
            return Err(LimiterError::Config(
                "replenish_interval_ms must be positive".to_string(),
            ));
        }
        if self.leak_interval_ms == 0 {
            return Err(LimiterError::Config(
                "leak_interval_ms must be positive".to_string(),
            ));
        }

        Ok(LimiterSettings {
            algorithm: self.algorithm,
            max_tokens: self.max_tokens,
            replenish_interval: Duration::from_millis(self.replenish_interval_ms),
            weight_multiplier: self.weight_multiplier,
            queue_capacity: self.queue_capacity,
            leak_interval: Duration::from_millis(self.leak_interval_ms),
        })
    }
}

impl ServiceConfig {
    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| LimiterError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Load configuration from a YAML file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration file");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from defaults, an optional file and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(
                config::File::from(path).format(config::FileFormat::Yaml),
            );
        }

        builder
            .add_source(
                config::Environment::with_prefix("ADMISSION")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize::<ServiceConfig>())
            .map_err(|e| LimiterError::Config(e.to_string()))
    }
}

/// Command-line arguments.
///
/// Every argument can also be set through the environment. CLI values
/// override the loaded configuration file and `ADMISSION_*` variables.
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "admission", version, about = "Per-client request admission control service")]
pub struct Cli {
    /// Path to a YAML configuration file
    #[arg(long, env = "ADMISSION_CONFIG")]
    pub config: Option<PathBuf>,

    /// Admission algorithm (token_bucket, weighted_token_bucket, leaky_bucket)
    #[arg(long, env = "ADMISSION_ALGORITHM")]
    pub algorithm: Option<String>,

    /// HTTP listen address
    #[arg(long, env = "ADMISSION_HTTP_ADDR")]
    pub http_addr: Option<SocketAddr>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, env = "ADMISSION_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Log output format
    #[arg(long, env = "ADMISSION_LOG_FORMAT", value_enum)]
    pub log_format: Option<LogFormat>,
}

impl Cli {
    /// Load the configuration the arguments point at and apply overrides.
    pub fn into_config(self) -> Result<ServiceConfig> {
        let mut config = ServiceConfig::load(self.config.as_deref())?;
        self.apply(&mut config)?;
        Ok(config)
    }

    /// Apply command-line overrides to `config`.
    pub fn apply(&self, config: &mut ServiceConfig) -> Result<()> {
        if let Some(algorithm) = &self.algorithm {
            config.limiter.algorithm = algorithm.parse()?;
        }
        if let Some(addr) = self.http_addr {
            config.server.http_addr = addr;
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        if let Some(format) = self.log_format {
            config.log_format = format;
        }
        Ok(())
    }
}
