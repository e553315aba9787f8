//! Configuration management for keyrate.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{KeyrateError, Result};
use crate::ratelimit::{
    Clock, FixedIntervalLimiter, RateLimiter, SlidingWindowLimiter, SystemClock,
};

/// Prefix for environment variable overrides, e.g. `KEYRATE__LIMITER__MAX_REQUESTS=5`.
const ENV_PREFIX: &str = "KEYRATE";

/// Main configuration for keyrate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyrateConfig {
    /// Rate limiter configuration
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Synthetic traffic configuration
    #[serde(default)]
    pub simulation: SimulationConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Admission policy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Policy {
    /// Bounded admissions per trailing window
    SlidingWindow,
    /// Minimum gap between admissions
    FixedInterval,
}

/// Rate limiter configuration.
///
/// Only the fields relevant to the selected policy are used.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Which policy to build
    #[serde(default = "default_policy")]
    pub policy: Policy,

    /// Sliding window length in seconds
    #[serde(default = "default_window_size")]
    pub window_size_secs: f64,

    /// Admissions allowed per key within one sliding window
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,

    /// Minimum gap between admissions in seconds
    #[serde(default = "default_min_interval")]
    pub min_interval_secs: f64,

    /// How often to sweep idle keys, in seconds; never when unset
    #[serde(default)]
    pub sweep_interval_secs: Option<f64>,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            policy: default_policy(),
            window_size_secs: default_window_size(),
            max_requests: default_max_requests(),
            min_interval_secs: default_min_interval(),
            sweep_interval_secs: None,
        }
    }
}

fn default_policy() -> Policy {
    Policy::SlidingWindow
}

fn default_window_size() -> f64 {
    10.0
}

fn default_max_requests() -> u32 {
    1
}

fn default_min_interval() -> f64 {
    10.0
}

impl LimiterConfig {
    /// Build the configured limiter on the system clock.
    pub fn build(&self) -> Result<Box<dyn RateLimiter>> {
        self.build_with_clock(SystemClock)
    }

    /// Build the configured limiter on the given clock.
    pub fn build_with_clock<C: Clock + 'static>(&self, clock: C) -> Result<Box<dyn RateLimiter>> {
        let limiter: Box<dyn RateLimiter> = match self.policy {
            Policy::SlidingWindow => Box::new(SlidingWindowLimiter::with_clock(
                seconds("window_size_secs", self.window_size_secs)?,
                self.max_requests,
                clock,
            )?),
            Policy::FixedInterval => Box::new(FixedIntervalLimiter::with_clock(
                seconds("min_interval_secs", self.min_interval_secs)?,
                clock,
            )?),
        };
        Ok(limiter)
    }

    /// The background sweep period, if one is configured.
    pub fn sweep_interval(&self) -> Result<Option<Duration>> {
        self.sweep_interval_secs
            .map(|secs| seconds("sweep_interval_secs", secs))
            .transpose()
    }
}

/// Synthetic traffic configuration for the demo harness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Number of distinct users sending messages
    #[serde(default = "default_users")]
    pub users: u32,

    /// Messages sent in each phase
    #[serde(default = "default_messages_per_phase")]
    pub messages_per_phase: u32,

    /// Number of phases
    #[serde(default = "default_phases")]
    pub phases: u32,

    /// Idle time between phases in seconds
    #[serde(default = "default_pause_between_phases")]
    pub pause_between_phases_secs: f64,

    /// Lower bound of the random delay between messages
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,

    /// Upper bound of the random delay between messages
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            users: default_users(),
            messages_per_phase: default_messages_per_phase(),
            phases: default_phases(),
            pause_between_phases_secs: default_pause_between_phases(),
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_users() -> u32 {
    5
}

fn default_messages_per_phase() -> u32 {
    10
}

fn default_phases() -> u32 {
    2
}

fn default_pause_between_phases() -> f64 {
    4.0
}

fn default_min_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    1000
}

impl SimulationConfig {
    /// Check that the traffic shape is usable.
    pub fn validate(&self) -> Result<()> {
        if self.users == 0 {
            return Err(KeyrateError::InvalidConfig(
                "simulation.users must be greater than zero".to_string(),
            ));
        }
        if self.min_delay_ms > self.max_delay_ms {
            return Err(KeyrateError::InvalidConfig(format!(
                "simulation.min_delay_ms ({}) exceeds max_delay_ms ({})",
                self.min_delay_ms, self.max_delay_ms
            )));
        }
        if Duration::try_from_secs_f64(self.pause_between_phases_secs).is_err() {
            return Err(KeyrateError::InvalidConfig(format!(
                "simulation.pause_between_phases_secs must be non-negative, got {}",
                self.pause_between_phases_secs
            )));
        }
        Ok(())
    }

    /// Idle time between phases.
    pub fn pause_between_phases(&self) -> Duration {
        Duration::from_secs_f64(self.pause_between_phases_secs)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is not set
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

impl KeyrateConfig {
    /// Load configuration from a YAML file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| KeyrateError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Load configuration from an optional YAML file layered with
    /// `KEYRATE__*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration");
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Yaml)
                    .required(true),
            );
        }

        builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|settings| settings.try_deserialize::<KeyrateConfig>())
            .map_err(|e| KeyrateError::Config(e.to_string()))
    }
}

/// Convert a configured number of seconds into a strictly positive duration.
fn seconds(field: &str, value: f64) -> Result<Duration> {
    if !(value.is_finite() && value > 0.0) {
        return Err(KeyrateError::InvalidConfig(format!(
            "{} must be a positive number of seconds, got {}",
            field, value
        )));
    }
    Duration::try_from_secs_f64(value)
        .map_err(|e| KeyrateError::InvalidConfig(format!("{}: {}", field, e)))
}
