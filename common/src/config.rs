// Configuration management with layered configuration (file, env)

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::credentials::Credential;
use crate::models::Platform;
use crate::retry::ExponentialBackoff;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub store: StoreConfig,
    pub database: DatabaseConfig,
    pub scheduler: SchedulerConfig,
    pub validator: ValidatorConfig,
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerSettings,
    pub platforms: BTreeMap<Platform, PlatformSettings>,
    pub credentials: BTreeMap<Platform, Credential>,
    pub ops: OpsConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// JSON array of content items loaded into the memory backend at start-up
    pub seed_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/publisher".to_string(),
            max_connections: 10,
            min_connections: 2,
            connect_timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub tick_interval_seconds: u64,
    /// How early before `scheduled_at` an attempt may start
    pub early_grace_seconds: u64,
    /// Age after which a held tick flag is considered abandoned
    pub stuck_tick_timeout_seconds: u64,
    pub max_concurrent_pairs: usize,
    pub max_items_per_tick: usize,
    pub credential_min_validity_seconds: u64,
    pub outcome_write_retries: u32,
    pub outcome_write_retry_delay_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_seconds: 90,
            early_grace_seconds: crate::publication::DEFAULT_GRACE_SECONDS as u64,
            stuck_tick_timeout_seconds: 60,
            max_concurrent_pairs: 8,
            max_items_per_tick: 100,
            credential_min_validity_seconds: 60,
            outcome_write_retries: 3,
            outcome_write_retry_delay_ms: 200,
        }
    }
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_seconds)
    }

    pub fn grace(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.early_grace_seconds as i64)
    }

    pub fn stuck_tick_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stuck_tick_timeout_seconds as i64)
    }

    pub fn credential_min_validity(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.credential_min_validity_seconds as i64)
    }

    pub fn outcome_write_retry_delay(&self) -> Duration {
        Duration::from_millis(self.outcome_write_retry_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    pub interval_seconds: u64,
    pub batch_size: usize,
    /// A `publishing` record older than this is considered interrupted
    pub stale_publishing_seconds: u64,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 300,
            batch_size: 100,
            stale_publishing_seconds: 900,
        }
    }
}

impl ValidatorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn stale_publishing(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stale_publishing_seconds as i64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// 0 disables automatic retries
    pub max_auto_retries: u32,
    pub base_delay_seconds: u64,
    pub max_delay_seconds: u64,
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_auto_retries: 3,
            base_delay_seconds: 60,
            max_delay_seconds: 3600,
            jitter_factor: 0.1,
        }
    }
}

impl RetryConfig {
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::with_config(
            self.base_delay_seconds,
            self.max_delay_seconds,
            self.jitter_factor,
            self.max_auto_retries,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub failure_threshold: u32,
    pub open_seconds: u64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_seconds: 60,
        }
    }
}

impl From<&CircuitBreakerSettings> for CircuitBreakerConfig {
    fn from(settings: &CircuitBreakerSettings) -> Self {
        Self {
            failure_threshold: settings.failure_threshold,
            timeout: Duration::from_secs(settings.open_seconds),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformSettings {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub endpoint: String,
    #[serde(default = "default_platform_timeout")]
    pub timeout_seconds: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_platform_timeout() -> u64 {
    30
}

impl PlatformSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpsConfig {
    pub host: String,
    pub port: u16,
}

impl Default for OpsConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub metrics_port: u16,
    pub tracing_endpoint: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_port: 9090,
            tracing_endpoint: None,
        }
    }
}

impl Settings {
    /// Load configuration with layered precedence: defaults → file → env
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Not committed to git
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Enabled platforms with their settings
    pub fn enabled_platforms(&self) -> impl Iterator<Item = (Platform, &PlatformSettings)> {
        self.platforms
            .iter()
            .filter(|(_, p)| p.enabled)
            .map(|(platform, p)| (*platform, p))
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), String> {
        if self.ops.port == 0 {
            return Err("Ops port must be greater than 0".to_string());
        }

        match self.store.backend {
            StoreBackend::Postgres => {
                if self.database.url.is_empty() {
                    return Err("Database URL cannot be empty".to_string());
                }
                if self.database.max_connections == 0 {
                    return Err("Database max_connections must be greater than 0".to_string());
                }
            }
            StoreBackend::Memory => {}
        }

        let scheduler = &self.scheduler;
        if scheduler.tick_interval_seconds == 0 {
            return Err("Scheduler tick_interval_seconds must be greater than 0".to_string());
        }
        if scheduler.early_grace_seconds >= scheduler.tick_interval_seconds {
            return Err(format!(
                "Scheduler early_grace_seconds ({}) must be less than tick_interval_seconds ({})",
                scheduler.early_grace_seconds, scheduler.tick_interval_seconds
            ));
        }
        if scheduler.max_concurrent_pairs == 0 {
            return Err("Scheduler max_concurrent_pairs must be greater than 0".to_string());
        }
        if scheduler.max_items_per_tick == 0 {
            return Err("Scheduler max_items_per_tick must be greater than 0".to_string());
        }

        let max_timeout = self
            .enabled_platforms()
            .map(|(_, p)| p.timeout_seconds)
            .max()
            .unwrap_or(0);
        if scheduler.stuck_tick_timeout_seconds < max_timeout {
            return Err(format!(
                "Scheduler stuck_tick_timeout_seconds ({}) must be at least the largest platform timeout ({})",
                scheduler.stuck_tick_timeout_seconds, max_timeout
            ));
        }

        for (platform, settings) in self.enabled_platforms() {
            if settings.endpoint.is_empty() {
                return Err(format!("Platform {} endpoint cannot be empty", platform));
            }
            if settings.timeout_seconds == 0 {
                return Err(format!("Platform {} timeout_seconds must be greater than 0", platform));
            }
        }

        if self.validator.batch_size == 0 {
            return Err("Validator batch_size must be greater than 0".to_string());
        }
        if self.validator.interval_seconds == 0 {
            return Err("Validator interval_seconds must be greater than 0".to_string());
        }
        // A tick starts no pair after the stuck timeout, so its last attempt ends
        // within one platform timeout of that
        let longest_tick = scheduler.stuck_tick_timeout_seconds + max_timeout;
        if self.validator.stale_publishing_seconds <= longest_tick {
            return Err(format!(
                "Validator stale_publishing_seconds ({}) must exceed stuck_tick_timeout_seconds plus the largest platform timeout ({})",
                self.validator.stale_publishing_seconds, longest_tick
            ));
        }

        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            return Err("Retry jitter_factor must be between 0.0 and 1.0".to_string());
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err("Circuit breaker failure_threshold must be greater than 0".to_string());
        }

        Ok(())
    }
}
