use std::time::Duration;

use config::{Config, Environment};
use serde::Deserialize;
use shared::http::{RetryConfig, RetryConfigError};
use shared::logger::LogFormat;

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub log_format: LogFormat,
    pub service_b: ServiceBConfig,
}

/// Where the grades service lives and how hard to try reaching it.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceBConfig {
    pub base_url: String,
    pub connect_timeout_ms: u64,
    pub response_timeout_ms: u64,
    /// Deadline for one logical call, retries and backoff included.
    pub overall_timeout_ms: u64,
    pub health_timeout_ms: u64,
    pub retry: RetrySettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
}

impl ServiceBConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms)
    }

    pub fn retry_config(&self) -> Result<RetryConfig, RetryConfigError> {
        RetryConfig::new(
            self.retry.max_retries.saturating_add(1),
            Duration::from_millis(self.retry.initial_backoff_ms),
            Duration::from_millis(self.retry.max_backoff_ms),
            self.retry.multiplier,
            Duration::from_millis(self.overall_timeout_ms),
        )
    }
}

impl GatewayConfig {
    /// Reads `GATEWAY_*` variables, e.g. `GATEWAY_SERVICE_B__BASE_URL` or
    /// `GATEWAY_SERVICE_B__RETRY__MAX_RETRIES`.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::load(environment())
    }

    pub fn load(env: Environment) -> anyhow::Result<Self> {
        let config = Config::builder()
            .set_default("host", "0.0.0.0")?
            .set_default("port", 8080_i64)?
            .set_default("log_format", "pretty")?
            .set_default("service_b.base_url", "http://localhost:8081")?
            .set_default("service_b.connect_timeout_ms", 5000_i64)?
            .set_default("service_b.response_timeout_ms", 10_000_i64)?
            .set_default("service_b.overall_timeout_ms", 30_000_i64)?
            .set_default("service_b.health_timeout_ms", 5000_i64)?
            .set_default("service_b.retry.max_retries", 3_i64)?
            .set_default("service_b.retry.initial_backoff_ms", 500_i64)?
            .set_default("service_b.retry.max_backoff_ms", 5000_i64)?
            .set_default("service_b.retry.multiplier", 2.0)?
            .add_source(env)
            .build()?;

        let config: Self = config
            .try_deserialize()
            .map_err(|e| anyhow::anyhow!("invalid gateway configuration: {e}"))?;
        config.service_b.retry_config()?;
        Ok(config)
    }
}

pub fn environment() -> Environment {
    Environment::with_prefix("GATEWAY")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}
