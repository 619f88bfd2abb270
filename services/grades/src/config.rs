use config::{Config, Environment};
use serde::Deserialize;
use shared::logger::LogFormat;

#[derive(Debug, Clone, Deserialize)]
pub struct GradesConfig {
    pub host: String,
    pub port: u16,
    pub log_format: LogFormat,
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_ms: u64,
    pub init_schema: bool,
}

impl GradesConfig {
    /// Reads `GRADES_*` variables, e.g. `GRADES_PORT` or `GRADES_DATABASE__URL`.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::load(environment())
    }

    pub fn load(env: Environment) -> anyhow::Result<Self> {
        let config = Config::builder()
            .set_default("host", "0.0.0.0")?
            .set_default("port", 8081_i64)?
            .set_default("log_format", "pretty")?
            .set_default("database.max_connections", 10_i64)?
            .set_default("database.acquire_timeout_ms", 5000_i64)?
            .set_default("database.init_schema", true)?
            .add_source(env)
            .build()?;

        config
            .try_deserialize()
            .map_err(|e| anyhow::anyhow!("invalid grades service configuration: {e}"))
    }
}

pub fn environment() -> Environment {
    Environment::with_prefix("GRADES")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}
