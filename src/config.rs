//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Redis host for the event log
    pub redis_host: String,

    /// Redis port for the event log
    pub redis_port: u16,

    /// View store connection URL
    pub database_url: String,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// HTTP listen port
    pub listen_port: u16,

    /// Name of the account event stream
    pub stream: String,

    /// Service-side group poll cadence
    pub read_interval: Duration,

    /// Projector group poll cadence
    pub projector_read_interval: Duration,

    /// Pending sweep cadence; also the idle threshold for reclaim
    pub pending_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let redis_host = env::var("REDIS_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

        let redis_port = env::var("REDIS_PORT")
            .unwrap_or_else(|_| "6379".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("REDIS_PORT"))?;

        let database_url =
            env::var("DATABASE_URL").map_err(|_| ConfigError::MissingEnv("DATABASE_URL"))?;

        let database_max_connections = env::var("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("DATABASE_MAX_CONNECTIONS"))?;

        let listen_port = env::var("LISTEN_PORT")
            .unwrap_or_else(|_| "8444".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("LISTEN_PORT"))?;

        let stream = env::var("STREAM_NAME").unwrap_or_else(|_| "accountStream".to_string());

        let read_interval = interval_from_env("READ_INTERVAL_MS", 30_000)?;
        let projector_read_interval = interval_from_env("PROJECTOR_READ_INTERVAL_MS", 10_000)?;
        let pending_interval = interval_from_env("PENDING_INTERVAL_MS", 30_000)?;

        Ok(Self {
            redis_host,
            redis_port,
            database_url,
            database_max_connections,
            listen_port,
            stream,
            read_interval,
            projector_read_interval,
            pending_interval,
        })
    }

    /// Connection URL for the event log backend
    pub fn redis_url(&self) -> String {
        format!("redis://{}:{}", self.redis_host, self.redis_port)
    }
}

fn interval_from_env(key: &'static str, default_ms: u64) -> Result<Duration, ConfigError> {
    let millis = env::var(key)
        .unwrap_or_else(|_| default_ms.to_string())
        .parse()
        .map_err(|_| ConfigError::InvalidValue(key))?;
    Ok(Duration::from_millis(millis))
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}
