use thiserror::Error;

use crate::notification::inbox::DEFAULT_INBOX_CAPACITY;
use crate::relay::DEFAULT_RELAY_URL;

pub const DEFAULT_PORT: u16 = 9500;
/// How many consecutive ports the server tries before giving up
pub const PORT_ATTEMPTS: u16 = 5;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),

    #[error("Invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },
}

/// Runtime settings read from the environment
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub redis_url: Option<String>,
    pub relay_url: String,
    pub relay_access_token: Option<String>,
    pub port: u16,
    pub inbox_capacity: usize,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Blank values count as unset
        let read = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let database_url = read("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let port = match read("PORT") {
            Some(value) => value.trim().parse::<u16>().map_err(|_| ConfigError::Invalid {
                key: "PORT",
                value,
            })?,
            None => DEFAULT_PORT,
        };

        let inbox_capacity = match read("INBOX_CAPACITY") {
            Some(value) => match value.trim().parse::<usize>() {
                Ok(capacity) if capacity > 0 => capacity,
                _ => {
                    return Err(ConfigError::Invalid {
                        key: "INBOX_CAPACITY",
                        value,
                    })
                }
            },
            None => DEFAULT_INBOX_CAPACITY,
        };

        Ok(Self {
            database_url,
            redis_url: read("REDIS_URL"),
            relay_url: read("PUSH_RELAY_URL").unwrap_or_else(|| DEFAULT_RELAY_URL.to_string()),
            relay_access_token: read("PUSH_RELAY_ACCESS_TOKEN"),
            port,
            inbox_capacity,
        })
    }
}
