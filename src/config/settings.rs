//! Application settings loaded from `config.toml` and the environment.
//!
//! Every section has defaults matching a local RabbitMQ + SQLite setup, so a missing
//! section (or a missing file, via [`AppConfig::default`]) still yields a usable
//! configuration. Durations are written in seconds and may be fractional.
//! Settings are read once at process start and never mutated afterwards.

use crate::errors::{Error, Result};
use serde::{Deserialize, Deserializer};
use std::path::Path;
use std::time::Duration;

/// Configuration structure representing the entire config.toml file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// Ledger store settings
    #[serde(default)]
    pub database: DatabaseSettings,
    /// Broker connection and queue settings
    #[serde(default)]
    pub message_bus: MessageBusSettings,
    /// Outbox relay settings
    #[serde(default)]
    pub relay: RelaySettings,
}

/// Where the service keeps its ledger store
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseSettings {
    /// SeaORM connection URL; each service gets its own SQLite file when unset
    #[serde(default)]
    pub url: Option<String>,
}

impl DatabaseSettings {
    /// Directory holding the default SQLite files.
    pub const DEFAULT_DATA_DIR: &'static str = "data";

    /// Connection URL for `service`, falling back to `sqlite://data/<service>.sqlite`.
    #[must_use]
    pub fn url_for(&self, service: &str) -> String {
        self.url.clone().unwrap_or_else(|| {
            format!(
                "sqlite://{}/{service}.sqlite?mode=rwc",
                Self::DEFAULT_DATA_DIR
            )
        })
    }
}

/// Broker connection settings shared by the relay and the consumer session
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MessageBusSettings {
    /// Broker host name
    pub host: String,
    /// Broker port
    pub port: u16,
    /// Login user
    pub user_name: String,
    /// Login password
    pub password: String,
    /// Virtual host
    pub virtual_host: String,
    /// Queue carrying `PaymentRequest` envelopes (order side to account side)
    pub request_queue: String,
    /// Queue carrying `PaymentResponse` envelopes (account side to order side)
    pub response_queue: String,
    /// Upper bound for establishing a connection and channel
    #[serde(deserialize_with = "de_seconds")]
    pub connection_timeout: Duration,
    /// Heartbeat interval used to detect a dead peer on an idle connection
    #[serde(deserialize_with = "de_seconds")]
    pub read_timeout: Duration,
    /// Upper bound for a single publish, ack or nack
    #[serde(deserialize_with = "de_seconds")]
    pub write_timeout: Duration,
    /// Fixed backoff before reconnecting after a connection failure
    #[serde(deserialize_with = "de_seconds")]
    pub reconnect_interval: Duration,
}

impl Default for MessageBusSettings {
    fn default() -> Self {
        Self {
            host: "rabbitmq".to_string(),
            port: 5672,
            user_name: "guest".to_string(),
            password: "guest".to_string(),
            virtual_host: "/".to_string(),
            request_queue: "requests".to_string(),
            response_queue: "responses".to_string(),
            connection_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(30),
            reconnect_interval: Duration::from_secs(5),
        }
    }
}

/// Outbox relay polling settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    /// Delay between two relay cycles
    #[serde(deserialize_with = "de_seconds")]
    pub poll_interval: Duration,
    /// Maximum number of outbox rows published per cycle
    pub batch_size: u64,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 20,
        }
    }
}

fn de_seconds<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = f64::deserialize(deserializer)?;
    Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
}

impl AppConfig {
    /// Parses configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| Error::Config {
            message: format!("Failed to parse config.toml: {e}"),
        })
    }

    /// Loads configuration from a TOML file and applies environment overrides.
    ///
    /// A missing file is not an error: defaults plus environment are used instead.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        tracing::debug!("Attempting to load configuration from: {:?}", path_ref);

        let mut config = if path_ref.exists() {
            let contents = std::fs::read_to_string(path_ref).map_err(|e| Error::Config {
                message: format!("Failed to read config file {}: {e}", path_ref.display()),
            })?;
            Self::from_toml_str(&contents)?
        } else {
            tracing::info!(
                "No config file at {}, using defaults and environment",
                path_ref.display()
            );
            Self::default()
        };

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `DATABASE_URL`, `BUS_HOST`, `BUS_PORT`, `BUS_USER` and `BUS_PASSWORD`.
    ///
    /// `lookup` abstracts the environment so the override rules can be tested.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("DATABASE_URL") {
            self.database.url = Some(url);
        }
        if let Some(host) = lookup("BUS_HOST") {
            self.message_bus.host = host;
        }
        if let Some(port) = lookup("BUS_PORT") {
            self.message_bus.port = port.parse().map_err(|e| Error::Config {
                message: format!("BUS_PORT is not a valid port ({port}): {e}"),
            })?;
        }
        if let Some(user) = lookup("BUS_USER") {
            self.message_bus.user_name = user;
        }
        if let Some(password) = lookup("BUS_PASSWORD") {
            self.message_bus.password = password;
        }
        Ok(())
    }

    /// Rejects settings the loops cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.relay.batch_size == 0 {
            return Err(Error::Config {
                message: "relay.batch_size must be at least 1".to_string(),
            });
        }
        if self.message_bus.request_queue.trim().is_empty()
            || self.message_bus.response_queue.trim().is_empty()
        {
            return Err(Error::Config {
                message: "queue names cannot be empty".to_string(),
            });
        }
        if self.message_bus.request_queue == self.message_bus.response_queue {
            return Err(Error::Config {
                message: "request_queue and response_queue must differ".to_string(),
            });
        }
        Ok(())
    }
}
