/// Ledger store connection and table creation
pub mod database;

/// Application settings: message bus, relay and database, from config.toml and the environment
pub mod settings;

pub use settings::{AppConfig, DatabaseSettings, MessageBusSettings, RelaySettings};
