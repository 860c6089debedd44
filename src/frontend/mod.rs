//! Configuration front end

pub mod config;

pub use config::{BridgeConfig, ConfigError, LoggingSection, CONFIG_FILE_NAME};
