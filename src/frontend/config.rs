use crate::infrastructure::logging::{parse_level, LogConfig, LogFormat, LogOutput};
use crate::marshal::MarshalOptions;
use crate::performance::CacheConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// File name looked up by `BridgeConfig::discover`
pub const CONFIG_FILE_NAME: &str = "rfc-bridge.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("failed to start worker runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

/// Startup configuration of a bridge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Directory holding the backend's `sapnwrfc.ini`; applied once at startup
    pub ini_path: Option<PathBuf>,

    /// Concurrent blocking native calls (open, invoke)
    pub workers: usize,

    pub marshal: MarshalOptions,

    pub cache: CacheConfig,

    pub logging: LoggingSection,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            ini_path: None,
            workers: default_workers(),
            marshal: MarshalOptions::default(),
            cache: CacheConfig::default(),
            logging: LoggingSection::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Install a global tracing subscriber when the bridge is created
    pub init: bool,
    pub level: String,
    pub format: LogFormat,
    pub output: LogOutput,
    pub span_events: bool,
    pub filter: Option<String>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            init: false,
            level: "info".to_string(),
            format: LogFormat::Pretty,
            output: LogOutput::Stderr,
            span_events: false,
            filter: None,
        }
    }
}

impl LoggingSection {
    pub fn to_log_config(&self) -> Result<LogConfig, ConfigError> {
        let level = parse_level(&self.level)
            .ok_or_else(|| ConfigError::Invalid(format!("unknown log level '{}'", self.level)))?;
        let mut config = LogConfig::new()
            .with_level(level)
            .with_format(self.format)
            .with_output(self.output.clone())
            .with_span_events(self.span_events);
        if let Some(filter) = &self.filter {
            config = config.with_filter(filter.clone());
        }
        Ok(config)
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

impl BridgeConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Find `rfc-bridge.toml` in the current directory or its parents
    pub fn discover() -> Result<Self, ConfigError> {
        match std::env::current_dir() {
            Ok(dir) => Self::discover_from(&dir),
            Err(_) => Ok(Self::default()),
        }
    }

    /// Find `rfc-bridge.toml` in `start` or its parents; defaults when there is none
    pub fn discover_from(start: &Path) -> Result<Self, ConfigError> {
        let mut current = Some(start);

        while let Some(dir) = current {
            let config_path = dir.join(CONFIG_FILE_NAME);
            if config_path.is_file() {
                tracing::debug!(path = %config_path.display(), "using bridge config");
                return Self::load(&config_path);
            }
            current = dir.parent();
        }

        Ok(Self::default())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".to_string()));
        }
        if let Some(path) = &self.ini_path {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::Invalid("ini_path must not be empty".to_string()));
            }
        }
        self.logging.to_log_config()?;
        Ok(())
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_ini_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ini_path = Some(path.into());
        self
    }

    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_marshal(mut self, marshal: MarshalOptions) -> Self {
        self.marshal = marshal;
        self
    }

    /// Default configuration rendered as TOML
    pub fn generate_default() -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(&Self::default())?)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}
