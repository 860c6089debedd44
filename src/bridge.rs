//! Bridge entry point
//!
//! A `Bridge` binds one native library to the startup configuration, the worker
//! executor, the descriptor cache and the logging sink. Connections are created from it
//! and share all of those.

use crate::client::Connection;
use crate::errors::Result;
use crate::ffi::RfcLibrary;
use crate::frontend::{BridgeConfig, ConfigError};
use crate::infrastructure::logging::{init_logging, LogSink, SinkHandle};
use crate::infrastructure::{BridgeStats, Executor, StatsSnapshot};
use crate::performance::DescriptorCache;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;

pub(crate) struct BridgeInner {
    pub(crate) lib: Arc<dyn RfcLibrary>,
    pub(crate) config: BridgeConfig,
    pub(crate) executor: Executor,
    pub(crate) cache: Arc<dyn DescriptorCache>,
    pub(crate) sink: SinkHandle,
    pub(crate) stats: BridgeStats,
    opened: AtomicBool,
    _log_guard: Option<WorkerGuard>,
}

impl BridgeInner {
    pub(crate) fn mark_opened(&self) {
        self.opened.store(true, Ordering::Release);
    }

    pub(crate) fn set_ini_path(&self, path: &Path) -> Result<bool> {
        if self.opened.load(Ordering::Acquire) {
            tracing::warn!(
                path = %path.display(),
                "ini path changed after a connection was opened; it applies to later connections only"
            );
        }
        let path_text = path.display().to_string();
        self.sink
            .api_call("RfcSetIniPath", &[("path", path_text.as_str())], self.lib.set_ini_path(path))?;
        Ok(true)
    }
}

#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

impl Bridge {
    /// Build a bridge with the descriptor cache described by `config.cache`
    pub fn new(lib: Arc<dyn RfcLibrary>, config: BridgeConfig) -> std::result::Result<Self, ConfigError> {
        let cache = config.cache.build();
        Self::with_cache(lib, config, cache)
    }

    /// Build a bridge around an explicit descriptor cache
    pub fn with_cache(
        lib: Arc<dyn RfcLibrary>,
        config: BridgeConfig,
        cache: Arc<dyn DescriptorCache>,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;

        let log_guard = if config.logging.init {
            init_logging(config.logging.to_log_config()?)
        } else {
            None
        };
        let executor = Executor::new(config.workers).map_err(ConfigError::Runtime)?;

        let inner = Arc::new(BridgeInner {
            lib,
            executor,
            cache,
            sink: SinkHandle::default(),
            stats: BridgeStats::new(),
            opened: AtomicBool::new(false),
            _log_guard: log_guard,
            config,
        });

        if let Some(path) = inner.config.ini_path.clone() {
            inner
                .set_ini_path(&path)
                .map_err(|err| ConfigError::Invalid(format!("cannot apply ini_path: {}", err)))?;
        }

        tracing::debug!(workers = inner.executor.workers(), "bridge ready");
        Ok(Self { inner })
    }

    /// New, unopened connection
    pub fn connection(&self) -> Connection {
        Connection::new(self.inner.clone())
    }

    /// Replace the structured logging sink for this bridge and all its connections
    pub fn configure_sink(&self, sink: Arc<dyn LogSink>) {
        self.inner.sink.replace(sink);
    }

    /// `[major, minor, patch]` of the native library
    pub fn version(&self) -> [u32; 3] {
        let (major, minor, patch) = self.inner.lib.version();
        [major, minor, patch]
    }

    /// Directory of the backend's ini file; process-wide
    pub fn set_ini_path(&self, path: impl AsRef<Path>) -> Result<bool> {
        self.inner.set_ini_path(path.as_ref())
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    pub fn cache(&self) -> &Arc<dyn DescriptorCache> {
        &self.inner.cache
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("config", &self.inner.config)
            .field("executor", &self.inner.executor)
            .finish()
    }
}
