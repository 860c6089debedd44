//! Logging for the bridge
//!
//! Two layers live here. `init_logging` installs a global `tracing` subscriber
//! (pretty, compact or JSON; stdout, stderr or a daily rolling file). `LogSink` is the
//! write-only structured sink that receives `(level, message, metadata)` records about
//! native API calls; the default `TracingSink` forwards those records to `tracing`.

use crate::errors::ErrorInfo;
use crate::ffi::NativeResult;
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::Level;
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, MakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

static LOGGER_INITIALIZED: OnceCell<()> = OnceCell::new();

/// Target used for records forwarded from a `LogSink`
pub const NATIVE_TARGET: &str = "rfc_bridge::native";

/// Message of every API-call record
pub const API_CALL_MESSAGE: &str = "SAPNWRFC API Call";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Compact,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    Stdout,
    Stderr,
    /// Daily rolling file
    File { directory: String, prefix: String },
}

/// Subscriber configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: Level,
    pub format: LogFormat,
    pub output: LogOutput,
    /// Emit span open/close events
    pub span_events: bool,
    /// Extra directives, e.g. "rfc_bridge=debug,rfc_bridge::native=trace"
    pub filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            output: LogOutput::Stderr,
            span_events: false,
            filter: None,
        }
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_output(mut self, output: LogOutput) -> Self {
        self.output = output;
        self
    }

    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.span_events = enabled;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }
}

/// Parse a level name as used in configuration files
pub fn parse_level(name: &str) -> Option<Level> {
    match name.to_ascii_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" | "warning" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

/// Install the global subscriber
///
/// Only the first call in a process installs anything; later calls return `None`.
/// The returned guard flushes buffered output when dropped.
pub fn init_logging(config: LogConfig) -> Option<WorkerGuard> {
    if LOGGER_INITIALIZED.set(()).is_err() {
        return None;
    }

    let (writer, guard) = match &config.output {
        LogOutput::Stdout => tracing_appender::non_blocking(std::io::stdout()),
        LogOutput::Stderr => tracing_appender::non_blocking(std::io::stderr()),
        LogOutput::File { directory, prefix } => tracing_appender::non_blocking(rolling::daily(directory, prefix)),
    };

    if install(writer, &config) {
        Some(guard)
    } else {
        None
    }
}

fn install<W>(writer: W, config: &LogConfig) -> bool
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let filter = build_filter(config);
    let spans = span_events_config(config.span_events);
    let registry = tracing_subscriber::registry();

    let installed = match config.format {
        LogFormat::Pretty => registry
            .with(fmt::layer().with_writer(writer).pretty().with_span_events(spans).with_filter(filter))
            .try_init(),
        LogFormat::Compact => registry
            .with(fmt::layer().with_writer(writer).compact().with_span_events(spans).with_filter(filter))
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().with_writer(writer).json().with_span_events(spans).with_filter(filter))
            .try_init(),
    };
    installed.is_ok()
}

fn build_filter(config: &LogConfig) -> EnvFilter {
    let base_filter = EnvFilter::from_default_env().add_directive(config.level.into());

    match &config.filter {
        Some(filter_str) => filter_str
            .split(',')
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .fold(base_filter, |filter, directive| {
                filter.add_directive(directive.parse().unwrap_or_else(|_| {
                    tracing::warn!("Invalid filter directive: {}", directive);
                    config.level.into()
                }))
            }),
        None => base_filter,
    }
}

fn span_events_config(enabled: bool) -> FmtSpan {
    if enabled {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    }
}

/// Development defaults: debug level, pretty output on stderr
pub fn init_dev_logging() -> Option<WorkerGuard> {
    init_logging(LogConfig {
        level: Level::DEBUG,
        format: LogFormat::Pretty,
        output: LogOutput::Stderr,
        span_events: true,
        filter: Some("rfc_bridge=debug".to_string()),
    })
}

/// Production defaults: JSON into a daily rolling file
pub fn init_prod_logging(log_dir: impl AsRef<Path>) -> Option<WorkerGuard> {
    init_logging(LogConfig {
        level: Level::INFO,
        format: LogFormat::Json,
        output: LogOutput::File {
            directory: log_dir.as_ref().to_string_lossy().to_string(),
            prefix: "rfc-bridge".to_string(),
        },
        span_events: false,
        filter: Some("rfc_bridge=info".to_string()),
    })
}

/// Severity of a sink record, lowest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Silly,
    Debug,
    Verbose,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Silly => "silly",
            Self::Debug => "debug",
            Self::Verbose => "verbose",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

pub type LogMeta = serde_json::Map<String, serde_json::Value>;

/// Write-only structured logging sink
pub trait LogSink: Send + Sync {
    fn log(&self, level: LogLevel, message: &str, meta: &LogMeta);

    /// Cheap pre-check so callers can skip building metadata
    fn enabled(&self, _level: LogLevel) -> bool {
        true
    }
}

/// Forwards records to `tracing` under the `rfc_bridge::native` target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, level: LogLevel, message: &str, meta: &LogMeta) {
        let meta = serde_json::Value::Object(meta.clone());
        match level {
            LogLevel::Silly => tracing::trace!(target: NATIVE_TARGET, meta = %meta, "{}", message),
            LogLevel::Debug | LogLevel::Verbose => tracing::debug!(target: NATIVE_TARGET, meta = %meta, "{}", message),
            LogLevel::Info => tracing::info!(target: NATIVE_TARGET, meta = %meta, "{}", message),
            LogLevel::Warn => tracing::warn!(target: NATIVE_TARGET, meta = %meta, "{}", message),
            LogLevel::Error => tracing::error!(target: NATIVE_TARGET, meta = %meta, "{}", message),
        }
    }

    fn enabled(&self, level: LogLevel) -> bool {
        match level {
            LogLevel::Silly => tracing::enabled!(target: NATIVE_TARGET, Level::TRACE),
            LogLevel::Debug | LogLevel::Verbose => tracing::enabled!(target: NATIVE_TARGET, Level::DEBUG),
            LogLevel::Info => tracing::enabled!(target: NATIVE_TARGET, Level::INFO),
            LogLevel::Warn => tracing::enabled!(target: NATIVE_TARGET, Level::WARN),
            LogLevel::Error => tracing::enabled!(target: NATIVE_TARGET, Level::ERROR),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub level: LogLevel,
    pub message: String,
    pub meta: LogMeta,
}

/// Collects records in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<LogRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    /// API-call records for the named native operation
    pub fn api_calls(&self, call: &str) -> Vec<LogRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.message == API_CALL_MESSAGE && r.meta.get("call").and_then(|c| c.as_str()) == Some(call))
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl LogSink for MemorySink {
    fn log(&self, level: LogLevel, message: &str, meta: &LogMeta) {
        self.records.lock().push(LogRecord {
            level,
            message: message.to_string(),
            meta: meta.clone(),
        });
    }
}

/// Replaceable sink shared by a bridge and every connection it created
#[derive(Clone)]
pub struct SinkHandle {
    inner: Arc<RwLock<Arc<dyn LogSink>>>,
}

impl SinkHandle {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(sink)),
        }
    }

    pub fn get(&self) -> Arc<dyn LogSink> {
        self.inner.read().clone()
    }

    pub fn replace(&self, sink: Arc<dyn LogSink>) {
        *self.inner.write() = sink;
    }

    pub fn log(&self, level: LogLevel, message: &str, meta: &LogMeta) {
        self.get().log(level, message, meta);
    }

    /// Record a native API call and pass its result through
    pub fn api_call<T>(&self, call: &str, context: &[(&str, &str)], result: NativeResult<T>) -> NativeResult<T> {
        let sink = self.get();
        if sink.enabled(LogLevel::Debug) {
            let meta = api_call_meta(call, context, result.as_ref().err());
            sink.log(LogLevel::Debug, API_CALL_MESSAGE, &meta);
        }
        result
    }
}

impl Default for SinkHandle {
    fn default() -> Self {
        Self::new(Arc::new(TracingSink))
    }
}

impl std::fmt::Debug for SinkHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SinkHandle")
    }
}

pub fn api_call_meta(call: &str, context: &[(&str, &str)], error: Option<&ErrorInfo>) -> LogMeta {
    let mut meta = LogMeta::new();
    meta.insert("call".to_string(), serde_json::Value::from(call));
    for (key, value) in context {
        meta.insert((*key).to_string(), serde_json::Value::from(*value));
    }
    if let Some(info) = error {
        if let Ok(value) = serde_json::to_value(info) {
            meta.insert("errorInfo".to_string(), value);
        }
    }
    meta
}
