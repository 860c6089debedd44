// Runtime infrastructure
pub mod executor;
pub mod logging;
pub mod stats;

// Re-exports
pub use executor::Executor;
pub use logging::{
    init_dev_logging, init_logging, init_prod_logging, LogConfig, LogFormat, LogLevel, LogMeta, LogOutput,
    LogRecord, LogSink, MemorySink, SinkHandle, TracingSink,
};
pub use stats::{BridgeStats, StatsSnapshot};
