//! Bridge between host code and the remote function interface of an enterprise backend
//!
//! A [`Bridge`] wraps one native client library. Connections opened from it resolve
//! function modules, whose calls marshal host [`Value`]s into the backend's typed
//! containers and back again.

// Core modules
pub mod bridge;
pub mod client;
pub mod core;
pub mod errors;
pub mod ffi;
pub mod frontend;
pub mod infrastructure;
pub mod marshal;
pub mod metadata;
pub mod performance;

// Re-export commonly used items
pub use bridge::Bridge;
pub use client::{Connection, Function, FunctionDescriptor};
pub use core::{CoarseType, Direction, FieldDesc, Object, ParameterDesc, RfcType, Value};
pub use errors::{ErrorGroup, ErrorInfo, ErrorKind, ReturnCode, RfcError, ValidationReason};
pub use ffi::{MockLibrary, RfcLibrary};
pub use frontend::{BridgeConfig, ConfigError};
pub use infrastructure::{init_logging, LogConfig, LogLevel, LogSink, MemorySink};
pub use marshal::{MarshalOptions, Marshaller};
pub use metadata::{ItemsSchema, PropertySchema, Schema};
pub use performance::{CacheConfig, DescriptorCache};

pub type Result<T> = errors::Result<T>;
