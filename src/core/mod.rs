//! Core data model
//!
//! Backend type kinds, parameter and field descriptors, and the host value type
//! shared by the marshaling engine, the orchestrator and the introspector.

pub mod types;
pub mod value;

pub use types::{CoarseType, Direction, FieldDesc, ParameterDesc, RfcType};
pub use value::{Object, Value};
