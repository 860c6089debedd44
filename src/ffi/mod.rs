//! Native client library boundary
//!
//! `RfcLibrary` is the seam between the bridge and the backend's client library.
//! `MockLibrary` is a complete in-process implementation used by tests, benches
//! and embedders that want to exercise the bridge without a backend.

pub mod library;
pub mod mock;

pub use library::{
    BufferRead, ContainerHandle, FunctionDescHandle, NativeResult, RfcLibrary, SessionHandle, TableHandle,
    TypeDescHandle,
};
pub use mock::{CallFrame, FieldDef, FunctionDef, InvokeRecord, MockLibrary, MockType, ParamDef, StructDef};
