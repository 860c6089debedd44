//! Connections, function modules and invocation

pub mod connection;
mod continuation;
pub mod function;
pub mod invoke;

pub use connection::Connection;
pub use function::{Function, FunctionDescriptor};
