//! Native library surface
//!
//! The backend's client library, expressed as an object-safe trait. Handles are opaque
//! and only meaningful to the library that issued them. Every fallible call returns the
//! backend's error record on failure.

use crate::core::{FieldDesc, ParameterDesc};
use crate::errors::ErrorInfo;
use std::fmt;
use std::path::Path;

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(u64);

        impl $name {
            #[inline]
            pub const fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            #[inline]
            pub const fn raw(self) -> u64 {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:#x})", stringify!($name), self.0)
            }
        }
    };
}

handle!(
    /// Open backend session
    SessionHandle
);
handle!(
    /// Backend-owned function descriptor; never freed by this crate
    FunctionDescHandle
);
handle!(
    /// Data container: a call context, a structure instance or a table row
    ContainerHandle
);
handle!(TableHandle);
handle!(
    /// Type descriptor of a structure or a table row
    TypeDescHandle
);

/// Outcome of a variable-length read
#[derive(Debug, Clone, PartialEq)]
pub enum BufferRead<T> {
    Complete(T),
    /// The supplied capacity was insufficient; `required` is what the backend asks for
    TooSmall { required: usize },
}

pub type NativeResult<T> = Result<T, ErrorInfo>;

/// Operations the wrapped client library exposes
///
/// Lengths are character counts for character-like kinds and byte counts for byte kinds.
pub trait RfcLibrary: Send + Sync {
    /// `(major, minor, patch)`
    fn version(&self) -> (u32, u32, u32);

    fn set_ini_path(&self, path: &Path) -> NativeResult<()>;

    // Sessions
    fn open_connection(&self, params: &[(String, String)]) -> NativeResult<SessionHandle>;
    fn close_connection(&self, session: SessionHandle) -> NativeResult<()>;
    fn is_connection_handle_valid(&self, session: SessionHandle) -> NativeResult<bool>;
    fn ping(&self, session: SessionHandle) -> NativeResult<()>;

    // Descriptors
    fn get_function_desc(&self, session: SessionHandle, name: &str) -> NativeResult<FunctionDescHandle>;
    fn function_name(&self, desc: FunctionDescHandle) -> NativeResult<String>;
    fn parameter_count(&self, desc: FunctionDescHandle) -> NativeResult<usize>;
    fn parameter_desc_by_index(&self, desc: FunctionDescHandle, index: usize) -> NativeResult<ParameterDesc>;

    // Call contexts
    fn create_function(&self, desc: FunctionDescHandle) -> NativeResult<ContainerHandle>;
    fn destroy_function(&self, container: ContainerHandle) -> NativeResult<()>;
    fn set_parameter_active(&self, container: ContainerHandle, name: &str, active: bool) -> NativeResult<()>;
    fn invoke(&self, session: SessionHandle, container: ContainerHandle) -> NativeResult<()>;

    // Composites
    fn get_structure(&self, container: ContainerHandle, name: &str) -> NativeResult<ContainerHandle>;
    fn get_table(&self, container: ContainerHandle, name: &str) -> NativeResult<TableHandle>;
    fn describe_structure(&self, structure: ContainerHandle) -> NativeResult<TypeDescHandle>;
    fn describe_table(&self, table: TableHandle) -> NativeResult<TypeDescHandle>;
    fn type_name(&self, type_desc: TypeDescHandle) -> NativeResult<String>;
    fn field_count(&self, type_desc: TypeDescHandle) -> NativeResult<usize>;
    fn field_desc_by_index(&self, type_desc: TypeDescHandle, index: usize) -> NativeResult<FieldDesc>;

    // Tables
    fn append_new_row(&self, table: TableHandle) -> NativeResult<ContainerHandle>;
    fn delete_current_row(&self, table: TableHandle) -> NativeResult<()>;
    fn row_count(&self, table: TableHandle) -> NativeResult<usize>;
    fn move_to(&self, table: TableHandle, index: usize) -> NativeResult<()>;
    fn current_row(&self, table: TableHandle) -> NativeResult<ContainerHandle>;

    // Fixed-width primitives
    fn set_chars(&self, container: ContainerHandle, name: &str, value: &str) -> NativeResult<()>;
    fn get_chars(&self, container: ContainerHandle, name: &str, length: usize) -> NativeResult<String>;
    fn set_num(&self, container: ContainerHandle, name: &str, value: &str) -> NativeResult<()>;
    fn get_num(&self, container: ContainerHandle, name: &str, length: usize) -> NativeResult<String>;
    fn set_date(&self, container: ContainerHandle, name: &str, value: &str) -> NativeResult<()>;
    fn get_date(&self, container: ContainerHandle, name: &str) -> NativeResult<String>;
    fn set_time(&self, container: ContainerHandle, name: &str, value: &str) -> NativeResult<()>;
    fn get_time(&self, container: ContainerHandle, name: &str) -> NativeResult<String>;
    fn set_bytes(&self, container: ContainerHandle, name: &str, value: &[u8], length: usize) -> NativeResult<()>;
    fn get_bytes(&self, container: ContainerHandle, name: &str, length: usize) -> NativeResult<Vec<u8>>;

    // Numeric primitives
    fn set_float(&self, container: ContainerHandle, name: &str, value: f64) -> NativeResult<()>;
    fn get_float(&self, container: ContainerHandle, name: &str) -> NativeResult<f64>;
    fn set_int(&self, container: ContainerHandle, name: &str, value: i32) -> NativeResult<()>;
    fn get_int(&self, container: ContainerHandle, name: &str) -> NativeResult<i32>;
    fn set_int1(&self, container: ContainerHandle, name: &str, value: i8) -> NativeResult<()>;
    fn get_int1(&self, container: ContainerHandle, name: &str) -> NativeResult<i8>;
    fn set_int2(&self, container: ContainerHandle, name: &str, value: i16) -> NativeResult<()>;
    fn get_int2(&self, container: ContainerHandle, name: &str) -> NativeResult<i16>;

    // Variable-length primitives; the string accessors also serve packed decimals
    fn set_string(&self, container: ContainerHandle, name: &str, value: &str) -> NativeResult<()>;
    fn get_string_length(&self, container: ContainerHandle, name: &str) -> NativeResult<usize>;
    fn get_string(&self, container: ContainerHandle, name: &str, capacity: usize) -> NativeResult<BufferRead<String>>;
    fn set_xstring(&self, container: ContainerHandle, name: &str, value: &[u8]) -> NativeResult<()>;
    fn get_xstring(&self, container: ContainerHandle, name: &str, capacity: usize) -> NativeResult<BufferRead<Vec<u8>>>;
}
