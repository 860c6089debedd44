//! Variable-length reads with a bounded retry

use crate::errors::{ErrorGroup, ErrorInfo, ReturnCode};
use crate::ffi::{BufferRead, NativeResult};

/// Initial capacity for decimal strings read through the string accessor
pub const DECIMAL_CAPACITY: usize = 25;

/// Read with `initial` capacity; on a short-buffer reply retry exactly once at the
/// size the backend asked for. A second short-buffer reply is an error.
pub fn read_variable<T, F>(initial: usize, mut read: F) -> NativeResult<T>
where
    F: FnMut(usize) -> NativeResult<BufferRead<T>>,
{
    let required = match read(initial)? {
        BufferRead::Complete(value) => return Ok(value),
        BufferRead::TooSmall { required } => required,
    };

    tracing::trace!(initial, required, "buffer too small, retrying");
    match read(required)? {
        BufferRead::Complete(value) => Ok(value),
        BufferRead::TooSmall { required: again } => Err(ErrorInfo::new(
            ReturnCode::BufferTooSmall,
            format!("buffer still too small after retry: {} < {}", required, again),
        )
        .with_group(ErrorGroup::ExternalRuntimeFailure)),
    }
}
