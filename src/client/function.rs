//! Function modules bound to a connection

use super::connection::ConnectionState;
use crate::bridge::BridgeInner;
use crate::core::{ParameterDesc, Value};
use crate::errors::{ErrorInfo, Result};
use crate::ffi::{FunctionDescHandle, NativeResult, SessionHandle};
use crate::metadata::{self, Schema};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// Resolved signature of a function module
///
/// The handle is owned by the backend and never freed here; one descriptor may back
/// many `Function`s.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDescriptor {
    pub name: String,
    pub handle: FunctionDescHandle,
    pub parameters: Vec<ParameterDesc>,
}

impl FunctionDescriptor {
    pub fn new(name: impl Into<String>, handle: FunctionDescHandle, parameters: Vec<ParameterDesc>) -> Self {
        Self {
            name: name.into(),
            handle,
            parameters,
        }
    }

    pub(crate) fn resolve(bridge: &BridgeInner, session: SessionHandle, name: &str) -> NativeResult<Self> {
        let lib = &bridge.lib;
        let handle = bridge.sink.api_call(
            "RfcGetFunctionDesc",
            &[("function", name)],
            lib.get_function_desc(session, name),
        )?;
        let count = lib.parameter_count(handle)?;
        let parameters = (0..count)
            .map(|i| lib.parameter_desc_by_index(handle, i))
            .collect::<NativeResult<Vec<_>>>()?;
        tracing::debug!(function = name, parameters = count, "resolved function descriptor");
        Ok(Self::new(name, handle, parameters))
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterDesc> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

pub(crate) struct FunctionState {
    pub(crate) connection: Weak<ConnectionState>,
    pub(crate) bridge: Arc<BridgeInner>,
    pub(crate) descriptor: Arc<FunctionDescriptor>,
    pub(crate) last_error: Mutex<Option<ErrorInfo>>,
}

impl FunctionState {
    pub(crate) fn record_error(&self, info: &ErrorInfo) {
        *self.last_error.lock() = Some(info.clone());
    }
}

/// A function module ready to be invoked
///
/// Holds its connection weakly; once the `Connection` is dropped, invocations fail with
/// an invalid-handle error.
#[derive(Clone)]
pub struct Function {
    pub(crate) inner: Arc<FunctionState>,
}

impl Function {
    pub(crate) fn new(
        connection: Weak<ConnectionState>,
        bridge: Arc<BridgeInner>,
        descriptor: Arc<FunctionDescriptor>,
    ) -> Self {
        Self {
            inner: Arc::new(FunctionState {
                connection,
                bridge,
                descriptor,
                last_error: Mutex::new(None),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.descriptor.name
    }

    pub fn descriptor(&self) -> &FunctionDescriptor {
        &self.inner.descriptor
    }

    /// One `Null` per parameter, showing the expected input shape
    pub fn placeholders(&self) -> Value {
        self.inner
            .descriptor
            .parameters
            .iter()
            .map(|p| (p.name.clone(), Value::Null))
            .collect()
    }

    /// Declarative schema of the signature
    pub fn metadata(&self) -> Result<Schema> {
        let bridge = &self.inner.bridge;
        metadata::describe(&bridge.lib, &bridge.sink, &self.inner.descriptor).map_err(|err| {
            if let Some(info) = err.info() {
                self.inner.record_error(info);
            }
            err
        })
    }

    /// Last error reported by the backend for this function
    pub fn last_error(&self) -> Option<ErrorInfo> {
        self.inner.last_error.lock().clone()
    }
}

impl std::fmt::Debug for Function {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Function").field("name", &self.name()).finish()
    }
}
