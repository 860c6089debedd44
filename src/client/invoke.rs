//! Invocation orchestrator
//!
//! Inputs are marshaled on the caller's thread into a fresh call context. The native
//! call then runs on the executor under the connection's invocation lock, outputs are
//! read back, the context is destroyed and the continuation fires exactly once.

use super::connection::ConnectionState;
use super::continuation::{panic_message, Continuation};
use super::function::{Function, FunctionDescriptor, FunctionState};
use crate::core::{Object, Value};
use crate::errors::{ErrorInfo, ReturnCode, RfcError, Result};
use crate::ffi::{ContainerHandle, FunctionDescHandle, NativeResult, RfcLibrary};
use crate::infrastructure::logging::SinkHandle;
use crate::marshal::Marshaller;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::oneshot;

type Outcome = (Option<RfcError>, Option<Value>);

/// Call context owned by exactly one invocation; destroyed on drop
pub(crate) struct CallContext {
    lib: Arc<dyn RfcLibrary>,
    sink: SinkHandle,
    handle: ContainerHandle,
}

impl CallContext {
    pub(crate) fn create(lib: &Arc<dyn RfcLibrary>, sink: &SinkHandle, desc: FunctionDescHandle) -> NativeResult<Self> {
        let handle = sink.api_call("RfcCreateFunction", &[], lib.create_function(desc))?;
        Ok(Self {
            lib: lib.clone(),
            sink: sink.clone(),
            handle,
        })
    }

    pub(crate) fn handle(&self) -> ContainerHandle {
        self.handle
    }
}

impl Drop for CallContext {
    fn drop(&mut self) {
        if let Err(info) = self
            .sink
            .api_call("RfcDestroyFunction", &[], self.lib.destroy_function(self.handle))
        {
            tracing::warn!(error = %info, "failed to destroy call context");
        }
    }
}

fn abandoned() -> Outcome {
    (Some(RfcError::fatal("invocation abandoned before completion")), None)
}

/// Write present inputs and activate every parameter, in descriptor order
fn write_inputs(marshaller: &Marshaller<'_>, ctx: &CallContext, descriptor: &FunctionDescriptor, input: &Object) -> Result<()> {
    let lib = marshaller.library();
    for param in &descriptor.parameters {
        match input.get(&param.name) {
            Some(value) if !value.is_null() && param.direction.accepts_input() => {
                marshaller.set_value(ctx.handle(), &param.name, param.rfc_type, param.length, value)?;
            }
            _ => {}
        }
        lib.set_parameter_active(ctx.handle(), &param.name, true)?;
    }
    for key in input.keys().filter(|k| descriptor.parameter(k).is_none()) {
        tracing::debug!(function = %descriptor.name, parameter = %key, "ignoring unknown parameter");
    }
    Ok(())
}

/// Read every parameter back, whatever its direction
fn read_outputs(marshaller: &Marshaller<'_>, ctx: &CallContext, descriptor: &FunctionDescriptor) -> Result<Value> {
    let mut result = Object::new();
    for param in &descriptor.parameters {
        let value = marshaller.get_value(ctx.handle(), &param.name, param.rfc_type, param.length)?;
        result.insert(param.name.clone(), value);
    }
    Ok(Value::Object(result))
}

/// Native invoke under the connection's lock
fn call_native(function: &FunctionState, connection: &ConnectionState, ctx: &CallContext) -> NativeResult<()> {
    let bridge = &function.bridge;
    let name = function.descriptor.name.as_str();
    let _guard = connection.invoke_lock.lock();

    let Some(session) = *connection.session.read() else {
        return Err(ErrorInfo::invalid_handle(format!(
            "connection closed before {} could be invoked",
            name
        )));
    };
    match bridge
        .sink
        .api_call("RfcInvoke", &[("function", name)], bridge.lib.invoke(session, ctx.handle()))
    {
        Err(info) if info.code == ReturnCode::InvalidHandle => {
            let requery = bridge.lib.is_connection_handle_valid(session);
            match bridge.sink.api_call("RfcIsConnectionHandleValid", &[], requery) {
                Err(detail) => Err(detail),
                Ok(_) => Err(info),
            }
        }
        other => other,
    }
}

/// Runs on the executor; the native error takes precedence over an extraction error
fn execute(function: &FunctionState, connection: &ConnectionState, ctx: &CallContext) -> Outcome {
    let bridge = &function.bridge;
    let native = call_native(function, connection, ctx);

    let marshaller = Marshaller::new(bridge.lib.as_ref(), bridge.config.marshal);
    let extracted = read_outputs(&marshaller, ctx, &function.descriptor);

    match (native, extracted) {
        (Ok(()), Ok(result)) => (None, Some(result)),
        (Ok(()), Err(err)) => {
            bridge.stats.record_marshal_failure();
            if let Some(info) = err.info() {
                function.record_error(info);
            }
            (Some(err), None)
        }
        (Err(info), extracted) => {
            if let Err(err) = extracted {
                tracing::warn!(
                    function = %function.descriptor.name,
                    error = %err,
                    "output extraction failed after native failure"
                );
            }
            bridge.stats.record_native_failure();
            function.record_error(&info);
            connection.record_error(&info);
            (Some(RfcError::Native(info)), None)
        }
    }
}

impl Function {
    /// Invoke the function module
    ///
    /// `input` must be an object keyed by parameter name; anything else is an argument
    /// error returned synchronously. Every other outcome is delivered through `callback`,
    /// which fires exactly once with `(error, result)`, never both set. Failures found
    /// before the native call (dropped connection, call context allocation, input
    /// validation) fire the callback on the calling thread; otherwise it fires on a
    /// worker after the native call.
    pub fn invoke<F>(&self, input: &Value, callback: F) -> Result<()>
    where
        F: FnOnce(Option<RfcError>, Option<Value>) + Send + 'static,
    {
        let input = input
            .as_object()
            .ok_or_else(|| RfcError::argument(format!("invoke expects an object, got {}", input.kind_name())))?;

        let function = self.inner.clone();
        let bridge = function.bridge.clone();
        let continuation = Continuation::new("invoke", bridge.sink.clone(), abandoned, move |(err, result): Outcome| {
            callback(err, result)
        });

        let Some(connection) = function.connection.upgrade() else {
            let info = ErrorInfo::invalid_handle(format!("connection of {} was dropped", function.descriptor.name));
            function.record_error(&info);
            continuation.fire((Some(RfcError::Native(info)), None));
            return Ok(());
        };
        bridge.stats.record_invocation();

        let ctx = match CallContext::create(&bridge.lib, &bridge.sink, function.descriptor.handle) {
            Ok(ctx) => ctx,
            Err(info) => {
                function.record_error(&info);
                continuation.fire((Some(RfcError::Native(info)), None));
                return Ok(());
            }
        };

        let marshaller = Marshaller::new(bridge.lib.as_ref(), bridge.config.marshal);
        if let Err(err) = write_inputs(&marshaller, &ctx, &function.descriptor, input) {
            match err.info() {
                Some(info) => function.record_error(info),
                None => bridge.stats.record_marshal_failure(),
            }
            drop(ctx);
            continuation.fire((Some(err), None));
            return Ok(());
        }

        bridge.executor.spawn(move || {
            let outcome = catch_unwind(AssertUnwindSafe(|| execute(&function, &connection, &ctx)))
                .unwrap_or_else(|panic| {
                    let message = format!("native invoke panicked: {}", panic_message(panic.as_ref()));
                    tracing::error!(function = %function.descriptor.name, "{}", message);
                    (Some(RfcError::fatal(message)), None)
                });
            drop(ctx);
            drop(connection);
            drop(function);
            continuation.fire(outcome);
        });
        Ok(())
    }

    /// `invoke` as a future resolving to the result object
    pub async fn invoke_async(&self, input: &Value) -> Result<Value> {
        let (tx, rx) = oneshot::channel();
        self.invoke(input, move |err, result| {
            let _ = tx.send((err, result));
        })?;
        match rx.await {
            Ok((Some(err), _)) => Err(err),
            Ok((None, result)) => Ok(result.unwrap_or_default()),
            Err(_) => Err(RfcError::fatal("invocation completed without reporting")),
        }
    }
}
