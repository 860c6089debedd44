//! Exactly-once continuations
//!
//! A `Continuation` is consumed by `fire`, so it cannot run twice. If it is dropped
//! unfired (the worker runtime shut down with the job still queued), it fires with its
//! `abandoned` value instead. A continuation that panics aborts the process: the caller
//! has a bug and the bridge cannot vouch for its lock or ordering state afterwards.

use crate::infrastructure::logging::{LogLevel, LogMeta, SinkHandle};
use std::panic::{catch_unwind, AssertUnwindSafe};

pub(crate) struct Continuation<A: Send + 'static> {
    callback: Option<Box<dyn FnOnce(A) + Send>>,
    abandoned: fn() -> A,
    sink: SinkHandle,
    operation: &'static str,
}

impl<A: Send + 'static> Continuation<A> {
    pub(crate) fn new<F>(operation: &'static str, sink: SinkHandle, abandoned: fn() -> A, callback: F) -> Self
    where
        F: FnOnce(A) + Send + 'static,
    {
        Self {
            callback: Some(Box::new(callback)),
            abandoned,
            sink,
            operation,
        }
    }

    pub(crate) fn fire(mut self, outcome: A) {
        self.run(outcome);
    }

    fn run(&mut self, outcome: A) {
        let Some(callback) = self.callback.take() else {
            return;
        };
        if let Err(panic) = catch_unwind(AssertUnwindSafe(move || callback(outcome))) {
            let message = panic_message(panic.as_ref());
            let mut meta = LogMeta::new();
            meta.insert("operation".to_string(), serde_json::Value::from(self.operation));
            meta.insert("panic".to_string(), serde_json::Value::from(message.as_str()));
            self.sink.log(LogLevel::Error, "continuation panicked", &meta);
            tracing::error!(operation = self.operation, panic = %message, "continuation panicked, aborting");
            std::process::abort();
        }
    }
}

impl<A: Send + 'static> Drop for Continuation<A> {
    fn drop(&mut self) {
        if self.callback.is_some() {
            tracing::warn!(operation = self.operation, "operation abandoned before completion");
            let outcome = (self.abandoned)();
            self.run(outcome);
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
