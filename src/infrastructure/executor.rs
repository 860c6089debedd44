//! Bounded off-caller-thread execution
//!
//! Blocking native round trips (session open, function invoke) run here. Jobs are
//! admitted through a semaphore of `workers` permits and executed on tokio's blocking
//! pool, either on an ambient runtime or on one the executor owns.

use std::io;
use std::sync::Arc;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::Semaphore;

pub struct Executor {
    handle: Handle,
    runtime: Option<Runtime>,
    permits: Arc<Semaphore>,
    workers: usize,
}

impl Executor {
    /// Attach to the current tokio runtime if there is one, otherwise own a runtime
    pub fn new(workers: usize) -> io::Result<Self> {
        match Handle::try_current() {
            Ok(handle) => Ok(Self::with_handle(handle, workers)),
            Err(_) => Self::owned(workers),
        }
    }

    /// Always run on a dedicated runtime
    pub fn owned(workers: usize) -> io::Result<Self> {
        let workers = workers.max(1);
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(workers)
            .thread_name("rfc-bridge")
            .enable_all()
            .build()?;
        Ok(Self {
            handle: runtime.handle().clone(),
            runtime: Some(runtime),
            permits: Arc::new(Semaphore::new(workers)),
            workers,
        })
    }

    pub fn with_handle(handle: Handle, workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            handle,
            runtime: None,
            permits: Arc::new(Semaphore::new(workers)),
            workers,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn owns_runtime(&self) -> bool {
        self.runtime.is_some()
    }

    /// Run a blocking job once a permit is free
    pub fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let permits = self.permits.clone();
        self.handle.spawn(async move {
            let _permit = permits.acquire_owned().await.ok();
            if let Err(err) = tokio::task::spawn_blocking(job).await {
                tracing::error!("blocking job failed: {}", err);
            }
        });
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("workers", &self.workers)
            .field("owns_runtime", &self.runtime.is_some())
            .finish()
    }
}
