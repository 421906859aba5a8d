//! Executor that execution guards are spawned onto.
//!
//! A guard never runs on an implicit global pool: it is spawned on the
//! executor carried by the configuration. That is either a handle to a tokio
//! runtime owned by the embedder, or a small runtime owned by this executor
//! and started the first time a guard needs it.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use tokio::runtime::{Builder, Handle, Runtime, RuntimeFlavor};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};

#[derive(Clone)]
pub struct GuardExecutor {
    inner: Arc<ExecutorInner>,
}

enum ExecutorInner {
    Shared(Handle),
    Owned(OwnedExecutor),
}

struct OwnedExecutor {
    runtime: OnceLock<std::result::Result<Runtime, String>>,
    worker_threads: usize,
}

impl GuardExecutor {
    /// Spawn guards on an existing multi-thread tokio runtime.
    ///
    /// A current-thread runtime is rejected: its only thread blocks on the
    /// guarded call, so the guard would never be polled.
    pub fn from_handle(handle: Handle) -> Result<Self> {
        if handle.runtime_flavor() == RuntimeFlavor::CurrentThread {
            return Err(Error::Executor(
                "guards need a multi-thread tokio runtime".to_string(),
            ));
        }

        Ok(Self {
            inner: Arc::new(ExecutorInner::Shared(handle)),
        })
    }

    /// Spawn guards on the tokio runtime the caller is running in.
    pub fn current() -> Result<Self> {
        let handle = Handle::try_current().map_err(|e| Error::Executor(e.to_string()))?;
        Self::from_handle(handle)
    }

    /// Own a dedicated runtime, started lazily on the first spawn.
    pub fn owned(worker_threads: usize) -> Self {
        Self {
            inner: Arc::new(ExecutorInner::Owned(OwnedExecutor {
                runtime: OnceLock::new(),
                worker_threads: worker_threads.max(1),
            })),
        }
    }

    pub(crate) fn spawn<F>(&self, future: F) -> Result<JoinHandle<()>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match &*self.inner {
            ExecutorInner::Shared(handle) => Ok(handle.spawn(future)),
            ExecutorInner::Owned(owned) => Ok(owned.runtime()?.spawn(future)),
        }
    }
}

impl Default for GuardExecutor {
    fn default() -> Self {
        Self::owned(1)
    }
}

impl OwnedExecutor {
    fn runtime(&self) -> Result<&Runtime> {
        self.runtime
            .get_or_init(|| {
                tracing::debug!(
                    "Starting guard executor with {} worker thread(s)",
                    self.worker_threads
                );
                Builder::new_multi_thread()
                    .worker_threads(self.worker_threads)
                    .thread_name("js-engine-guard")
                    .enable_time()
                    .build()
                    .map_err(|e| e.to_string())
            })
            .as_ref()
            .map_err(|e| Error::Executor(e.clone()))
    }
}

impl Drop for OwnedExecutor {
    fn drop(&mut self) {
        // May be dropped from inside another runtime, so never block here
        if let Some(Ok(runtime)) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl fmt::Debug for GuardExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.inner {
            ExecutorInner::Shared(_) => f.write_str("GuardExecutor::Shared"),
            ExecutorInner::Owned(owned) => f
                .debug_struct("GuardExecutor::Owned")
                .field("worker_threads", &owned.worker_threads)
                .field("started", &owned.runtime.get().is_some())
                .finish(),
        }
    }
}
