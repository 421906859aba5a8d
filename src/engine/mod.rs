//! Bounded pool of runtimes.
//!
//! The pool hands out [`Engine`]s, each owning one runtime until it is closed
//! or dropped. Idle runtimes are reused; a closed runtime is never returned
//! to the pool. Every runtime created by a pool shares the pool's guard
//! executor and log dispatcher.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::runtime::Runtime;
use crate::security::{ExecutionGuard, GuardTarget};

pub struct EnginePool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    config: EngineConfig,
    idle: Mutex<Vec<Runtime>>,
    active: AtomicUsize,
    created: AtomicU64,
    closed: AtomicBool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub max_size: usize,
    /// Engines currently handed out
    pub active: usize,
    /// Runtimes waiting for reuse
    pub idle: usize,
    /// Runtimes created over the pool's lifetime
    pub created: u64,
}

impl EnginePool {
    pub fn new(config: EngineConfig) -> Self {
        let mut config = config;
        // One executor for every runtime of this pool
        config.executor = Some(config.executor.take().unwrap_or_default());

        tracing::info!(
            "Initializing EnginePool with max_size={}, runtime={}, heap_max={}MB",
            config.pool_max_size,
            config.runtime_type,
            config.heap_max_mb
        );

        Self {
            inner: Arc::new(PoolInner {
                config,
                idle: Mutex::new(Vec::new()),
                active: AtomicUsize::new(0),
                created: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Hand out an engine, reusing an idle runtime when one is available.
    ///
    /// Fails with [`Error::PoolExhausted`] once `pool_max_size` engines are out.
    pub fn engine(&self) -> Result<Engine> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::Acquire) {
            return Err(Error::RuntimeAlreadyClosed);
        }

        let max = inner.config.pool_max_size;
        inner
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |active| {
                (active < max).then_some(active + 1)
            })
            .map_err(|_| Error::PoolExhausted { max })?;

        match inner.take_runtime() {
            Ok(runtime) => Ok(Engine {
                runtime: Some(runtime),
                pool: Arc::clone(inner),
            }),
            Err(err) => {
                inner.active.fetch_sub(1, Ordering::AcqRel);
                Err(err)
            }
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            max_size: self.inner.config.pool_max_size,
            active: self.inner.active.load(Ordering::Acquire),
            idle: self.inner.idle.lock().len(),
            created: self.inner.created.load(Ordering::Acquire),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Close idle runtimes and stop handing out engines. Engines still out
    /// discard their runtime when returned.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let idle = std::mem::take(&mut *self.inner.idle.lock());
        let count = idle.len();
        for runtime in idle {
            if let Err(e) = runtime.close() {
                tracing::warn!("Failed to close pooled runtime #{}: {}", runtime.id(), e);
            }
        }

        tracing::info!("EnginePool closed ({} idle runtimes disposed)", count);
    }
}

impl Drop for EnginePool {
    fn drop(&mut self) {
        self.close();
    }
}

impl PoolInner {
    fn take_runtime(&self) -> Result<Runtime> {
        loop {
            let Some(runtime) = self.idle.lock().pop() else {
                break;
            };
            if !runtime.is_closed() {
                tracing::debug!("Reusing pooled runtime #{}", runtime.id());
                return Ok(runtime);
            }
        }

        let runtime = Runtime::new(&self.config)?;
        self.created.fetch_add(1, Ordering::AcqRel);
        tracing::debug!("Pool created runtime #{}", runtime.id());
        Ok(runtime)
    }

    fn give_back(&self, runtime: Runtime) {
        self.active.fetch_sub(1, Ordering::AcqRel);

        if runtime.is_closed() {
            tracing::debug!("Discarding closed runtime #{}", runtime.id());
            return;
        }

        // Still held by a Locker somewhere, or the pool is gone
        if runtime.is_locked() || self.closed.load(Ordering::Acquire) {
            tracing::debug!("Discarding runtime #{}", runtime.id());
            let _ = runtime.close();
            return;
        }

        self.idle.lock().push(runtime);
    }
}

/// A runtime checked out of an [`EnginePool`].
pub struct Engine {
    runtime: Option<Runtime>,
    pool: Arc<PoolInner>,
}

impl Engine {
    pub fn runtime(&self) -> Result<&Runtime> {
        self.runtime.as_ref().ok_or(Error::RuntimeAlreadyClosed)
    }

    pub fn is_active(&self) -> bool {
        self.runtime.as_ref().is_some_and(|runtime| !runtime.is_closed())
    }

    /// Start an execution guard on this engine's runtime with the pool's
    /// executor, poll interval and dispatcher.
    ///
    /// The guard waits for the runtime's first call, then watches until the
    /// runtime is no longer in use. Hold a [`crate::Locker`] to cover several
    /// calls with one guard.
    pub fn guard(&self, timeout: Duration) -> Result<ExecutionGuard> {
        let runtime = self.runtime()?;
        let config = &self.pool.config;
        let executor = config.executor.clone().unwrap_or_default();

        let target: Arc<dyn GuardTarget> = runtime.inner().clone();
        ExecutionGuard::start_deferred(
            target,
            timeout,
            config.guard_check_interval(),
            &executor,
            config.dispatch.as_ref(),
        )
    }

    /// Return the runtime to the pool.
    pub fn close(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            self.pool.give_back(runtime);
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("runtime", &self.runtime)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(max: usize) -> EnginePool {
        EnginePool::new(EngineConfig {
            pool_max_size: max,
            ..Default::default()
        })
    }

    #[test]
    fn test_exhaustion() {
        let pool = pool(1);
        let _engine = pool.engine().unwrap();
        assert!(matches!(pool.engine(), Err(Error::PoolExhausted { max: 1 })));
    }

    #[test]
    fn test_runtime_reused_after_close() {
        let pool = pool(1);

        let mut engine = pool.engine().unwrap();
        let id = engine.runtime().unwrap().id();
        engine.close();
        assert!(!engine.is_active());
        assert!(matches!(engine.runtime(), Err(Error::RuntimeAlreadyClosed)));

        let engine = pool.engine().unwrap();
        assert_eq!(engine.runtime().unwrap().id(), id);
        assert_eq!(pool.stats().created, 1);
    }

    #[test]
    fn test_closed_runtime_is_discarded() {
        let pool = pool(2);

        let engine = pool.engine().unwrap();
        let id = engine.runtime().unwrap().id();
        engine.runtime().unwrap().close().unwrap();
        drop(engine);

        let stats = pool.stats();
        assert_eq!(stats.active, 0);
        assert_eq!(stats.idle, 0);

        let engine = pool.engine().unwrap();
        assert_ne!(engine.runtime().unwrap().id(), id);
    }
}
