mod exceptions;
pub(crate) mod isolate_thread;
mod locker;

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use v8;

use crate::config::{EngineConfig, JsRuntimeType};
use crate::error::{Error, Result};
use crate::gc::{DeferredReleaseQueue, NativeRef, ValueId};
use crate::platform;
use crate::security::{ExecutionGuard, GuardExecutor, GuardTarget};
use crate::values::{Primitive, V8Value};

use isolate_thread::{IsolateCore, IsolateSetup, IsolateThread, primitive_of};
pub use locker::Locker;
use locker::{RuntimeEntry, RuntimeLock};

static NEXT_RUNTIME_ID: AtomicU64 = AtomicU64::new(1);

/// One embedded V8 instance.
///
/// Cheap to clone; every clone refers to the same isolate. Calls are
/// synchronous and serialized: a call issued while another thread holds the
/// runtime fails with [`Error::LockConflict`] instead of waiting.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

pub(crate) struct RuntimeInner {
    pub(crate) id: u64,
    runtime_type: JsRuntimeType,
    pub(crate) lock: RuntimeLock,
    closed: AtomicBool,
    isolate: Mutex<Option<IsolateThread>>,
    isolate_handle: v8::IsolateHandle,
    deferred: DeferredReleaseQueue,
    pub(crate) default_timeout: Option<Duration>,
    check_interval: Duration,
    executor: GuardExecutor,
    dispatch: Option<tracing::Dispatch>,
}

impl Runtime {
    /// Create a runtime of the configured flavor.
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let library = platform::load(config.runtime_type, &config.v8_flags)?;
        let id = NEXT_RUNTIME_ID.fetch_add(1, Ordering::Relaxed);

        let (thread, isolate_handle) = IsolateThread::spawn(IsolateSetup {
            runtime_id: id,
            heap_initial_mb: config.heap_initial_mb,
            heap_max_mb: config.heap_max_mb.max(config.heap_initial_mb),
            bootstrap: library.bootstrap().map(str::to_string),
        })?;

        tracing::debug!("Runtime #{} created ({})", id, config.runtime_type);

        Ok(Self {
            inner: Arc::new(RuntimeInner {
                id,
                runtime_type: config.runtime_type,
                lock: RuntimeLock::new(),
                closed: AtomicBool::new(false),
                isolate: Mutex::new(Some(thread)),
                isolate_handle,
                deferred: DeferredReleaseQueue::new(),
                default_timeout: config.default_timeout(),
                check_interval: config.guard_check_interval(),
                executor: config.executor.clone().unwrap_or_default(),
                dispatch: config.dispatch.clone(),
            }),
        })
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn runtime_type(&self) -> JsRuntimeType {
        self.inner.runtime_type
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Whether some thread currently holds the runtime, explicitly or for a call.
    pub fn is_locked(&self) -> bool {
        self.inner.lock.is_locked()
    }

    pub fn is_in_use(&self) -> bool {
        self.inner.is_in_use()
    }

    /// Take explicit ownership for the current thread.
    pub fn locker(&self) -> Result<Locker> {
        Locker::acquire(Arc::clone(&self.inner))
    }

    /// Start building a script execution.
    pub fn executor(&self, code: impl Into<String>) -> ScriptExecutor<'_> {
        ScriptExecutor {
            runtime: self,
            code: code.into(),
            resource_name: "<anonymous>".to_string(),
            timeout: self.inner.default_timeout,
        }
    }

    pub fn global_object(&self) -> Result<V8Value> {
        self.create_with(|tc, state| {
            let global = tc.get_current_context().global(tc);
            Ok(Some(state.wrap(tc, global.into())))
        })
    }

    pub fn create_object(&self) -> Result<V8Value> {
        self.create_with(|tc, state| {
            let object = v8::Object::new(tc);
            Ok(Some(state.wrap(tc, object.into())))
        })
    }

    pub fn create_array(&self) -> Result<V8Value> {
        self.create_with(|tc, state| {
            let array = v8::Array::new(tc, 0);
            Ok(Some(state.wrap(tc, array.into())))
        })
    }

    /// Copy a primitive into the guest heap and hold a reference to it.
    pub fn create_value(&self, value: impl Into<Primitive>) -> Result<V8Value> {
        let value = value.into();
        self.create_with(move |tc, state| {
            let local = value.to_local(tc)?;
            Ok(Some(state.wrap(tc, local)))
        })
    }

    /// Bind an unregistered placeholder handle to this runtime as `undefined`.
    pub fn register(&self, value: &V8Value) -> Result<()> {
        value.register(&self.inner)
    }

    /// Number of live native references held by this runtime.
    pub fn reference_count(&self) -> Result<usize> {
        self.inner
            .call(None, |core| Ok(core.state.values.len()))
    }

    /// Request termination of the running script. Callable from any thread
    /// without holding the lock.
    pub fn terminate_execution(&self) -> Result<()> {
        GuardTarget::terminate_execution(&*self.inner)
    }

    /// Hint the garbage collector that memory is tight.
    pub fn low_memory_notification(&self) -> Result<()> {
        self.inner.call(None, |core| {
            core.isolate.low_memory_notification();
            Ok(())
        })
    }

    /// Dispose the isolate. Handles obtained from this runtime become inert.
    ///
    /// Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        if self.inner.is_closed() {
            return Ok(());
        }

        let _entry = self.inner.lock.enter()?;
        self.inner.shutdown();
        Ok(())
    }

    pub(crate) fn inner(&self) -> &Arc<RuntimeInner> {
        &self.inner
    }

    fn create_with<F>(&self, f: F) -> Result<V8Value>
    where
        F: FnOnce(&mut v8::TryCatch<v8::HandleScope>, &mut isolate_thread::NativeState) -> Result<Option<NativeRef>>
            + Send
            + 'static,
    {
        let native = self.inner.call(None, move |core| core.scoped(f))?;
        Ok(V8Value::bind(native, &self.inner))
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("id", &self.inner.id)
            .field("runtime_type", &self.inner.runtime_type)
            .field("locked", &self.inner.lock.is_locked())
            .field("closed", &self.inner.is_closed())
            .finish()
    }
}

impl RuntimeInner {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Check the runtime is open and take (or nest into) the lock.
    fn enter(&self) -> Result<RuntimeEntry<'_>> {
        if self.is_closed() {
            return Err(Error::RuntimeAlreadyClosed);
        }

        let entry = self.lock.enter()?;

        // Closed by the previous owner between the two checks
        if self.is_closed() {
            return Err(Error::RuntimeAlreadyClosed);
        }
        Ok(entry)
    }

    /// Run `job` on the isolate under the caller's lock, with an execution
    /// guard when `timeout` is set.
    pub(crate) fn call<R, F>(self: &Arc<Self>, timeout: Option<Duration>, job: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut IsolateCore) -> Result<R> + Send + 'static,
    {
        let _entry = self.enter()?;

        match timeout {
            Some(timeout) if !timeout.is_zero() => self.dispatch_guarded(timeout, job),
            _ => self.dispatch(job),
        }
    }

    /// Release one reference under the caller's lock.
    pub(crate) fn release_value(&self, id: ValueId) -> Result<()> {
        let _entry = self.enter()?;
        self.dispatch(move |core| {
            core.state.values.release(id);
            Ok(())
        })
    }

    pub(crate) fn defer_release(&self, id: ValueId) {
        self.deferred.defer(id);
    }

    /// Send a job to the isolate thread. Caller must hold the lock.
    fn dispatch<R, F>(&self, job: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut IsolateCore) -> Result<R> + Send + 'static,
    {
        let pending = self.deferred.take_all();

        let isolate = self.isolate.lock();
        let thread = isolate.as_ref().ok_or(Error::RuntimeAlreadyClosed)?;

        thread.run(move |core| {
            if !pending.is_empty() {
                core.state.values.release_all(&pending);
            }
            job(core)
        })
    }

    fn dispatch_guarded<R, F>(self: &Arc<Self>, timeout: Duration, job: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut IsolateCore) -> Result<R> + Send + 'static,
    {
        let target: Arc<dyn GuardTarget> = self.clone();
        let mut guard = ExecutionGuard::start(
            target,
            timeout,
            self.check_interval,
            &self.executor,
            self.dispatch.as_ref(),
        )?;

        let result = self.dispatch(job);
        guard.close();

        if !guard.was_triggered() {
            return result;
        }

        // The guard may have fired after the script completed
        self.isolate_handle.cancel_terminate_execution();

        match result {
            Err(Error::Terminated { .. }) => Err(Error::ExecutionTimeout {
                timeout,
                elapsed: guard.elapsed_at_fire().unwrap_or_else(|| guard.elapsed()),
            }),
            other => other,
        }
    }

    fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let thread = self.isolate.lock().take();
        if let Some(thread) = thread {
            thread.shutdown();
        }

        let dropped = self.deferred.take_all().len();
        tracing::debug!(
            "Runtime #{} closed ({} deferred releases discarded)",
            self.id,
            dropped
        );
    }
}

impl GuardTarget for RuntimeInner {
    fn is_in_use(&self) -> bool {
        !self.is_closed() && self.lock.is_locked()
    }

    fn terminate_execution(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::RuntimeAlreadyClosed);
        }

        if self.isolate_handle.terminate_execution() {
            Ok(())
        } else {
            Err(Error::RuntimeAlreadyClosed)
        }
    }
}

impl Drop for RuntimeInner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Builder for one script execution.
///
/// # Example
///
/// ```rust,ignore
/// let sum = runtime
///     .executor("1 + 1")
///     .resource_name("sum.js")
///     .timeout(Duration::from_millis(50))
///     .execute_integer()?;
/// ```
#[must_use]
pub struct ScriptExecutor<'a> {
    runtime: &'a Runtime,
    code: String,
    resource_name: String,
    timeout: Option<Duration>,
}

impl ScriptExecutor<'_> {
    /// Name reported in diagnostics.
    pub fn resource_name(mut self, name: impl Into<String>) -> Self {
        self.resource_name = name.into();
        self
    }

    /// Guard the execution. A zero duration disables the guard.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }

    pub fn no_timeout(mut self) -> Self {
        self.timeout = None;
        self
    }

    /// Run and keep a handle to the completion value.
    pub fn execute(self) -> Result<V8Value> {
        let inner = Arc::clone(self.runtime.inner());
        let native = self.run(|tc, state, value| Ok(state.wrap(tc, value)))?;
        Ok(V8Value::bind(native, &inner))
    }

    /// Run for side effects only.
    pub fn execute_void(self) -> Result<()> {
        self.run(|_, _, _| Ok(()))
    }

    pub fn execute_primitive(self) -> Result<Primitive> {
        self.run(|tc, _, value| primitive_of(tc, value))
    }

    pub fn execute_integer(self) -> Result<i32> {
        self.execute_primitive()?.as_i32()
    }

    pub fn execute_double(self) -> Result<f64> {
        self.execute_primitive()?.as_f64()
    }

    pub fn execute_boolean(self) -> Result<bool> {
        self.execute_primitive()?.as_bool()
    }

    pub fn execute_string(self) -> Result<String> {
        self.execute_primitive()?.into_string()
    }

    fn run<R, F>(self, finish: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut v8::TryCatch<v8::HandleScope>, &mut isolate_thread::NativeState, v8::Local<v8::Value>) -> Result<R>
            + Send
            + 'static,
    {
        let ScriptExecutor {
            runtime,
            code,
            resource_name,
            timeout,
        } = self;

        tracing::trace!(
            "Runtime #{} executing {} ({} bytes)",
            runtime.id(),
            resource_name,
            code.len()
        );

        runtime
            .inner
            .call(timeout, move |core| core.execute(&code, &resource_name, finish))
    }
}
