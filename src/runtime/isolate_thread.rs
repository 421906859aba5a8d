//! Dedicated OS thread owning one V8 isolate.
//!
//! An `OwnedIsolate` cannot leave the thread that created it, so each runtime
//! spawns a thread that creates the isolate and its context, reports back,
//! then runs submitted jobs one at a time until the job channel closes.
//! Callers block on a reply channel, which keeps every runtime call
//! synchronous from the host's point of view.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc;
use std::thread::JoinHandle;
use v8;

use super::exceptions::{Phase, take_error};
use crate::error::{Error, Result};
use crate::gc::{NativeRef, ReferenceTable, ValueId};
use crate::values::{Primitive, ValueKind, WireArg};

pub(crate) type Job = Box<dyn FnOnce(&mut IsolateCore) + Send + 'static>;

const LOOSE_EQUALS_SOURCE: &str = "(function (a, b) { return a == b; })";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Comparison {
    /// `==`
    Loose,
    /// `===`
    Strict,
    /// `Object.is`
    SameValue,
}

/// Parameters needed to build the isolate on its own thread.
pub(crate) struct IsolateSetup {
    pub runtime_id: u64,
    pub heap_initial_mb: usize,
    pub heap_max_mb: usize,
    pub bootstrap: Option<String>,
}

/// Everything below is only touched from the isolate thread.
pub(crate) struct NativeState {
    pub values: ReferenceTable,
    loose_equals: Option<v8::Global<v8::Function>>,
}

/// Isolate plus the state bound to it. Field order is drop order: globals
/// must go before the isolate.
pub(crate) struct IsolateCore {
    pub state: NativeState,
    context: v8::Global<v8::Context>,
    pub isolate: v8::OwnedIsolate,
}

/// Host-side handle on a running isolate thread.
pub(crate) struct IsolateThread {
    jobs: mpsc::Sender<Job>,
    thread: JoinHandle<()>,
}

impl IsolateThread {
    /// Spawn the thread and wait until the isolate is ready.
    pub(crate) fn spawn(setup: IsolateSetup) -> Result<(Self, v8::IsolateHandle)> {
        let (job_tx, job_rx) = mpsc::channel::<Job>();
        let (init_tx, init_rx) = mpsc::channel::<Result<v8::IsolateHandle>>();
        let runtime_id = setup.runtime_id;

        let thread = std::thread::Builder::new()
            .name(format!("js-runtime-{}", runtime_id))
            .spawn(move || {
                let mut core = match IsolateCore::new(setup) {
                    Ok(core) => {
                        let _ = init_tx.send(Ok(core.isolate.thread_safe_handle()));
                        core
                    }
                    Err(err) => {
                        let _ = init_tx.send(Err(err));
                        return;
                    }
                };

                while let Ok(job) = job_rx.recv() {
                    job(&mut core);

                    // Leave the isolate usable for the next job
                    if core.isolate.is_execution_terminating() {
                        core.isolate.cancel_terminate_execution();
                    }
                }

                tracing::debug!(
                    "Runtime #{} isolate disposed ({} references dropped)",
                    runtime_id,
                    core.state.values.len()
                );
            })
            .map_err(|e| Error::Native(format!("failed to spawn isolate thread: {}", e)))?;

        match init_rx.recv() {
            Ok(Ok(handle)) => Ok((Self { jobs: job_tx, thread }, handle)),
            Ok(Err(err)) => {
                let _ = thread.join();
                Err(err)
            }
            Err(_) => {
                let _ = thread.join();
                Err(Error::Native("isolate thread exited during startup".to_string()))
            }
        }
    }

    /// Run `job` on the isolate thread and wait for its result.
    pub(crate) fn run<R, F>(&self, job: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut IsolateCore) -> Result<R> + Send + 'static,
    {
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);

        self.jobs
            .send(Box::new(move |core| {
                let result = catch_unwind(AssertUnwindSafe(|| job(core)))
                    .unwrap_or_else(|_| Err(Error::Native("isolate job panicked".to_string())));
                let _ = reply_tx.send(result);
            }))
            .map_err(|_| Error::RuntimeAlreadyClosed)?;

        reply_rx.recv().map_err(|_| Error::RuntimeAlreadyClosed)?
    }

    /// Close the job channel and wait for the isolate to be disposed.
    pub(crate) fn shutdown(self) {
        let IsolateThread { jobs, thread } = self;
        drop(jobs);

        if thread.thread().id() == std::thread::current().id() {
            return;
        }
        if thread.join().is_err() {
            tracing::error!("Isolate thread panicked during shutdown");
        }
    }
}

impl IsolateCore {
    fn new(setup: IsolateSetup) -> Result<Self> {
        let params = v8::CreateParams::default().heap_limits(
            heap_bytes(setup.heap_initial_mb)?,
            heap_bytes(setup.heap_max_mb)?,
        );
        let mut isolate = v8::Isolate::new(params);

        let context = {
            let scope = &mut v8::HandleScope::new(&mut isolate);
            let context = v8::Context::new(scope, Default::default());
            v8::Global::new(scope, context)
        };

        let mut core = Self {
            state: NativeState {
                values: ReferenceTable::new(),
                loose_equals: None,
            },
            context,
            isolate,
        };

        if let Some(bootstrap) = setup.bootstrap {
            core.execute(&bootstrap, "<bootstrap>", |_, _, _| Ok(()))?;
        }

        tracing::debug!("Runtime #{} isolate created", setup.runtime_id);

        Ok(core)
    }

    /// Enter the context under a `TryCatch` and run `f`.
    ///
    /// `Ok(None)` from `f` means a V8 call returned empty; the pending
    /// exception (or termination) is turned into the error.
    pub(crate) fn scoped<R, F>(&mut self, f: F) -> Result<R>
    where
        F: FnOnce(&mut v8::TryCatch<v8::HandleScope>, &mut NativeState) -> Result<Option<R>>,
    {
        let IsolateCore {
            state,
            context,
            isolate,
        } = self;

        let scope = &mut v8::HandleScope::new(isolate);
        let ctx = v8::Local::new(scope, &*context);
        let scope = &mut v8::ContextScope::new(scope, ctx);
        let tc = &mut v8::TryCatch::new(scope);

        match f(tc, state)? {
            Some(result) => Ok(result),
            None => Err(take_error(tc, Phase::Execution, "")),
        }
    }

    /// Compile and run `code`, then hand the completion value to `finish`.
    pub(crate) fn execute<R, F>(&mut self, code: &str, resource_name: &str, finish: F) -> Result<R>
    where
        F: FnOnce(&mut v8::TryCatch<v8::HandleScope>, &mut NativeState, v8::Local<v8::Value>) -> Result<R>,
    {
        self.scoped(|tc, state| {
            let source = new_string(tc, code)?;

            let Some(script) = v8::Script::compile(tc, source, None) else {
                return Err(take_error(tc, Phase::Compilation, resource_name));
            };
            let Some(value) = script.run(tc) else {
                return Err(take_error(tc, Phase::Execution, resource_name));
            };

            finish(tc, state, value).map(Some)
        })
    }

    pub(crate) fn compare(&mut self, a: ValueId, b: ValueId, comparison: Comparison) -> Result<bool> {
        self.scoped(|tc, state| {
            let left = state.values.get(tc, a)?;
            let right = state.values.get(tc, b)?;

            match comparison {
                Comparison::Strict => Ok(Some(left.strict_equals(right))),
                Comparison::SameValue => Ok(Some(left.same_value(right))),
                Comparison::Loose => {
                    let equals = state.loose_equals(tc)?;
                    let recv = v8::undefined(tc).into();
                    Ok(equals
                        .call(tc, recv, &[left, right])
                        .map(|result| result.is_true()))
                }
            }
        })
    }
}

impl NativeState {
    /// Wrap a value into a new reference.
    pub(crate) fn wrap(&mut self, scope: &mut v8::HandleScope, value: v8::Local<v8::Value>) -> NativeRef {
        self.values.insert(scope, value)
    }

    pub(crate) fn object<'s>(
        &self,
        scope: &mut v8::HandleScope<'s>,
        id: ValueId,
    ) -> Result<v8::Local<'s, v8::Object>> {
        let value = self.values.get(scope, id)?;
        v8::Local::<v8::Object>::try_from(value).map_err(|_| mismatch("object", value))
    }

    pub(crate) fn array<'s>(
        &self,
        scope: &mut v8::HandleScope<'s>,
        id: ValueId,
    ) -> Result<v8::Local<'s, v8::Array>> {
        let value = self.values.get(scope, id)?;
        v8::Local::<v8::Array>::try_from(value).map_err(|_| mismatch("array", value))
    }

    pub(crate) fn function<'s>(
        &self,
        scope: &mut v8::HandleScope<'s>,
        id: ValueId,
    ) -> Result<v8::Local<'s, v8::Function>> {
        let value = self.values.get(scope, id)?;
        v8::Local::<v8::Function>::try_from(value).map_err(|_| mismatch("function", value))
    }

    pub(crate) fn args<'s>(
        &self,
        scope: &mut v8::HandleScope<'s>,
        args: &[WireArg],
    ) -> Result<Vec<v8::Local<'s, v8::Value>>> {
        args.iter()
            .map(|arg| arg.to_local(scope, &self.values))
            .collect()
    }

    fn loose_equals<'s>(
        &mut self,
        tc: &mut v8::TryCatch<v8::HandleScope<'s>>,
    ) -> Result<v8::Local<'s, v8::Function>> {
        if let Some(equals) = &self.loose_equals {
            return Ok(v8::Local::new(tc, equals));
        }

        let source = new_string(tc, LOOSE_EQUALS_SOURCE)?;
        let value = v8::Script::compile(tc, source, None)
            .and_then(|script| script.run(tc))
            .ok_or_else(|| take_error(tc, Phase::Compilation, "<equals>"))?;
        let equals = v8::Local::<v8::Function>::try_from(value)
            .map_err(|_| Error::Native("equality helper is not a function".to_string()))?;

        self.loose_equals = Some(v8::Global::new(tc, equals));
        Ok(equals)
    }
}

pub(crate) fn new_string<'s>(
    scope: &mut v8::HandleScope<'s>,
    value: &str,
) -> Result<v8::Local<'s, v8::String>> {
    v8::String::new(scope, value).ok_or_else(|| Error::Native("failed to allocate string".to_string()))
}

fn heap_bytes(mb: usize) -> Result<usize> {
    mb.checked_mul(1024 * 1024)
        .ok_or_else(|| Error::Native(format!("heap limit of {} MB overflows", mb)))
}

/// Completion value as a primitive, or a type mismatch.
pub(crate) fn primitive_of(scope: &mut v8::HandleScope, value: v8::Local<v8::Value>) -> Result<Primitive> {
    Primitive::from_local(scope, value)
}

fn mismatch(expected: &'static str, value: v8::Local<v8::Value>) -> Error {
    Error::TypeMismatch {
        expected,
        found: ValueKind::of(value).name(),
    }
}
