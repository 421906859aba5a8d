use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use v8;

use super::{Arg, Primitive, ValueKind, WireArg};
use crate::error::{Error, Result};
use crate::gc::{NativeRef, ValueId};
use crate::runtime::RuntimeInner;
use crate::runtime::isolate_thread::{Comparison, new_string, primitive_of};

/// Host-side handle on one guest value.
///
/// Each handle owns exactly one native reference. Release it with
/// [`V8Value::close`]; a handle dropped without closing is released at the
/// start of the next call into its runtime.
pub struct V8Value {
    id: AtomicU64,
    kind: ValueKind,
    runtime: Mutex<Option<Weak<RuntimeInner>>>,
    closed: AtomicBool,
}

impl V8Value {
    pub(crate) fn bind(native: NativeRef, runtime: &Arc<RuntimeInner>) -> Self {
        Self {
            id: AtomicU64::new(native.id),
            kind: native.kind,
            runtime: Mutex::new(Some(Arc::downgrade(runtime))),
            closed: AtomicBool::new(false),
        }
    }

    /// Bind a placeholder to `runtime` as a fresh `undefined` reference.
    pub(crate) fn register(&self, runtime: &Arc<RuntimeInner>) -> Result<()> {
        let mut slot = self.runtime.lock();
        if slot.is_some() {
            return Err(Error::RuntimeAlreadyRegistered);
        }
        if self.is_closed() {
            return Err(Error::ValueAlreadyClosed);
        }

        let native = runtime.call(None, |core| {
            core.scoped(|tc, state| {
                let undefined = v8::undefined(tc).into();
                Ok(Some(state.wrap(tc, undefined)))
            })
        })?;

        self.id.store(native.id, Ordering::Release);
        *slot = Some(Arc::downgrade(runtime));
        Ok(())
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn is_registered(&self) -> bool {
        self.runtime.lock().is_some()
    }

    /// Id of the owning runtime, if it is still alive.
    pub fn runtime_id(&self) -> Option<u64> {
        self.runtime
            .lock()
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|runtime| runtime.id)
    }

    fn id(&self) -> ValueId {
        self.id.load(Ordering::Acquire)
    }

    /// Owning runtime, checked in order: handle open, registered, runtime open.
    fn runtime(&self) -> Result<Arc<RuntimeInner>> {
        if self.is_closed() {
            return Err(Error::ValueAlreadyClosed);
        }

        let slot = self.runtime.lock();
        let weak = slot.as_ref().ok_or(Error::RuntimeNotRegistered)?;

        match weak.upgrade() {
            Some(runtime) if !runtime.is_closed() => Ok(runtime),
            _ => Err(Error::RuntimeAlreadyClosed),
        }
    }

    /// Release the native reference.
    ///
    /// A no-op once the owning runtime is closed. Closing twice while the
    /// runtime is open fails with [`Error::ValueAlreadyClosed`]. From a thread
    /// that cannot take the lock this fails with [`Error::LockConflict`] and
    /// the handle stays open.
    pub fn close(&self) -> Result<()> {
        let weak = self
            .runtime
            .lock()
            .clone()
            .ok_or(Error::RuntimeNotRegistered)?;

        let runtime = match weak.upgrade() {
            Some(runtime) if !runtime.is_closed() => runtime,
            _ => {
                self.closed.store(true, Ordering::Release);
                return Ok(());
            }
        };

        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(Error::ValueAlreadyClosed);
        }

        // Stays open when another thread holds the lock
        match runtime.release_value(self.id()) {
            Ok(()) | Err(Error::RuntimeAlreadyClosed) => Ok(()),
            Err(err) => {
                self.closed.store(false, Ordering::Release);
                Err(err)
            }
        }
    }

    /// A new, independently owned handle on the same guest value.
    pub fn clone_handle(&self) -> Result<V8Value> {
        let runtime = self.runtime()?;
        let id = self.id();

        let native = runtime.call(None, move |core| {
            core.scoped(|tc, state| state.values.duplicate(tc, id).map(Some))
        })?;
        Ok(V8Value::bind(native, &runtime))
    }

    /// Loose equality (`==`).
    pub fn equals(&self, other: &V8Value) -> Result<bool> {
        self.compare(other, Comparison::Loose)
    }

    /// Strict equality (`===`).
    pub fn strict_equals(&self, other: &V8Value) -> Result<bool> {
        self.compare(other, Comparison::Strict)
    }

    /// `Object.is` semantics.
    pub fn same_value(&self, other: &V8Value) -> Result<bool> {
        self.compare(other, Comparison::SameValue)
    }

    fn compare(&self, other: &V8Value, comparison: Comparison) -> Result<bool> {
        let runtime = self.runtime()?;
        let other_runtime = other.runtime()?;
        if !Arc::ptr_eq(&runtime, &other_runtime) {
            return Err(Error::RuntimeMismatch);
        }

        let (a, b) = (self.id(), other.id());
        runtime.call(None, move |core| core.compare(a, b, comparison))
    }

    /// Copy the value out, if it is a primitive.
    pub fn to_primitive(&self) -> Result<Primitive> {
        let runtime = self.runtime()?;
        let id = self.id();

        runtime.call(None, move |core| {
            core.scoped(|tc, state| {
                let value = state.values.get(tc, id)?;
                primitive_of(tc, value).map(Some)
            })
        })
    }

    /// JavaScript `String(value)`.
    pub fn to_js_string(&self) -> Result<String> {
        let runtime = self.runtime()?;
        let id = self.id();

        runtime.call(None, move |core| {
            core.scoped(|tc, state| {
                let value = state.values.get(tc, id)?;
                Ok(value.to_string(tc).map(|s| s.to_rust_string_lossy(tc)))
            })
        })
    }

    /// Property lookup on an object.
    pub fn get(&self, key: &str) -> Result<V8Value> {
        let runtime = self.object_runtime()?;
        let (id, key) = (self.id(), key.to_string());

        let native = runtime.call(None, move |core| {
            core.scoped(|tc, state| {
                let object = state.object(tc, id)?;
                let key = new_string(tc, &key)?;
                Ok(object
                    .get(tc, key.into())
                    .map(|value| state.wrap(tc, value)))
            })
        })?;
        Ok(V8Value::bind(native, &runtime))
    }

    pub fn set<'a>(&self, key: &str, value: impl Into<Arg<'a>>) -> Result<()> {
        let runtime = self.object_runtime()?;
        let arg = wire(&runtime, value.into())?;
        let (id, key) = (self.id(), key.to_string());

        runtime.call(None, move |core| {
            core.scoped(|tc, state| {
                let object = state.object(tc, id)?;
                let key = new_string(tc, &key)?;
                let value = arg.to_local(tc, &state.values)?;
                Ok(object.set(tc, key.into(), value).map(|_| ()))
            })
        })
    }

    pub fn has(&self, key: &str) -> Result<bool> {
        let runtime = self.object_runtime()?;
        let (id, key) = (self.id(), key.to_string());

        runtime.call(None, move |core| {
            core.scoped(|tc, state| {
                let object = state.object(tc, id)?;
                let key = new_string(tc, &key)?;
                Ok(object.has(tc, key.into()))
            })
        })
    }

    pub fn delete(&self, key: &str) -> Result<bool> {
        let runtime = self.object_runtime()?;
        let (id, key) = (self.id(), key.to_string());

        runtime.call(None, move |core| {
            core.scoped(|tc, state| {
                let object = state.object(tc, id)?;
                let key = new_string(tc, &key)?;
                Ok(object.delete(tc, key.into()))
            })
        })
    }

    /// Own enumerable property names, as strings.
    pub fn own_property_names(&self) -> Result<Vec<String>> {
        let runtime = self.object_runtime()?;
        let id = self.id();

        runtime.call(None, move |core| {
            core.scoped(|tc, state| {
                let object = state.object(tc, id)?;
                let Some(names) =
                    object.get_own_property_names(tc, v8::GetPropertyNamesArgs::default())
                else {
                    return Ok(None);
                };

                let mut result = Vec::with_capacity(names.length() as usize);
                for index in 0..names.length() {
                    let Some(name) = names.get_index(tc, index) else {
                        return Ok(None);
                    };
                    result.push(name.to_rust_string_lossy(tc));
                }
                Ok(Some(result))
            })
        })
    }

    /// Call the method `name` with this object as receiver.
    pub fn invoke(&self, name: &str, args: &[Arg<'_>]) -> Result<V8Value> {
        let runtime = self.object_runtime()?;
        let args = wire_all(&runtime, args)?;
        let (id, name) = (self.id(), name.to_string());

        let native = runtime.call(runtime.default_timeout, move |core| {
            core.scoped(|tc, state| {
                let object = state.object(tc, id)?;
                let key = new_string(tc, &name)?;
                let Some(method) = object.get(tc, key.into()) else {
                    return Ok(None);
                };
                let method = v8::Local::<v8::Function>::try_from(method).map_err(|_| {
                    Error::TypeMismatch {
                        expected: "function",
                        found: ValueKind::of(method).name(),
                    }
                })?;

                let args = state.args(tc, &args)?;
                Ok(method
                    .call(tc, object.into(), &args)
                    .map(|value| state.wrap(tc, value)))
            })
        })?;
        Ok(V8Value::bind(native, &runtime))
    }

    /// Length of an array.
    pub fn length(&self) -> Result<u32> {
        let runtime = self.kind_runtime(ValueKind::Array)?;
        let id = self.id();

        runtime.call(None, move |core| {
            core.scoped(|tc, state| Ok(Some(state.array(tc, id)?.length())))
        })
    }

    /// Array element, `undefined` past the end.
    pub fn get_index(&self, index: u32) -> Result<V8Value> {
        let runtime = self.kind_runtime(ValueKind::Array)?;
        let id = self.id();

        let native = runtime.call(None, move |core| {
            core.scoped(|tc, state| {
                let array = state.array(tc, id)?;
                Ok(array
                    .get_index(tc, index)
                    .map(|value| state.wrap(tc, value)))
            })
        })?;
        Ok(V8Value::bind(native, &runtime))
    }

    /// Call a function. The receiver defaults to `undefined`.
    pub fn call(&self, receiver: Option<&V8Value>, args: &[Arg<'_>]) -> Result<V8Value> {
        let runtime = self.kind_runtime(ValueKind::Function)?;
        let receiver = receiver.map(|r| wire(&runtime, Arg::Value(r))).transpose()?;
        let args = wire_all(&runtime, args)?;
        let id = self.id();

        let native = runtime.call(runtime.default_timeout, move |core| {
            core.scoped(|tc, state| {
                let function = state.function(tc, id)?;
                let recv = match &receiver {
                    Some(receiver) => receiver.to_local(tc, &state.values)?,
                    None => v8::undefined(tc).into(),
                };

                let args = state.args(tc, &args)?;
                Ok(function
                    .call(tc, recv, &args)
                    .map(|value| state.wrap(tc, value)))
            })
        })?;
        Ok(V8Value::bind(native, &runtime))
    }

    /// `message` of an error value.
    pub fn error_message(&self) -> Result<String> {
        self.error_property("message").map(Option::unwrap_or_default)
    }

    /// `stack` of an error value, when the engine recorded one.
    pub fn error_stack(&self) -> Result<Option<String>> {
        self.error_property("stack")
    }

    fn error_property(&self, name: &'static str) -> Result<Option<String>> {
        let runtime = self.kind_runtime(ValueKind::Error)?;
        let id = self.id();

        runtime.call(None, move |core| {
            core.scoped(|tc, state| {
                let object = state.object(tc, id)?;
                let key = new_string(tc, name)?;
                let Some(value) = object.get(tc, key.into()) else {
                    return Ok(None);
                };
                Ok(Some(
                    (!value.is_null_or_undefined()).then(|| value.to_rust_string_lossy(tc)),
                ))
            })
        })
    }

    fn object_runtime(&self) -> Result<Arc<RuntimeInner>> {
        let runtime = self.runtime()?;
        if !self.kind.is_object() {
            return Err(Error::TypeMismatch {
                expected: "object",
                found: self.kind.name(),
            });
        }
        Ok(runtime)
    }

    fn kind_runtime(&self, expected: ValueKind) -> Result<Arc<RuntimeInner>> {
        let runtime = self.runtime()?;
        if self.kind != expected {
            return Err(Error::TypeMismatch {
                expected: expected.name(),
                found: self.kind.name(),
            });
        }
        Ok(runtime)
    }

    /// Reference id, provided the handle is usable from `runtime`.
    fn id_in(&self, runtime: &Arc<RuntimeInner>) -> Result<ValueId> {
        let owner = self.runtime()?;
        if !Arc::ptr_eq(&owner, runtime) {
            return Err(Error::RuntimeMismatch);
        }
        Ok(self.id())
    }
}

fn wire(runtime: &Arc<RuntimeInner>, arg: Arg<'_>) -> Result<WireArg> {
    match arg {
        Arg::Value(value) => value.id_in(runtime).map(WireArg::Ref),
        Arg::Primitive(primitive) => Ok(WireArg::Prim(primitive)),
    }
}

fn wire_all(runtime: &Arc<RuntimeInner>, args: &[Arg<'_>]) -> Result<Vec<WireArg>> {
    args.iter().cloned().map(|arg| wire(runtime, arg)).collect()
}

/// An unregistered placeholder holding `undefined`.
impl Default for V8Value {
    fn default() -> Self {
        Self {
            id: AtomicU64::new(0),
            kind: ValueKind::Undefined,
            runtime: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }
}

impl Drop for V8Value {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let runtime = self.runtime.get_mut().as_ref().and_then(Weak::upgrade);
        if let Some(runtime) = runtime
            && !runtime.is_closed()
        {
            runtime.defer_release(self.id());
        }
    }
}

impl std::fmt::Debug for V8Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("V8Value")
            .field("id", &self.id())
            .field("kind", &self.kind)
            .field("runtime_id", &self.runtime_id())
            .field("closed", &self.is_closed())
            .finish()
    }
}
