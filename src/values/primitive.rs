use serde::{Deserialize, Serialize};
use v8;

use super::{V8Value, ValueKind};
use crate::error::{Error, Result};
use crate::gc::ValueId;

/// A guest value that is copied across the boundary instead of referenced.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Primitive {
    #[default]
    Undefined,
    Null,
    Boolean(bool),
    Integer(i32),
    Double(f64),
    BigInt(i64),
    String(String),
}

impl Primitive {
    pub fn kind(&self) -> ValueKind {
        match self {
            Primitive::Undefined => ValueKind::Undefined,
            Primitive::Null => ValueKind::Null,
            Primitive::Boolean(_) => ValueKind::Boolean,
            Primitive::Integer(_) => ValueKind::Integer,
            Primitive::Double(_) => ValueKind::Double,
            Primitive::BigInt(_) => ValueKind::BigInt,
            Primitive::String(_) => ValueKind::String,
        }
    }

    pub fn as_i32(&self) -> Result<i32> {
        match self {
            Primitive::Integer(i) => Ok(*i),
            other => Err(other.mismatch("integer")),
        }
    }

    /// Integers widen to doubles.
    pub fn as_f64(&self) -> Result<f64> {
        match self {
            Primitive::Integer(i) => Ok(f64::from(*i)),
            Primitive::Double(d) => Ok(*d),
            other => Err(other.mismatch("double")),
        }
    }

    pub fn as_bool(&self) -> Result<bool> {
        match self {
            Primitive::Boolean(b) => Ok(*b),
            other => Err(other.mismatch("boolean")),
        }
    }

    pub fn into_string(self) -> Result<String> {
        match self {
            Primitive::String(s) => Ok(s),
            other => Err(other.mismatch("string")),
        }
    }

    fn mismatch(&self, expected: &'static str) -> Error {
        Error::TypeMismatch {
            expected,
            found: self.kind().name(),
        }
    }

    /// Copy a guest primitive out of the heap.
    ///
    /// Objects are a type mismatch, and so is a bigint outside the `i64` range.
    pub(crate) fn from_local(
        scope: &mut v8::HandleScope,
        value: v8::Local<v8::Value>,
    ) -> Result<Self> {
        let kind = ValueKind::of(value);
        let mismatch = |expected| Error::TypeMismatch {
            expected,
            found: kind.name(),
        };

        match kind {
            ValueKind::Undefined => Ok(Primitive::Undefined),
            ValueKind::Null => Ok(Primitive::Null),
            ValueKind::Boolean => Ok(Primitive::Boolean(value.is_true())),
            ValueKind::Integer => value
                .int32_value(scope)
                .map(Primitive::Integer)
                .ok_or_else(|| mismatch("integer")),
            ValueKind::Double => value
                .number_value(scope)
                .map(Primitive::Double)
                .ok_or_else(|| mismatch("double")),
            ValueKind::BigInt => {
                let big = v8::Local::<v8::BigInt>::try_from(value).map_err(|_| mismatch("bigint"))?;
                match big.i64_value() {
                    (value, true) => Ok(Primitive::BigInt(value)),
                    (_, false) => Err(mismatch("64-bit bigint")),
                }
            }
            ValueKind::String => Ok(Primitive::String(value.to_rust_string_lossy(scope))),
            _ => Err(mismatch("primitive")),
        }
    }

    pub(crate) fn to_local<'s>(
        &self,
        scope: &mut v8::HandleScope<'s>,
    ) -> Result<v8::Local<'s, v8::Value>> {
        Ok(match self {
            Primitive::Undefined => v8::undefined(scope).into(),
            Primitive::Null => v8::null(scope).into(),
            Primitive::Boolean(b) => v8::Boolean::new(scope, *b).into(),
            Primitive::Integer(i) => v8::Integer::new(scope, *i).into(),
            Primitive::Double(d) => v8::Number::new(scope, *d).into(),
            Primitive::BigInt(i) => v8::BigInt::new_from_i64(scope, *i).into(),
            Primitive::String(s) => v8::String::new(scope, s)
                .ok_or_else(|| Error::Native("failed to allocate string".to_string()))?
                .into(),
        })
    }
}

impl From<bool> for Primitive {
    fn from(value: bool) -> Self {
        Primitive::Boolean(value)
    }
}

impl From<i32> for Primitive {
    fn from(value: i32) -> Self {
        Primitive::Integer(value)
    }
}

impl From<f64> for Primitive {
    fn from(value: f64) -> Self {
        Primitive::Double(value)
    }
}

impl From<i64> for Primitive {
    fn from(value: i64) -> Self {
        Primitive::BigInt(value)
    }
}

impl From<&str> for Primitive {
    fn from(value: &str) -> Self {
        Primitive::String(value.to_string())
    }
}

impl From<String> for Primitive {
    fn from(value: String) -> Self {
        Primitive::String(value)
    }
}

impl From<()> for Primitive {
    fn from(_: ()) -> Self {
        Primitive::Undefined
    }
}

/// Argument passed into the guest: either an existing handle or a copied primitive.
#[derive(Debug, Clone)]
pub enum Arg<'a> {
    Value(&'a V8Value),
    Primitive(Primitive),
}

impl<'a> From<&'a V8Value> for Arg<'a> {
    fn from(value: &'a V8Value) -> Self {
        Arg::Value(value)
    }
}

impl From<Primitive> for Arg<'_> {
    fn from(value: Primitive) -> Self {
        Arg::Primitive(value)
    }
}

macro_rules! arg_from_primitive {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Arg<'_> {
                fn from(value: $ty) -> Self {
                    Arg::Primitive(value.into())
                }
            }
        )*
    };
}

arg_from_primitive!(bool, i32, f64, i64, &str, String);

/// Thread-independent form of an [`Arg`], shipped to the isolate thread.
#[derive(Debug, Clone)]
pub(crate) enum WireArg {
    Ref(ValueId),
    Prim(Primitive),
}

impl WireArg {
    pub(crate) fn to_local<'s>(
        &self,
        scope: &mut v8::HandleScope<'s>,
        values: &crate::gc::ReferenceTable,
    ) -> Result<v8::Local<'s, v8::Value>> {
        match self {
            WireArg::Ref(id) => values.get(scope, *id),
            WireArg::Prim(primitive) => primitive.to_local(scope),
        }
    }
}
