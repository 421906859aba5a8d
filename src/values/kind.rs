use v8;

/// Category of a guest value, fixed when its handle is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ValueKind {
    #[default]
    Undefined,
    Null,
    Boolean,
    Integer,
    Double,
    BigInt,
    String,
    Symbol,
    Object,
    Array,
    Function,
    Error,
    Promise,
    Map,
    Set,
    Date,
    RegExp,
    ArrayBuffer,
    TypedArray,
}

impl ValueKind {
    pub(crate) fn of(value: v8::Local<v8::Value>) -> Self {
        if value.is_undefined() {
            ValueKind::Undefined
        } else if value.is_null() {
            ValueKind::Null
        } else if value.is_boolean() {
            ValueKind::Boolean
        } else if value.is_int32() {
            ValueKind::Integer
        } else if value.is_number() {
            ValueKind::Double
        } else if value.is_big_int() {
            ValueKind::BigInt
        } else if value.is_string() {
            ValueKind::String
        } else if value.is_symbol() {
            ValueKind::Symbol
        } else if value.is_function() {
            ValueKind::Function
        } else if value.is_array() {
            ValueKind::Array
        } else if value.is_native_error() {
            ValueKind::Error
        } else if value.is_promise() {
            ValueKind::Promise
        } else if value.is_map() {
            ValueKind::Map
        } else if value.is_set() {
            ValueKind::Set
        } else if value.is_date() {
            ValueKind::Date
        } else if value.is_reg_exp() {
            ValueKind::RegExp
        } else if value.is_array_buffer() {
            ValueKind::ArrayBuffer
        } else if value.is_typed_array() {
            ValueKind::TypedArray
        } else {
            ValueKind::Object
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ValueKind::Undefined => "undefined",
            ValueKind::Null => "null",
            ValueKind::Boolean => "boolean",
            ValueKind::Integer => "integer",
            ValueKind::Double => "double",
            ValueKind::BigInt => "bigint",
            ValueKind::String => "string",
            ValueKind::Symbol => "symbol",
            ValueKind::Object => "object",
            ValueKind::Array => "array",
            ValueKind::Function => "function",
            ValueKind::Error => "error",
            ValueKind::Promise => "promise",
            ValueKind::Map => "map",
            ValueKind::Set => "set",
            ValueKind::Date => "date",
            ValueKind::RegExp => "regexp",
            ValueKind::ArrayBuffer => "array buffer",
            ValueKind::TypedArray => "typed array",
        }
    }

    /// Values that convert to a [`crate::Primitive`].
    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            ValueKind::Undefined
                | ValueKind::Null
                | ValueKind::Boolean
                | ValueKind::Integer
                | ValueKind::Double
                | ValueKind::BigInt
                | ValueKind::String
        )
    }

    pub fn is_object(&self) -> bool {
        !self.is_primitive() && *self != ValueKind::Symbol
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, ValueKind::Undefined | ValueKind::Null)
    }
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
