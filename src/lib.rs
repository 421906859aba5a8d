pub mod config;
pub mod engine;
pub mod error;
mod gc;
pub mod platform;
pub mod runtime;
pub mod security;
pub mod values;

// Core API
pub use config::{EngineConfig, JsRuntimeType};
pub use engine::{Engine, EnginePool, PoolStats};
pub use error::{Error, Result, ScriptError};
pub use runtime::{Locker, Runtime, ScriptExecutor};
pub use security::{ExecutionGuard, GuardExecutor, GuardState, GuardTarget};
pub use values::{Arg, Primitive, V8Value, ValueKind};
