//! Error taxonomy for runtimes, lockers, value handles and guards.
//!
//! Locking and lifecycle violations are programmer errors and are reported at
//! the call site. Script failures carry the positional diagnostics V8 attaches
//! to the thrown exception.

use std::fmt;
use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

/// Positional diagnostics for a compilation or execution failure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptError {
    pub message: String,
    pub resource_name: String,
    pub source_line: String,
    pub line_number: usize,
    pub start_column: usize,
    pub end_column: usize,
    pub start_position: usize,
    pub end_position: usize,
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}:{}:{})",
            self.message, self.resource_name, self.line_number, self.start_column
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("lock conflict: {0}")]
    LockConflict(String),

    #[error("value handle is not registered with a runtime")]
    RuntimeNotRegistered,

    #[error("runtime has already been closed")]
    RuntimeAlreadyClosed,

    #[error("value handle has already been closed")]
    ValueAlreadyClosed,

    #[error("value handle is already registered with a runtime")]
    RuntimeAlreadyRegistered,

    #[error("value handles belong to different runtimes")]
    RuntimeMismatch,

    #[error("native library is unavailable: {0}")]
    NativeLibraryUnavailable(String),

    #[error("compilation failed: {0}")]
    Compilation(ScriptError),

    #[error("execution failed: {0}")]
    Execution(ScriptError),

    #[error("compilation failed: {0}")]
    UnknownCompilation(String),

    #[error("execution failed: {0}")]
    UnknownExecution(String),

    #[error("execution has been terminated (can continue: {can_continue})")]
    Terminated { can_continue: bool },

    #[error("execution was terminated after {}ms (timeout {}ms)", .elapsed.as_millis(), .timeout.as_millis())]
    ExecutionTimeout { timeout: Duration, elapsed: Duration },

    #[error("expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("engine pool exhausted ({max} engines in use)")]
    PoolExhausted { max: usize },

    #[error("guard executor unavailable: {0}")]
    Executor(String),

    #[error("native call failed: {0}")]
    Native(String),
}

impl Error {
    pub(crate) fn lock_conflict(message: impl Into<String>) -> Self {
        Error::LockConflict(message.into())
    }

    /// Script-level failures raised by the guest engine.
    pub fn is_script_error(&self) -> bool {
        matches!(
            self,
            Error::Compilation(_)
                | Error::Execution(_)
                | Error::UnknownCompilation(_)
                | Error::UnknownExecution(_)
        )
    }

    /// Positional diagnostics, when the engine provided them.
    pub fn script_error(&self) -> Option<&ScriptError> {
        match self {
            Error::Compilation(e) | Error::Execution(e) => Some(e),
            _ => None,
        }
    }
}
