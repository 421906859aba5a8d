//! Conversion of caught V8 exceptions into [`Error`] values.

use v8;

use crate::error::{Error, ScriptError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Compilation,
    Execution,
}

/// Build the error for a failed compile or run inside `tc`.
///
/// Termination wins over any exception, and an exception without an attached
/// message becomes an `Unknown*` error carrying only its string form.
pub(crate) fn take_error(
    tc: &mut v8::TryCatch<v8::HandleScope>,
    phase: Phase,
    resource_name: &str,
) -> Error {
    if tc.has_terminated() {
        return Error::Terminated {
            can_continue: tc.can_continue(),
        };
    }

    let text = tc
        .exception()
        .and_then(|exception| exception.to_string(tc))
        .map(|s| s.to_rust_string_lossy(tc))
        .unwrap_or_else(|| "unknown error".to_string());

    let Some(message) = tc.message() else {
        return match phase {
            Phase::Compilation => Error::UnknownCompilation(text),
            Phase::Execution => Error::UnknownExecution(text),
        };
    };

    let error = ScriptError {
        message: message.get(tc).to_rust_string_lossy(tc),
        resource_name: resource_name.to_string(),
        source_line: message
            .get_source_line(tc)
            .map(|line| line.to_rust_string_lossy(tc))
            .unwrap_or_default(),
        line_number: message.get_line_number(tc).unwrap_or(0),
        start_column: message.get_start_column(),
        end_column: message.get_end_column(),
        start_position: message.get_start_position().max(0) as usize,
        end_position: message.get_end_position().max(0) as usize,
    };

    tracing::debug!("Script {:?} failed: {}", phase, error);

    match phase {
        Phase::Compilation => Error::Compilation(error),
        Phase::Execution => Error::Execution(error),
    }
}
