//! Execution time enforcement.
//!
//! ## Components
//!
//! - [`execution_guard`]: watchdog task that terminates a runtime once a
//!   wall-clock deadline has passed
//! - [`executor`]: the explicit executor guards are spawned onto
//!
//! ## Usage
//!
//! ```rust,ignore
//! use jsbind_runtime_v8::security::{ExecutionGuard, GuardExecutor};
//!
//! let executor = GuardExecutor::owned(1);
//! let mut guard = ExecutionGuard::start(target, timeout, interval, &executor, None)?;
//! // run the script
//! guard.close();
//! ```

mod execution_guard;
mod executor;

pub use execution_guard::{ExecutionGuard, GuardState, GuardTarget};
pub use executor::GuardExecutor;
