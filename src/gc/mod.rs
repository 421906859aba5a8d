//! Ownership of native value references.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  V8Value (host side, any thread)                            │
//! │  ├── reference id + kind tag                                │
//! │  ├── weak link to its runtime                               │
//! │  └── close() releases exactly once, drop() defers           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  DeferredReleaseQueue (per runtime, thread-safe)            │
//! │  ├── ids of handles dropped without close()                 │
//! │  └── drained at the start of the next call                  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  ReferenceTable (isolate thread only)                       │
//! │  ├── id → v8::Global<v8::Value>                             │
//! │  └── dropped with the runtime, before the isolate           │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod deferred_release;
mod reference_table;

pub use deferred_release::DeferredReleaseQueue;
pub use reference_table::{NativeRef, ReferenceTable};

/// Identifier of one native reference inside a runtime.
pub type ValueId = u64;
