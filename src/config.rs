//! Runtime and engine configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::security::GuardExecutor;

/// Default interval between two guard polls.
pub const DEFAULT_GUARD_CHECK_INTERVAL_MS: u64 = 20;

/// Default number of runtimes an engine pool may hand out.
pub const DEFAULT_POOL_MAX_SIZE: usize = 8;

/// Engine flavor, resolved once per process by [`crate::platform::load`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JsRuntimeType {
    #[default]
    V8,
    Node,
}

impl JsRuntimeType {
    pub fn is_node(&self) -> bool {
        matches!(self, JsRuntimeType::Node)
    }

    pub fn name(&self) -> &'static str {
        match self {
            JsRuntimeType::V8 => "v8",
            JsRuntimeType::Node => "node",
        }
    }
}

impl fmt::Display for JsRuntimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Configuration shared by runtimes, guards and the engine pool.
///
/// The guard executor and the log dispatcher are explicit values rather than
/// process globals. Leaving them unset gives every runtime its own lazily
/// started executor and makes guards log through the dispatcher that is
/// current on the thread that starts them.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine flavor
    pub runtime_type: JsRuntimeType,
    /// Maximum engines handed out by a pool
    pub pool_max_size: usize,
    /// Timeout applied to script execution (0 = disabled)
    pub default_timeout_ms: u64,
    /// Interval between two guard polls
    pub guard_check_interval_ms: u64,
    /// Initial V8 heap size in MB
    pub heap_initial_mb: usize,
    /// Maximum V8 heap size in MB
    pub heap_max_mb: usize,
    /// Flags applied before the V8 platform is initialised
    pub v8_flags: Vec<String>,
    #[serde(skip)]
    pub executor: Option<GuardExecutor>,
    #[serde(skip)]
    pub dispatch: Option<tracing::Dispatch>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            runtime_type: JsRuntimeType::V8,
            pool_max_size: DEFAULT_POOL_MAX_SIZE,
            default_timeout_ms: 0,
            guard_check_interval_ms: DEFAULT_GUARD_CHECK_INTERVAL_MS,
            heap_initial_mb: 1,
            heap_max_mb: 128,
            v8_flags: Vec::new(),
            executor: None,
            dispatch: None,
        }
    }
}

impl EngineConfig {
    pub fn with_runtime_type(mut self, runtime_type: JsRuntimeType) -> Self {
        self.runtime_type = runtime_type;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_guard_check_interval(mut self, interval: Duration) -> Self {
        self.guard_check_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_executor(mut self, executor: GuardExecutor) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn with_dispatch(mut self, dispatch: tracing::Dispatch) -> Self {
        self.dispatch = Some(dispatch);
        self
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        match self.default_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Poll interval, never below one millisecond.
    pub fn guard_check_interval(&self) -> Duration {
        Duration::from_millis(self.guard_check_interval_ms.max(1))
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("runtime_type", &self.runtime_type)
            .field("pool_max_size", &self.pool_max_size)
            .field("default_timeout_ms", &self.default_timeout_ms)
            .field("guard_check_interval_ms", &self.guard_check_interval_ms)
            .field("heap_initial_mb", &self.heap_initial_mb)
            .field("heap_max_mb", &self.heap_max_mb)
            .field("v8_flags", &self.v8_flags)
            .field("executor", &self.executor)
            .field("dispatch", &self.dispatch.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.runtime_type, JsRuntimeType::V8);
        assert_eq!(config.default_timeout(), None);
        assert_eq!(config.guard_check_interval(), Duration::from_millis(20));
        assert!(config.executor.is_none());
    }

    #[test]
    fn test_zero_interval_is_clamped() {
        let config = EngineConfig {
            guard_check_interval_ms: 0,
            ..Default::default()
        };
        assert_eq!(config.guard_check_interval(), Duration::from_millis(1));
    }

    #[test]
    fn test_partial_deserialize_keeps_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{ "runtime_type": "node", "default_timeout_ms": 250 }"#)
                .unwrap();
        assert!(config.runtime_type.is_node());
        assert_eq!(config.default_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.pool_max_size, DEFAULT_POOL_MAX_SIZE);
        assert_eq!(config.heap_max_mb, 128);
    }
}
