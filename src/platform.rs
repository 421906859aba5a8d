//! Global V8 platform initialization and engine flavor registry.
//!
//! V8 can only be initialized once per process. Every flavor shares that
//! platform; a flavor only decides how fresh contexts are bootstrapped.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::OnceLock;
use v8;

use crate::config::JsRuntimeType;
use crate::error::{Error, Result};

static PLATFORM: OnceLock<std::result::Result<v8::SharedRef<v8::Platform>, String>> =
    OnceLock::new();
static V8_LIBRARY: OnceLock<NativeLibrary> = OnceLock::new();
static NODE_LIBRARY: OnceLock<NativeLibrary> = OnceLock::new();

const NODE_BOOTSTRAP: &str = r#"
    globalThis.global = globalThis;
    globalThis.process = Object.freeze({
        platform: 'v8',
        env: {},
        versions: Object.freeze({ v8: '__V8_VERSION__' }),
    });
"#;

/// A resolved engine flavor.
pub struct NativeLibrary {
    runtime_type: JsRuntimeType,
    platform: &'static v8::SharedRef<v8::Platform>,
    bootstrap: Option<String>,
}

impl NativeLibrary {
    pub fn runtime_type(&self) -> JsRuntimeType {
        self.runtime_type
    }

    pub fn v8_version(&self) -> &'static str {
        v8::V8::get_version()
    }

    pub fn platform(&self) -> &'static v8::SharedRef<v8::Platform> {
        self.platform
    }

    /// Script run in every new context of this flavor.
    pub(crate) fn bootstrap(&self) -> Option<&str> {
        self.bootstrap.as_deref()
    }
}

impl std::fmt::Debug for NativeLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeLibrary")
            .field("runtime_type", &self.runtime_type)
            .field("v8_version", &self.v8_version())
            .finish()
    }
}

/// Resolve the native library for a flavor, initializing V8 on first use.
///
/// `flags` only take effect on the very first call in the process.
pub fn load(runtime_type: JsRuntimeType, flags: &[String]) -> Result<&'static NativeLibrary> {
    let slot = match runtime_type {
        JsRuntimeType::V8 => &V8_LIBRARY,
        JsRuntimeType::Node => &NODE_LIBRARY,
    };

    if let Some(library) = slot.get() {
        if !flags.is_empty() {
            log::debug!(
                "{} library already loaded, ignoring flags {:?}",
                runtime_type,
                flags
            );
        }
        return Ok(library);
    }

    let platform = get_platform(flags)?;

    let bootstrap = runtime_type
        .is_node()
        .then(|| NODE_BOOTSTRAP.replace("__V8_VERSION__", v8::V8::get_version()));

    Ok(slot.get_or_init(|| {
        log::info!(
            "Loaded {} library (V8 {})",
            runtime_type,
            v8::V8::get_version()
        );
        NativeLibrary {
            runtime_type,
            platform,
            bootstrap,
        }
    }))
}

/// Get the global V8 platform, initializing it if necessary.
fn get_platform(flags: &[String]) -> Result<&'static v8::SharedRef<v8::Platform>> {
    let platform = PLATFORM.get_or_init(|| {
        let flags = flags.to_vec();
        catch_unwind(AssertUnwindSafe(move || {
            for flag in &flags {
                v8::V8::set_flags_from_string(flag);
            }

            let platform = v8::new_default_platform(0, false).make_shared();
            v8::V8::initialize_platform(platform.clone());
            v8::V8::initialize();
            platform
        }))
        .map_err(|panic| {
            let reason = panic
                .downcast_ref::<String>()
                .cloned()
                .or_else(|| panic.downcast_ref::<&str>().map(|s| s.to_string()))
                .unwrap_or_else(|| "V8 initialization panicked".to_string());
            log::error!("Failed to initialize V8 platform: {}", reason);
            reason
        })
    });

    platform
        .as_ref()
        .map_err(|reason| Error::NativeLibraryUnavailable(reason.clone()))
}
