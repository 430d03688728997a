//! C ABI over a process-global [`Registry`].
//!
//! Handles are plain `u64`s; 0 means "no instance". Strings passed in must
//! be NUL-terminated UTF-8 and are only read for the duration of the call.
//! Strings returned must be released with [`tether_string_free`].

use std::ffi::{CStr, CString, c_char};
use std::sync::{Arc, OnceLock};

use crate::config::{LoggingConfig, TetherConfig};
use crate::registry::Registry;

/// Native event receiver. `payload` is valid only during the call.
pub type TetherEventFn = extern "C" fn(payload: *const c_char);

static REGISTRY: OnceLock<Registry> = OnceLock::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(|| {
        let config = TetherConfig::load(None).unwrap_or_else(|err| {
            tracing::warn!("Invalid configuration, using defaults: {}", err);
            TetherConfig::default()
        });
        Registry::from_config(&config)
    })
}

/// Borrow a C string argument. None for null or non-UTF-8 input.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string that outlives `'a`.
unsafe fn str_arg<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}

/// Interior NULs cannot cross the boundary; they are dropped.
fn to_c_string(text: String) -> CString {
    CString::new(text).unwrap_or_else(|err| {
        let mut bytes = err.into_vec();
        bytes.retain(|&b| b != 0);
        CString::new(bytes).unwrap_or_default()
    })
}

/// Start an engine instance. Returns 0 if the thread could not be spawned.
#[unsafe(no_mangle)]
pub extern "C" fn tether_create_instance() -> u64 {
    registry().create_instance().unwrap_or_else(|err| {
        tracing::error!("Failed to create instance: {}", err);
        0
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn tether_destroy_instance(handle: u64) -> bool {
    registry().destroy_instance(handle)
}

#[unsafe(no_mangle)]
pub extern "C" fn tether_is_ready(handle: u64) -> bool {
    registry().is_ready(handle)
}

/// Fire-and-forget evaluation.
///
/// # Safety
/// `code` must be null or a valid NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tether_evaluate(handle: u64, code: *const c_char) -> bool {
    match unsafe { str_arg(code) } {
        Some(code) => registry().evaluate(handle, code),
        None => false,
    }
}

/// Correlated evaluation. Never returns null; the empty string is the
/// failure sentinel. A zero `timeout_ms` selects the configured default.
///
/// # Safety
/// `code` must be null or a valid NUL-terminated string. The result must
/// be released with [`tether_string_free`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tether_evaluate_sync(handle: u64, code: *const c_char, timeout_ms: u64) -> *mut c_char {
    let result = match unsafe { str_arg(code) } {
        Some(code) => registry().evaluate_sync(handle, code, timeout_ms),
        None => String::new(),
    };
    to_c_string(result).into_raw()
}

/// # Safety
/// `ptr` must be null or a string returned by this library, freed once.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tether_string_free(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(unsafe { CString::from_raw(ptr) });
    }
}

/// Register (or with a null `callback`, remove) the receiver of `event`.
///
/// # Safety
/// `event` must be a valid NUL-terminated string. `callback` must stay
/// callable until removed or the instance is destroyed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tether_set_event_callback(
    handle: u64,
    event: *const c_char,
    callback: Option<TetherEventFn>,
) -> bool {
    let Some(event) = (unsafe { str_arg(event) }) else {
        return false;
    };
    let Some(callback) = callback else {
        return registry().remove_event_callback(handle, event);
    };
    registry().set_event_callback(
        handle,
        event,
        Arc::new(move |payload: &str| {
            // Lives until the callback returns.
            let payload = to_c_string(payload.to_string());
            callback(payload.as_ptr());
        }),
    )
}

/// Install the log subscriber. `json` selects JSON lines output.
#[unsafe(no_mangle)]
pub extern "C" fn tether_init_logging(json: bool) -> bool {
    let config = TetherConfig::load(None).map(|config| config.logging).unwrap_or_default();
    crate::logging::init(&LoggingConfig { json, ..config })
}
