//! FFI bindings for Tagpulse
//!
//! C-compatible functions for driving page tracking from a host runtime.
//! All functions take null-terminated C strings, and every returned string is
//! allocated here and must be released with `tagpulse_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use crate::config::TrackingConfig;
use crate::error::TrackError;
use crate::identity::extract_ref_id;
use crate::replay::{Replayer, TimedSignal};
use crate::schema::validate_all;
use crate::types::EventRecord;

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Helper to convert C string to Rust string
unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Helper to convert Rust string to C string (caller must free)
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

// ============================================================================
// Stateless API
// ============================================================================

/// Check a data layer (JSON array of records) against the record contracts.
///
/// Returns a JSON array of `{index, violation}` objects; empty when valid.
///
/// # Safety
/// - `json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `tagpulse_free_string`.
/// - Returns NULL on error; call `tagpulse_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn tagpulse_validate(json: *const c_char) -> *mut c_char {
    clear_last_error();

    let json_str = match cstr_to_string(json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid JSON string pointer");
            return ptr::null_mut();
        }
    };

    let result = serde_json::from_str::<Vec<EventRecord>>(&json_str).and_then(|records| {
        let report: Vec<_> = validate_all(&records)
            .into_iter()
            .map(|(index, violation)| {
                serde_json::json!({
                    "index": index,
                    "message": violation.to_string(),
                    "violation": violation,
                })
            })
            .collect();
        serde_json::to_string(&report)
    });

    match result {
        Ok(report) => string_to_cstr(&report),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Extract the referral id from a URL.
///
/// # Safety
/// - `url` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `tagpulse_free_string`.
/// - Returns NULL when the URL carries no referral id; this is not an error.
#[no_mangle]
pub unsafe extern "C" fn tagpulse_extract_ref_id(url: *const c_char) -> *mut c_char {
    clear_last_error();

    let url_str = match cstr_to_string(url) {
        Some(s) => s,
        None => {
            set_last_error("Invalid URL string pointer");
            return ptr::null_mut();
        }
    };

    match extract_ref_id(&url_str) {
        Some(ref_id) => string_to_cstr(&ref_id),
        None => ptr::null_mut(),
    }
}

// ============================================================================
// Stateful Page API
// ============================================================================

/// Opaque handle to a tracked browsing session
pub struct TagpulseHandle {
    replayer: Replayer,
}

/// Create a tracking session.
///
/// # Safety
/// - `config_json` must be a valid null-terminated C string, or NULL for defaults.
/// - Must be freed with `tagpulse_page_free`.
/// - Returns NULL on error; call `tagpulse_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn tagpulse_page_new(config_json: *const c_char) -> *mut TagpulseHandle {
    clear_last_error();

    let config = if config_json.is_null() {
        TrackingConfig::default()
    } else {
        let parsed = cstr_to_string(config_json)
            .ok_or_else(|| TrackError::InvalidConfig("config is not valid UTF-8".to_string()))
            .and_then(|json| TrackingConfig::from_json(&json));
        match parsed {
            Ok(config) => config.with_env_overrides(),
            Err(e) => {
                set_last_error(&e.to_string());
                return ptr::null_mut();
            }
        }
    };

    let handle = Box::new(TagpulseHandle {
        replayer: Replayer::new(config),
    });
    Box::into_raw(handle)
}

/// Free a tracking session.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `tagpulse_page_new`, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn tagpulse_page_free(handle: *mut TagpulseHandle) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}

/// Feed one timestamped UI signal (JSON object) into the session.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `tagpulse_page_new`.
/// - `signal_json` must be a valid null-terminated C string.
/// - Returns 0 on success, non-zero on error.
/// - On error, call `tagpulse_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn tagpulse_page_signal(
    handle: *mut TagpulseHandle,
    signal_json: *const c_char,
) -> i32 {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null session pointer");
        return -1;
    }

    let handle = &mut *handle;

    let json_str = match cstr_to_string(signal_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid signal string pointer");
            return -1;
        }
    };

    let result = serde_json::from_str::<TimedSignal>(&json_str)
        .map_err(TrackError::from)
        .and_then(|signal| handle.replayer.apply(&signal));

    match result {
        Ok(()) => 0,
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

/// Export the data layer as a JSON array.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `tagpulse_page_new`.
/// - Returns a newly allocated string that must be freed with `tagpulse_free_string`.
/// - Returns NULL on error; call `tagpulse_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn tagpulse_page_data_layer(handle: *mut TagpulseHandle) -> *mut c_char {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null session pointer");
        return ptr::null_mut();
    }

    let handle = &*handle;

    let json = match handle.replayer.data_layer() {
        Some(layer) => layer.to_json(),
        None => Ok("[]".to_string()),
    };

    match json {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by Tagpulse functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a Tagpulse function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn tagpulse_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get the last error message.
///
/// # Safety
/// - Returns a pointer to a thread-local error string.
/// - The returned pointer is valid until the next Tagpulse function call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn tagpulse_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

/// Get the Tagpulse library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn tagpulse_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}
