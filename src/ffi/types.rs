//! C-compatible type definitions for FFI.

use std::ffi::{c_char, c_void};

/// Result status codes for FFI functions.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqwStatus {
    /// Operation succeeded.
    Ok = 0,
    /// Null pointer was passed.
    NullPointer = 1,
    /// Invalid argument.
    InvalidArgument = 2,
    /// Array length mismatch.
    LengthMismatch = 3,
    /// Invalid UTF-8 string.
    InvalidUtf8 = 4,
    /// Runtime error.
    RuntimeError = 5,
    /// Unknown model identifier.
    NotFound = 6,
    /// The model was built but reports not ok.
    InvalidModel = 7,
    /// Output buffer too small; the required size was written back.
    BufferTooSmall = 8,
}

/// Identification returned by a plugin's `sqw_plugin_info`.
///
/// All strings are NUL-terminated and must stay valid for the lifetime of
/// the loaded library.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CSqwPluginInfo {
    /// Host version the plugin was built against.
    pub host_version: *const c_char,
    /// Factory identifier.
    pub ident: *const c_char,
    /// Human-readable description.
    pub long_name: *const c_char,
}

/// Evaluate S(h, k, l, E).
pub type CSqwEvaluateFn = unsafe extern "C" fn(handle: *mut c_void, h: f64, k: f64, l: f64, e: f64) -> f64;
/// Report validity.
pub type CSqwIsOkFn = unsafe extern "C" fn(handle: *mut c_void) -> bool;
/// Write the wire-encoded variables into `buf` (NUL-terminated, truncated
/// to `len`) and return the full encoded length without the terminator.
pub type CSqwGetVarsFn = unsafe extern "C" fn(handle: *mut c_void, buf: *mut c_char, len: usize) -> usize;
/// Apply wire-encoded variables.
pub type CSqwSetVarsFn = unsafe extern "C" fn(handle: *mut c_void, vars: *const c_char);
/// Return a new handle sharing precomputed data.
pub type CSqwCopyFn = unsafe extern "C" fn(handle: *mut c_void) -> *mut c_void;
/// Release a handle.
pub type CSqwFreeFn = unsafe extern "C" fn(handle: *mut c_void);

/// A model instance behind a C function table.
///
/// `evaluate` may be called from several threads at once; every other entry
/// is called with exclusive access to the handle.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CSqwModel {
    pub handle: *mut c_void,
    pub evaluate: Option<CSqwEvaluateFn>,
    pub is_ok: Option<CSqwIsOkFn>,
    pub get_vars: Option<CSqwGetVarsFn>,
    pub set_vars: Option<CSqwSetVarsFn>,
    pub shallow_copy: Option<CSqwCopyFn>,
    pub free: Option<CSqwFreeFn>,
}

impl CSqwModel {
    /// A table with no model behind it.
    pub const fn null() -> Self {
        Self {
            handle: std::ptr::null_mut(),
            evaluate: None,
            is_ok: None,
            get_vars: None,
            set_vars: None,
            shallow_copy: None,
            free: None,
        }
    }

    pub fn is_null(&self) -> bool {
        self.handle.is_null() || self.evaluate.is_none()
    }
}

/// Plugin entry point returning its identification.
pub type CSqwPluginInfoFn = unsafe extern "C" fn() -> CSqwPluginInfo;
/// Plugin entry point building a model from a config path.
pub type CSqwPluginConstructFn = unsafe extern "C" fn(cfg: *const c_char) -> CSqwModel;
