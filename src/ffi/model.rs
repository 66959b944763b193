//! FFI functions for building and querying models.

use super::plugin::write_c_string;
use super::types::SqwStatus;
use crate::model::vars::{decode_vars, encode_vars, ENTRY_SEP, FIELD_SEP};
use crate::model::{construct_sqw, get_sqw_names, load_sqw_plugins, SqwModel};
use crate::runtime::{BatchEvaluator, RuntimeConfig};
use std::ffi::{c_char, CStr};

/// Opaque model instance.
pub struct SqwModelBox(Box<dyn SqwModel>);

/// Opaque handle to a model.
pub type SqwModelHandle = *mut SqwModelBox;

/// Opaque handle to a batch evaluator.
pub type SqwEvaluatorHandle = *mut BatchEvaluator;

/// Configuration for creating a batch evaluator.
#[repr(C)]
#[derive(Debug, Clone, Default)]
pub struct CRuntimeConfig {
    /// Number of worker threads (0 = auto-detect).
    pub worker_count: usize,
}

impl From<CRuntimeConfig> for RuntimeConfig {
    fn from(c: CRuntimeConfig) -> Self {
        RuntimeConfig {
            worker_count: if c.worker_count == 0 {
                num_cpus::get()
            } else {
                c.worker_count
            },
        }
    }
}

unsafe fn str_arg<'a>(p: *const c_char) -> Result<&'a str, SqwStatus> {
    if p.is_null() {
        return Err(SqwStatus::NullPointer);
    }
    CStr::from_ptr(p).to_str().map_err(|_| SqwStatus::InvalidUtf8)
}

/// Copy `text` out, reporting the size needed including the terminator.
unsafe fn write_out(text: &str, buf: *mut c_char, len: usize, out_needed: *mut usize) -> SqwStatus {
    if !out_needed.is_null() {
        *out_needed = text.len() + 1;
    }
    if buf.is_null() || len <= text.len() {
        return SqwStatus::BufferTooSmall;
    }
    write_c_string(text, buf, len);
    SqwStatus::Ok
}

unsafe fn adopt(model: Box<dyn SqwModel>, out_handle: *mut SqwModelHandle) -> SqwStatus {
    let ok = model.is_ok();
    *out_handle = Box::into_raw(Box::new(SqwModelBox(model)));
    if ok {
        SqwStatus::Ok
    } else {
        SqwStatus::InvalidModel
    }
}

/// Build the model registered as `ident` from the file `cfg`.
///
/// On `InvalidModel` a handle is still returned and must be freed.
///
/// # Safety
/// `ident` and `cfg` must be valid C strings; out_handle must be a valid
/// pointer.
#[no_mangle]
pub unsafe extern "C" fn sqw_model_create(
    ident: *const c_char,
    cfg: *const c_char,
    out_handle: *mut SqwModelHandle,
) -> SqwStatus {
    if out_handle.is_null() {
        return SqwStatus::NullPointer;
    }
    let (ident, cfg) = match (str_arg(ident), str_arg(cfg)) {
        (Ok(i), Ok(c)) => (i, c),
        (Err(e), _) | (_, Err(e)) => return e,
    };
    match construct_sqw(ident, cfg) {
        Some(model) => adopt(model, out_handle),
        None => SqwStatus::NotFound,
    }
}

/// Like `sqw_model_create`, running the model in a child process.
///
/// # Safety
/// Same as `sqw_model_create`.
#[cfg(target_os = "linux")]
#[no_mangle]
pub unsafe extern "C" fn sqw_model_create_isolated(
    ident: *const c_char,
    cfg: *const c_char,
    out_handle: *mut SqwModelHandle,
) -> SqwStatus {
    if out_handle.is_null() {
        return SqwStatus::NullPointer;
    }
    let (ident, cfg) = match (str_arg(ident), str_arg(cfg)) {
        (Ok(i), Ok(c)) => (i, c),
        (Err(e), _) | (_, Err(e)) => return e,
    };
    match crate::proc::construct_sqw_isolated(ident, cfg) {
        Some(model) => adopt(model, out_handle),
        None => SqwStatus::NotFound,
    }
}

/// Free a model handle.
///
/// # Safety
/// Handle must be valid or null.
#[no_mangle]
pub unsafe extern "C" fn sqw_model_free(handle: SqwModelHandle) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}

/// Evaluate S(h, k, l, E).
///
/// # Safety
/// Handle and out_value must be valid.
#[no_mangle]
pub unsafe extern "C" fn sqw_model_evaluate(
    handle: SqwModelHandle,
    h: f64,
    k: f64,
    l: f64,
    e: f64,
    out_value: *mut f64,
) -> SqwStatus {
    if handle.is_null() || out_value.is_null() {
        return SqwStatus::NullPointer;
    }
    *out_value = (*handle).0.evaluate(h, k, l, e);
    SqwStatus::Ok
}

/// # Safety
/// Handle must be valid or null.
#[no_mangle]
pub unsafe extern "C" fn sqw_model_is_ok(handle: SqwModelHandle) -> bool {
    !handle.is_null() && (*handle).0.is_ok()
}

/// Write the model's variables (`name#,#type#,#value` joined by `#;#`).
///
/// `out_needed` receives the buffer size required including the
/// terminator; `BufferTooSmall` is returned if `len` is less.
///
/// # Safety
/// Handle must be valid; buf must be valid for `len` bytes or null.
#[no_mangle]
pub unsafe extern "C" fn sqw_model_get_vars(
    handle: SqwModelHandle,
    buf: *mut c_char,
    len: usize,
    out_needed: *mut usize,
) -> SqwStatus {
    if handle.is_null() {
        return SqwStatus::NullPointer;
    }
    write_out(&encode_vars(&(*handle).0.vars()), buf, len, out_needed)
}

/// Apply variables in the same encoding `sqw_model_get_vars` produces.
///
/// # Safety
/// Handle must be valid; vars must be a valid C string.
#[no_mangle]
pub unsafe extern "C" fn sqw_model_set_vars(handle: SqwModelHandle, vars: *const c_char) -> SqwStatus {
    if handle.is_null() {
        return SqwStatus::NullPointer;
    }
    let wire = match str_arg(vars) {
        Ok(w) => w,
        Err(e) => return e,
    };
    (*handle).0.set_vars(&decode_vars(wire));
    SqwStatus::Ok
}

/// New handle sharing the model's precomputed data.
///
/// # Safety
/// Handle and out_handle must be valid.
#[no_mangle]
pub unsafe extern "C" fn sqw_model_shallow_copy(
    handle: SqwModelHandle,
    out_handle: *mut SqwModelHandle,
) -> SqwStatus {
    if handle.is_null() || out_handle.is_null() {
        return SqwStatus::NullPointer;
    }
    *out_handle = Box::into_raw(Box::new(SqwModelBox((*handle).0.shallow_copy())));
    SqwStatus::Ok
}

/// Write the available models as `ident#,#description` joined by `#;#`.
///
/// # Safety
/// buf must be valid for `len` bytes or null; out_needed must be valid or
/// null.
#[no_mangle]
pub unsafe extern "C" fn sqw_get_model_names(buf: *mut c_char, len: usize, out_needed: *mut usize) -> SqwStatus {
    let text = get_sqw_names()
        .into_iter()
        .map(|(ident, desc)| format!("{}{}{}", ident, FIELD_SEP, desc))
        .collect::<Vec<_>>()
        .join(ENTRY_SEP);
    write_out(&text, buf, len, out_needed)
}

/// Load every plugin in `dir`.
///
/// # Safety
/// dir must be a valid C string; out_count must be valid or null.
#[no_mangle]
pub unsafe extern "C" fn sqw_load_plugins(dir: *const c_char, out_count: *mut usize) -> SqwStatus {
    let dir = match str_arg(dir) {
        Ok(d) => d,
        Err(e) => return e,
    };
    let n = load_sqw_plugins(dir);
    if !out_count.is_null() {
        *out_count = n;
    }
    SqwStatus::Ok
}

/// Create a batch evaluator.
///
/// # Safety
/// out_handle must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn sqw_evaluator_create(
    config: *const CRuntimeConfig,
    out_handle: *mut SqwEvaluatorHandle,
) -> SqwStatus {
    if out_handle.is_null() {
        return SqwStatus::NullPointer;
    }

    let cfg = if config.is_null() {
        RuntimeConfig::default()
    } else {
        (*config).clone().into()
    };

    match BatchEvaluator::new(cfg) {
        Ok(ev) => {
            *out_handle = Box::into_raw(Box::new(ev));
            SqwStatus::Ok
        }
        Err(e) => {
            tracing::error!("{}", e);
            SqwStatus::RuntimeError
        }
    }
}

/// Free an evaluator handle.
///
/// # Safety
/// Handle must be valid or null.
#[no_mangle]
pub unsafe extern "C" fn sqw_evaluator_free(handle: SqwEvaluatorHandle) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}

/// Evaluate `count` points given as consecutive (h, k, l, E) quadruples.
///
/// # Safety
/// Handles must be valid; points must hold `4 * count` values and out
/// `count` values.
#[no_mangle]
pub unsafe extern "C" fn sqw_evaluator_run(
    evaluator: SqwEvaluatorHandle,
    model: SqwModelHandle,
    points: *const f64,
    count: usize,
    out: *mut f64,
) -> SqwStatus {
    if evaluator.is_null() || model.is_null() || points.is_null() || out.is_null() {
        return SqwStatus::NullPointer;
    }
    let Some(n) = count.checked_mul(4) else {
        return SqwStatus::LengthMismatch;
    };

    let flat = std::slice::from_raw_parts(points, n);
    let quads: Vec<[f64; 4]> = flat
        .chunks_exact(4)
        .map(|c| [c[0], c[1], c[2], c[3]])
        .collect();
    let out = std::slice::from_raw_parts_mut(out, count);
    (*evaluator).evaluate_into((*model).0.as_ref(), &quads, out);

    SqwStatus::Ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;
    use std::ptr;

    fn create(ident: &str) -> (SqwStatus, SqwModelHandle) {
        let ident = CString::new(ident).unwrap();
        let cfg = CString::new("").unwrap();
        let mut handle = ptr::null_mut();
        let status = unsafe { sqw_model_create(ident.as_ptr(), cfg.as_ptr(), &mut handle) };
        (status, handle)
    }

    #[test]
    fn test_model_lifecycle() {
        let (status, handle) = create("elastic");
        assert_eq!(status, SqwStatus::Ok);
        unsafe {
            assert!(sqw_model_is_ok(handle));

            let mut v = 0.0;
            assert_eq!(sqw_model_evaluate(handle, 1.0, 0.0, 0.0, 0.0, &mut v), SqwStatus::Ok);
            assert_eq!(v, 1.0);

            let wire = CString::new("sigma_E#,#real#,#1").unwrap();
            assert_eq!(sqw_model_set_vars(handle, wire.as_ptr()), SqwStatus::Ok);

            let mut copy = ptr::null_mut();
            assert_eq!(sqw_model_shallow_copy(handle, &mut copy), SqwStatus::Ok);
            sqw_model_free(handle);

            let mut needed = 0;
            let mut small = [0 as c_char; 4];
            assert_eq!(
                sqw_model_get_vars(copy, small.as_mut_ptr(), small.len(), &mut needed),
                SqwStatus::BufferTooSmall
            );
            let mut buf = vec![0 as c_char; needed];
            assert_eq!(sqw_model_get_vars(copy, buf.as_mut_ptr(), buf.len(), &mut needed), SqwStatus::Ok);
            let text = CStr::from_ptr(buf.as_ptr()).to_str().unwrap();
            assert_eq!(decode_vars(text)[1].value, "1");
            sqw_model_free(copy);
        }
    }

    #[test]
    fn test_unknown_model() {
        let (status, handle) = create("no_such_model");
        assert_eq!(status, SqwStatus::NotFound);
        assert!(handle.is_null());
        unsafe {
            assert_eq!(
                sqw_model_create(ptr::null(), ptr::null(), &mut ptr::null_mut()),
                SqwStatus::NullPointer
            );
        }
    }

    #[test]
    fn test_model_names() {
        let mut needed = 0;
        unsafe {
            assert_eq!(sqw_get_model_names(ptr::null_mut(), 0, &mut needed), SqwStatus::BufferTooSmall);
            let mut buf = vec![0 as c_char; needed];
            assert_eq!(sqw_get_model_names(buf.as_mut_ptr(), buf.len(), &mut needed), SqwStatus::Ok);
            let text = CStr::from_ptr(buf.as_ptr()).to_str().unwrap();
            assert!(text.contains("magnon#,#Simple Magnon Model"));
        }
    }

    #[test]
    fn test_evaluator_run() {
        let (_, model) = create("elastic");
        let config = CRuntimeConfig { worker_count: 2 };
        let mut ev = ptr::null_mut();
        unsafe {
            assert_eq!(sqw_evaluator_create(&config, &mut ev), SqwStatus::Ok);
            let points = [1.0, 0.0, 0.0, 0.0, 1.5, 0.0, 0.0, 0.0];
            let mut out = [f64::NAN; 2];
            assert_eq!(
                sqw_evaluator_run(ev, model, points.as_ptr(), 2, out.as_mut_ptr()),
                SqwStatus::Ok
            );
            assert_eq!(out[0], 1.0);
            assert!(out[1] < 1e-10);
            sqw_evaluator_free(ev);
            sqw_model_free(model);
        }
    }

    #[test]
    fn test_config_conversion() {
        let cfg: RuntimeConfig = CRuntimeConfig::default().into();
        assert_eq!(cfg.worker_count, num_cpus::get());
    }
}
