//! Plugin-side helpers: expose a Rust [`SqwModel`] through the C table.
//!
//! A plugin crate normally only invokes [`export_sqw_plugin!`](crate::export_sqw_plugin).

use super::types::{CSqwModel, CSqwPluginInfo};
use crate::model::vars::{decode_vars, encode_vars};
use crate::model::SqwModel;
use std::ffi::{c_char, c_void, CStr};

/// Version string plugins are checked against, NUL-terminated.
pub const HOST_VERSION_C: &str = concat!(env!("CARGO_PKG_VERSION"), "\0");

type Handle = Box<dyn SqwModel>;

/// Build the info record. `ident` and `long_name` must end in a NUL byte.
pub fn plugin_info(ident: &'static str, long_name: &'static str) -> CSqwPluginInfo {
    debug_assert!(ident.ends_with('\0') && long_name.ends_with('\0'));
    CSqwPluginInfo {
        host_version: HOST_VERSION_C.as_ptr().cast(),
        ident: ident.as_ptr().cast(),
        long_name: long_name.as_ptr().cast(),
    }
}

/// Wrap an owned model into a C function table.
pub fn into_c_model(model: Box<dyn SqwModel>) -> CSqwModel {
    let handle: *mut Handle = Box::into_raw(Box::new(model));
    CSqwModel {
        handle: handle.cast(),
        evaluate: Some(c_evaluate),
        is_ok: Some(c_is_ok),
        get_vars: Some(c_get_vars),
        set_vars: Some(c_set_vars),
        shallow_copy: Some(c_shallow_copy),
        free: Some(c_free),
    }
}

/// Build a model from a C config path and wrap it.
///
/// # Safety
/// `cfg` must be null or a valid NUL-terminated string.
pub unsafe fn construct_exported<M, F>(cfg: *const c_char, ctor: F) -> CSqwModel
where
    M: SqwModel + 'static,
    F: FnOnce(&str) -> M,
{
    let cfg = if cfg.is_null() {
        String::new()
    } else {
        CStr::from_ptr(cfg).to_string_lossy().into_owned()
    };
    into_c_model(Box::new(ctor(&cfg)))
}

unsafe fn model<'a>(handle: *mut c_void) -> &'a Handle {
    &*(handle as *const Handle)
}

unsafe extern "C" fn c_evaluate(handle: *mut c_void, h: f64, k: f64, l: f64, e: f64) -> f64 {
    if handle.is_null() {
        return 0.0;
    }
    model(handle).evaluate(h, k, l, e)
}

unsafe extern "C" fn c_is_ok(handle: *mut c_void) -> bool {
    !handle.is_null() && model(handle).is_ok()
}

unsafe extern "C" fn c_get_vars(handle: *mut c_void, buf: *mut c_char, len: usize) -> usize {
    if handle.is_null() {
        return 0;
    }
    let wire = encode_vars(&model(handle).vars());
    write_c_string(&wire, buf, len);
    wire.len()
}

unsafe extern "C" fn c_set_vars(handle: *mut c_void, vars: *const c_char) {
    if handle.is_null() || vars.is_null() {
        return;
    }
    let wire = CStr::from_ptr(vars).to_string_lossy();
    let m = &mut *(handle as *mut Handle);
    m.set_vars(&decode_vars(&wire));
}

unsafe extern "C" fn c_shallow_copy(handle: *mut c_void) -> *mut c_void {
    if handle.is_null() {
        return std::ptr::null_mut();
    }
    let copy: *mut Handle = Box::into_raw(Box::new(model(handle).shallow_copy()));
    copy.cast()
}

unsafe extern "C" fn c_free(handle: *mut c_void) {
    if !handle.is_null() {
        drop(Box::from_raw(handle as *mut Handle));
    }
}

/// Copy `s` into `buf` as a NUL-terminated string, truncated to fit `len`.
///
/// # Safety
/// `buf` must be null or valid for `len` bytes.
pub unsafe fn write_c_string(s: &str, buf: *mut c_char, len: usize) {
    if buf.is_null() || len == 0 {
        return;
    }
    let n = s.len().min(len - 1);
    std::ptr::copy_nonoverlapping(s.as_ptr(), buf.cast::<u8>(), n);
    *buf.add(n) = 0;
}

/// Export `sqw_plugin_info` and `sqw_plugin_construct` for a model type.
///
/// ```ignore
/// sqwrs::export_sqw_plugin!("my_model", "My Model", |cfg: &str| MyModel::from_file(cfg));
/// ```
#[macro_export]
macro_rules! export_sqw_plugin {
    ($ident:literal, $long_name:literal, $ctor:expr) => {
        #[no_mangle]
        pub extern "C" fn sqw_plugin_info() -> $crate::ffi::CSqwPluginInfo {
            $crate::ffi::plugin::plugin_info(concat!($ident, "\0"), concat!($long_name, "\0"))
        }

        /// # Safety
        /// `cfg` must be null or a valid NUL-terminated string.
        #[no_mangle]
        pub unsafe extern "C" fn sqw_plugin_construct(
            cfg: *const ::std::ffi::c_char,
        ) -> $crate::ffi::CSqwModel {
            $crate::ffi::plugin::construct_exported(cfg, $ctor)
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::elastic::ElasticModel;

    #[test]
    fn test_table_round_trip() {
        let c = into_c_model(Box::new(ElasticModel::auto()));
        unsafe {
            assert!((c.is_ok.unwrap())(c.handle));
            assert_eq!((c.evaluate.unwrap())(c.handle, 1.0, 0.0, 0.0, 0.0), 1.0);

            let needed = (c.get_vars.unwrap())(c.handle, std::ptr::null_mut(), 0);
            let mut buf = vec![0 as c_char; needed + 1];
            (c.get_vars.unwrap())(c.handle, buf.as_mut_ptr(), buf.len());
            let wire = CStr::from_ptr(buf.as_ptr()).to_str().unwrap();
            assert!(wire.starts_with("sigma_q#,#real#,#0.02"));

            let copy = (c.shallow_copy.unwrap())(c.handle);
            (c.free.unwrap())(c.handle);
            assert_eq!((c.evaluate.unwrap())(copy, 2.0, 0.0, 0.0, 0.0), 1.0);
            (c.free.unwrap())(copy);
        }
    }

    #[test]
    fn test_write_c_string_truncates() {
        let mut buf = [1 as c_char; 4];
        unsafe {
            write_c_string("abcdef", buf.as_mut_ptr(), buf.len());
            assert_eq!(CStr::from_ptr(buf.as_ptr()).to_str().unwrap(), "abc");
        }
    }
}
