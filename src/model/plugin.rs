//! Dynamically loaded model plugins.
//!
//! A plugin is a shared library exporting `sqw_plugin_info` and
//! `sqw_plugin_construct` (see [`crate::export_sqw_plugin`]). Accepted
//! plugins are added to the global registry; the library stays mapped as
//! long as the registry entry or any model built from it is alive.

use super::registry::{registry, ModelEntry, ModelRegistry};
use super::traits::{ModelCore, SqwModel};
use super::vars::{decode_vars, encode_vars, Variable};
use crate::error::{Result, SqwError};
use crate::ffi::types::{CSqwModel, CSqwPluginConstructFn, CSqwPluginInfoFn};
use libloading::Library;
use std::ffi::{c_char, CStr, CString};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

/// Version a plugin must report to be accepted.
pub const HOST_VERSION: &str = env!("CARGO_PKG_VERSION");

/// A model living behind a plugin's C function table.
pub struct PluginModel {
    core: ModelCore,
    table: CSqwModel,
    _lib: Option<Arc<Library>>,
}

// The function table contract makes `evaluate` callable concurrently and
// every `&mut self` entry exclusive.
unsafe impl Send for PluginModel {}
unsafe impl Sync for PluginModel {}

impl PluginModel {
    /// Adopt a function table.
    ///
    /// # Safety
    /// `table` must come from `sqw_plugin_construct` (or
    /// [`crate::ffi::plugin::into_c_model`]) and `lib` must be the library
    /// its functions live in, if any.
    pub unsafe fn from_table(table: CSqwModel, lib: Option<Arc<Library>>) -> Self {
        let ok = !table.is_null() && table.is_ok.map_or(true, |f| f(table.handle));
        Self {
            core: ModelCore {
                ok,
                fit_vars: Vec::new(),
            },
            table,
            _lib: lib,
        }
    }
}

impl SqwModel for PluginModel {
    fn evaluate(&self, h: f64, k: f64, l: f64, e: f64) -> f64 {
        match self.table.evaluate {
            Some(f) if !self.table.handle.is_null() => unsafe { f(self.table.handle, h, k, l, e) },
            _ => 0.0,
        }
    }

    fn core(&self) -> &ModelCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ModelCore {
        &mut self.core
    }

    fn is_ok(&self) -> bool {
        self.core.ok
            && match self.table.is_ok {
                Some(f) => unsafe { f(self.table.handle) },
                None => true,
            }
    }

    fn vars(&self) -> Vec<Variable> {
        let Some(get) = self.table.get_vars else {
            return Vec::new();
        };
        if self.table.handle.is_null() {
            return Vec::new();
        }
        unsafe {
            let needed = get(self.table.handle, std::ptr::null_mut(), 0);
            let mut buf = vec![0 as c_char; needed + 1];
            get(self.table.handle, buf.as_mut_ptr(), buf.len());
            let wire = CStr::from_ptr(buf.as_ptr()).to_string_lossy();
            decode_vars(&wire)
        }
    }

    fn set_vars(&mut self, vars: &[Variable]) {
        let Some(set) = self.table.set_vars else {
            return;
        };
        if self.table.handle.is_null() {
            return;
        }
        match CString::new(encode_vars(vars)) {
            Ok(wire) => unsafe { set(self.table.handle, wire.as_ptr()) },
            Err(e) => tracing::error!("plugin variables contain a NUL byte: {}", e),
        }
    }

    fn shallow_copy(&self) -> Box<dyn SqwModel> {
        let mut table = self.table;
        table.handle = match self.table.shallow_copy {
            Some(f) if !self.table.handle.is_null() => unsafe { f(self.table.handle) },
            _ => std::ptr::null_mut(),
        };
        Box::new(PluginModel {
            core: ModelCore {
                ok: self.core.ok && !table.handle.is_null(),
                fit_vars: self.core.fit_vars.clone(),
            },
            table,
            _lib: self._lib.clone(),
        })
    }
}

impl Drop for PluginModel {
    fn drop(&mut self) {
        if let Some(free) = self.table.free {
            if !self.table.handle.is_null() {
                unsafe { free(self.table.handle) };
            }
        }
    }
}

unsafe fn c_str(p: *const c_char) -> String {
    if p.is_null() {
        String::new()
    } else {
        CStr::from_ptr(p).to_string_lossy().into_owned()
    }
}

/// Open one plugin library and produce its registry entry.
///
/// # Safety
/// Loading a library runs its initialisers; only load trusted files.
pub unsafe fn open_plugin(path: &Path) -> Result<ModelEntry> {
    let plugin_err = |msg: String| SqwError::Plugin {
        path: path.to_path_buf(),
        msg,
    };

    let lib = Library::new(path).map_err(|e| plugin_err(e.to_string()))?;
    let info: CSqwPluginInfoFn = *lib
        .get::<CSqwPluginInfoFn>(b"sqw_plugin_info\0")
        .map_err(|e| plugin_err(format!("sqw_plugin_info not found: {}", e)))?;
    let construct: CSqwPluginConstructFn = *lib
        .get::<CSqwPluginConstructFn>(b"sqw_plugin_construct\0")
        .map_err(|e| plugin_err(format!("sqw_plugin_construct not found: {}", e)))?;

    let info = info();
    let version = c_str(info.host_version);
    let ident = c_str(info.ident);
    let long_name = c_str(info.long_name);
    tracing::debug!("module ident: {}", ident);

    if version != HOST_VERSION {
        return Err(SqwError::VersionMismatch {
            ident,
            found: version,
            expected: HOST_VERSION.to_string(),
        });
    }
    if ident.is_empty() {
        return Err(plugin_err("empty identifier".into()));
    }

    let lib = Arc::new(lib);
    let ctor_lib = Arc::clone(&lib);
    let ctor = move |cfg: &str| -> Box<dyn SqwModel> {
        let table = match CString::new(cfg) {
            Ok(cfg) => construct(cfg.as_ptr()),
            Err(_) => {
                tracing::error!("config path contains a NUL byte");
                CSqwModel::null()
            }
        };
        Box::new(PluginModel::from_table(table, Some(Arc::clone(&ctor_lib))))
    };

    Ok(ModelEntry::new(ident, long_name, ctor).with_library(lib))
}

/// Load every plugin in `dir` into the global registry.
///
/// Returns the number of plugins accepted. A second call after a
/// successful one does nothing until [`unload_sqw_plugins`].
pub fn load_sqw_plugins(dir: impl AsRef<Path>) -> usize {
    load_plugins_into(registry(), dir.as_ref())
}

/// Libraries are opened without holding the lock, since their initialisers
/// may query the registry themselves.
fn load_plugins_into(lock: &RwLock<ModelRegistry>, dir: &Path) -> usize {
    if lock.read().unwrap_or_else(PoisonError::into_inner).plugins_loaded() {
        return 0;
    }

    let mut files: Vec<PathBuf> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.is_file())
            .collect(),
        Err(e) => {
            tracing::warn!("plugin directory {}: {}", dir.display(), e);
            return 0;
        }
    };
    files.sort();
    tracing::info!("plugin directory: {}", dir.display());

    let entries: Vec<ModelEntry> = files
        .iter()
        .filter_map(|path| match unsafe { open_plugin(path) } {
            Ok(entry) => {
                tracing::info!("loaded plugin: {}", path.display());
                Some(entry)
            }
            Err(e @ SqwError::VersionMismatch { .. }) => {
                tracing::error!("skipping S(q,w) plugin {}: {}", path.display(), e);
                None
            }
            Err(e) => {
                tracing::debug!("{}", e);
                None
            }
        })
        .collect();

    let mut reg = lock.write().unwrap_or_else(PoisonError::into_inner);
    if reg.plugins_loaded() {
        // Another caller finished first; its entries win.
        return 0;
    }
    let count = entries.len();
    for entry in entries {
        reg.register_entry(entry);
    }
    reg.set_plugins_loaded(true);
    count
}

/// Remove all plugin models from the global registry and release the
/// registry's library handles.
pub fn unload_sqw_plugins() {
    let mut reg = registry().write().unwrap_or_else(PoisonError::into_inner);
    let removed = reg.remove_plugins();
    reg.set_plugins_loaded(false);
    tracing::info!("unloaded {} plugins", removed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffi::plugin::into_c_model;
    use crate::model::elastic::ElasticModel;

    #[test]
    fn test_plugin_model_over_table() {
        let table = into_c_model(Box::new(ElasticModel::auto()));
        let mut m = unsafe { PluginModel::from_table(table, None) };
        assert!(m.is_ok());
        assert_eq!(m.evaluate(0.0, 1.0, 0.0, 0.0), 1.0);

        assert!(m.set_var_if_avail("sigma_E", "1"));
        assert_eq!(m.vars()[1], Variable::new("sigma_E", "real", "1"));

        let copy = m.shallow_copy();
        drop(m);
        assert!(copy.is_ok());
        assert_eq!(copy.vars()[1].value, "1");
    }

    #[test]
    fn test_null_table_is_invalid() {
        let m = unsafe { PluginModel::from_table(CSqwModel::null(), None) };
        assert!(!m.is_ok());
        assert_eq!(m.evaluate(0.0, 0.0, 0.0, 0.0), 0.0);
        assert!(m.vars().is_empty());
    }

    #[test]
    fn test_unreadable_dir_keeps_plugins_unloaded() {
        let lock = RwLock::new(ModelRegistry::new_with_defaults());
        let before = lock.read().unwrap().len();
        assert_eq!(load_plugins_into(&lock, Path::new("/nonexistent/sqw_plugins")), 0);
        assert!(!lock.read().unwrap().plugins_loaded());
        assert_eq!(lock.read().unwrap().len(), before);
    }

    #[test]
    fn test_junk_dir_loads_once() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("libnot_a_plugin.so"), b"junk").unwrap();
        std::fs::write(dir.path().join("README"), b"text").unwrap();

        let lock = RwLock::new(ModelRegistry::new_with_defaults());
        let before = lock.read().unwrap().len();
        assert_eq!(load_plugins_into(&lock, dir.path()), 0);
        assert!(lock.read().unwrap().plugins_loaded());
        assert_eq!(lock.read().unwrap().len(), before);
        assert_eq!(load_plugins_into(&lock, dir.path()), 0);
    }

    #[test]
    fn test_open_non_library_fails() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut f, b"not a shared object").unwrap();
        assert!(unsafe { open_plugin(f.path()) }.is_err());
    }
}
