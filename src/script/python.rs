//! Python scripts through an embedded interpreter.

use super::{HarvestFilter, Interpreter};
use crate::model::traits::{Dispersion, ModelCore, SqwModel};
use crate::model::vars::Variable;
use pyo3::prelude::*;
use pyo3::types::PyDict;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

static PYTHON: Interpreter = Interpreter::new("Python");

/// Handles into the loaded script module.
struct PyScript {
    module: Py<PyModule>,
    sqw: PyObject,
    init: Option<PyObject>,
    disp: Option<PyObject>,
}

fn report(py: Python<'_>, err: PyErr) {
    tracing::error!("Python error: {}", err);
    err.print(py);
}

impl PyScript {
    fn load(py: Python<'_>, dir: &Path, module: &str) -> PyResult<Option<Self>> {
        let dir = dir.to_string_lossy();
        let sys_path = py.import_bound("sys")?.getattr("path")?;
        sys_path.call_method1("append", (dir.as_ref(),))?;
        sys_path.call_method1("append", (".",))?;
        if let Err(e) = py.import_bound("os")?.call_method1("chdir", (dir.as_ref(),)) {
            tracing::warn!("Cannot set python script working directory: {}", e);
        }

        let module = py.import_bound(module)?;
        let Ok(sqw) = module.getattr("TakinSqw") else {
            tracing::error!("Python script has no TakinSqw function.");
            return Ok(None);
        };

        let init = module.getattr("TakinInit").ok();
        match &init {
            Some(init) => {
                if let Err(e) = init.call0() {
                    report(py, e);
                }
            }
            None => tracing::warn!("Python script has no TakinInit function."),
        }
        let disp = module.getattr("TakinDisp").ok();
        if disp.is_none() {
            tracing::warn!("Python script has no TakinDisp function.");
        }

        Ok(Some(Self {
            module: module.unbind(),
            sqw: sqw.unbind(),
            init: init.map(Bound::unbind),
            disp: disp.map(Bound::unbind),
        }))
    }
}

/// S(q,w) computed by a Python script module.
#[derive(Clone)]
pub struct PyModel {
    core: ModelCore,
    script: Option<Arc<PyScript>>,
    lock: Arc<Mutex<()>>,
    filter: HarvestFilter,
}

impl PyModel {
    pub fn from_file(path: impl AsRef<Path>) -> Self {
        let mut model = Self {
            core: ModelCore::invalid(),
            script: None,
            lock: Arc::default(),
            filter: HarvestFilter::default(),
        };

        let path = path.as_ref();
        if !path.is_file() {
            tracing::error!("Could not find Python script file: \"{}\".", path.display());
            return model;
        }
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let Some(module) = path.file_stem().and_then(|s| s.to_str()) else {
            tracing::error!("Invalid Python module name \"{}\".", path.display());
            return model;
        };

        let version = PYTHON.get_or_init(|| {
            pyo3::prepare_freethreaded_python();
            Python::with_gil(|py| Ok(py.version().replace('\n', ", ")))
        });
        if version.is_err() {
            return model;
        }

        let script = Python::with_gil(|py| {
            PyScript::load(py, dir, module).unwrap_or_else(|e| {
                report(py, e);
                None
            })
        });
        model.core.ok = script.is_some();
        model.script = script.map(Arc::new);
        model
    }

    pub fn set_var_prefix(&mut self, prefix: &str) {
        self.filter.prefix = prefix.to_string();
    }

    /// Run `f` under the model lock and the GIL.
    fn with_script<T>(&self, what: &str, f: impl FnOnce(Python<'_>, &PyScript) -> PyResult<T>) -> Option<T> {
        let Some(script) = self.script.as_deref().filter(|_| self.core.ok) else {
            tracing::error!("Interpreter has not initialised, cannot {}.", what);
            return None;
        };
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Python::with_gil(|py| {
            f(py, script)
                .map_err(|e| report(py, e))
                .ok()
        })
    }
}

impl SqwModel for PyModel {
    fn evaluate(&self, h: f64, k: f64, l: f64, e: f64) -> f64 {
        self.with_script("query S(q,w)", |py, s| {
            s.sqw.bind(py).call1((h, k, l, e))?.extract::<f64>()
        })
        .unwrap_or(0.0)
    }

    fn dispersion(&self, h: f64, k: f64, l: f64) -> Dispersion {
        self.with_script("query dispersion", |py, s| {
            let Some(disp) = &s.disp else {
                return Ok(Dispersion::default());
            };
            let parts: Vec<Bound<'_, PyAny>> = disp.bind(py).call1((h, k, l))?.extract()?;
            let column = |i: usize| -> PyResult<Vec<f64>> {
                parts.get(i).map(|p| p.extract()).transpose().map(Option::unwrap_or_default)
            };
            Ok(Dispersion::new(column(0)?, column(1)?))
        })
        .unwrap_or_default()
    }

    fn core(&self) -> &ModelCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ModelCore {
        &mut self.core
    }

    fn vars(&self) -> Vec<Variable> {
        self.with_script("get variables", |py, s| {
            let mut vars = Vec::new();
            for (key, value) in s.module.bind(py).dict().iter() {
                let Ok(name) = key.extract::<String>() else {
                    continue;
                };
                let ty = value.get_type().name()?.to_string();
                let repr = value.repr()?.to_string();
                if self.filter.accepts(&name, &ty, &repr) {
                    vars.push(Variable::new(name, ty, repr));
                }
            }
            Ok(vars)
        })
        .unwrap_or_default()
    }

    fn set_vars(&mut self, vars: &[Variable]) {
        self.with_script("set variables", |py, s| {
            let dict: Bound<'_, PyDict> = s.module.bind(py).dict();
            for var in vars {
                if var.name.is_empty() || var.name.starts_with('_') || !dict.contains(&var.name)? {
                    tracing::error!("Could not set variable \"{}\" as it was not found.", var.name);
                    continue;
                }
                let applied = py
                    .eval_bound(&var.value, Some(&dict), None)
                    .and_then(|value| dict.set_item(&var.name, value));
                if let Err(e) = applied {
                    tracing::error!("Could not set variable \"{}\" to \"{}\".", var.name, var.value);
                    report(py, e);
                }
            }
            if let Some(init) = &s.init {
                init.call0(py)?;
            }
            Ok(())
        });
    }

    fn shallow_copy(&self) -> Box<dyn SqwModel> {
        Box::new(self.clone())
    }
}
