//! Models whose S(q,w) is written in a scripting language.
//!
//! Scripts define `TakinSqw(h, k, l, E)`, and optionally `TakinInit()`
//! (called after loading and after every variable change) and
//! `TakinDisp(h, k, l)` returning `[energies, weights]`. Global variables
//! carrying the configured prefix are exposed as model variables.

pub mod julia;
#[cfg(feature = "python")]
pub mod python;

use crate::error::{Result, SqwError};
use std::sync::OnceLock;

/// Longest value representation still reported as a variable.
pub const MAX_VALUE_LEN: usize = 128;

/// Prefix script globals need to be reported as variables.
pub const DEFAULT_VAR_PREFIX: &str = "g_";

/// Decides which script globals are reported as model variables.
#[derive(Clone, Debug)]
pub struct HarvestFilter {
    /// Empty accepts every name.
    pub prefix: String,
    pub max_value_len: usize,
}

impl Default for HarvestFilter {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_VAR_PREFIX.to_string(),
            max_value_len: MAX_VALUE_LEN,
        }
    }
}

impl HarvestFilter {
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Self::default()
        }
    }

    pub fn accepts(&self, name: &str, ty: &str, value: &str) -> bool {
        if name.is_empty() || name.starts_with('_') || !name.starts_with(self.prefix.as_str()) {
            return false;
        }
        if matches!(ty, "" | "module" | "NoneType" | "type" | "Module")
            || ty.contains("func")
            || ty.starts_with('#')
        {
            return false;
        }
        value.len() <= self.max_value_len
    }
}

/// One-time initialisation of an embedded or external runtime.
///
/// The first caller runs the initialiser and logs the reported version;
/// everyone after sees the cached outcome.
pub struct Interpreter {
    runtime: &'static str,
    version: OnceLock<std::result::Result<String, String>>,
}

impl Interpreter {
    pub const fn new(runtime: &'static str) -> Self {
        Self {
            runtime,
            version: OnceLock::new(),
        }
    }

    pub fn get_or_init<F>(&self, init: F) -> Result<&str>
    where
        F: FnOnce() -> Result<String>,
    {
        let state = self.version.get_or_init(|| match init() {
            Ok(version) => {
                tracing::debug!("initialised {} interpreter version {}", self.runtime, version);
                Ok(version)
            }
            Err(e) => {
                tracing::error!("cannot initialise {} interpreter: {}", self.runtime, e);
                Err(e.to_string())
            }
        });
        match state {
            Ok(version) => Ok(version.as_str()),
            Err(msg) => Err(SqwError::Script(format!("{}: {}", self.runtime, msg))),
        }
    }

    pub fn version(&self) -> Option<&str> {
        self.version.get()?.as_ref().ok().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_harvest_filter() {
        let f = HarvestFilter::default();
        assert!(f.accepts("g_T", "float", "300.0"));
        assert!(!f.accepts("T", "float", "300.0"));
        assert!(!f.accepts("_g_T", "float", "1"));
        assert!(!f.accepts("g_np", "module", "<module 'numpy'>"));
        assert!(!f.accepts("g_none", "NoneType", "None"));
        assert!(!f.accepts("g_f", "builtin_function_or_method", "<f>"));
        assert!(!f.accepts("g_l", "#3#4", "<lambda>"));
        assert!(!f.accepts("g_big", "str", &"x".repeat(129)));
        assert!(f.accepts("g_ok", "str", &"x".repeat(128)));

        let all = HarvestFilter::with_prefix("");
        assert!(all.accepts("T", "Float64", "300.0"));
    }

    #[test]
    fn test_interpreter_once() {
        static RT: Interpreter = Interpreter::new("test");
        assert!(RT.version().is_none());
        assert_eq!(RT.get_or_init(|| Ok("1.0".into())).unwrap(), "1.0");
        assert_eq!(RT.get_or_init(|| Ok("2.0".into())).unwrap(), "1.0");
        assert_eq!(RT.version(), Some("1.0"));
    }

    #[test]
    fn test_interpreter_failure_sticks() {
        static RT: Interpreter = Interpreter::new("broken");
        assert!(RT.get_or_init(|| Err(SqwError::Script("missing".into()))).is_err());
        assert!(RT.get_or_init(|| Ok("1.0".into())).is_err());
    }
}
