//! Saving and restoring model parameters in a flat property store.
//!
//! Keys are namespaced below a caller-chosen root:
//! `<root>sqw_params/<name>` holds the value, `<root>sqw_errors/<name>` the
//! fit error and `<root>sqw_fitvar/<name>` the free-for-fit flag (`1`/`0`).

use super::traits::SqwModel;
use super::vars::{FitVariable, Variable};
use std::collections::BTreeMap;

/// Flat key/value store the parameters are written into.
pub type PropertyStore = BTreeMap<String, String>;

fn key(root: &str, section: &str, name: &str) -> String {
    format!("{}{}/{}", root, section, name)
}

/// Write every variable and its fit metadata. Returns false for a model
/// that is not ok, in which case nothing is written.
pub fn save_sqw_params(model: &dyn SqwModel, store: &mut PropertyStore, root: &str) -> bool {
    if !model.is_ok() {
        return false;
    }
    for var in model.vars() {
        store.insert(key(root, "sqw_params", &var.name), var.value);
    }
    for fit in model.fit_vars() {
        store.insert(key(root, "sqw_errors", &fit.name), fit.error.clone());
        let flag = if fit.free { "1" } else { "0" };
        store.insert(key(root, "sqw_fitvar", &fit.name), flag.to_string());
    }
    true
}

/// Restore the model's variables from `store`.
///
/// Only names the model currently reports are looked up. Fit metadata is
/// rebuilt for every variable found, defaulting to error `0` and fixed.
pub fn load_sqw_params(model: &mut dyn SqwModel, store: &PropertyStore, root: &str) -> bool {
    if !model.is_ok() {
        return false;
    }

    let mut vars = Vec::new();
    let mut fits = Vec::new();
    for known in model.vars() {
        let Some(value) = store.get(&key(root, "sqw_params", &known.name)) else {
            continue;
        };
        let error = store
            .get(&key(root, "sqw_errors", &known.name))
            .cloned()
            .unwrap_or_else(|| "0".to_string());
        let free = store
            .get(&key(root, "sqw_fitvar", &known.name))
            .is_some_and(|f| f.trim() == "1");

        fits.push(FitVariable::new(&known.name, error, free));
        vars.push(Variable::new(known.name, known.ty, value.clone()));
    }

    tracing::debug!("restoring {} model parameters", vars.len());
    model.set_vars(&vars);
    model.set_fit_vars(fits);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::magnon::{MagnonModel, MagnonParams};
    use nalgebra::Vector3;

    fn magnon() -> MagnonModel {
        MagnonModel::new(MagnonParams {
            g: Vector3::zeros(),
            num_qs: 4,
            num_points: 8,
            ..MagnonParams::default()
        })
    }

    #[test]
    fn test_save_keys() {
        let mut m = magnon();
        m.set_fit_vars(vec![FitVariable::new("D", "0.05", true)]);
        let mut store = PropertyStore::new();
        assert!(save_sqw_params(&m, &mut store, "taz/monteconvo/"));

        assert_eq!(store["taz/monteconvo/sqw_params/D"], "1");
        assert_eq!(store["taz/monteconvo/sqw_params/G"], "0 0 0");
        assert_eq!(store["taz/monteconvo/sqw_errors/D"], "0.05");
        assert_eq!(store["taz/monteconvo/sqw_fitvar/D"], "1");
    }

    #[test]
    fn test_round_trip() {
        let mut src = magnon();
        src.set_vars(&[Variable::new("D", "real", "2.5"), Variable::new("T", "real", "40")]);
        src.set_fit_vars(vec![FitVariable::new("T", "1.5", true)]);
        let mut store = PropertyStore::new();
        save_sqw_params(&src, &mut store, "");

        let mut dst = magnon();
        assert!(load_sqw_params(&mut dst, &store, ""));
        assert_eq!(dst.vars(), src.vars());

        let t = dst.fit_vars().iter().find(|f| f.name == "T").unwrap();
        assert_eq!(t, &FitVariable::new("T", "1.5", true));
        let d = dst.fit_vars().iter().find(|f| f.name == "D").unwrap();
        assert!(!d.free);
        assert_eq!(d.error, "0");
    }

    #[test]
    fn test_invalid_model_skipped() {
        let mut m = magnon();
        m.set_vars(&[Variable::new("disp", "uint", "9")]);
        let mut store = PropertyStore::new();
        assert!(!save_sqw_params(&m, &mut store, ""));
        assert!(store.is_empty());
    }
}
