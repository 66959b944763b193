//! The S(q,w) model interface.

use super::vars::{FitVariable, Variable, FIELD_SEP};

/// Excitation energies and spectral weights at one q.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Dispersion {
    pub energies: Vec<f64>,
    pub weights: Vec<f64>,
}

impl Dispersion {
    pub fn new(energies: Vec<f64>, weights: Vec<f64>) -> Self {
        Self { energies, weights }
    }

    pub fn is_empty(&self) -> bool {
        self.energies.is_empty()
    }

    /// `e1,e2,...#,#w1,w2,...`, the form dispersions cross process
    /// boundaries in.
    pub fn to_wire(&self) -> String {
        fn join(v: &[f64]) -> String {
            v.iter().map(|x| x.to_string()).collect::<Vec<_>>().join(",")
        }
        format!("{}{}{}", join(&self.energies), FIELD_SEP, join(&self.weights))
    }

    /// Inverse of [`Dispersion::to_wire`]. Unparseable numbers are dropped.
    pub fn from_wire(wire: &str) -> Self {
        let parse = |s: &str| -> Vec<f64> {
            s.split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .filter_map(|t| t.parse().ok())
                .collect()
        };
        let (es, ws) = wire.trim().split_once(FIELD_SEP).unwrap_or((wire.trim(), ""));
        Self::new(parse(es), parse(ws))
    }
}

/// State every model carries regardless of its physics.
#[derive(Clone, Debug, Default)]
pub struct ModelCore {
    /// Set once the model is fully built; cleared by any construction error.
    pub ok: bool,
    pub fit_vars: Vec<FitVariable>,
}

impl ModelCore {
    pub fn ok() -> Self {
        Self {
            ok: true,
            fit_vars: Vec::new(),
        }
    }

    pub fn invalid() -> Self {
        Self::default()
    }
}

/// A scattering function S(h, k, l, E).
///
/// `evaluate` takes `&self` and never mutates shared state, so a built model
/// can be queried from many threads at once. Reconfiguration needs `&mut
/// self`, which keeps it from racing with evaluation on the same instance.
pub trait SqwModel: Send + Sync {
    /// Intensity at reciprocal-lattice position (h, k, l) and energy `e`.
    fn evaluate(&self, h: f64, k: f64, l: f64, e: f64) -> f64;

    /// Dispersion branches at (h, k, l), if the model knows them.
    fn dispersion(&self, _h: f64, _k: f64, _l: f64) -> Dispersion {
        Dispersion::default()
    }

    fn core(&self) -> &ModelCore;
    fn core_mut(&mut self) -> &mut ModelCore;

    fn is_ok(&self) -> bool {
        self.core().ok
    }

    /// Snapshot of the model's variables in model-defined order.
    fn vars(&self) -> Vec<Variable>;

    /// Apply known entries, skipping unknown names and unparseable values.
    fn set_vars(&mut self, vars: &[Variable]);

    fn fit_vars(&self) -> &[FitVariable] {
        &self.core().fit_vars
    }

    fn set_fit_vars(&mut self, fit_vars: Vec<FitVariable>) {
        self.core_mut().fit_vars = fit_vars;
    }

    /// Update `key` if the model has such a variable.
    fn set_var_if_avail(&mut self, key: &str, value: &str) -> bool {
        let Some(mut var) = self.vars().into_iter().find(|v| v.name == key) else {
            return false;
        };
        var.value = value.to_string();
        self.set_vars(&[var]);
        true
    }

    /// A new handle sharing every immutable precomputed structure.
    fn shallow_copy(&self) -> Box<dyn SqwModel>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispersion_wire() {
        let d = Dispersion::new(vec![1.5, -1.5], vec![1.0, 0.25]);
        assert_eq!(d.to_wire(), "1.5,-1.5#,#1,0.25");
        assert_eq!(Dispersion::from_wire(&d.to_wire()), d);
        assert!(Dispersion::from_wire("#,#").is_empty());
        assert_eq!(Dispersion::from_wire("2,x").energies, vec![2.0]);
    }
}
