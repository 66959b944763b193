//! Single analytic phonon branch.

use super::lineshape::{dho, incoherent};
use super::traits::{Dispersion, ModelCore, SqwModel};
use super::vars::{FieldKind, FieldTable, Slot, Variable};
use nalgebra::Vector3;
use std::path::Path;

#[derive(Clone, Debug)]
pub struct PhononSingleParams {
    pub g: Vector3<f64>,
    pub amp: f64,
    pub freq: f64,
    pub e_hwhm: f64,
    pub s0: f64,
    pub inc_amp: f64,
    pub inc_sig: f64,
    pub t: f64,
}

impl Default for PhononSingleParams {
    fn default() -> Self {
        Self {
            g: Vector3::new(1.0, 0.0, 0.0),
            amp: 20.0,
            freq: std::f64::consts::FRAC_PI_2,
            e_hwhm: 0.1,
            s0: 1.0,
            inc_amp: 0.0,
            inc_sig: 0.1,
            t: 100.0,
        }
    }
}

impl FieldTable for PhononSingleParams {
    const NAMES: &'static [&'static str] =
        &["G", "amp", "freq", "E_HWHM", "S0", "inc_amp", "inc_sig", "T"];

    // Nothing is precomputed, so no field forces a rebuild.
    fn slot(&mut self, name: &str) -> Option<(FieldKind, Slot<'_>)> {
        use FieldKind::Cosmetic;
        Some(match name {
            "G" => (Cosmetic, Slot::Vector(&mut self.g)),
            "amp" => (Cosmetic, Slot::Real(&mut self.amp)),
            "freq" => (Cosmetic, Slot::Real(&mut self.freq)),
            "E_HWHM" => (Cosmetic, Slot::Real(&mut self.e_hwhm)),
            "S0" => (Cosmetic, Slot::Real(&mut self.s0)),
            "inc_amp" => (Cosmetic, Slot::Real(&mut self.inc_amp)),
            "inc_sig" => (Cosmetic, Slot::Real(&mut self.inc_sig)),
            "T" => (Cosmetic, Slot::Real(&mut self.t)),
            _ => return None,
        })
    }
}

/// `E(q) = |amp * sin(|q - G| * freq)|` evaluated directly.
#[derive(Clone)]
pub struct PhononSingleModel {
    core: ModelCore,
    params: PhononSingleParams,
}

impl PhononSingleModel {
    pub fn new(params: PhononSingleParams) -> Self {
        Self {
            core: ModelCore::ok(),
            params,
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Self {
        let mut params = PhononSingleParams::default();
        super::apply_config(&mut params, path.as_ref(), "phonon_single");
        Self::new(params)
    }
}

impl SqwModel for PhononSingleModel {
    fn evaluate(&self, h: f64, k: f64, l: f64, e: f64) -> f64 {
        let disp = self.dispersion(h, k, l);
        let p = &self.params;
        dho(e, p.t, disp.energies[0], p.e_hwhm, p.s0 * disp.weights[0]).abs()
            + incoherent(e, p.inc_amp, p.inc_sig)
    }

    fn dispersion(&self, h: f64, k: f64, l: f64) -> Dispersion {
        let q = (Vector3::new(h, k, l) - self.params.g).norm();
        let e0 = (self.params.amp * (q * self.params.freq).sin()).abs();
        Dispersion::new(vec![e0, -e0], vec![1.0, 1.0])
    }

    fn core(&self) -> &ModelCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ModelCore {
        &mut self.core
    }

    fn vars(&self) -> Vec<Variable> {
        self.params.to_vars()
    }

    fn set_vars(&mut self, vars: &[Variable]) {
        self.params.apply(vars);
    }

    fn shallow_copy(&self) -> Box<dyn SqwModel> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peak_follows_dispersion() {
        let m = PhononSingleModel::new(PhononSingleParams::default());
        // |q - G| = 1 gives E0 = 20
        let on = m.evaluate(2.0, 0.0, 0.0, 20.0);
        let off = m.evaluate(2.0, 0.0, 0.0, 15.0);
        assert!(on > 10.0 * off);
        assert_eq!(m.dispersion(2.0, 0.0, 0.0).energies, vec![20.0, -20.0]);
    }

    #[test]
    fn test_incoherent_adds() {
        let mut m = PhononSingleModel::new(PhononSingleParams::default());
        let base = m.evaluate(1.5, 0.0, 0.0, 0.0);
        m.set_vars(&[Variable::new("inc_amp", "real", "3")]);
        assert!((m.evaluate(1.5, 0.0, 0.0, 0.0) - base - 3.0).abs() < 1e-12);
    }
}
