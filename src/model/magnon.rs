//! Ferro- and antiferromagnetic magnon dispersions sampled onto a k-d tree.

use super::lineshape::{excitation, incoherent};
use super::traits::{Dispersion, ModelCore, SqwModel};
use super::vars::{FieldKind, FieldTable, Slot, Variable};
use crate::error::{Result, SqwError};
use crate::index::KdTree;
use nalgebra::Vector3;
use std::path::Path;
use std::sync::Arc;

/// Payload value meaning "use the model-wide constant".
const SENTINEL_GLOBAL: f64 = -1.0;

/// Which dispersion relation to sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MagnonDisp {
    /// `E = D q^2 + offs`
    Ferro,
    /// `E = D |q| + offs`
    Antiferro,
}

impl MagnonDisp {
    pub fn from_index(idx: u32) -> Option<Self> {
        match idx {
            0 => Some(Self::Ferro),
            1 => Some(Self::Antiferro),
            _ => None,
        }
    }

    pub fn energy(self, q: f64, d: f64, offs: f64) -> f64 {
        match self {
            Self::Ferro => d * q * q + offs,
            Self::Antiferro => d * q.abs() + offs,
        }
    }
}

#[derive(Clone, Debug)]
pub struct MagnonParams {
    pub g: Vector3<f64>,
    /// 0 ferro, 1 antiferro.
    pub disp: u32,
    pub d: f64,
    pub offs: f64,
    pub e_hwhm: f64,
    pub q_hwhm: f64,
    pub s0: f64,
    pub inc_amp: f64,
    pub inc_sig: f64,
    pub t: f64,
    /// Radial shells between |q| = 0 and 1.
    pub num_qs: u32,
    /// Directions per shell.
    pub num_points: u32,
}

impl Default for MagnonParams {
    fn default() -> Self {
        Self {
            g: Vector3::new(1.0, 0.0, 0.0),
            disp: 0,
            d: 1.0,
            offs: 0.0,
            e_hwhm: 0.1,
            q_hwhm: 0.1,
            s0: 1.0,
            inc_amp: 0.0,
            inc_sig: 0.1,
            t: 300.0,
            num_qs: 50,
            num_points: 100,
        }
    }
}

impl FieldTable for MagnonParams {
    const NAMES: &'static [&'static str] = &[
        "G", "disp", "D", "offs", "E_HWHM", "q_HWHM", "S0",
        "inc_amp", "inc_sig", "T", "num_qs", "num_points",
    ];

    fn slot(&mut self, name: &str) -> Option<(FieldKind, Slot<'_>)> {
        use FieldKind::*;
        Some(match name {
            "G" => (Structural, Slot::Vector(&mut self.g)),
            "disp" => (Structural, Slot::Uint(&mut self.disp)),
            "D" => (Structural, Slot::Real(&mut self.d)),
            "offs" => (Structural, Slot::Real(&mut self.offs)),
            "E_HWHM" => (Cosmetic, Slot::Real(&mut self.e_hwhm)),
            "q_HWHM" => (Cosmetic, Slot::Real(&mut self.q_hwhm)),
            "S0" => (Cosmetic, Slot::Real(&mut self.s0)),
            "inc_amp" => (Cosmetic, Slot::Real(&mut self.inc_amp)),
            "inc_sig" => (Cosmetic, Slot::Real(&mut self.inc_sig)),
            "T" => (Cosmetic, Slot::Real(&mut self.t)),
            "num_qs" => (Structural, Slot::Uint(&mut self.num_qs)),
            "num_points" => (Structural, Slot::Uint(&mut self.num_points)),
            _ => return None,
        })
    }
}

/// `n` nearly uniform unit vectors on a Fibonacci lattice.
pub fn fibonacci_sphere(n: u32) -> Vec<Vector3<f64>> {
    let golden = std::f64::consts::PI * (3.0 - 5f64.sqrt());
    (0..n)
        .map(|i| {
            let z = 1.0 - (2 * i + 1) as f64 / n as f64;
            let r = (1.0 - z * z).max(0.0).sqrt();
            let phi = golden * i as f64;
            Vector3::new(r * phi.cos(), r * phi.sin(), z)
        })
        .collect()
}

/// Sample the dispersion on shells `|q - G| = i / num_qs`, `i = 0..=num_qs`.
pub fn sample_shells(p: &MagnonParams) -> Result<Vec<Vec<f64>>> {
    let disp = MagnonDisp::from_index(p.disp)
        .ok_or_else(|| SqwError::Format(format!("unknown dispersion {}", p.disp)))?;
    if p.num_qs == 0 || p.num_points == 0 {
        return Err(SqwError::Format("num_qs and num_points must be positive".into()));
    }

    let dirs = fibonacci_sphere(p.num_points);
    let mut records = Vec::with_capacity(1 + p.num_qs as usize * dirs.len());
    let mut push = |pos: Vector3<f64>, e0: f64| {
        records.push(vec![
            pos.x,
            pos.y,
            pos.z,
            e0,
            SENTINEL_GLOBAL,
            SENTINEL_GLOBAL,
            SENTINEL_GLOBAL,
        ]);
    };

    push(p.g, disp.energy(0.0, p.d, p.offs));
    for i in 1..=p.num_qs {
        let q = i as f64 / p.num_qs as f64;
        let e0 = disp.energy(q, p.d, p.offs);
        for dir in &dirs {
            push(p.g + *dir * q, e0);
        }
    }
    Ok(records)
}

/// Magnon S(q,w) answered from the nearest sampled dispersion point.
#[derive(Clone)]
pub struct MagnonModel {
    core: ModelCore,
    params: MagnonParams,
    tree: Arc<KdTree>,
}

impl MagnonModel {
    pub fn new(params: MagnonParams) -> Self {
        let mut model = Self {
            core: ModelCore::invalid(),
            params,
            tree: Arc::default(),
        };
        model.create();
        model
    }

    pub fn from_file(path: impl AsRef<Path>) -> Self {
        let mut params = MagnonParams::default();
        super::apply_config(&mut params, path.as_ref(), "magnon");
        Self::new(params)
    }

    fn create(&mut self) {
        match sample_shells(&self.params) {
            Ok(records) => {
                tracing::info!("generated {} S(q,w) points", records.len());
                self.tree = Arc::new(KdTree::load(records, 3));
                self.core.ok = !self.tree.is_empty();
            }
            Err(e) => {
                tracing::error!("magnon: {}", e);
                self.tree = Arc::default();
                self.core.ok = false;
            }
        }
    }

    pub fn params(&self) -> &MagnonParams {
        &self.params
    }

    pub fn tree(&self) -> &Arc<KdTree> {
        &self.tree
    }

    fn global_or(value: f64, global: f64) -> f64 {
        if (value - SENTINEL_GLOBAL).abs() <= 0.1 {
            global
        } else {
            value
        }
    }
}

impl SqwModel for MagnonModel {
    fn evaluate(&self, h: f64, k: f64, l: f64, e: f64) -> f64 {
        let query = [h, k, l];
        if !self.tree.is_point_in_grid(&query) {
            return 0.0;
        }
        let Some(rec) = self.tree.nearest(&query) else {
            return 0.0;
        };
        let p = &self.params;

        let s = Self::global_or(rec[4], p.s0);
        let e_hwhm = Self::global_or(rec[5], p.e_hwhm);
        let q_hwhm = Self::global_or(rec[6], p.q_hwhm);
        let q_dist = Vector3::new(rec[0] - h, rec[1] - k, rec[2] - l).norm();

        excitation(e, p.t, rec[3], e_hwhm, q_dist, q_hwhm, s) + incoherent(e, p.inc_amp, p.inc_sig)
    }

    fn dispersion(&self, h: f64, k: f64, l: f64) -> Dispersion {
        let Some(disp) = MagnonDisp::from_index(self.params.disp) else {
            return Dispersion::default();
        };
        let q = (Vector3::new(h, k, l) - self.params.g).norm();
        let e = disp.energy(q, self.params.d, self.params.offs);
        Dispersion::new(vec![e, -e], vec![1.0, 1.0])
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
        if self.params.apply(vars) {
            self.create();
        }
    }

    fn shallow_copy(&self) -> Box<dyn SqwModel> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::lineshape::dho;

    fn ferro_at_origin() -> MagnonModel {
        MagnonModel::new(MagnonParams {
            g: Vector3::zeros(),
            num_qs: 10,
            num_points: 40,
            ..MagnonParams::default()
        })
    }

    #[test]
    fn test_fibonacci_unit() {
        let dirs = fibonacci_sphere(25);
        assert_eq!(dirs.len(), 25);
        assert!(dirs.iter().all(|d| (d.norm() - 1.0).abs() < 1e-12));
    }

    #[test]
    fn test_peak_at_origin() {
        let m = ferro_at_origin();
        assert!(m.is_ok());
        let v = m.evaluate(0.0, 0.0, 0.0, 0.0);
        let peak = dho(0.0, 300.0, 0.0, 0.1, 1.0);
        assert!((v - peak).abs() < 1e-9 * peak, "{} vs {}", v, peak);
        assert!(m.evaluate(0.0, 0.0, 0.0, 0.5) < v);
    }

    #[test]
    fn test_far_query_is_zero() {
        let m = ferro_at_origin();
        assert_eq!(m.evaluate(5.0, 5.0, 5.0, 0.0), 0.0);
    }

    #[test]
    fn test_dispersion() {
        let m = ferro_at_origin();
        let d = m.dispersion(0.5, 0.0, 0.0);
        assert_eq!(d.energies, vec![0.25, -0.25]);

        let mut af = ferro_at_origin();
        af.set_vars(&[Variable::new("disp", "uint", "1"), Variable::new("offs", "real", "1")]);
        assert_eq!(af.dispersion(0.0, 0.5, 0.0).energies[0], 1.5);
    }

    #[test]
    fn test_unknown_dispersion_invalid() {
        let mut m = ferro_at_origin();
        m.set_vars(&[Variable::new("disp", "uint", "4")]);
        assert!(!m.is_ok());
        assert!(m.dispersion(0.5, 0.0, 0.0).is_empty());
    }

    #[test]
    fn test_cosmetic_keeps_tree() {
        let mut m = ferro_at_origin();
        let before = Arc::clone(m.tree());
        m.set_vars(&[Variable::new("S0", "real", "2"), Variable::new("T", "real", "10")]);
        assert!(Arc::ptr_eq(&before, m.tree()));
        let v = m.evaluate(0.0, 0.0, 0.0, 0.0);
        assert!((v - 2.0 * dho(0.0, 10.0, 0.0, 0.1, 1.0)).abs() < 1e-9);
    }
}
