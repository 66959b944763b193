//! Three-branch phonon model on a sampled k-d tree.
//!
//! The LA branch runs along G, the two transverse branches along the
//! configured TA1 and TA2 directions. Each branch follows
//! `E(q) = |amp * sin(q * freq)|` for q in [-1, 1) around G, optionally
//! smeared over spherical arcs. Points store branch sentinels instead of
//! widths and weights, so lineshape-only changes never touch the tree.

use super::lineshape::{excitation, incoherent};
use super::traits::{ModelCore, SqwModel};
use super::vars::{FieldKind, FieldTable, Slot, Variable};
use crate::error::{Result, SqwError};
use crate::index::KdTree;
use nalgebra::Vector3;
use std::path::Path;
use std::sync::Arc;

/// Payload sentinels selecting the branch-global constants.
pub const SENTINEL_TA1: f64 = -1.0;
pub const SENTINEL_TA2: f64 = -2.0;
pub const SENTINEL_LA: f64 = -3.0;
const SENTINEL_TOL: f64 = 0.1;

/// Record layout: h, k, l, E0, S, E_HWHM, q_HWHM.
const REC_E0: usize = 3;
const REC_S: usize = 4;
const REC_E_HWHM: usize = 5;
const REC_Q_HWHM: usize = 6;

/// Per-branch dispersion and lineshape constants.
#[derive(Clone, Debug, PartialEq)]
pub struct Branch {
    pub amp: f64,
    pub freq: f64,
    pub e_hwhm: f64,
    pub q_hwhm: f64,
    pub s0: f64,
}

impl Branch {
    fn with_amp(amp: f64) -> Self {
        Self {
            amp,
            freq: std::f64::consts::FRAC_PI_2,
            e_hwhm: 0.1,
            q_hwhm: 0.1,
            s0: 1.0,
        }
    }

    pub fn energy(&self, q: f64) -> f64 {
        (self.amp * (q * self.freq).sin()).abs()
    }
}

#[derive(Clone, Debug)]
pub struct PhononParams {
    pub num_qs: u32,
    pub num_arc: u32,
    /// Arc half-opening in degrees.
    pub arc_max: f64,
    pub g: Vector3<f64>,
    pub ta1_dir: Vector3<f64>,
    pub ta2_dir: Vector3<f64>,
    pub la: Branch,
    pub ta1: Branch,
    pub ta2: Branch,
    pub inc_amp: f64,
    pub inc_sig: f64,
    pub t: f64,
}

impl Default for PhononParams {
    fn default() -> Self {
        Self {
            num_qs: 250,
            num_arc: 50,
            arc_max: 10.0,
            g: Vector3::new(1.0, 0.0, 0.0),
            ta1_dir: Vector3::new(0.0, 1.0, 0.0),
            ta2_dir: Vector3::new(0.0, 0.0, 1.0),
            la: Branch::with_amp(20.0),
            ta1: Branch::with_amp(15.0),
            ta2: Branch::with_amp(10.0),
            inc_amp: 0.0,
            inc_sig: 0.1,
            t: 100.0,
        }
    }
}

impl FieldTable for PhononParams {
    const NAMES: &'static [&'static str] = &[
        "num_qs", "num_arc", "arc_max", "G", "TA1", "TA2",
        "LA_amp", "LA_freq", "LA_E_HWHM", "LA_q_HWHM", "LA_S0",
        "TA1_amp", "TA1_freq", "TA1_E_HWHM", "TA1_q_HWHM", "TA1_S0",
        "TA2_amp", "TA2_freq", "TA2_E_HWHM", "TA2_q_HWHM", "TA2_S0",
        "inc_amp", "inc_sig", "T",
    ];

    fn slot(&mut self, name: &str) -> Option<(FieldKind, Slot<'_>)> {
        use FieldKind::*;
        if let Some((branch, field)) = name.split_once('_') {
            match branch {
                "LA" => return branch_slot(&mut self.la, field),
                "TA1" => return branch_slot(&mut self.ta1, field),
                "TA2" => return branch_slot(&mut self.ta2, field),
                _ => {}
            }
        }
        Some(match name {
            "num_qs" => (Structural, Slot::Uint(&mut self.num_qs)),
            "num_arc" => (Structural, Slot::Uint(&mut self.num_arc)),
            "arc_max" => (Structural, Slot::Real(&mut self.arc_max)),
            "G" => (Structural, Slot::Vector(&mut self.g)),
            "TA1" => (Structural, Slot::Vector(&mut self.ta1_dir)),
            "TA2" => (Structural, Slot::Vector(&mut self.ta2_dir)),
            "inc_amp" => (Cosmetic, Slot::Real(&mut self.inc_amp)),
            "inc_sig" => (Cosmetic, Slot::Real(&mut self.inc_sig)),
            "T" => (Cosmetic, Slot::Real(&mut self.t)),
            _ => return None,
        })
    }
}

fn branch_slot<'a>(b: &'a mut Branch, field: &str) -> Option<(FieldKind, Slot<'a>)> {
    use FieldKind::*;
    Some(match field {
        "amp" => (Structural, Slot::Real(&mut b.amp)),
        "freq" => (Structural, Slot::Real(&mut b.freq)),
        "E_HWHM" => (Cosmetic, Slot::Real(&mut b.e_hwhm)),
        "q_HWHM" => (Cosmetic, Slot::Real(&mut b.q_hwhm)),
        "S0" => (Cosmetic, Slot::Real(&mut b.s0)),
        _ => return None,
    })
}

/// Rotate `v` on its sphere by `dphi` in azimuth and `dtheta` in polar angle.
fn sph_shell(v: &Vector3<f64>, dphi: f64, dtheta: f64) -> Vector3<f64> {
    let r = v.norm();
    if r == 0.0 {
        return *v;
    }
    let phi = v.y.atan2(v.x) + dphi;
    let theta = (v.z / r).clamp(-1.0, 1.0).acos() + dtheta;
    Vector3::new(
        r * theta.sin() * phi.cos(),
        r * theta.sin() * phi.sin(),
        r * theta.cos(),
    )
}

fn unit(v: &Vector3<f64>, what: &str) -> Result<Vector3<f64>> {
    v.try_normalize(f64::EPSILON)
        .ok_or_else(|| SqwError::Format(format!("{} direction has zero length", what)))
}

/// Sample all three branches into `[h, k, l, E0, S, E_HWHM, q_HWHM]`
/// records carrying branch sentinels.
pub fn sample_branches(p: &PhononParams) -> Result<Vec<Vec<f64>>> {
    if p.num_qs == 0 {
        return Err(SqwError::Format("num_qs must be positive".into()));
    }
    let dirs = [
        (unit(&p.ta2_dir, "TA2")?, &p.ta2, SENTINEL_TA2),
        (unit(&p.ta1_dir, "TA1")?, &p.ta1, SENTINEL_TA1),
        (unit(&p.g, "LA")?, &p.la, SENTINEL_LA),
    ];
    tracing::info!("LA: {:?}, TA1: {:?}, TA2: {:?}", dirs[2].0, dirs[1].0, dirs[0].0);

    let arcs: Vec<f64> = if p.num_arc > 1 {
        let arc_max = p.arc_max.to_radians().abs();
        (0..)
            .map(|i| -arc_max + i as f64 / p.num_arc as f64)
            .take_while(|a| *a <= arc_max)
            .collect()
    } else {
        Vec::new()
    };

    let steps = 2 * p.num_qs as usize;
    let mut records = Vec::with_capacity(steps * 3 * arcs.len().pow(2).max(1));
    for i in 0..steps {
        let q = -1.0 + i as f64 / p.num_qs as f64;
        for (dir, branch, sentinel) in &dirs {
            let e0 = branch.energy(q);
            let along = *dir * q;
            let mut push = |pos: Vector3<f64>| {
                let pos = pos + p.g;
                records.push(vec![pos.x, pos.y, pos.z, e0, *sentinel, *sentinel, *sentinel]);
            };
            if arcs.is_empty() {
                push(along);
            } else {
                for &dph in &arcs {
                    for &dth in &arcs {
                        push(sph_shell(&along, dph, dth));
                    }
                }
            }
        }
    }
    Ok(records)
}

/// Phonon S(q,w) with LA, TA1 and TA2 branches.
#[derive(Clone)]
pub struct PhononModel {
    core: ModelCore,
    params: PhononParams,
    tree: Arc<KdTree>,
}

impl PhononModel {
    pub fn new(params: PhononParams) -> Self {
        let mut model = Self {
            core: ModelCore::invalid(),
            params,
            tree: Arc::default(),
        };
        model.create();
        model
    }

    pub fn from_file(path: impl AsRef<Path>) -> Self {
        let mut params = PhononParams::default();
        super::apply_config(&mut params, path.as_ref(), "phonon");
        Self::new(params)
    }

    fn create(&mut self) {
        match sample_branches(&self.params) {
            Ok(records) => {
                tracing::info!("generated {} S(q,w) points", records.len());
                self.tree = Arc::new(KdTree::load(records, 3));
                self.core.ok = !self.tree.is_empty();
                tracing::info!("generated k-d tree");
            }
            Err(e) => {
                tracing::error!("phonon: {}", e);
                self.tree = Arc::default();
                self.core.ok = false;
            }
        }
    }

    pub fn params(&self) -> &PhononParams {
        &self.params
    }

    pub fn tree(&self) -> &Arc<KdTree> {
        &self.tree
    }

    /// Replace a branch sentinel by the matching branch constant.
    fn resolve(&self, value: f64, field: fn(&Branch) -> f64) -> f64 {
        if value >= 0.0 {
            return value;
        }
        let branch = if (value - SENTINEL_TA1).abs() <= SENTINEL_TOL {
            &self.params.ta1
        } else if (value - SENTINEL_TA2).abs() <= SENTINEL_TOL {
            &self.params.ta2
        } else if (value - SENTINEL_LA).abs() <= SENTINEL_TOL {
            &self.params.la
        } else {
            return value;
        };
        field(branch)
    }
}

impl SqwModel for PhononModel {
    fn evaluate(&self, h: f64, k: f64, l: f64, e: f64) -> f64 {
        let query = [h, k, l];
        if !self.tree.is_point_in_grid(&query) {
            return 0.0;
        }
        let Some(rec) = self.tree.nearest(&query) else {
            return 0.0;
        };

        let s = self.resolve(rec[REC_S], |b| b.s0);
        let e_hwhm = self.resolve(rec[REC_E_HWHM], |b| b.e_hwhm);
        let q_hwhm = self.resolve(rec[REC_Q_HWHM], |b| b.q_hwhm);
        let q_dist = Vector3::new(rec[0] - h, rec[1] - k, rec[2] - l).norm();

        excitation(e, self.params.t, rec[REC_E0], e_hwhm, q_dist, q_hwhm, s)
            + incoherent(e, self.params.inc_amp, self.params.inc_sig)
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

    fn small() -> PhononModel {
        PhononModel::new(PhononParams {
            num_qs: 10,
            num_arc: 0,
            ta2: Branch {
                amp: 10.0,
                freq: 1.0,
                e_hwhm: 0.37,
                q_hwhm: 0.23,
                s0: 2.5,
            },
            ..PhononParams::default()
        })
    }

    #[test]
    fn test_straight_branches() {
        let m = small();
        assert!(m.is_ok());
        // 20 q steps times 3 branches
        assert_eq!(m.tree().len(), 60);
        assert_eq!(m.tree().width(), 7);
    }

    #[test]
    fn test_sentinel_resolves_to_ta2() {
        let m = small();
        let p = m.params().clone();
        let pos = p.g + Vector3::new(0.0, 0.0, 0.5);
        let rec = m.tree().nearest(pos.as_slice()).unwrap().to_vec();
        assert_eq!(rec[REC_E_HWHM], SENTINEL_TA2);

        for e in [0.0, 2.0, rec[REC_E0], 6.0] {
            let expected = excitation(e, p.t, rec[REC_E0], p.ta2.e_hwhm, 0.0, p.ta2.q_hwhm, p.ta2.s0);
            let got = m.evaluate(pos.x, pos.y, pos.z, e);
            assert!((got - expected).abs() < 1e-12, "{} vs {}", got, expected);
        }
        assert_eq!(m.resolve(-2.0, |b| b.e_hwhm), 0.37);
        assert_eq!(m.resolve(-2.05, |b| b.q_hwhm), 0.23);
        assert_eq!(m.resolve(0.4, |b| b.q_hwhm), 0.4);
    }

    #[test]
    fn test_out_of_grid() {
        let m = small();
        assert_eq!(m.evaluate(5.0, 5.0, 5.0, 0.0), 0.0);
    }

    #[test]
    fn test_rebuild_gating() {
        let mut m = small();
        let before = m.tree().fingerprint();
        let arc = Arc::clone(m.tree());

        m.set_vars(&[
            Variable::new("T", "real", "20"),
            Variable::new("TA2_E_HWHM", "real", "0.5"),
            Variable::new("inc_amp", "real", "1"),
            Variable::new("LA_S0", "real", "3"),
        ]);
        assert!(Arc::ptr_eq(&arc, m.tree()));
        assert_eq!(m.tree().fingerprint(), before);

        m.set_vars(&[Variable::new("G", "vector", "2 0 0")]);
        assert_ne!(m.tree().fingerprint(), before);
        assert!(m.is_ok());
    }

    #[test]
    fn test_arcs_add_points() {
        let m = PhononModel::new(PhononParams {
            num_qs: 5,
            num_arc: 20,
            arc_max: 5.0,
            ..PhononParams::default()
        });
        assert!(m.is_ok());
        // arc angles: -0.0873 + i/20 for i = 0..=3
        assert_eq!(m.tree().len(), 10 * 3 * 16);
    }

    #[test]
    fn test_zero_direction_invalid() {
        let mut m = small();
        m.set_vars(&[Variable::new("TA1", "vector", "0 0 0")]);
        assert!(!m.is_ok());
        assert_eq!(m.evaluate(1.0, 0.0, 0.0, 0.0), 0.0);
    }

    #[test]
    fn test_var_names_resolve() {
        let mut p = PhononParams::default();
        for name in PhononParams::NAMES {
            assert!(p.slot(name).is_some(), "{}", name);
        }
        assert_eq!(p.kind("TA1_q_HWHM"), Some(FieldKind::Cosmetic));
        assert_eq!(p.kind("TA1_freq"), Some(FieldKind::Structural));
        assert_eq!(p.kind("TA3_amp"), None);
    }
}
