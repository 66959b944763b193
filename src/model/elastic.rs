//! Elastic Bragg peaks.

use super::lineshape::gauss;
use super::traits::{ModelCore, SqwModel};
use super::vars::{FieldKind, FieldTable, Slot, Variable};
use nalgebra::Vector3;
use std::path::Path;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ElasticPeak {
    pub hkl: Vector3<f64>,
    pub sigma_q: f64,
    pub sigma_e: f64,
    pub s: f64,
}

/// Widths used when no peak list is loaded.
#[derive(Clone, Debug)]
pub struct ElasticParams {
    pub sigma_q: f64,
    pub sigma_e: f64,
}

impl Default for ElasticParams {
    fn default() -> Self {
        Self {
            sigma_q: 0.02,
            sigma_e: 0.02,
        }
    }
}

impl FieldTable for ElasticParams {
    const NAMES: &'static [&'static str] = &["sigma_q", "sigma_E"];

    fn slot(&mut self, name: &str) -> Option<(FieldKind, Slot<'_>)> {
        Some(match name {
            "sigma_q" => (FieldKind::Cosmetic, Slot::Real(&mut self.sigma_q)),
            "sigma_E" => (FieldKind::Cosmetic, Slot::Real(&mut self.sigma_e)),
            _ => return None,
        })
    }
}

/// Gaussian Bragg peaks at E = 0.
///
/// Without a peak file every integer (h, k, l) carries a unit peak. With one,
/// the listed peaks (`h k l sigma_q sigma_E S` per row) are summed.
#[derive(Clone)]
pub struct ElasticModel {
    core: ModelCore,
    params: ElasticParams,
    peaks: Option<Arc<Vec<ElasticPeak>>>,
}

impl ElasticModel {
    /// Peak at every integer position.
    pub fn auto() -> Self {
        Self {
            core: ModelCore::ok(),
            params: ElasticParams::default(),
            peaks: None,
        }
    }

    pub fn from_peaks(peaks: Vec<ElasticPeak>) -> Self {
        tracing::info!("number of elastic peaks: {}", peaks.len());
        Self {
            core: ModelCore::ok(),
            params: ElasticParams::default(),
            peaks: Some(Arc::new(peaks)),
        }
    }

    /// Load a peak list, falling back to automatic peaks when the file
    /// cannot be read.
    pub fn from_file(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Self::auto();
        }
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) => {
                tracing::error!("elastic: {}: {}; using nearest integer peaks", path.display(), e);
                return Self::auto();
            }
        };
        let peaks = text.lines().filter_map(parse_peak).collect();
        Self::from_peaks(peaks)
    }

    pub fn peaks(&self) -> Option<&[ElasticPeak]> {
        self.peaks.as_deref().map(Vec::as_slice)
    }
}

/// One `h k l sigma_q sigma_E S` row. Reading stops at the first field that
/// is not a number; the remaining fields stay zero.
fn parse_peak(line: &str) -> Option<ElasticPeak> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let mut col = [0.0; 6];
    for (slot, tok) in col.iter_mut().zip(line.split_whitespace()) {
        match tok.parse() {
            Ok(v) => *slot = v,
            Err(_) => break,
        }
    }
    Some(ElasticPeak {
        hkl: Vector3::new(col[0], col[1], col[2]),
        sigma_q: col[3],
        sigma_e: col[4],
        s: col[5],
    })
}

impl SqwModel for ElasticModel {
    fn evaluate(&self, h: f64, k: f64, l: f64, e: f64) -> f64 {
        if !self.core.ok {
            return 0.0;
        }
        let q = Vector3::new(h, k, l);
        match &self.peaks {
            None => {
                let bragg = q.map(f64::round);
                let dist = (bragg - q).norm();
                gauss(dist, 0.0, self.params.sigma_q, 1.0, 0.0)
                    * gauss(e, 0.0, self.params.sigma_e, 1.0, 0.0)
            }
            Some(peaks) => peaks
                .iter()
                .map(|pk| {
                    let dist = (pk.hkl - q).norm();
                    pk.s * gauss(dist, 0.0, pk.sigma_q, 1.0, 0.0)
                        * gauss(e, 0.0, pk.sigma_e, 1.0, 0.0)
                })
                .sum(),
        }
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
    fn test_auto_peak_at_integer() {
        let m = ElasticModel::auto();
        assert!(m.is_ok());
        assert_eq!(m.evaluate(1.0, -2.0, 3.0, 0.0), 1.0);
        assert!(m.evaluate(1.5, 0.0, 0.0, 0.0) < 1e-10);
        assert!(m.evaluate(1.0, 0.0, 0.0, 1.0) < 1e-10);
    }

    #[test]
    fn test_peak_list() {
        let m = ElasticModel::from_peaks(vec![
            ElasticPeak {
                hkl: Vector3::new(1.0, 0.0, 0.0),
                sigma_q: 0.1,
                sigma_e: 0.1,
                s: 2.0,
            },
            ElasticPeak {
                hkl: Vector3::new(1.0, 0.0, 0.0),
                sigma_q: 0.1,
                sigma_e: 0.1,
                s: 0.5,
            },
        ]);
        assert!((m.evaluate(1.0, 0.0, 0.0, 0.0) - 2.5).abs() < 1e-12);
        assert!(m.evaluate(0.0, 0.0, 0.0, 0.0) < 1e-10);
    }

    #[test]
    fn test_width_vars() {
        let mut m = ElasticModel::auto();
        assert!(m.set_var_if_avail("sigma_q", "0.5"));
        assert!(!m.set_var_if_avail("nope", "1"));
        let half = m.evaluate(0.5, 0.0, 0.0, 0.0);
        assert!(half > 0.5 && half < 1.0);
    }

    #[test]
    fn test_unreadable_file_falls_back() {
        let m = ElasticModel::from_file("/nonexistent/peaks.dat");
        assert!(m.is_ok());
        assert!(m.peaks().is_none());
    }

    #[test]
    fn test_short_rows_zero_filled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("peaks.dat");
        std::fs::write(&path, "# h k l sq se S\n1 0 0 0.02 0.02\n0 1 0 0.02 0.02 3\n\n2 0\n").unwrap();

        let m = ElasticModel::from_file(&path);
        assert!(m.is_ok());
        let peaks = m.peaks().unwrap();
        assert_eq!(peaks.len(), 3);
        assert_eq!(peaks[0].s, 0.0);
        assert_eq!(peaks[1].s, 3.0);
        assert_eq!(peaks[2].hkl, Vector3::new(2.0, 0.0, 0.0));
        assert_eq!(peaks[2].sigma_q, 0.0);

        assert_eq!(m.evaluate(1.0, 0.0, 0.0, 0.0), 0.0);
        assert!((m.evaluate(0.0, 1.0, 0.0, 0.0) - 3.0).abs() < 1e-12);
    }
}
