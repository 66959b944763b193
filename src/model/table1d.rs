//! Powder-averaged S(|q|, E) table.

use super::traits::{ModelCore, SqwModel};
use super::vars::{FieldKind, FieldTable, Slot, Variable};
use crate::data::DataTable;
use crate::error::{Result, SqwError};
use crate::index::KdTree;
use nalgebra::Vector3;
use std::path::Path;
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct Table1dParams {
    pub q_column: u32,
    pub e_column: u32,
    pub s_column: u32,
    /// Reference point that |q| is measured from.
    pub g: Vector3<f64>,
}

impl Default for Table1dParams {
    fn default() -> Self {
        Self {
            q_column: 0,
            e_column: 1,
            s_column: 2,
            g: Vector3::zeros(),
        }
    }
}

impl FieldTable for Table1dParams {
    const NAMES: &'static [&'static str] = &["q_column", "E_column", "S_column", "G"];

    fn slot(&mut self, name: &str) -> Option<(FieldKind, Slot<'_>)> {
        use FieldKind::*;
        Some(match name {
            "q_column" => (Structural, Slot::Uint(&mut self.q_column)),
            "E_column" => (Structural, Slot::Uint(&mut self.e_column)),
            "S_column" => (Structural, Slot::Uint(&mut self.s_column)),
            "G" => (Cosmetic, Slot::Vector(&mut self.g)),
            _ => return None,
        })
    }
}

/// Nearest (|q - G|, E) row of a column table.
#[derive(Clone)]
pub struct Table1dModel {
    core: ModelCore,
    params: Table1dParams,
    table: Option<Arc<DataTable>>,
    tree: Arc<KdTree>,
}

impl Table1dModel {
    pub fn from_file(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        tracing::debug!("loading {}", path.display());
        match DataTable::load(path) {
            Ok(table) => Self::from_table(table, Table1dParams::default()),
            Err(e) => {
                tracing::error!("table_1d: {}", e);
                Self {
                    core: ModelCore::invalid(),
                    params: Table1dParams::default(),
                    table: None,
                    tree: Arc::default(),
                }
            }
        }
    }

    pub fn from_table(table: DataTable, params: Table1dParams) -> Self {
        let mut model = Self {
            core: ModelCore::invalid(),
            params,
            table: Some(Arc::new(table)),
            tree: Arc::default(),
        };
        model.create();
        model
    }

    fn create(&mut self) {
        let Some(table) = &self.table else {
            tracing::error!("table_1d: data table not loaded");
            return;
        };
        match Self::build(table, &self.params) {
            Ok(tree) => {
                self.tree = Arc::new(tree);
                self.core.ok = true;
            }
            Err(e) => {
                tracing::error!("table_1d: {}", e);
                self.tree = Arc::default();
                self.core.ok = false;
            }
        }
    }

    fn build(table: &DataTable, params: &Table1dParams) -> Result<KdTree> {
        let column = |idx: u32, what: &str| {
            table.column(idx as usize).ok_or_else(|| {
                SqwError::ColumnCount(format!(
                    "{} column {} out of range, table has {}",
                    what,
                    idx,
                    table.ncols()
                ))
            })
        };
        let q = column(params.q_column, "q")?;
        let e = column(params.e_column, "E")?;
        let s = column(params.s_column, "S")?;

        let records: Vec<Vec<f64>> = q
            .iter()
            .zip(e.iter())
            .zip(s.iter())
            .map(|((&q, &e), &s)| vec![q, e, s])
            .collect();

        let tree = KdTree::try_load(records, 2)?;
        if let [(qmin, qmax), (emin, emax)] = tree.bounds() {
            tracing::info!(
                "loaded {} S(q,w) points, q range {}..{}, E range {}..{}",
                tree.len(),
                qmin,
                qmax,
                emin,
                emax
            );
        }
        Ok(tree)
    }

    pub fn tree(&self) -> &Arc<KdTree> {
        &self.tree
    }
}

impl SqwModel for Table1dModel {
    fn evaluate(&self, h: f64, k: f64, l: f64, e: f64) -> f64 {
        if !self.core.ok {
            return 0.0;
        }
        let q = (Vector3::new(h, k, l) - self.params.g).norm();
        let query = [q, e];
        if !self.tree.is_point_in_grid(&query) {
            return 0.0;
        }
        self.tree.nearest(&query).map_or(0.0, |rec| rec[2])
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

    fn model() -> Table1dModel {
        let table = DataTable::parse("0.0 0.0 1.0\n0.5 0.0 2.0\n1.0 0.0 3.0\n0.5 1.0 4.0\n").unwrap();
        Table1dModel::from_table(table, Table1dParams::default())
    }

    #[test]
    fn test_lookup_by_modulus() {
        let m = model();
        assert!(m.is_ok());
        assert_eq!(m.evaluate(0.0, 0.5, 0.0, 0.0), 2.0);
        assert_eq!(m.evaluate(0.0, 0.0, -0.95, 0.1), 3.0);
        assert_eq!(m.evaluate(0.3, 0.4, 0.0, 0.9), 4.0);
        assert_eq!(m.evaluate(2.0, 0.0, 0.0, 0.0), 0.0);
    }

    #[test]
    fn test_g_shift_keeps_tree() {
        let mut m = model();
        let before = m.tree().fingerprint();
        m.set_vars(&[Variable::new("G", "vector", "1 0 0")]);
        assert_eq!(m.tree().fingerprint(), before);
        assert_eq!(m.evaluate(1.0, 0.0, 0.0, 0.0), 1.0);
    }

    #[test]
    fn test_bad_column_invalidates() {
        let mut m = model();
        m.set_vars(&[Variable::new("S_column", "uint", "7")]);
        assert!(!m.is_ok());
        assert_eq!(m.evaluate(0.0, 0.5, 0.0, 0.0), 0.0);

        m.set_vars(&[Variable::new("S_column", "uint", "2")]);
        assert!(m.is_ok());
    }

    #[test]
    fn test_swap_columns_rebuilds() {
        let mut m = model();
        let before = m.tree().fingerprint();
        m.set_vars(&[Variable::new("S_column", "uint", "0"), Variable::new("q_column", "uint", "2")]);
        assert_ne!(m.tree().fingerprint(), before);
    }
}
