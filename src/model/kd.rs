//! Tabulated S(q,w) looked up in a 4D k-d tree.

use super::traits::{ModelCore, SqwModel};
use super::vars::Variable;
use crate::data::DataTable;
use crate::error::{Result, SqwError};
use crate::index::KdTree;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Returns S of the tabulated point nearest to (h, k, l, E).
///
/// The table holds `h k l E S` rows; `# key: value` lines are kept as
/// metadata. Energy and reciprocal-lattice units share one metric.
#[derive(Clone, Default)]
pub struct KdModel {
    core: ModelCore,
    tree: Arc<KdTree>,
    metadata: Arc<BTreeMap<String, String>>,
}

impl KdModel {
    pub fn from_file(path: impl AsRef<Path>) -> Self {
        match Self::open(path.as_ref()) {
            Ok(model) => model,
            Err(e) => {
                tracing::error!("kd: {}", e);
                Self::default()
            }
        }
    }

    fn open(path: &Path) -> Result<Self> {
        let table = DataTable::load(path)?;
        if table.ncols() != 5 {
            return Err(SqwError::ColumnCount("Need h,k,l,E,S data.".into()));
        }
        let records: Vec<Vec<f64>> = table.rows().map(|r| r.to_vec()).collect();
        tracing::info!("loaded {} S(q,w) points", records.len());
        Self::from_records(records, table.metadata().clone())
    }

    /// Build from `[h, k, l, E, S]` records.
    pub fn from_records(records: Vec<Vec<f64>>, metadata: BTreeMap<String, String>) -> Result<Self> {
        let tree = KdTree::try_load(records, 4)?;
        tracing::info!("generated k-d tree");
        Ok(Self {
            core: ModelCore::ok(),
            tree: Arc::new(tree),
            metadata: Arc::new(metadata),
        })
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn tree(&self) -> &Arc<KdTree> {
        &self.tree
    }
}

impl SqwModel for KdModel {
    fn evaluate(&self, h: f64, k: f64, l: f64, e: f64) -> f64 {
        let query = [h, k, l, e];
        if !self.tree.is_point_in_grid(&query) {
            return 0.0;
        }
        self.tree.nearest(&query).map_or(0.0, |rec| rec[4])
    }

    fn core(&self) -> &ModelCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ModelCore {
        &mut self.core
    }

    fn vars(&self) -> Vec<Variable> {
        Vec::new()
    }

    fn set_vars(&mut self, _vars: &[Variable]) {}

    fn shallow_copy(&self) -> Box<dyn SqwModel> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn grid() -> KdModel {
        let mut records = Vec::new();
        for i in 0..3 {
            for e in 0..3 {
                records.push(vec![i as f64, 0.0, 0.0, e as f64, (10 * i + e) as f64]);
                records.push(vec![i as f64, 1.0, 1.0, e as f64, -1.0]);
            }
        }
        KdModel::from_records(records, BTreeMap::new()).unwrap()
    }

    #[test]
    fn test_nearest_value() {
        let m = grid();
        assert_eq!(m.evaluate(1.1, 0.1, 0.2, 1.9), 12.0);
        assert_eq!(m.evaluate(2.0, 0.9, 0.8, 0.0), -1.0);
    }

    #[test]
    fn test_out_of_grid() {
        let m = grid();
        assert_eq!(m.evaluate(3.5, 0.0, 0.0, 1.0), 0.0);
        assert_eq!(m.evaluate(1.0, 0.0, 0.0, -0.5), 0.0);
    }

    #[test]
    fn test_shallow_copy_shares_tree() {
        let m = grid();
        let copy = m.clone();
        assert!(Arc::ptr_eq(m.tree(), copy.tree()));
    }

    #[test]
    fn test_load_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "# source: synthetic").unwrap();
        writeln!(f, "0 0 0 0 1.5").unwrap();
        writeln!(f, "1 0 0 1 2.5").unwrap();
        let m = KdModel::from_file(f.path());
        assert!(m.is_ok());
        assert_eq!(m.metadata().get("source").unwrap(), "synthetic");
        assert_eq!(m.evaluate(0.9, 0.0, 0.0, 0.9), 2.5);
    }

    #[test]
    fn test_wrong_columns() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "0 0 0 0 1 2 3").unwrap();
        let m = KdModel::from_file(f.path());
        assert!(!m.is_ok());
        assert_eq!(m.evaluate(0.0, 0.0, 0.0, 0.0), 0.0);
    }
}
