//! Parallel evaluation of a model over batches of (h, k, l, E) points.

use crate::error::{Result, SqwError};
use crate::model::lineshape::lerp;
use crate::model::SqwModel;
use rayon::prelude::*;

/// Configuration for the evaluator.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// Number of worker threads.
    pub worker_count: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_count: num_cpus::get(),
        }
    }
}

/// Evaluates models on a dedicated rayon pool.
///
/// Models are shared by reference across the workers, which only needs
/// `evaluate(&self)`; the model is never reconfigured during a batch.
pub struct BatchEvaluator {
    config: RuntimeConfig,
    pool: rayon::ThreadPool,
}

impl BatchEvaluator {
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_count.max(1))
            .thread_name(|i| format!("sqw-worker-{}", i))
            .build()
            .map_err(|e| SqwError::ThreadPool(e.to_string()))?;
        tracing::debug!("batch evaluator with {} workers", pool.current_num_threads());
        Ok(Self { config, pool })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn worker_count(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// S at every point, in input order.
    pub fn evaluate(&self, model: &dyn SqwModel, points: &[[f64; 4]]) -> Vec<f64> {
        self.pool.install(|| {
            points
                .par_iter()
                .map(|&[h, k, l, e]| model.evaluate(h, k, l, e))
                .collect()
        })
    }

    /// Like [`BatchEvaluator::evaluate`], writing into `out`.
    ///
    /// Only `min(points.len(), out.len())` entries are computed.
    pub fn evaluate_into(&self, model: &dyn SqwModel, points: &[[f64; 4]], out: &mut [f64]) {
        self.pool.install(|| {
            out.par_iter_mut()
                .zip(points.par_iter())
                .for_each(|(o, &[h, k, l, e])| *o = model.evaluate(h, k, l, e));
        });
    }

    /// Evaluate along the straight line from `from` to `to`.
    pub fn scan(&self, model: &dyn SqwModel, from: [f64; 4], to: [f64; 4], steps: usize) -> Vec<([f64; 4], f64)> {
        let points = linear_path(from, to, steps);
        let values = self.evaluate(model, &points);
        points.into_iter().zip(values).collect()
    }
}

/// `steps` evenly spaced points from `from` to `to`, both ends included.
pub fn linear_path(from: [f64; 4], to: [f64; 4], steps: usize) -> Vec<[f64; 4]> {
    match steps {
        0 => Vec::new(),
        1 => vec![from],
        n => (0..n)
            .map(|i| {
                let t = i as f64 / (n - 1) as f64;
                std::array::from_fn(|c| lerp(from[c], to[c], t))
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ElasticModel;

    #[test]
    fn test_linear_path() {
        let p = linear_path([0.0, 0.0, 0.0, -1.0], [1.0, 2.0, 0.0, 1.0], 3);
        assert_eq!(p, vec![[0.0, 0.0, 0.0, -1.0], [0.5, 1.0, 0.0, 0.0], [1.0, 2.0, 0.0, 1.0]]);
        assert!(linear_path([0.0; 4], [1.0; 4], 0).is_empty());
        assert_eq!(linear_path([0.0; 4], [1.0; 4], 1).len(), 1);
    }

    #[test]
    fn test_parallel_matches_serial() {
        let model = ElasticModel::auto();
        let points = linear_path([0.0, 0.0, 0.0, -0.05], [2.0, 1.0, 0.0, 0.05], 257);
        let serial: Vec<f64> = points.iter().map(|&[h, k, l, e]| model.evaluate(h, k, l, e)).collect();

        let eval = BatchEvaluator::new(RuntimeConfig { worker_count: 4 }).unwrap();
        assert_eq!(eval.worker_count(), 4);
        assert_eq!(eval.evaluate(&model, &points), serial);

        let mut out = vec![f64::NAN; points.len()];
        eval.evaluate_into(&model, &points, &mut out);
        assert_eq!(out, serial);
    }

    #[test]
    fn test_scan_endpoints() {
        let model = ElasticModel::auto();
        let eval = BatchEvaluator::new(RuntimeConfig { worker_count: 0 }).unwrap();
        let scan = eval.scan(&model, [1.0, 0.0, 0.0, 0.0], [2.0, 0.0, 0.0, 0.0], 11);
        assert_eq!(scan.len(), 11);
        assert_eq!(scan[0].1, 1.0);
        assert_eq!(scan[10].1, 1.0);
        assert!(scan[5].1 < 1e-10);
    }
}
