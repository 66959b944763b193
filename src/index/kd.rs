//! k-d tree over fixed-width records.
//!
//! Each record carries `dims` indexed coordinates followed by payload
//! values. Only the indexed coordinates take part in splitting, bounds and
//! distances; the payload rides along and is handed back with the nearest
//! record.
//!
//! Construction uses a median split on the cycling axis and is fully
//! deterministic. The tree is immutable once built; models share it behind
//! an `Arc` and replace it wholesale when their sampling changes.

use crate::error::{Result, SqwError};
use std::collections::hash_map::DefaultHasher;
use std::hash::Hasher;

#[derive(Debug)]
struct KdNode {
    /// Position of the record in `KdTree::records`.
    record: usize,
    split_dim: usize,
    left: Option<Box<KdNode>>,
    right: Option<Box<KdNode>>,
}

/// Nearest-record index with a bounding-box gate.
#[derive(Debug, Default)]
pub struct KdTree {
    root: Option<Box<KdNode>>,
    records: Vec<Box<[f64]>>,
    dims: usize,
    width: usize,
    /// Per indexed axis `(min, max)`.
    bounds: Vec<(f64, f64)>,
}

impl KdTree {
    /// An empty tree. Every query on it misses.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tree over `records`, indexing the first `dims` columns.
    ///
    /// Invalid input leaves an empty tree behind; the reason is logged.
    /// Callers check [`KdTree::is_empty`].
    pub fn load(records: Vec<Vec<f64>>, dims: usize) -> Self {
        match Self::try_load(records, dims) {
            Ok(tree) => tree,
            Err(e) => {
                tracing::error!("k-d tree not built: {}", e);
                Self::new()
            }
        }
    }

    /// Build a tree, reporting why the input was rejected.
    pub fn try_load(records: Vec<Vec<f64>>, dims: usize) -> Result<Self> {
        if dims == 0 {
            return Err(SqwError::Format("k-d tree needs at least one indexed dimension".into()));
        }
        let Some(first) = records.first() else {
            return Ok(Self::new());
        };

        let width = first.len();
        if width < dims {
            return Err(SqwError::ColumnCount(format!(
                "record has {} values, {} indexed dimensions requested",
                width, dims
            )));
        }
        if let Some(pos) = records.iter().position(|r| r.len() != width) {
            return Err(SqwError::ColumnCount(format!(
                "record {} has {} values, expected {}",
                pos,
                records[pos].len(),
                width
            )));
        }

        let mut bounds = vec![(f64::INFINITY, f64::NEG_INFINITY); dims];
        for rec in &records {
            for (b, &x) in bounds.iter_mut().zip(rec.iter()) {
                b.0 = b.0.min(x);
                b.1 = b.1.max(x);
            }
        }

        let records: Vec<Box<[f64]>> = records.into_iter().map(Vec::into_boxed_slice).collect();
        let mut order: Vec<usize> = (0..records.len()).collect();
        let root = Self::build_recursive(&records, &mut order, dims, 0);

        Ok(Self {
            root,
            records,
            dims,
            width,
            bounds,
        })
    }

    fn build_recursive(
        records: &[Box<[f64]>],
        order: &mut [usize],
        dims: usize,
        depth: usize,
    ) -> Option<Box<KdNode>> {
        if order.is_empty() {
            return None;
        }

        let dim = depth % dims;
        let mid = order.len() / 2;
        order.select_nth_unstable_by(mid, |&a, &b| {
            records[a][dim].total_cmp(&records[b][dim]).then(a.cmp(&b))
        });

        let (left, rest) = order.split_at_mut(mid);
        let (pivot, right) = rest.split_first_mut()?;

        Some(Box::new(KdNode {
            record: *pivot,
            split_dim: dim,
            left: Self::build_recursive(records, left, dims, depth + 1),
            right: Self::build_recursive(records, right, dims, depth + 1),
        }))
    }

    /// Drop all records. Queries afterwards miss until the next build.
    pub fn unload(&mut self) {
        *self = Self::new();
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of indexed coordinates per record.
    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Total values per record, coordinates plus payload.
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn bounds(&self) -> &[(f64, f64)] {
        &self.bounds
    }

    /// Whether `query` lies inside the bounding box of the records on every
    /// indexed axis. Always false for an empty tree.
    pub fn is_point_in_grid(&self, query: &[f64]) -> bool {
        if self.is_empty() || query.len() < self.dims {
            return false;
        }
        self.bounds
            .iter()
            .zip(query)
            .all(|(&(lo, hi), &x)| x >= lo && x <= hi)
    }

    /// The record closest to `query` in the indexed coordinates.
    ///
    /// Among records at the same distance the first one reached by the
    /// descent wins, so repeated queries always give the same answer.
    pub fn nearest(&self, query: &[f64]) -> Option<&[f64]> {
        if query.len() < self.dims {
            return None;
        }
        let root = self.root.as_ref()?;
        let mut best = (usize::MAX, f64::INFINITY);
        self.nearest_recursive(root, query, &mut best);
        self.records.get(best.0).map(|r| &r[..])
    }

    fn nearest_recursive(&self, node: &KdNode, query: &[f64], best: &mut (usize, f64)) {
        let rec = &self.records[node.record];
        let dist_sq = self.distance_sq(rec, query);
        if dist_sq < best.1 {
            *best = (node.record, dist_sq);
        }

        let dim = node.split_dim;
        let diff = query[dim] - rec[dim];
        let (first, second) = if diff < 0.0 {
            (&node.left, &node.right)
        } else {
            (&node.right, &node.left)
        };

        if let Some(child) = first {
            self.nearest_recursive(child, query, best);
        }
        if diff * diff < best.1 {
            if let Some(child) = second {
                self.nearest_recursive(child, query, best);
            }
        }
    }

    #[inline]
    fn distance_sq(&self, rec: &[f64], query: &[f64]) -> f64 {
        rec[..self.dims]
            .iter()
            .zip(query)
            .map(|(a, b)| (a - b) * (a - b))
            .sum()
    }

    /// Stable hash of all records in load order.
    pub fn fingerprint(&self) -> u64 {
        let mut h = DefaultHasher::new();
        h.write_usize(self.dims);
        h.write_usize(self.width);
        for rec in &self.records {
            for x in rec.iter() {
                h.write_u64(x.to_bits());
            }
        }
        h.finish()
    }

    /// All records in load order.
    pub fn records(&self) -> impl Iterator<Item = &[f64]> {
        self.records.iter().map(|r| &r[..])
    }
}
