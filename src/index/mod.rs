//! Spatial lookup structures.

pub mod kd;

pub use kd::KdTree;
