//! FFI (Foreign Function Interface) layer for C bindings.
//!
//! `model` is the host API for building and evaluating models from C.
//! `plugin` holds the other direction: exporting a Rust model from a
//! plugin library through [`crate::export_sqw_plugin`].

pub mod model;
pub mod plugin;
pub mod types;

pub use model::*;
pub use types::*;
