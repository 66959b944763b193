//! sqwrs - pluggable S(q,w) scattering models with spatial-index lookup.
//!
//! This crate provides dynamical structure factor models for neutron
//! scattering simulations with:
//!
//! - One model interface ([`SqwModel`]) behind tabulated, analytic,
//!   scripted and plugin models
//! - k-d tree lookup of precomputed dispersion points, shared between
//!   shallow copies
//! - String-typed variables for generic parameter editing and fitting
//! - Process isolation for models that are not thread-safe
//! - Parallel batch evaluation using rayon
//! - FFI layer for C callers and C-ABI model plugins
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │     FFI Layer (sqwrs.h)             │
//! │  host API  |  plugin ABI            │
//! └─────────────────────────────────────┘
//!                   │
//!                   ▼
//! ┌─────────────────────────────────────┐
//! │           Model Registry            │
//! │  ┌───────────┐  ┌───────────────┐  │
//! │  │ Built-in  │  │   Plugins     │  │
//! │  │  models   │  │ (libloading)  │  │
//! │  └───────────┘  └───────────────┘  │
//! │  ┌───────────┐  ┌───────────────┐  │
//! │  │  Scripts  │  │ Process proxy │  │
//! │  │ (py / jl) │  │ (fork + mq)   │  │
//! │  └───────────┘  └───────────────┘  │
//! └─────────────────────────────────────┘
//!                   │
//!                   ▼
//! ┌─────────────────────────────────────┐
//! │   k-d tree  |  batch evaluator      │
//! └─────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use sqwrs::model::{construct_sqw, SqwModel};
//!
//! let mut model = construct_sqw("magnon", "magnon.cfg").expect("known model");
//! model.set_var_if_avail("T", "100");
//! let s = model.evaluate(1.1, 0.0, 0.0, 0.5);
//! ```

pub mod data;
pub mod error;
pub mod ffi;
pub mod index;
pub mod model;
#[cfg(target_os = "linux")]
pub mod proc;
pub mod runtime;
pub mod script;

// Re-export commonly used items
pub use data::{ConfigFile, DataTable};
pub use error::{Result, SqwError};
pub use index::KdTree;
pub use model::{
    construct_sqw, get_sqw_names, load_sqw_plugins, register_sqw, unload_sqw_plugins, Dispersion,
    FitVariable, SqwModel, Variable,
};
#[cfg(target_os = "linux")]
pub use proc::{construct_sqw_isolated, SqwProc};
pub use runtime::{BatchEvaluator, RuntimeConfig};

// Re-export FFI types for cbindgen
pub use ffi::model::*;
pub use ffi::types::*;
