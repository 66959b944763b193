//! Process isolation for models that are not safe to run in-process.

pub mod ipc;
pub mod proxy;

pub use proxy::{MsgType, ProcMsg, SqwProc};

use crate::model::registry::registry;
use crate::model::SqwModel;
use std::sync::PoisonError;

/// Like [`crate::model::construct_sqw`], but the model is built and run in
/// a child process.
pub fn construct_sqw_isolated(ident: &str, cfg: &str) -> Option<Box<dyn SqwModel>> {
    let entry = registry().read().unwrap_or_else(PoisonError::into_inner).get(ident);
    let Some(entry) = entry else {
        tracing::error!("No S(q,w) model of name \"{}\" found.", ident);
        return None;
    };
    Some(Box::new(SqwProc::spawn(cfg, move |cfg| entry.construct(cfg))))
}
