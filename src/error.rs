//! Error type shared by the model layer.

use std::path::PathBuf;

/// Errors raised while building or talking to a scattering model.
///
/// Most public model operations do not return these directly: a model that
/// fails to build logs the error and marks itself invalid. They surface from
/// the loaders, the process proxy plumbing, and the plugin loader.
#[derive(Debug, thiserror::Error)]
pub enum SqwError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("line {line}: {msg}")]
    Parse { line: usize, msg: String },

    #[error("{0}")]
    ColumnCount(String),

    #[error("malformed variable entry: {0}")]
    Format(String),

    #[error("ipc: {0}")]
    Ipc(String),

    #[error("fork failed: {0}")]
    Fork(String),

    #[error("plugin {path}: {msg}")]
    Plugin { path: PathBuf, msg: String },

    #[error("plugin {ident} built for host version {found}, this host is {expected}")]
    VersionMismatch {
        ident: String,
        found: String,
        expected: String,
    },

    #[error("script: {0}")]
    Script(String),

    #[error("thread pool: {0}")]
    ThreadPool(String),
}

impl SqwError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SqwError::Io {
            path: path.into(),
            source,
        }
    }

    /// Build an IPC error from the current `errno`.
    pub(crate) fn last_os(what: &str) -> Self {
        SqwError::Ipc(format!("{}: {}", what, std::io::Error::last_os_error()))
    }
}

pub type Result<T> = std::result::Result<T, SqwError>;
