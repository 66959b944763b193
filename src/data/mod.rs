//! Input files read by the models.

pub mod config;
pub mod table;

pub use config::{ConfigEntry, ConfigFile};
pub use table::DataTable;
