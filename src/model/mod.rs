//! S(q,w) models and the machinery shared between them.

pub mod elastic;
pub mod kd;
pub mod lineshape;
pub mod magnon;
pub mod params;
pub mod phonon;
pub mod phonon_single;
pub mod plugin;
pub mod registry;
pub mod table1d;
pub mod traits;
pub mod vars;

pub use elastic::ElasticModel;
pub use kd::KdModel;
pub use magnon::MagnonModel;
pub use params::{load_sqw_params, save_sqw_params, PropertyStore};
pub use phonon::PhononModel;
pub use phonon_single::PhononSingleModel;
pub use plugin::{load_sqw_plugins, unload_sqw_plugins, PluginModel};
pub use registry::{construct_sqw, get_sqw_names, register_sqw, ModelEntry, ModelRegistry};
pub use table1d::Table1dModel;
pub use traits::{Dispersion, ModelCore, SqwModel};
pub use vars::{FieldKind, FieldTable, FitVariable, Variable};

use crate::data::ConfigFile;
use std::path::Path;

/// Overlay a model's defaults with the entries of a config file.
///
/// An empty path keeps the defaults. Unreadable files and unknown keys are
/// logged; neither invalidates the model.
pub(crate) fn apply_config<P: FieldTable>(params: &mut P, path: &Path, model: &str) {
    if path.as_os_str().is_empty() {
        return;
    }
    let cfg = match ConfigFile::load(path) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!("{}: {}; using defaults", model, e);
            return;
        }
    };

    tracing::info!("{}: reading parameters from {}", model, path.display());
    for entry in cfg.entries() {
        if params.kind(&entry.key).is_none() {
            tracing::warn!("{}: unknown key \"{}\" in line {}", model, entry.key, entry.line);
        }
    }
    params.apply(&cfg.to_vars());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::magnon::MagnonParams;
    use std::io::Write;

    #[test]
    fn test_apply_config_overlays_defaults() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "# magnon").unwrap();
        writeln!(f, "D = 3.5").unwrap();
        writeln!(f, "G = 2, 0, 0").unwrap();
        writeln!(f, "bogus = 1").unwrap();

        let mut p = MagnonParams::default();
        apply_config(&mut p, f.path(), "magnon");
        assert_eq!(p.d, 3.5);
        assert_eq!(p.g.x, 2.0);
        assert_eq!(p.t, MagnonParams::default().t);
    }

    #[test]
    fn test_apply_config_missing_file() {
        let mut p = MagnonParams::default();
        apply_config(&mut p, Path::new("/nonexistent/magnon.cfg"), "magnon");
        assert_eq!(p.d, 1.0);
    }
}
