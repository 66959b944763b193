//! Model registry: identifiers, descriptions and constructors.

use super::elastic::ElasticModel;
use super::kd::KdModel;
use super::magnon::MagnonModel;
use super::phonon::PhononModel;
use super::phonon_single::PhononSingleModel;
use super::table1d::Table1dModel;
use super::traits::SqwModel;
use crate::script::julia::JuliaModel;
use libloading::Library;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

/// Builds a model from a config or data file path.
pub type SqwCtor = Arc<dyn Fn(&str) -> Box<dyn SqwModel> + Send + Sync>;

/// One constructible model kind.
#[derive(Clone)]
pub struct ModelEntry {
    pub ident: String,
    pub description: String,
    ctor: SqwCtor,
    /// Set for plugin models; keeps the library mapped.
    library: Option<Arc<Library>>,
}

impl ModelEntry {
    pub fn new<F>(ident: impl Into<String>, description: impl Into<String>, ctor: F) -> Self
    where
        F: Fn(&str) -> Box<dyn SqwModel> + Send + Sync + 'static,
    {
        Self {
            ident: ident.into(),
            description: description.into(),
            ctor: Arc::new(ctor),
            library: None,
        }
    }

    pub fn with_library(mut self, library: Arc<Library>) -> Self {
        self.library = Some(library);
        self
    }

    pub fn is_plugin(&self) -> bool {
        self.library.is_some()
    }

    pub fn construct(&self, cfg: &str) -> Box<dyn SqwModel> {
        (self.ctor)(cfg)
    }
}

impl std::fmt::Debug for ModelEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelEntry")
            .field("ident", &self.ident)
            .field("description", &self.description)
            .field("plugin", &self.is_plugin())
            .finish()
    }
}

/// Registry of available models.
pub struct ModelRegistry {
    entries: HashMap<String, ModelEntry>,
    plugins_loaded: bool,
}

impl ModelRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            plugins_loaded: false,
        }
    }

    /// Create a registry with the built-in models registered.
    pub fn new_with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("kd", "Table", |cfg| Box::new(KdModel::from_file(cfg)));
        registry.register("table_1d", "Table (1D)", |cfg| Box::new(Table1dModel::from_file(cfg)));
        registry.register("phonon", "Simple Phonon Model", |cfg| Box::new(PhononModel::from_file(cfg)));
        registry.register("phonon_single", "Simple Phonon Model (Single Branch)", |cfg| {
            Box::new(PhononSingleModel::from_file(cfg))
        });
        registry.register("magnon", "Simple Magnon Model", |cfg| Box::new(MagnonModel::from_file(cfg)));
        registry.register("elastic", "Elastic Model", |cfg| Box::new(ElasticModel::from_file(cfg)));
        registry.register("jl", "Julia Model", |cfg| Box::new(JuliaModel::from_file(cfg)));

        #[cfg(all(feature = "python", target_os = "linux"))]
        registry.register("py", "Python Model", |cfg| {
            Box::new(crate::proc::SqwProc::spawn(cfg, |cfg| {
                Box::new(crate::script::python::PyModel::from_file(cfg))
            }))
        });
        #[cfg(all(feature = "python", not(target_os = "linux")))]
        registry.register("py", "Python Model", |cfg| {
            Box::new(crate::script::python::PyModel::from_file(cfg))
        });

        registry
    }

    /// Register a constructor, replacing any entry with the same identifier.
    pub fn register<F>(&mut self, ident: &str, description: &str, ctor: F)
    where
        F: Fn(&str) -> Box<dyn SqwModel> + Send + Sync + 'static,
    {
        self.register_entry(ModelEntry::new(ident, description, ctor));
    }

    pub fn register_entry(&mut self, entry: ModelEntry) {
        if let Some(old) = self.entries.insert(entry.ident.clone(), entry) {
            tracing::debug!("replaced S(q,w) model \"{}\"", old.ident);
        }
    }

    /// Get an entry by identifier.
    pub fn get(&self, ident: &str) -> Option<ModelEntry> {
        self.entries.get(ident).cloned()
    }

    /// Check if a model is registered.
    pub fn contains(&self, ident: &str) -> bool {
        self.entries.contains_key(ident)
    }

    /// `(identifier, description)` pairs ordered by description.
    pub fn names(&self) -> Vec<(String, String)> {
        let mut names: Vec<_> = self
            .entries
            .values()
            .map(|e| (e.ident.clone(), e.description.clone()))
            .collect();
        names.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        names
    }

    pub fn construct(&self, ident: &str, cfg: &str) -> Option<Box<dyn SqwModel>> {
        self.entries.get(ident).map(|e| e.construct(cfg))
    }

    /// Remove a model.
    pub fn remove(&mut self, ident: &str) -> Option<ModelEntry> {
        self.entries.remove(ident)
    }

    /// Drop every plugin entry, returning how many there were.
    pub fn remove_plugins(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_plugin());
        before - self.entries.len()
    }

    pub fn plugins_loaded(&self) -> bool {
        self.plugins_loaded
    }

    pub fn set_plugins_loaded(&mut self, loaded: bool) {
        self.plugins_loaded = loaded;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The process-wide registry, built-ins registered on first use.
pub(crate) fn registry() -> &'static RwLock<ModelRegistry> {
    static REGISTRY: OnceLock<RwLock<ModelRegistry>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(ModelRegistry::new_with_defaults()))
}

/// `(identifier, description)` of every available model, ordered by
/// description.
pub fn get_sqw_names() -> Vec<(String, String)> {
    registry().read().unwrap_or_else(PoisonError::into_inner).names()
}

/// Build the model registered as `ident` from the file `cfg`.
///
/// Returns `None` for an unknown identifier. A known model that fails to
/// build is still returned; check [`SqwModel::is_ok`].
pub fn construct_sqw(ident: &str, cfg: &str) -> Option<Box<dyn SqwModel>> {
    // Constructors may be slow or fork; run them without holding the lock.
    let entry = registry().read().unwrap_or_else(PoisonError::into_inner).get(ident);
    match entry {
        Some(entry) => Some(entry.construct(cfg)),
        None => {
            tracing::error!("No S(q,w) model of name \"{}\" found.", ident);
            None
        }
    }
}

/// Add a model kind to the process-wide registry.
pub fn register_sqw<F>(ident: &str, description: &str, ctor: F)
where
    F: Fn(&str) -> Box<dyn SqwModel> + Send + Sync + 'static,
{
    registry()
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .register(ident, description, ctor);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_defaults() {
        let mut registry = ModelRegistry::new_with_defaults();

        for ident in ["kd", "table_1d", "phonon", "phonon_single", "magnon", "elastic", "jl"] {
            assert!(registry.contains(ident), "{}", ident);
        }
        assert!(!registry.contains("nope"));
        assert_eq!(registry.remove_plugins(), 0);
    }

    #[test]
    fn test_names_sorted_by_description() {
        let registry = ModelRegistry::new_with_defaults();
        let names = registry.names();
        assert_eq!(names.len(), registry.len());
        assert!(names.windows(2).all(|w| w[0].1 <= w[1].1));
        assert_eq!(names[0], ("elastic".to_string(), "Elastic Model".to_string()));
    }

    #[test]
    fn test_construct_unknown() {
        let registry = ModelRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.construct("elastic", "").is_none());
        assert!(construct_sqw("definitely_not_a_model", "").is_none());
    }

    #[test]
    fn test_construct_builtin() {
        let m = construct_sqw("elastic", "").unwrap();
        assert!(m.is_ok());
        assert_eq!(m.evaluate(1.0, 1.0, 0.0, 0.0), 1.0);
    }

    #[test]
    fn test_register_and_remove() {
        let mut registry = ModelRegistry::new();
        registry.register("auto", "Auto Elastic", |_| Box::new(ElasticModel::auto()));
        assert_eq!(registry.get("auto").unwrap().description, "Auto Elastic");

        registry.register("auto", "Replaced", |_| Box::new(ElasticModel::auto()));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("auto").unwrap().description, "Replaced");

        assert!(registry.remove("auto").is_some());
        assert!(registry.get("auto").is_none());
    }

    #[test]
    fn test_register_global() {
        register_sqw("test_global_elastic", "Zz Test Elastic", |_| Box::new(ElasticModel::auto()));
        let names = get_sqw_names();
        assert!(names.iter().any(|(ident, _)| ident == "test_global_elastic"));
        assert!(construct_sqw("test_global_elastic", "").unwrap().is_ok());
    }
}
