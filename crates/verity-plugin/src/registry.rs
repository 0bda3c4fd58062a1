//! Plugin registry
//!
//! One registry object owns every plugin known to a process. Entries are
//! keyed by `(kind, id)` and kept in registration order, which is the order
//! serializers and factories are tried during resolution.
//!
//! Discovery walks a directory tree for `plugin.toml` manifests. Algorithms
//! missing locally can be installed on demand through an
//! [`AlgorithmDirectory`].

use crate::builtin::{core_plugins, BuiltinTable};
use crate::capability::{Artifact, Capability, Data, ManagedModel, ModelSource, PluginKind};
use crate::descriptor::{PluginDescriptor, PluginMetadata, PluginOrigin};
use crate::directory::AlgorithmDirectory;
use crate::error::{RegistryError, RegistryResult};
use crate::loader::load_library;
use crate::manifest::{ManifestSource, PluginManifest, MANIFEST_FILE};
use indexmap::IndexMap;
use libloading::Library;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

type PluginKey = (PluginKind, String);

/// A resolved dataset instance
pub struct ResolvedData {
    pub instance: Box<dyn Data>,
    /// Data plugin that built the instance
    pub plugin_id: String,
    /// Serializer that read the file
    pub serializer_id: String,
}

/// A resolved model instance
pub struct ResolvedModel {
    /// Cleaned up when dropped
    pub instance: ManagedModel,
    pub plugin_id: String,
    /// `None` for API models, nothing was deserialized
    pub serializer_id: Option<String>,
}

/// How a model is provided
#[derive(Debug, Clone)]
pub enum ModelRequest<'a> {
    Upload(&'a Path),
    Api { schema: Value, config: Value },
}

/// Registry of discovered plugins
pub struct Registry {
    plugins: Mutex<IndexMap<PluginKey, Arc<PluginDescriptor>>>,
    builtins: BuiltinTable,
    /// Loaded libraries are never unloaded, capabilities may still be in use
    libraries: Mutex<Vec<Arc<Library>>>,
    directory: Option<Arc<dyn AlgorithmDirectory>>,
}

impl Registry {
    /// Empty registry resolving `builtin` manifests against `builtins`
    pub fn new(builtins: BuiltinTable) -> Self {
        Self {
            plugins: Mutex::new(IndexMap::new()),
            builtins,
            libraries: Mutex::new(Vec::new()),
            directory: None,
        }
    }

    /// Registry holding the core plugins, in core order
    pub fn with_core_plugins() -> Self {
        let registry = Self::new(BuiltinTable::core());
        for (name, capability) in core_plugins() {
            let mut descriptor = PluginDescriptor::new(name, capability, PluginMetadata::named(name));
            descriptor.origin = PluginOrigin::Builtin(name.to_string());
            registry.insert(descriptor);
        }
        registry
    }

    /// Use `directory` to install algorithms that are missing locally
    pub fn with_directory(mut self, directory: Arc<dyn AlgorithmDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    fn map(&self) -> MutexGuard<'_, IndexMap<PluginKey, Arc<PluginDescriptor>>> {
        self.plugins.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a capability. Returns false if `(kind, id)` is already taken,
    /// the existing entry is kept.
    pub fn register(
        &self,
        id: impl Into<String>,
        capability: Capability,
        metadata: PluginMetadata,
    ) -> bool {
        self.insert(PluginDescriptor::new(id, capability, metadata))
    }

    fn insert(&self, descriptor: PluginDescriptor) -> bool {
        let key = (descriptor.kind, descriptor.id.clone());
        let mut plugins = self.map();
        if plugins.contains_key(&key) {
            warn!(kind = %descriptor.kind, id = %descriptor.id, "Duplicate plugin ignored");
            return false;
        }
        debug!(kind = %descriptor.kind, id = %descriptor.id, "Registered plugin");
        plugins.insert(key, Arc::new(descriptor));
        true
    }

    pub fn exists(&self, kind: PluginKind, id: &str) -> bool {
        self.map().contains_key(&(kind, id.to_string()))
    }

    /// Remove a plugin, keeping the order of the rest. Returns whether
    /// anything was removed.
    pub fn remove(&self, kind: PluginKind, id: &str) -> bool {
        let removed = self.map().shift_remove(&(kind, id.to_string())).is_some();
        if removed {
            info!(kind = %kind, id = %id, "Removed plugin");
        }
        removed
    }

    pub fn get(&self, kind: PluginKind, id: &str) -> Option<Arc<PluginDescriptor>> {
        self.map().get(&(kind, id.to_string())).cloned()
    }

    /// Snapshot of every plugin of `kind`, in registration order
    pub fn plugins_of(&self, kind: PluginKind) -> Vec<Arc<PluginDescriptor>> {
        self.map()
            .values()
            .filter(|descriptor| descriptor.kind == kind)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }

    /// One `kind/id` line per plugin, for startup logging
    pub fn plugin_summary(&self) -> Vec<String> {
        self.map()
            .values()
            .map(|descriptor| {
                let version = if descriptor.metadata.version.is_empty() {
                    String::new()
                } else {
                    format!(" {}", descriptor.metadata.version)
                };
                format!("{}/{}{}", descriptor.kind, descriptor.id, version)
            })
            .collect()
    }

    /// Discover manifests under `root` and register them.
    ///
    /// With a `tag`, every discovered plugin is registered under the tag
    /// instead of its declared id. Returns the number of plugins registered.
    pub fn discover(&self, root: &Path, tag: Option<&str>) -> RegistryResult<usize> {
        if !root.is_dir() {
            return Err(RegistryError::Discovery {
                path: root.to_path_buf(),
                reason: "not a directory".to_string(),
            });
        }

        let mut registered = 0;
        let walker = WalkDir::new(root)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(root = %root.display(), error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() || entry.file_name() != MANIFEST_FILE {
                continue;
            }
            match self.register_manifest(entry.path(), tag) {
                Ok(true) => registered += 1,
                Ok(false) => {}
                Err(e) => warn!(manifest = %entry.path().display(), error = %e, "Skipping plugin"),
            }
        }

        info!(root = %root.display(), registered, "Plugin discovery finished");
        Ok(registered)
    }

    fn register_manifest(&self, path: &Path, tag: Option<&str>) -> RegistryResult<bool> {
        let manifest = PluginManifest::from_file(path)?;
        let base = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let manifest_error = |reason: String| RegistryError::Manifest {
            path: path.to_path_buf(),
            reason,
        };

        let kind = manifest
            .kind()
            .ok_or_else(|| manifest_error(format!("unknown plugin kind '{}'", manifest.kind)))?;
        let source = manifest.source(&base).map_err(manifest_error)?;
        let metadata = manifest.metadata(&base)?;

        let (capability, origin) = match source {
            ManifestSource::Builtin(name) => {
                let capability = self
                    .builtins
                    .get(&name)
                    .ok_or_else(|| manifest_error(format!("unknown builtin '{}'", name)))?;
                (capability, PluginOrigin::Builtin(name))
            }
            ManifestSource::Library(library_path) => {
                let capability = self.load_capability(&library_path, kind, &manifest.id)?;
                (capability, PluginOrigin::Library(library_path))
            }
        };

        if capability.kind() != kind {
            return Err(manifest_error(format!(
                "declared kind {} but provides {}",
                kind,
                capability.kind()
            )));
        }

        let id = tag.unwrap_or(&manifest.id).to_string();
        Ok(self.insert(PluginDescriptor {
            kind,
            id,
            capability,
            metadata,
            base_path: Some(base),
            origin,
        }))
    }

    fn load_capability(&self, path: &Path, kind: PluginKind, id: &str) -> RegistryResult<Capability> {
        let loaded = load_library(path)?;
        let capability = loaded
            .capabilities
            .into_iter()
            .find(|(registered_id, capability)| registered_id == id && capability.kind() == kind)
            .map(|(_, capability)| capability)
            .ok_or_else(|| RegistryError::Library {
                path: path.to_path_buf(),
                reason: format!("library does not register {} plugin '{}'", kind, id),
            })?;
        self.libraries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(loaded.library);
        Ok(capability)
    }

    /// Try every serializer in registration order, first success wins
    pub fn deserialize(&self, path: &Path) -> RegistryResult<Artifact> {
        let mut failures = Vec::new();
        for descriptor in self.plugins_of(PluginKind::Serializer) {
            let Capability::Serializer(serializer) = &descriptor.capability else {
                continue;
            };
            match serializer.deserialize(path) {
                Ok(content) => return Ok(Artifact::new(descriptor.id.clone(), content)),
                Err(e) => failures.push(format!("{}: {}", descriptor.id, e)),
            }
        }
        let reason = if failures.is_empty() {
            "no serializer registered".to_string()
        } else {
            failures.join("; ")
        };
        Err(RegistryError::Deserialize {
            path: path.to_path_buf(),
            reason,
        })
    }

    /// Deserialize a dataset and offer it to every data plugin in order
    pub fn resolve_data(&self, path: &Path) -> RegistryResult<ResolvedData> {
        let artifact = self.deserialize(path)?;
        let serializer_id = artifact.serializer().to_string();

        for descriptor in self.plugins_of(PluginKind::Data) {
            let Capability::Data(factory) = &descriptor.capability else {
                continue;
            };
            if factory.accepts(&artifact) {
                let instance = factory.create(artifact).map_err(|source| RegistryError::Create {
                    kind: PluginKind::Data,
                    id: descriptor.id.clone(),
                    source,
                })?;
                return Ok(ResolvedData {
                    instance,
                    plugin_id: descriptor.id.clone(),
                    serializer_id,
                });
            }
        }

        Err(RegistryError::Unsupported {
            kind: PluginKind::Data,
            path: path.to_path_buf(),
        })
    }

    /// Build a model source and offer it to every model plugin in order
    pub fn resolve_model(&self, request: ModelRequest<'_>) -> RegistryResult<ResolvedModel> {
        let (source, serializer_id, path) = match request {
            ModelRequest::Upload(path) => {
                let artifact = self.deserialize(path)?;
                let serializer_id = artifact.serializer().to_string();
                (
                    ModelSource::Artifact(artifact),
                    Some(serializer_id),
                    path.to_path_buf(),
                )
            }
            ModelRequest::Api { schema, config } => {
                (ModelSource::Api { schema, config }, None, PathBuf::from("<api>"))
            }
        };

        for descriptor in self.plugins_of(PluginKind::Model) {
            let Capability::Model(factory) = &descriptor.capability else {
                continue;
            };
            if factory.accepts(&source) {
                let instance = factory.create(source).map_err(|source| RegistryError::Create {
                    kind: PluginKind::Model,
                    id: descriptor.id.clone(),
                    source,
                })?;
                return Ok(ResolvedModel {
                    instance: ManagedModel::new(instance),
                    plugin_id: descriptor.id.clone(),
                    serializer_id,
                });
            }
        }

        Err(RegistryError::Unsupported {
            kind: PluginKind::Model,
            path,
        })
    }

    /// Local algorithm lookup, exact id match
    pub fn algorithm(&self, id: &str) -> Option<Arc<PluginDescriptor>> {
        self.get(PluginKind::Algorithm, id)
    }

    /// Local lookup, then one install attempt and one retry
    pub async fn resolve_algorithm(&self, id: &str) -> RegistryResult<Arc<PluginDescriptor>> {
        if let Some(descriptor) = self.algorithm(id) {
            return Ok(descriptor);
        }

        debug!(algorithm_id = %id, "Algorithm not registered, trying remote install");
        self.install_algorithm(id).await?;
        self.algorithm(id)
            .ok_or_else(|| RegistryError::not_found(PluginKind::Algorithm, id))
    }

    /// Declared metadata of an algorithm, installing it if needed
    pub async fn algorithm_metadata(&self, id: &str) -> RegistryResult<PluginMetadata> {
        Ok(self.resolve_algorithm(id).await?.metadata.clone())
    }

    /// Look the algorithm up in the directory and discover its install path
    /// under its id. Returns whether anything was registered.
    pub async fn install_algorithm(&self, id: &str) -> RegistryResult<bool> {
        let Some(directory) = &self.directory else {
            return Ok(false);
        };
        let Some(path) = directory.locate(id).await? else {
            info!(algorithm_id = %id, "Algorithm has no install location");
            return Ok(false);
        };

        let registered = self.discover(&path, Some(id))?;
        info!(algorithm_id = %id, path = %path.display(), registered, "Installed algorithm");
        Ok(registered > 0)
    }

    /// Remove the algorithm and install it again
    pub async fn reinstall_algorithm(&self, id: &str) -> RegistryResult<bool> {
        self.remove(PluginKind::Algorithm, id);
        self.install_algorithm(id).await
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_core_plugins()
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with('.') || name.starts_with("__"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::TabularData;
    use crate::capability::{Algorithm, AlgorithmContext, AlgorithmFactory, DataFactory};
    use crate::directory::StaticDirectory;
    use crate::error::PluginResult;
    use crate::output::OutputValue;
    use serde_json::json;
    use std::fs;

    /// Accepts every JSON artifact, remembering its own name
    struct NamedData(&'static str);

    struct NamedInstance(&'static str);

    impl Data for NamedInstance {
        fn format(&self) -> &str {
            self.0
        }
        fn setup(&mut self) -> PluginResult<()> {
            Ok(())
        }
        fn validate(&self) -> PluginResult<()> {
            Ok(())
        }
        fn labels(&self) -> IndexMap<String, String> {
            IndexMap::new()
        }
        fn keep_ground_truth(&mut self, _: &str) -> bool {
            false
        }
        fn remove_ground_truth(&mut self, _: &str) {}
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    impl DataFactory for NamedData {
        fn accepts(&self, artifact: &Artifact) -> bool {
            artifact.downcast_ref::<Value>().is_some()
        }
        fn create(&self, _: Artifact) -> PluginResult<Box<dyn Data>> {
            Ok(Box::new(NamedInstance(self.0)))
        }
    }

    struct Constant;

    impl Algorithm for Constant {
        fn generate(&mut self) -> PluginResult<OutputValue> {
            Ok(OutputValue::map([("score", OutputValue::Float(1.0))]))
        }
    }

    impl AlgorithmFactory for Constant {
        fn create(&self, _: AlgorithmContext) -> PluginResult<Box<dyn Algorithm>> {
            Ok(Box::new(Constant))
        }
    }

    fn serializers_only() -> Registry {
        let registry = Registry::new(BuiltinTable::new());
        for (name, capability) in core_plugins() {
            if capability.kind() == PluginKind::Serializer {
                registry.register(name, capability, PluginMetadata::named(name));
            }
        }
        registry
    }

    fn json_file(dir: &Path, name: &str, value: Value) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, value.to_string()).unwrap();
        path
    }

    fn builtins_with_constant() -> BuiltinTable {
        let mut builtins = BuiltinTable::core();
        builtins.insert("constant", Capability::Algorithm(Arc::new(Constant)));
        builtins
    }

    #[test]
    fn test_first_registered_data_plugin_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = json_file(dir.path(), "d.json", json!([{"a": 1}]));

        let registry = serializers_only();
        registry.register("first", Capability::Data(Arc::new(NamedData("first"))), PluginMetadata::named("first"));
        registry.register("second", Capability::Data(Arc::new(NamedData("second"))), PluginMetadata::named("second"));
        let resolved = registry.resolve_data(&path).unwrap();
        assert_eq!(resolved.plugin_id, "first");
        assert_eq!(resolved.instance.format(), "first");
        assert_eq!(resolved.serializer_id, "json");

        let reversed = serializers_only();
        reversed.register("second", Capability::Data(Arc::new(NamedData("second"))), PluginMetadata::named("second"));
        reversed.register("first", Capability::Data(Arc::new(NamedData("first"))), PluginMetadata::named("first"));
        assert_eq!(reversed.resolve_data(&path).unwrap().plugin_id, "second");
    }

    #[test]
    fn test_duplicate_keeps_first() {
        let registry = Registry::new(BuiltinTable::new());
        assert!(registry.register("d", Capability::Data(Arc::new(NamedData("one"))), PluginMetadata::named("d")));
        assert!(!registry.register("d", Capability::Data(Arc::new(NamedData("two"))), PluginMetadata::named("d")));
        assert_eq!(registry.len(), 1);

        let descriptor = registry.get(PluginKind::Data, "d").unwrap();
        let Capability::Data(factory) = &descriptor.capability else {
            panic!("expected data capability");
        };
        let artifact = Artifact::new("json", Box::new(json!(null)));
        assert_eq!(factory.create(artifact).unwrap().format(), "one");
    }

    #[test]
    fn test_core_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let table = json_file(dir.path(), "t.json", json!({"columns": ["x"], "rows": [[1]]}));
        let scalar = json_file(dir.path(), "s.json", json!(42));
        let packed = dir.path().join("t.bin");
        fs::write(&packed, rmp_serde::to_vec(&json!([{"x": 1}])).unwrap()).unwrap();

        let registry = Registry::with_core_plugins();
        let resolved = registry.resolve_data(&table).unwrap();
        assert_eq!(resolved.plugin_id, "tabular");
        assert!(resolved.instance.as_any().downcast_ref::<TabularData>().is_some());

        assert_eq!(registry.resolve_data(&packed).unwrap().serializer_id, "msgpack");

        assert!(matches!(
            registry.resolve_data(&scalar),
            Err(RegistryError::Unsupported { kind: PluginKind::Data, .. })
        ));
        assert!(matches!(
            registry.resolve_data(&dir.path().join("missing.json")),
            Err(RegistryError::Deserialize { .. })
        ));

        let model = registry
            .resolve_model(ModelRequest::Api { schema: json!({}), config: json!({}) })
            .unwrap();
        assert_eq!(model.plugin_id, "api");
        assert!(model.serializer_id.is_none());

        assert!(matches!(
            registry.resolve_model(ModelRequest::Upload(&table)),
            Err(RegistryError::Unsupported { kind: PluginKind::Model, .. })
        ));
    }

    #[test]
    fn test_discover_manifests() {
        let root = tempfile::tempdir().unwrap();
        let write = |dir: &str, manifest: &str| {
            let path = root.path().join(dir);
            fs::create_dir_all(&path).unwrap();
            fs::write(path.join(MANIFEST_FILE), manifest).unwrap();
        };
        write("algo_a", "kind = \"algorithm\"\nid = \"algoA\"\nbuiltin = \"constant\"\nrequires_ground_truth = true\nversion = \"1.0\"");
        write("nested/algo_b", "kind = \"algorithm\"\nid = \"algoB\"\nbuiltin = \"constant\"");
        write("__pycache__/algo_c", "kind = \"algorithm\"\nid = \"algoC\"\nbuiltin = \"constant\"");
        write(".hidden", "kind = \"algorithm\"\nid = \"algoD\"\nbuiltin = \"constant\"");
        write("unknown_kind", "kind = \"widget\"\nid = \"w\"\nbuiltin = \"constant\"");
        write("wrong_kind", "kind = \"data\"\nid = \"w\"\nbuiltin = \"constant\"");
        write("missing_builtin", "kind = \"algorithm\"\nid = \"m\"\nbuiltin = \"nope\"");
        write("broken", "kind = ");
        write("duplicate", "kind = \"algorithm\"\nid = \"algoA\"\nbuiltin = \"constant\"");

        let registry = Registry::new(builtins_with_constant());
        assert_eq!(registry.discover(root.path(), None).unwrap(), 2);

        let algo_a = registry.algorithm("algoA").unwrap();
        assert!(algo_a.metadata.requires_ground_truth);
        assert_eq!(algo_a.base_path.as_deref(), Some(root.path().join("algo_a").as_path()));
        assert_eq!(algo_a.origin, PluginOrigin::Builtin("constant".into()));
        assert!(registry.algorithm("algoB").is_some());
        assert!(registry.algorithm("algoC").is_none());
        assert!(registry.algorithm("algoD").is_none());
        assert_eq!(registry.plugin_summary(), vec!["algorithm/algoA 1.0", "algorithm/algoB"]);

        assert!(matches!(
            registry.discover(&root.path().join("absent"), None),
            Err(RegistryError::Discovery { .. })
        ));
    }

    #[test]
    fn test_discover_with_tag() {
        let root = tempfile::tempdir().unwrap();
        fs::write(
            root.path().join(MANIFEST_FILE),
            "kind = \"algorithm\"\nid = \"declared\"\nbuiltin = \"constant\"",
        )
        .unwrap();

        let registry = Registry::new(builtins_with_constant());
        assert_eq!(registry.discover(root.path(), Some("requested")).unwrap(), 1);
        assert!(registry.exists(PluginKind::Algorithm, "requested"));
        assert!(!registry.exists(PluginKind::Algorithm, "declared"));
    }

    #[tokio::test]
    async fn test_remote_install() {
        let install = tempfile::tempdir().unwrap();
        fs::write(
            install.path().join(MANIFEST_FILE),
            "kind = \"algorithm\"\nid = \"remote\"\nbuiltin = \"constant\"",
        )
        .unwrap();
        let directory = StaticDirectory::new().with("remote", install.path());

        let registry = Registry::new(builtins_with_constant()).with_directory(Arc::new(directory));
        assert!(registry.algorithm("remote").is_none());
        assert_eq!(registry.resolve_algorithm("remote").await.unwrap().id, "remote");

        assert!(matches!(
            registry.resolve_algorithm("unknown").await,
            Err(RegistryError::NotFound { kind: PluginKind::Algorithm, .. })
        ));

        assert!(registry.remove(PluginKind::Algorithm, "remote"));
        assert!(!registry.remove(PluginKind::Algorithm, "remote"));
        assert!(registry.reinstall_algorithm("remote").await.unwrap());
        assert!(registry.exists(PluginKind::Algorithm, "remote"));
    }

    #[tokio::test]
    async fn test_no_directory() {
        let registry = Registry::new(builtins_with_constant());
        assert!(!registry.install_algorithm("x").await.unwrap());
        assert!(registry.algorithm_metadata("x").await.is_err());

        registry.register("x", Capability::Algorithm(Arc::new(Constant)), PluginMetadata::named("x"));
        assert_eq!(registry.algorithm_metadata("x").await.unwrap().name, "x");
    }
}
