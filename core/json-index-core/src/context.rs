use crate::config::ResourceConfig;
use crate::error::Result;
use crate::indexer::{IndexSettings, Indexer};
use crate::loader::collect_files;
use crate::registry::{AlgorithmFactories, ResolverFactories, ResourceRegistry};
use crate::resource::{Algorithm, ContentResolver, Resource};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

const RESOURCE_CONFIG_PATTERN: &str = "*.j2l";

/// Wires resource definitions to the algorithm and resolver implementations
/// they name, and opens indexers over the resulting registry.
pub struct Context {
    resources: Arc<ResourceRegistry>,
    algorithms: AlgorithmFactories,
    resolvers: ResolverFactories,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    pub fn new() -> Self {
        Self {
            resources: Arc::new(ResourceRegistry::new()),
            algorithms: AlgorithmFactories::algorithms(),
            resolvers: ResolverFactories::resolvers(),
        }
    }

    pub fn register_algorithm<F>(&self, key: impl Into<String>, constructor: F)
    where
        F: Fn() -> Arc<dyn Algorithm> + Send + Sync + 'static,
    {
        self.algorithms.register(key, constructor);
    }

    pub fn register_resolver<F>(&self, key: impl Into<String>, constructor: F)
    where
        F: Fn() -> Arc<dyn ContentResolver> + Send + Sync + 'static,
    {
        self.resolvers.register(key, constructor);
    }

    pub fn register_resource(&self, resource: Resource) -> Arc<Resource> {
        self.resources.register_resource(resource)
    }

    pub fn register_config(&self, config: &ResourceConfig) -> Result<Arc<Resource>> {
        let resource = config.build(&self.algorithms, &self.resolvers)?;
        Ok(self.register_resource(resource))
    }

    /// Register every `.j2l` definition found at `path` (a file or a
    /// directory searched recursively). Stops at the first invalid file.
    pub fn register_resources(&self, path: &Path) -> Result<Vec<Arc<Resource>>> {
        let mut registered = Vec::new();
        for file in collect_files(path, RESOURCE_CONFIG_PATTERN)? {
            let resource = self.register_config(&ResourceConfig::read(&file)?)?;
            info!(resource = resource.name(), file = %file.display(), "registered resource");
            registered.push(resource);
        }
        Ok(registered)
    }

    pub fn resource(&self, name: &str) -> Option<Arc<Resource>> {
        self.resources.get(name)
    }

    pub fn resources(&self) -> &Arc<ResourceRegistry> {
        &self.resources
    }

    pub fn remove_resource(&self, name: &str) -> Option<Arc<Resource>> {
        self.resources.remove(name)
    }

    /// Open the on-disk index for everything registered so far. Resources
    /// registered afterwards need their fields to already exist in the index.
    pub fn open_indexer(&self, path: &Path, settings: IndexSettings) -> Result<Indexer> {
        Indexer::open(path, settings, Arc::clone(&self.resources))
    }

    pub fn open_in_ram(&self, settings: IndexSettings) -> Result<Indexer> {
        Indexer::open_in_ram(settings, Arc::clone(&self.resources))
    }
}

#[cfg(test)]
mod tests {
    use super::Context;
    use crate::algorithm::JsonAlgorithm;
    use crate::error::Error;
    use crate::indexer::IndexSettings;
    use crate::loader::load_remote;
    use crate::query::Scope;
    use crate::resource::tests::StaticResolver;
    use crate::resource::{Algorithm, ContentResolver};
    use serde_json::Value;
    use std::fs;
    use std::sync::Arc;
    use tempfile::tempdir;

    const PATIENT: &str = "\
resourceName = Patient
resourceObject = Patient
rootNode = $.results
algorithm.class = json
resolver.class = static
uniqueField = uuid
uuid = $.uuid
name = $.person.display
";

    const OBS: &str = "\
resourceName = Obs
resourceObject = Observation
rootNode = $
algorithm.class = json
resolver.class = static
concept = $.concept.display
";

    fn context() -> Context {
        let context = Context::new();
        context.register_algorithm("json", || Arc::new(JsonAlgorithm) as Arc<dyn Algorithm>);
        context.register_resolver("static", || {
            Arc::new(StaticResolver(
                r#"{"results": [{"uuid": "p-1", "person": {"display": "Jane Doe"}}]}"#.into(),
            )) as Arc<dyn ContentResolver>
        });
        context
    }

    fn settings() -> IndexSettings {
        IndexSettings {
            writer_threads: 1,
            writer_heap_bytes: 20 * 1024 * 1024,
            ..IndexSettings::default()
        }
    }

    #[test]
    fn registers_definitions_from_a_directory() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("patient.j2l"), PATIENT).unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested/obs.j2l"), OBS).unwrap();
        fs::write(dir.path().join("readme.md"), "ignored").unwrap();

        let context = context();
        let registered = context.register_resources(dir.path()).unwrap();
        assert_eq!(registered.len(), 2);
        assert_eq!(context.resources().keys(), ["Obs", "Patient"]);
        assert_eq!(context.resources().field_names(), ["concept", "name", "uuid"]);

        assert!(context.remove_resource("Obs").is_some());
        assert!(context.resource("Obs").is_none());
    }

    #[test]
    fn invalid_definition_reports_file() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("broken.j2l"), "resourceName Patient\n").unwrap();
        let err = context().register_resources(dir.path()).unwrap_err();
        assert!(matches!(err, Error::Configuration(ref msg) if msg.contains("broken.j2l")));
    }

    #[test]
    fn indexes_through_configured_resolver() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("patient.j2l"), PATIENT).unwrap();

        let context = context();
        context.register_resources(dir.path()).unwrap();
        let indexer = context.open_in_ram(settings()).unwrap();
        let patient = context.resource("Patient").unwrap();

        load_remote(&indexer, &patient, "v=full").unwrap();
        let found = indexer
            .get_object(r#"uuid:"p-1""#, Scope::Type("Patient"))
            .unwrap()
            .unwrap();
        let found = found.downcast::<Value>().unwrap();
        assert_eq!(found["person"]["display"], "Jane Doe");
    }
}
