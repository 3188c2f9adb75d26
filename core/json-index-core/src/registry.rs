use crate::error::{Error, Result};
use crate::resource::{Algorithm, ContentResolver, Resource};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Name-keyed table; registering an existing key replaces its value.
pub struct Registry<V> {
    entries: RwLock<HashMap<String, V>>,
}

pub type ResourceRegistry = Registry<Arc<Resource>>;

impl<V> Default for Registry<V> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<V: Clone> Registry<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, key: impl Into<String>, value: V) -> Option<V> {
        self.entries
            .write()
            .expect("registry lock poisoned")
            .insert(key.into(), value)
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.entries
            .read()
            .expect("registry lock poisoned")
            .get(key)
            .cloned()
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        self.entries
            .write()
            .expect("registry lock poisoned")
            .remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .read()
            .expect("registry lock poisoned")
            .contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self
            .entries
            .read()
            .expect("registry lock poisoned")
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    pub fn values(&self) -> Vec<V> {
        self.entries
            .read()
            .expect("registry lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResourceRegistry {
    pub fn register_resource(&self, resource: Resource) -> Arc<Resource> {
        let resource = Arc::new(resource);
        self.register(resource.name().to_string(), Arc::clone(&resource));
        resource
    }

    pub(crate) fn require(&self, name: &str) -> Result<Arc<Resource>> {
        self.get(name)
            .ok_or_else(|| Error::config(format!("no resource registered under `{name}`")))
    }

    /// Names of every searchable field declared across registered resources.
    pub fn field_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .values()
            .iter()
            .flat_map(|resource| {
                resource
                    .searchable_fields()
                    .iter()
                    .map(|field| field.name().to_string())
                    .collect::<Vec<_>>()
            })
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

type Constructor<T> = Arc<dyn Fn() -> Arc<T> + Send + Sync>;

/// Maps a configuration key to a constructor for one implementation of `T`.
pub struct Factories<T: ?Sized> {
    kind: &'static str,
    constructors: Registry<Constructor<T>>,
}

pub type AlgorithmFactories = Factories<dyn Algorithm>;
pub type ResolverFactories = Factories<dyn ContentResolver>;

impl<T: ?Sized> Factories<T> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            constructors: Registry::default(),
        }
    }

    pub fn register<F>(&self, key: impl Into<String>, constructor: F)
    where
        F: Fn() -> Arc<T> + Send + Sync + 'static,
    {
        self.constructors.register(key, Arc::new(constructor));
    }

    pub fn remove(&self, key: &str) -> bool {
        self.constructors.remove(key).is_some()
    }

    pub fn keys(&self) -> Vec<String> {
        self.constructors.keys()
    }

    pub fn create(&self, key: &str) -> Result<Arc<T>> {
        if let Some(constructor) = self.constructors.get(key) {
            return Ok(constructor());
        }

        let mut message = format!(
            "cannot create {kind}: nothing is registered under `{key}`.",
            kind = self.kind
        );
        let hints = self.keys();
        if hints.is_empty() {
            message.push_str(&format!(" There are no {} keys registered at all.", self.kind));
        } else {
            message.push_str(&format!(" Valid {} keys are: {}", self.kind, hints.join(", ")));
        }
        Err(Error::config(message))
    }
}

impl Factories<dyn Algorithm> {
    pub fn algorithms() -> Self {
        Self::new("algorithm")
    }
}

impl Factories<dyn ContentResolver> {
    pub fn resolvers() -> Self {
        Self::new("content resolver")
    }
}
