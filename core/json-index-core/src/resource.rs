use crate::error::{Error, Result};
use std::any::Any;
use std::fmt;
use std::io::Read;
use std::sync::Arc;

pub const FIELD_JSON: &str = "_json";
pub const FIELD_UUID: &str = "_uuid";
pub const FIELD_CLASS: &str = "_class";
pub const FIELD_RESOURCE: &str = "_resource";

/// Meta fields every indexed document carries; resources may not declare them.
pub const RESERVED_FIELDS: &[&str] = &[FIELD_JSON, FIELD_UUID, FIELD_CLASS, FIELD_RESOURCE];

/// Prefix of the untokenized companion field kept for every searchable
/// field; identity matching runs against these.
pub const EXACT_FIELD_PREFIX: &str = "_exact_";

pub fn exact_field(name: &str) -> String {
    format!("{EXACT_FIELD_PREFIX}{name}")
}

/// An object materialized by a resource's [`Algorithm`].
pub type SearchObject = Box<dyn Any + Send>;

/// Converts between the raw JSON stored in the index and typed objects.
pub trait Algorithm: Send + Sync {
    fn from_json(&self, json: &str) -> Result<SearchObject>;

    fn to_json(&self, object: &dyn Any) -> Result<String>;
}

/// Produces the JSON payload for a search string, typically by calling a
/// remote REST endpoint.
pub trait ContentResolver: Send + Sync {
    fn resolve(&self, search: &str) -> Result<Box<dyn Read + Send>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchableField {
    name: String,
    expression: String,
    unique: bool,
}

impl SearchableField {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }
}

pub struct Resource {
    name: String,
    root_node: String,
    target_type: String,
    fields: Vec<SearchableField>,
    algorithm: Arc<dyn Algorithm>,
    resolver: Arc<dyn ContentResolver>,
}

impl Resource {
    pub fn builder(name: impl Into<String>) -> ResourceBuilder {
        ResourceBuilder {
            name: Some(name.into()),
            ..ResourceBuilder::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root_node(&self) -> &str {
        &self.root_node
    }

    pub fn target_type(&self) -> &str {
        &self.target_type
    }

    pub fn searchable_fields(&self) -> &[SearchableField] {
        &self.fields
    }

    pub fn unique_fields(&self) -> impl Iterator<Item = &SearchableField> {
        self.fields.iter().filter(|field| field.unique)
    }

    pub fn algorithm(&self) -> &Arc<dyn Algorithm> {
        &self.algorithm
    }

    pub fn resolver(&self) -> &Arc<dyn ContentResolver> {
        &self.resolver
    }

    /// Append a searchable field. A second definition with the same name
    /// replaces the first one in place.
    pub fn add_field_definition(
        &mut self,
        name: impl Into<String>,
        expression: impl Into<String>,
        unique: bool,
    ) -> Result<()> {
        let name = name.into();
        validate_field_name(&self.name, &name)?;

        let field = SearchableField {
            name,
            expression: expression.into(),
            unique,
        };
        match self.fields.iter_mut().find(|existing| existing.name == field.name) {
            Some(existing) => *existing = field,
            None => self.fields.push(field),
        }
        Ok(())
    }

    /// Materialize a stored payload and check it is of type `T`.
    pub fn materialize<T: Any>(&self, json: &str) -> Result<T> {
        downcast(self, self.algorithm.from_json(json)?)
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("name", &self.name)
            .field("root_node", &self.root_node)
            .field("target_type", &self.target_type)
            .field("fields", &self.fields)
            .finish_non_exhaustive()
    }
}

/// Recover the concrete type behind a [`SearchObject`] produced by `resource`.
pub fn downcast<T: Any>(resource: &Resource, object: SearchObject) -> Result<T> {
    object.downcast::<T>().map(|boxed| *boxed).map_err(|_| {
        Error::config(format!(
            "resource `{}` materializes `{}`, not `{}`",
            resource.name,
            resource.target_type,
            std::any::type_name::<T>()
        ))
    })
}

fn validate_field_name(resource: &str, name: &str) -> Result<()> {
    if RESERVED_FIELDS.contains(&name) {
        return Err(Error::config(format!(
            "resource `{resource}` declares reserved field `{name}`"
        )));
    }
    if name.starts_with('_') {
        return Err(Error::config(format!(
            "resource `{resource}` declares field `{name}`; names starting with `_` are reserved"
        )));
    }
    let unusable = name.is_empty()
        || name.starts_with('-')
        || name
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, ':' | '.' | '"' | '\'' | '(' | ')' | '\\'));
    if unusable {
        return Err(Error::config(format!(
            "resource `{resource}` declares field `{name}` which cannot be used as an index field name"
        )));
    }
    Ok(())
}

#[derive(Default)]
pub struct ResourceBuilder {
    name: Option<String>,
    root_node: Option<String>,
    target_type: Option<String>,
    algorithm: Option<Arc<dyn Algorithm>>,
    resolver: Option<Arc<dyn ContentResolver>>,
    fields: Vec<(String, String, bool)>,
}

impl ResourceBuilder {
    pub fn root_node(mut self, root_node: impl Into<String>) -> Self {
        self.root_node = Some(root_node.into());
        self
    }

    pub fn target_type(mut self, target_type: impl Into<String>) -> Self {
        self.target_type = Some(target_type.into());
        self
    }

    pub fn algorithm(mut self, algorithm: Arc<dyn Algorithm>) -> Self {
        self.algorithm = Some(algorithm);
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn ContentResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn field(
        mut self,
        name: impl Into<String>,
        expression: impl Into<String>,
        unique: bool,
    ) -> Self {
        self.fields.push((name.into(), expression.into(), unique));
        self
    }

    pub fn build(self) -> Result<Resource> {
        let name = required(self.name.filter(|name| !name.trim().is_empty()), "name")?;
        let mut resource = Resource {
            root_node: required(self.root_node, "root_node")?,
            target_type: required(self.target_type, "target_type")?,
            algorithm: required(self.algorithm, "algorithm")?,
            resolver: required(self.resolver, "content_resolver")?,
            name,
            fields: Vec::new(),
        };
        for (name, expression, unique) in self.fields {
            resource.add_field_definition(name, expression, unique)?;
        }
        Ok(resource)
    }
}

fn required<T>(value: Option<T>, key: &str) -> Result<T> {
    value.ok_or_else(|| Error::config(format!("missing mandatory `{key}`")))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::{Algorithm, ContentResolver, Resource, SearchObject};
    use crate::algorithm::JsonAlgorithm;
    use crate::error::{Error, Result};
    use std::io::{Cursor, Read};
    use std::sync::Arc;

    /// Resolver serving a fixed payload regardless of the search string.
    pub(crate) struct StaticResolver(pub String);

    impl ContentResolver for StaticResolver {
        fn resolve(&self, _search: &str) -> Result<Box<dyn Read + Send>> {
            Ok(Box::new(Cursor::new(self.0.clone().into_bytes())))
        }
    }

    pub(crate) fn resolver() -> Arc<dyn ContentResolver> {
        Arc::new(StaticResolver("{}".into()))
    }

    pub(crate) fn json_algorithm() -> Arc<dyn Algorithm> {
        Arc::new(JsonAlgorithm)
    }

    #[test]
    fn builds_resource_with_fields_in_order() {
        let resource = Resource::builder("Patient")
            .root_node("$")
            .target_type("Patient")
            .algorithm(json_algorithm())
            .resolver(resolver())
            .field("uuid", "$.uuid", true)
            .field("name", "$.person.display", false)
            .build()
            .unwrap();

        let names: Vec<_> = resource.searchable_fields().iter().map(|f| f.name()).collect();
        assert_eq!(names, ["uuid", "name"]);
        let unique: Vec<_> = resource.unique_fields().map(|f| f.name()).collect();
        assert_eq!(unique, ["uuid"]);
    }

    #[test]
    fn missing_mandatory_pieces_are_named() {
        let err = Resource::builder("Patient")
            .root_node("$")
            .algorithm(json_algorithm())
            .resolver(resolver())
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(ref msg) if msg.contains("target_type")));

        let err = Resource::builder("Patient")
            .root_node("$")
            .target_type("Patient")
            .algorithm(json_algorithm())
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(ref msg) if msg.contains("content_resolver")));

        let err = Resource::builder("  ")
            .root_node("$")
            .target_type("Patient")
            .algorithm(json_algorithm())
            .resolver(resolver())
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(ref msg) if msg.contains("name")));
    }

    #[test]
    fn rejects_reserved_and_unusable_names() {
        let bad_names = [
            "_json", "_uuid", "_class", "_resource", "_exact_uuid", "", "a b", "a.b", "x:y",
        ];
        for bad in bad_names {
            let err = Resource::builder("Patient")
                .root_node("$")
                .target_type("Patient")
                .algorithm(json_algorithm())
                .resolver(resolver())
                .field(bad, "$.x", false)
                .build()
                .unwrap_err();
            assert!(matches!(err, Error::Configuration(_)), "{bad:?}");
        }
    }

    #[test]
    fn later_definition_replaces_earlier_one() {
        let mut resource = Resource::builder("Patient")
            .root_node("$")
            .target_type("Patient")
            .algorithm(json_algorithm())
            .resolver(resolver())
            .field("uuid", "$.uuid", false)
            .field("name", "$.name", false)
            .build()
            .unwrap();
        resource.add_field_definition("uuid", "$.id", true).unwrap();

        let fields = resource.searchable_fields();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].name(), "uuid");
        assert_eq!(fields[0].expression(), "$.id");
        assert!(fields[0].is_unique());
    }

    #[test]
    fn materialize_reports_type_mismatch() {
        let resource = Resource::builder("Patient")
            .root_node("$")
            .target_type("Patient")
            .algorithm(json_algorithm())
            .resolver(resolver())
            .build()
            .unwrap();
        let value: serde_json::Value = resource.materialize(r#"{"a":1}"#).unwrap();
        assert_eq!(value["a"], 1);

        let object: SearchObject = Box::new(5u32);
        let err = super::downcast::<String>(&resource, object).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
