mod algorithm;
mod config;
mod context;
mod error;
mod indexer;
mod loader;
mod path;
mod query;
mod registry;
mod resource;
mod schema;

pub use crate::algorithm::{JsonAlgorithm, SerdeAlgorithm};
pub use crate::config::ResourceConfig;
pub use crate::context::Context;
pub use crate::error::{Error, Result};
pub use crate::indexer::{IndexSettings, IndexStats, IndexUpdate, Indexer};
pub use crate::loader::{load_path, load_remote, LoadOptions};
pub use crate::path::{stringify, JsonPath, PathExtractor};
pub use crate::query::{
    and, field_query, identity_query, key_query, quote, scope_by_resource, scope_by_type,
    search_query, Scope,
};
pub use crate::registry::{
    AlgorithmFactories, Factories, Registry, ResolverFactories, ResourceRegistry,
};
pub use crate::resource::{
    downcast, Algorithm, ContentResolver, Resource, ResourceBuilder, SearchObject,
    SearchableField, FIELD_CLASS, FIELD_JSON, FIELD_RESOURCE, FIELD_UUID, RESERVED_FIELDS,
};
pub use crate::schema::build_schema;
