use crate::error::{Error, Result};
use crate::path::{exact_text, stringify, JsonPath, PathExtractor};
use crate::query::{self, Scope};
use crate::registry::ResourceRegistry;
use crate::resource::{
    exact_field, Resource, SearchObject, FIELD_JSON, FIELD_RESOURCE, FIELD_UUID,
};
use crate::schema::{self, build_schema, ensure_fields, searchable_fields, IndexFields};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::fs;
use std::io::{self, Read};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tantivy::collector::TopDocs;
use tantivy::directory::MmapDirectory;
use tantivy::merge_policy::LogMergePolicy;
use tantivy::query::{Query, QueryParser};
use tantivy::schema::{Field, Schema, TantivyDocument, Value as _};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, Searcher, TantivyError, Term};
use tracing::{debug, info, warn};
use uuid::Uuid;

const DEFAULT_WRITER_MEM_BYTES: usize = 64 * 1024 * 1024;
const DEFAULT_WRITER_THREADS: usize = 0; // will be replaced with num_cpus at runtime
const DEFAULT_MAX_RESULTS: usize = 20;
const MAX_WRITER_THREADS: usize = 8;
const MIN_WRITER_MEM_PER_THREAD: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    pub writer_threads: usize,
    pub writer_heap_bytes: usize,
    /// Upper bound on documents inspected by a single query.
    pub max_results: usize,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            writer_threads: DEFAULT_WRITER_THREADS,
            writer_heap_bytes: DEFAULT_WRITER_MEM_BYTES,
            max_results: DEFAULT_MAX_RESULTS,
        }
    }
}

impl IndexSettings {
    /// Writer threads actually used: 0 means one per CPU, capped at 8.
    pub fn effective_writer_threads(&self) -> usize {
        let requested = match self.writer_threads {
            0 => num_cpus::get(),
            threads => threads,
        };
        requested.clamp(1, MAX_WRITER_THREADS)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexUpdate {
    Added,
    Updated,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub added: usize,
    pub updated: usize,
}

impl IndexStats {
    fn record(&mut self, update: IndexUpdate) {
        match update {
            IndexUpdate::Added => self.added += 1,
            IndexUpdate::Updated => self.updated += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.added + self.updated
    }
}

/// Mirror of resource payloads inside one tantivy index.
///
/// Writes are serialized through a single writer that lives only for one
/// write unit: it is opened, used, committed and closed before the lock is
/// released, and the shared reader is reloaded right after the commit.
/// Reads take a searcher snapshot and never block on writers.
pub struct Indexer {
    index: Index,
    schema: Schema,
    reader: IndexReader,
    fields: IndexFields,
    default_fields: Vec<Field>,
    settings: IndexSettings,
    resources: Arc<ResourceRegistry>,
    extractor: Box<dyn PathExtractor>,
    writer_lock: Mutex<()>,
}

impl Indexer {
    /// Open the index stored under `path`, creating it when absent. The
    /// schema covers every field declared by the resources registered so far.
    pub fn open(
        path: &Path,
        settings: IndexSettings,
        resources: Arc<ResourceRegistry>,
    ) -> Result<Self> {
        let field_names = resources.field_names();
        fs::create_dir_all(path)?;

        let directory = MmapDirectory::open(path).map_err(TantivyError::from)?;
        let index = if Index::exists(&directory).map_err(TantivyError::from)? {
            let index = Index::open(directory)?;
            ensure_fields(&index.schema(), &field_names)?;
            index
        } else {
            Index::create(
                directory,
                build_schema(&field_names),
                tantivy::IndexSettings::default(),
            )?
        };

        info!(path = %path.display(), fields = field_names.len(), "opened index");
        Self::with_index(index, settings, resources)
    }

    pub fn open_in_ram(settings: IndexSettings, resources: Arc<ResourceRegistry>) -> Result<Self> {
        let index = Index::create_in_ram(build_schema(&resources.field_names()));
        Self::with_index(index, settings, resources)
    }

    fn with_index(
        index: Index,
        settings: IndexSettings,
        resources: Arc<ResourceRegistry>,
    ) -> Result<Self> {
        let schema = index.schema();
        let fields = IndexFields::resolve(&schema)?;
        let default_fields = searchable_fields(&schema);
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;

        Ok(Self {
            index,
            schema,
            reader,
            fields,
            default_fields,
            settings,
            resources,
            extractor: Box::new(JsonPath),
            writer_lock: Mutex::new(()),
        })
    }

    pub fn with_extractor(mut self, extractor: impl PathExtractor + 'static) -> Self {
        self.extractor = Box::new(extractor);
        self
    }

    pub fn resources(&self) -> &Arc<ResourceRegistry> {
        &self.resources
    }

    pub fn settings(&self) -> IndexSettings {
        self.settings
    }

    pub fn num_docs(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    /// Parse a JSON stream and upsert every node selected by the resource's
    /// root node.
    pub fn update_index<R: Read>(&self, resource: &Resource, reader: R) -> Result<IndexStats> {
        let payload: Value = serde_json::from_reader(reader).map_err(Error::from_json)?;
        self.update_index_values(resource, vec![payload])
    }

    /// Upsert already parsed payloads in a single write unit.
    pub fn update_index_values(
        &self,
        resource: &Resource,
        payloads: Vec<Value>,
    ) -> Result<IndexStats> {
        let mut elements = Vec::new();
        for payload in &payloads {
            match self.extractor.extract(payload, resource.root_node())? {
                Some(Value::Array(items)) => elements.extend(items),
                Some(object @ Value::Object(_)) => elements.push(object),
                Some(other) => {
                    return Err(Error::malformed(format!(
                        "root node `{}` of resource `{}` selects a scalar: {other}",
                        resource.root_node(),
                        resource.name()
                    )));
                }
                None => {
                    debug!(resource = resource.name(), root = resource.root_node(), "root node absent from payload");
                }
            }
        }

        if elements.is_empty() {
            return Ok(IndexStats::default());
        }

        let stats = self.write(|session| {
            let mut stats = IndexStats::default();
            for element in &elements {
                stats.record(session.upsert(resource, element)?);
            }
            Ok(stats)
        })?;

        info!(
            resource = resource.name(),
            added = stats.added,
            updated = stats.updated,
            "index updated"
        );
        Ok(stats)
    }

    pub fn create_object(&self, object: &dyn Any, resource: &Resource) -> Result<IndexUpdate> {
        let json = self.serialize(object, resource)?;
        self.write(|session| session.upsert(resource, &json))
    }

    /// Identical to [`Indexer::create_object`]: identity comes from the
    /// current field values, so changing a unique field yields a new document.
    pub fn update_object(&self, object: &dyn Any, resource: &Resource) -> Result<IndexUpdate> {
        self.create_object(object, resource)
    }

    /// Remove the document representing `object` and return what was stored
    /// for it, or `None` when nothing matched.
    pub fn invalidate(&self, object: &dyn Any, resource: &Resource) -> Result<Option<SearchObject>> {
        let json = self.serialize(object, resource)?;
        self.write(|session| session.delete(resource, &json))
    }

    pub fn get_object(&self, key: &str, scope: Scope<'_>) -> Result<Option<SearchObject>> {
        let query_string = query::key_query(&scope, key);
        let searcher = self.reader.searcher();
        let documents = self.find(&searcher, &query_string)?;

        match documents.as_slice() {
            [] => Ok(None),
            [document] => self.materialize(document, &scope).map(Some),
            _ => Err(Error::AmbiguousKey {
                key: key.to_string(),
                hits: documents.len(),
            }),
        }
    }

    pub fn get_objects(&self, search: &str, scope: Scope<'_>) -> Result<Vec<SearchObject>> {
        let query_string = query::search_query(&scope, search);
        let searcher = self.reader.searcher();
        self.find(&searcher, &query_string)?
            .iter()
            .map(|document| self.materialize(document, &scope))
            .collect()
    }

    fn serialize(&self, object: &dyn Any, resource: &Resource) -> Result<Value> {
        let json = resource.algorithm().to_json(object)?;
        serde_json::from_str(&json).map_err(Error::from_json)
    }

    fn parse(&self, query_string: &str) -> Result<Box<dyn Query>> {
        debug!(query = query_string, "parsing index query");
        let parser = QueryParser::for_index(&self.index, self.default_fields.clone());
        parser
            .parse_query(query_string)
            .map_err(|source| Error::QuerySyntax {
                query: query_string.to_string(),
                source,
            })
    }

    fn find(&self, searcher: &Searcher, query_string: &str) -> Result<Vec<TantivyDocument>> {
        let query = self.parse(query_string)?;
        let limit = self.settings.max_results.max(2);
        let top_docs = searcher.search(&query, &TopDocs::with_limit(limit))?;

        top_docs
            .into_iter()
            .map(|(_score, address)| searcher.doc::<TantivyDocument>(address).map_err(Error::from))
            .collect()
    }

    fn materialize(&self, document: &TantivyDocument, scope: &Scope<'_>) -> Result<SearchObject> {
        let json = stored_text(document, self.fields.json, FIELD_JSON)?;
        match scope {
            Scope::Resource(resource) => resource.algorithm().from_json(json),
            Scope::Type(_) => {
                let owner = stored_text(document, self.fields.resource, FIELD_RESOURCE)?;
                self.resources.require(owner)?.algorithm().from_json(json)
            }
        }
    }

    fn open_writer(&self) -> Result<IndexWriter> {
        let threads = self.settings.effective_writer_threads();
        let heap = self
            .settings
            .writer_heap_bytes
            .max(threads * MIN_WRITER_MEM_PER_THREAD);

        let writer: IndexWriter = self.index.writer_with_num_threads(threads, heap)?;

        let mut merge_policy = LogMergePolicy::default();
        merge_policy.set_level_log_size(1.2);
        writer.set_merge_policy(Box::new(merge_policy));

        Ok(writer)
    }

    /// Run one write unit. On error the writer is dropped uncommitted, which
    /// leaves the index at its last committed state.
    fn write<T>(&self, op: impl FnOnce(&mut WriteSession<'_>) -> Result<T>) -> Result<T> {
        let _guard = self.writer_lock.lock().expect("index writer mutex poisoned");

        let mut session = WriteSession {
            indexer: self,
            writer: self.open_writer()?,
            searcher: self.reader.searcher(),
            written: HashMap::new(),
        };

        let value = match op(&mut session) {
            Ok(value) => value,
            Err(err) => {
                warn!(error = %err, "discarding uncommitted index changes");
                return Err(err);
            }
        };

        session.commit()?;
        self.reader.reload()?;
        Ok(value)
    }
}

struct WriteSession<'a> {
    indexer: &'a Indexer,
    writer: IndexWriter,
    searcher: Searcher,
    /// Identity query → `_uuid` of documents added during this unit, which
    /// the searcher snapshot cannot see yet.
    written: HashMap<String, String>,
}

impl WriteSession<'_> {
    fn identity(&self, resource: &Resource, json: &Value) -> Result<String> {
        let identity = query::identity_query(resource, json, self.indexer.extractor.as_ref())?;
        Ok(query::and([query::scope_by_resource(resource), identity]))
    }

    fn upsert(&mut self, resource: &Resource, json: &Value) -> Result<IndexUpdate> {
        let identity = self.identity(resource, json)?;

        let update = if let Some(previous) = self.written.get(&identity) {
            self.delete_uuid(previous);
            IndexUpdate::Updated
        } else {
            let documents = self.indexer.find(&self.searcher, &identity)?;
            match documents.as_slice() {
                [] => IndexUpdate::Added,
                [existing] => {
                    let uuid = stored_text(existing, self.indexer.fields.uuid, FIELD_UUID)?;
                    self.delete_uuid(uuid);
                    IndexUpdate::Updated
                }
                _ => {
                    return Err(Error::AmbiguousIdentity {
                        resource: resource.name().to_string(),
                        query: identity,
                        hits: documents.len(),
                    })
                }
            }
        };

        let uuid = self.add(resource, json)?;
        self.written.insert(identity, uuid);
        Ok(update)
    }

    fn delete(&self, resource: &Resource, json: &Value) -> Result<Option<SearchObject>> {
        let identity = self.identity(resource, json)?;

        let documents = self.indexer.find(&self.searcher, &identity)?;
        match documents.as_slice() {
            [] => Ok(None),
            [existing] => {
                let object = self
                    .indexer
                    .materialize(existing, &Scope::Resource(resource))?;
                let uuid = stored_text(existing, self.indexer.fields.uuid, FIELD_UUID)?;
                self.delete_uuid(uuid);
                Ok(Some(object))
            }
            _ => Err(Error::AmbiguousIdentity {
                resource: resource.name().to_string(),
                query: identity,
                hits: documents.len(),
            }),
        }
    }

    /// Write a fresh document without any identity check.
    fn add(&self, resource: &Resource, json: &Value) -> Result<String> {
        let fields = self.indexer.fields;
        let uuid = Uuid::new_v4().to_string();

        let mut doc = TantivyDocument::new();
        doc.add_text(fields.json, json.to_string());
        doc.add_text(fields.uuid, &uuid);
        doc.add_text(fields.class, resource.target_type());
        doc.add_text(fields.resource, resource.name());

        for field in resource.searchable_fields() {
            let handle = schema::field(&self.indexer.schema, field.name())?;
            let exact = schema::field(&self.indexer.schema, &exact_field(field.name()))?;
            match self.indexer.extractor.extract(json, field.expression())? {
                Some(value) => {
                    doc.add_text(handle, stringify(&value));
                    doc.add_text(exact, exact_text(&value));
                }
                None => debug!(
                    resource = resource.name(),
                    field = field.name(),
                    "field absent from payload; not indexed"
                ),
            }
        }

        self.writer.add_document(doc)?;
        Ok(uuid)
    }

    fn delete_uuid(&self, uuid: &str) {
        self.writer
            .delete_term(Term::from_field_text(self.indexer.fields.uuid, uuid));
    }

    fn commit(mut self) -> Result<()> {
        self.writer.commit()?;
        self.writer.wait_merging_threads()?;
        Ok(())
    }
}

fn stored_text<'d>(document: &'d TantivyDocument, field: Field, name: &str) -> Result<&'d str> {
    document
        .get_first(field)
        .and_then(|value| value.as_str())
        .ok_or_else(|| {
            Error::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("indexed document is missing stored `{name}`"),
            ))
        })
}
