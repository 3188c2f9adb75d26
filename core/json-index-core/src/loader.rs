use crate::error::{Error, Result};
use crate::indexer::{IndexStats, Indexer};
use crate::resource::Resource;
use globset::{GlobBuilder, GlobMatcher};
use ignore::WalkBuilder;
use rayon::prelude::*;
use serde_json::Value;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use tracing::info;

const DEFAULT_PAYLOAD_PATTERN: &str = "*.json";

#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// File name pattern selecting payload files when loading a directory.
    pub pattern: String,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            pattern: DEFAULT_PAYLOAD_PATTERN.to_string(),
        }
    }
}

/// Fetch `search` through the resource's content resolver and index the
/// returned payload.
pub fn load_remote(indexer: &Indexer, resource: &Resource, search: &str) -> Result<IndexStats> {
    let stream = resource.resolver().resolve(search)?;
    let stats = indexer.update_index(resource, stream)?;
    info!(
        resource = resource.name(),
        search,
        added = stats.added,
        updated = stats.updated,
        "remote load finished"
    );
    Ok(stats)
}

/// Index a JSON file, or every matching file below a directory, as one
/// write unit. Any unreadable or malformed file fails the whole load.
pub fn load_path(
    indexer: &Indexer,
    resource: &Resource,
    path: &Path,
    options: &LoadOptions,
) -> Result<IndexStats> {
    let files = collect_files(path, &options.pattern)?;

    let payloads = files
        .par_iter()
        .map(|file| read_payload(file))
        .collect::<Result<Vec<Value>>>()?;

    let stats = indexer.update_index_values(resource, payloads)?;
    info!(
        resource = resource.name(),
        path = %path.display(),
        files = files.len(),
        added = stats.added,
        updated = stats.updated,
        "local load finished"
    );
    Ok(stats)
}

/// `path` itself when it is a file, otherwise every file below it whose
/// name matches `pattern`, sorted.
pub(crate) fn collect_files(path: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_dir() {
        return Err(Error::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} does not exist", path.display()),
        )));
    }

    let matcher = compile_pattern(pattern)?;
    let mut builder = WalkBuilder::new(path);
    builder.standard_filters(false).hidden(true);

    let mut files = Vec::new();
    for entry in builder.build() {
        let entry = entry.map_err(|err| Error::Io(io::Error::other(err.to_string())))?;
        let is_file = entry.file_type().map(|ft| ft.is_file()).unwrap_or(false);
        if is_file && matcher.is_match(entry.file_name()) {
            files.push(entry.into_path());
        }
    }

    files.par_sort();
    Ok(files)
}

fn compile_pattern(raw: &str) -> Result<GlobMatcher> {
    let glob = GlobBuilder::new(raw)
        .case_insensitive(true)
        .build()
        .map_err(|err| Error::config(format!("invalid file pattern `{raw}`: {err}")))?;
    Ok(glob.compile_matcher())
}

fn read_payload(path: &Path) -> Result<Value> {
    let file = File::open(path)?;
    serde_json::from_reader(BufReader::new(file)).map_err(|err| match Error::from_json(err) {
        Error::MalformedPayload(msg) => {
            Error::malformed(format!("{}: {msg}", path.display()))
        }
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::{collect_files, load_path, load_remote, LoadOptions};
    use crate::algorithm::JsonAlgorithm;
    use crate::error::Error;
    use crate::indexer::{IndexSettings, Indexer};
    use crate::query::Scope;
    use crate::registry::ResourceRegistry;
    use crate::resource::tests::StaticResolver;
    use crate::resource::Resource;
    use std::fs;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn setup(payload: &str) -> (Indexer, Arc<Resource>) {
        let resource = Resource::builder("Patient")
            .root_node("$.results")
            .target_type("Patient")
            .algorithm(Arc::new(JsonAlgorithm))
            .resolver(Arc::new(StaticResolver(payload.to_string())))
            .field("uuid", "$.uuid", true)
            .field("name", "$.display", false)
            .build()
            .unwrap();
        let registry = Arc::new(ResourceRegistry::new());
        let resource = registry.register_resource(resource);
        let settings = IndexSettings {
            writer_threads: 1,
            writer_heap_bytes: 20 * 1024 * 1024,
            ..IndexSettings::default()
        };
        (Indexer::open_in_ram(settings, registry).unwrap(), resource)
    }

    #[test]
    fn remote_load_indexes_resolved_payload() {
        let (indexer, resource) = setup(
            r#"{"results": [{"uuid": "a", "display": "Ann"}, {"uuid": "b", "display": "Ben"}]}"#,
        );
        let stats = load_remote(&indexer, &resource, "q=a").unwrap();
        assert_eq!(stats.added, 2);

        let stats = load_remote(&indexer, &resource, "q=a").unwrap();
        assert_eq!(stats.updated, 2);
        assert_eq!(indexer.num_docs(), 2);
    }

    #[test]
    fn loads_matching_files_below_a_directory() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::write(
            root.join("page1.json"),
            r#"{"results": [{"uuid": "a", "display": "Ann"}]}"#,
        )
        .unwrap();
        fs::create_dir(root.join("more")).unwrap();
        fs::write(
            root.join("more/page2.JSON"),
            r#"{"results": [{"uuid": "b", "display": "Ben"}, {"uuid": "a", "display": "Ann B"}]}"#,
        )
        .unwrap();
        fs::write(root.join("notes.txt"), "not json").unwrap();

        let files = collect_files(root, "*.json").unwrap();
        assert_eq!(files.len(), 2);

        let (indexer, resource) = setup("{}");
        let stats = load_path(&indexer, &resource, root, &LoadOptions::default()).unwrap();
        assert_eq!(stats.total(), 3);
        assert_eq!(indexer.num_docs(), 2);

        let hits = indexer
            .get_objects("ben", Scope::Resource(&resource))
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn single_file_is_loaded_regardless_of_pattern() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("dump.txt");
        fs::write(&file, r#"{"results": [{"uuid": "a", "display": "Ann"}]}"#).unwrap();

        let (indexer, resource) = setup("{}");
        let stats = load_path(&indexer, &resource, &file, &LoadOptions::default()).unwrap();
        assert_eq!(stats.added, 1);
    }

    #[test]
    fn one_broken_file_fails_the_whole_load() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("good.json"),
            r#"{"results": [{"uuid": "a", "display": "Ann"}]}"#,
        )
        .unwrap();
        fs::write(dir.path().join("bad.json"), r#"{"results": ["#).unwrap();

        let (indexer, resource) = setup("{}");
        let err = load_path(&indexer, &resource, dir.path(), &LoadOptions::default()).unwrap_err();
        assert!(matches!(err, Error::MalformedPayload(ref msg) if msg.contains("bad.json")));
        assert_eq!(indexer.num_docs(), 0);
    }

    #[test]
    fn missing_path_is_an_io_error() {
        let dir = tempdir().unwrap();
        let err = collect_files(&dir.path().join("absent"), "*.json").unwrap_err();
        assert!(err.is_io());
    }
}
