use crate::error::{Error, Result};
use jsonpath_rust::{JsonPath as CompiledPath, JsonPathValue};
use serde_json::Value;
use std::str::FromStr;

/// Evaluates a path expression against a parsed JSON value.
///
/// `Ok(None)` means the path is well formed but selects nothing; a malformed
/// expression is reported as [`Error::MalformedPayload`].
pub trait PathExtractor: Send + Sync {
    fn extract(&self, json: &Value, path: &str) -> Result<Option<Value>>;
}

/// JSONPath extractor backed by `jsonpath-rust`.
///
/// A definite path yields the single selected value. Paths that can select
/// several nodes (wildcards, recursive descent, filters, slices, unions)
/// always yield an array of every match.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonPath;

impl PathExtractor for JsonPath {
    fn extract(&self, json: &Value, path: &str) -> Result<Option<Value>> {
        let compiled: CompiledPath = CompiledPath::from_str(path.trim())
            .map_err(|err| Error::malformed(format!("invalid path `{path}`: {err}")))?;

        let mut matches: Vec<Value> = compiled
            .find_slice(json)
            .into_iter()
            .filter_map(|found| match found {
                JsonPathValue::Slice(value, _) => Some(value.clone()),
                JsonPathValue::NewValue(value) => Some(value),
                JsonPathValue::NoValue => None,
            })
            .collect();

        if !is_definite(path) {
            return Ok(Some(Value::Array(matches)));
        }
        match matches.len() {
            0 => Ok(None),
            _ => Ok(Some(matches.swap_remove(0))),
        }
    }
}

fn is_definite(path: &str) -> bool {
    let selects_many =
        path.contains("..") || path.contains('*') || path.contains("[?") || path.contains(',');
    let has_slice = path
        .split('[')
        .skip(1)
        .filter_map(|segment| segment.split(']').next())
        .any(|inner| inner.contains(':') && !inner.starts_with(['\'', '"']));
    !(selects_many || has_slice)
}

/// Render an extracted value as index text.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Canonical form of a value for exact matching: its compact JSON text, so
/// `null`, `""` and `"null"` all stay distinct.
pub fn exact_text(value: &Value) -> String {
    value.to_string()
}
