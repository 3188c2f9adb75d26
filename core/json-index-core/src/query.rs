use crate::error::{Error, Result};
use crate::path::{exact_text, PathExtractor};
use crate::resource::{exact_field, Resource, FIELD_CLASS, FIELD_RESOURCE};
use serde_json::Value;

/// Restricts a query to the documents of one resource or one target type.
#[derive(Debug, Clone, Copy)]
pub enum Scope<'a> {
    Resource(&'a Resource),
    Type(&'a str),
}

impl<'a> From<&'a Resource> for Scope<'a> {
    fn from(resource: &'a Resource) -> Self {
        Scope::Resource(resource)
    }
}

impl Scope<'_> {
    pub fn clause(&self) -> String {
        match self {
            Scope::Resource(resource) => scope_by_resource(resource),
            Scope::Type(target_type) => scope_by_type(target_type),
        }
    }
}

/// Wrap a value in double quotes, escaping embedded quotes and backslashes.
pub fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if matches!(c, '"' | '\\') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

pub fn field_query(field: &str, value: &str) -> String {
    format!("{field}:{}", quote(value))
}

pub fn scope_by_type(target_type: &str) -> String {
    field_query(FIELD_CLASS, target_type)
}

pub fn scope_by_resource(resource: &Resource) -> String {
    field_query(FIELD_RESOURCE, resource.name())
}

/// AND together every clause, each parenthesized.
pub fn and<I, S>(clauses: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    clauses
        .into_iter()
        .map(|clause| format!("({})", clause.as_ref()))
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// Query matching the stored document that represents the same logical
/// object as `json`.
///
/// Unique fields alone form the identity when at least one is declared;
/// otherwise every searchable field must match. Clauses target the raw
/// `_exact_` companion fields with the value's canonical JSON text, so a
/// match is whole-value and case-sensitive, and `null` only matches `null`.
pub fn identity_query(
    resource: &Resource,
    json: &Value,
    extractor: &dyn PathExtractor,
) -> Result<String> {
    let has_unique = resource.unique_fields().next().is_some();
    let candidates = resource
        .searchable_fields()
        .iter()
        .filter(|field| !has_unique || field.is_unique());

    let mut clauses = Vec::new();
    for field in candidates {
        let value = extractor
            .extract(json, field.expression())?
            .ok_or_else(|| {
                Error::malformed(format!(
                    "resource `{}`: field `{}` ({}) not found in payload",
                    resource.name(),
                    field.name(),
                    field.expression()
                ))
            })?;
        clauses.push(field_query(&exact_field(field.name()), &exact_text(&value)));
    }

    if clauses.is_empty() {
        return Err(Error::config(format!(
            "resource `{}` declares no searchable fields to identify objects by",
            resource.name()
        )));
    }
    Ok(and(clauses))
}

pub fn key_query(scope: &Scope<'_>, key: &str) -> String {
    and([scope.clause(), key.to_string()])
}

/// An empty search string selects every document in scope.
pub fn search_query(scope: &Scope<'_>, search: &str) -> String {
    if search.trim().is_empty() {
        scope.clause()
    } else {
        and([scope.clause(), search.to_string()])
    }
}
