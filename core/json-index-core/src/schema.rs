use crate::error::{Error, Result};
use crate::resource::{exact_field, FIELD_CLASS, FIELD_JSON, FIELD_RESOURCE, FIELD_UUID};
use tantivy::schema::{Field, FieldType, Schema, SchemaBuilder, STORED, STRING, TEXT};

/// Meta fields are raw so scope clauses match whole names. Every searchable
/// field is indexed twice: tokenized with positions for free-text search,
/// and raw under its `_exact_` name for identity matching.
pub fn build_schema<S: AsRef<str>>(field_names: &[S]) -> Schema {
    let mut builder = SchemaBuilder::default();

    builder.add_text_field(FIELD_JSON, STORED);
    builder.add_text_field(FIELD_UUID, STRING | STORED);
    builder.add_text_field(FIELD_CLASS, STRING | STORED);
    builder.add_text_field(FIELD_RESOURCE, STRING | STORED);

    for name in field_names {
        builder.add_text_field(name.as_ref(), TEXT | STORED);
        builder.add_text_field(&exact_field(name.as_ref()), STRING);
    }

    builder.build()
}

#[derive(Clone, Copy)]
pub(crate) struct IndexFields {
    pub json: Field,
    pub uuid: Field,
    pub class: Field,
    pub resource: Field,
}

impl IndexFields {
    pub(crate) fn resolve(schema: &Schema) -> Result<Self> {
        Ok(Self {
            json: field(schema, FIELD_JSON)?,
            uuid: field(schema, FIELD_UUID)?,
            class: field(schema, FIELD_CLASS)?,
            resource: field(schema, FIELD_RESOURCE)?,
        })
    }
}

pub(crate) fn field(schema: &Schema, name: &str) -> Result<Field> {
    schema.get_field(name).map_err(|_| {
        Error::config(format!(
            "index schema has no field `{name}`; register the resource before opening the index"
        ))
    })
}

/// Check that an existing index can hold every field the registered
/// resources declare.
pub(crate) fn ensure_fields<S: AsRef<str>>(schema: &Schema, field_names: &[S]) -> Result<()> {
    IndexFields::resolve(schema)?;
    for name in field_names {
        for name in [name.as_ref().to_string(), exact_field(name.as_ref())] {
            let handle = field(schema, &name)?;
            if !matches!(schema.get_field_entry(handle).field_type(), FieldType::Str(_)) {
                return Err(Error::config(format!("index field `{name}` is not a text field")));
            }
        }
    }
    Ok(())
}

/// Tokenized searchable fields, used as default fields for bare query terms.
pub(crate) fn searchable_fields(schema: &Schema) -> Vec<Field> {
    schema
        .fields()
        .filter(|(_, entry)| !entry.name().starts_with('_'))
        .filter(|(_, entry)| entry.is_indexed())
        .map(|(handle, _)| handle)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{build_schema, ensure_fields, searchable_fields, IndexFields};
    use crate::error::Error;

    #[test]
    fn adds_meta_and_searchable_fields() {
        let schema = build_schema(&["uuid", "name"]);
        assert!(IndexFields::resolve(&schema).is_ok());
        assert_eq!(searchable_fields(&schema).len(), 2);

        let exact = schema.get_field_entry(schema.get_field("_exact_uuid").unwrap());
        assert!(exact.is_indexed());
        assert!(!exact.is_stored());

        let json = schema.get_field_entry(schema.get_field("_json").unwrap());
        assert!(json.is_stored());
        assert!(!json.is_indexed());
    }

    #[test]
    fn detects_missing_fields_in_existing_schema() {
        let schema = build_schema(&["uuid"]);
        assert!(ensure_fields(&schema, &["uuid"]).is_ok());
        let err = ensure_fields(&schema, &["uuid", "gender"]).unwrap_err();
        assert!(matches!(err, Error::Configuration(ref msg) if msg.contains("gender")));

        let mut builder = tantivy::schema::SchemaBuilder::default();
        for name in ["_json", "_uuid", "_class", "_resource", "uuid"] {
            builder.add_text_field(name, tantivy::schema::STRING);
        }
        let err = ensure_fields(&builder.build(), &["uuid"]).unwrap_err();
        assert!(matches!(err, Error::Configuration(ref msg) if msg.contains("_exact_uuid")));
    }
}
