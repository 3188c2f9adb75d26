use tantivy::query::QueryParserError;
use tantivy::TantivyError;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// A resource definition is incomplete or collides with reserved names.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The identity query of an upsert or invalidate matched several documents.
    #[error("unable to uniquely identify an object in resource `{resource}`: {hits} documents match {query}")]
    AmbiguousIdentity {
        resource: String,
        query: String,
        hits: usize,
    },

    #[error("unable to uniquely identify an object using key `{key}`: {hits} documents match")]
    AmbiguousKey { key: String, hits: usize },

    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("index store failure: {0}")]
    Index(#[from] TantivyError),

    #[error("failed to parse query `{query}`: {source}")]
    QuerySyntax {
        query: String,
        #[source]
        source: QueryParserError,
    },
}

impl Error {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Error::Configuration(message.into())
    }

    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        Error::MalformedPayload(message.into())
    }

    /// True for failures coming from the store or the content transport.
    pub fn is_io(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Index(_))
    }

    /// Classify a JSON decoding failure: transport problems surface as I/O,
    /// everything else means the payload itself is broken.
    pub(crate) fn from_json(err: serde_json::Error) -> Self {
        if err.is_io() {
            Error::Io(err.into())
        } else {
            Error::MalformedPayload(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Error;
    use std::io;

    #[test]
    fn classifies_json_failures() {
        let syntax = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        assert!(matches!(Error::from_json(syntax), Error::MalformedPayload(_)));

        struct Broken;
        impl io::Read for Broken {
            fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            }
        }
        let transport = serde_json::from_reader::<_, serde_json::Value>(Broken).unwrap_err();
        let err = Error::from_json(transport);
        assert!(err.is_io());
    }
}
