//! Error types for hedstore.

use thiserror::Error;

/// Result type alias using hedstore's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for hedstore operations.
#[derive(Error, Debug)]
pub enum Error {
    /// XML text could not be parsed into a tag tree
    #[error("Malformed document: {0}")]
    MalformedDocument(String),

    /// Document does not conform to the XSD schema (or the schema itself is invalid)
    #[error("Schema violation: {0}")]
    SchemaViolation(String),

    /// A store operation failed; `op` names the logical operation
    #[error("Persistence error during {op}: {source}")]
    Persistence {
        op: String,
        #[source]
        source: sqlx::Error,
    },

    /// Deleting a store was refused because other sessions are connected
    #[error("Close all connections before dropping the store ({0} other active)")]
    ConnectionsActive(i64),

    /// Pathname or identifier lookup yielded nothing
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build a `map_err` adapter that wraps a store error with the operation name.
    ///
    /// ```rust,ignore
    /// query.execute(&pool).await.map_err(Error::persistence("insert tag"))?;
    /// ```
    pub fn persistence(op: &str) -> impl FnOnce(sqlx::Error) -> Error + '_ {
        move |source| Error::Persistence {
            op: op.to_string(),
            source,
        }
    }

    /// Whether this error means "absent" rather than a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}

impl From<quick_xml::Error> for Error {
    fn from(e: quick_xml::Error) -> Self {
        Error::MalformedDocument(e.to_string())
    }
}
