//! Client error types.

use ormsql_core::ErrorKind;
use thiserror::Error;

/// Execution errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Building or compiling the query failed, or a locking rule was violated.
    #[error(transparent)]
    Query(#[from] ormsql_core::Error),

    /// The driver reported a failure.
    #[error("driver error: {0}")]
    Driver(String),

    /// The result cache failed.
    #[error("cache error: {0}")]
    Cache(String),

    /// Rows could not be turned into entities.
    #[error("hydration error: {0}")]
    Hydration(String),
}

impl Error {
    /// Classify the error, when it belongs to the query error taxonomy.
    ///
    /// Driver and hydration failures come from collaborators and carry no kind.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Error::Query(e) => Some(e.kind()),
            Error::Cache(_) => Some(ErrorKind::Cache),
            Error::Driver(_) | Error::Hydration(_) => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Cache(format!("cached result is not valid JSON: {}", e))
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;
