//! Core error types.

use thiserror::Error;

use crate::query::{DialectKind, LockMode};

/// Broad classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The query model is incomplete or references something that does not exist.
    Configuration,
    /// A caller-supplied argument was rejected.
    Validation,
    /// The active dialect cannot express the requested feature.
    UnsupportedFeature,
    /// A locking precondition or version check failed.
    ConcurrencyViolation,
    /// The entity schema lacks something the query requires.
    Schema,
    /// A required row was not found.
    NotFound,
    /// The result cache failed.
    Cache,
}

/// Core query errors.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// No main alias was set with `from`.
    #[error("main alias is not set, use `from` to set one")]
    MissingMainAlias,

    /// Alias lookup failed.
    #[error("\"{0}\" alias was not found, maybe you forgot to join it?")]
    UnknownAlias(String),

    /// Alias name already registered in this query.
    #[error("alias \"{0}\" is already used in this query")]
    DuplicateAlias(String),

    /// Entity missing from the catalog.
    #[error("entity \"{0}\" is not registered in the catalog")]
    UnknownEntity(String),

    /// Relation missing on an entity.
    #[error("relation \"{relation}\" was not found on entity \"{entity}\"")]
    UnknownRelation {
        /// Entity that was searched.
        entity: String,
        /// Relation property name.
        relation: String,
    },

    /// Column missing on an entity.
    #[error("column \"{column}\" was not found on entity \"{entity}\"")]
    UnknownColumn {
        /// Entity that was searched.
        entity: String,
        /// Column property path.
        column: String,
    },

    /// Relation declares no join columns to build a condition from.
    #[error("relation {entity}.{relation} does not have join columns")]
    MissingJoinColumns {
        /// Entity that owns the relation.
        entity: String,
        /// Relation property name.
        relation: String,
    },

    /// Invalid argument passed to a builder method.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Lock mode not available on the dialect.
    #[error("{mode} lock is not supported by {dialect}")]
    LockNotSupported {
        /// Active dialect.
        dialect: DialectKind,
        /// Requested lock mode.
        mode: LockMode,
    },

    /// `FOR UPDATE OF ...` table scoping not available on the dialect.
    #[error("lock tables are not supported by {0}")]
    LockTablesNotSupported(DialectKind),

    /// OFFSET without LIMIT cannot be expressed on the dialect.
    #[error("offset without limit is not supported by {0}, use limit together with offset")]
    OffsetWithoutLimit(DialectKind),

    /// Pessimistic lock requested outside of a transaction.
    #[error("an open transaction is required for pessimistic lock")]
    PessimisticLockTransactionRequired,

    /// Optimistic lock version check failed.
    #[error("the optimistic lock on entity {entity} failed, version {expected} was expected, but is actually {actual}")]
    OptimisticLockVersionMismatch {
        /// Entity name.
        entity: String,
        /// Version stored on the query.
        expected: String,
        /// Version found on the loaded row.
        actual: String,
    },

    /// Optimistic lock requested on an entity without version tracking.
    #[error("entity {0} does not have a version or update date column, required for optimistic lock")]
    NoVersionOrUpdateDateColumn(String),

    /// Optimistic lock requested for a result shape that cannot be version checked.
    #[error("the optimistic lock can be used only with get_one() method")]
    OptimisticLockCanNotBeUsed,

    /// Required entity was not found.
    #[error("could not find any entity of type \"{0}\" matching the query")]
    EntityNotFound(String),

    /// Result cache failure.
    #[error("cache error: {0}")]
    Cache(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::MissingMainAlias
            | Error::UnknownAlias(_)
            | Error::DuplicateAlias(_)
            | Error::UnknownEntity(_)
            | Error::UnknownRelation { .. }
            | Error::UnknownColumn { .. }
            | Error::MissingJoinColumns { .. } => ErrorKind::Configuration,
            Error::InvalidArgument(_) => ErrorKind::Validation,
            Error::LockNotSupported { .. }
            | Error::LockTablesNotSupported(_)
            | Error::OffsetWithoutLimit(_) => ErrorKind::UnsupportedFeature,
            Error::PessimisticLockTransactionRequired
            | Error::OptimisticLockVersionMismatch { .. }
            | Error::OptimisticLockCanNotBeUsed => ErrorKind::ConcurrencyViolation,
            Error::NoVersionOrUpdateDateColumn(_) => ErrorKind::Schema,
            Error::EntityNotFound(_) => ErrorKind::NotFound,
            Error::Cache(_) | Error::Serialization(_) => ErrorKind::Cache,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Result alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(Error::MissingMainAlias.kind(), ErrorKind::Configuration);
        assert_eq!(
            Error::InvalidArgument("limit".into()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            Error::OffsetWithoutLimit(DialectKind::MySql).kind(),
            ErrorKind::UnsupportedFeature
        );
        assert_eq!(
            Error::PessimisticLockTransactionRequired.kind(),
            ErrorKind::ConcurrencyViolation
        );
        assert_eq!(
            Error::NoVersionOrUpdateDateColumn("Post".into()).kind(),
            ErrorKind::Schema
        );
        assert_eq!(
            Error::EntityNotFound("Post".into()).kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn test_lock_error_message() {
        let err = Error::LockNotSupported {
            dialect: DialectKind::Sqlite,
            mode: LockMode::PessimisticWrite,
        };
        assert_eq!(err.to_string(), "pessimistic_write lock is not supported by sqlite");
    }
}
