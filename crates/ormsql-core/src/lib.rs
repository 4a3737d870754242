//! ORMSQL Core - entity catalog, select query model, and dialect-aware SQL compiler.
//!
//! This crate is runtime-free: it builds and compiles queries but never talks to
//! a database. Execution lives in `ormsql-client`.

pub mod catalog;
pub mod error;
pub mod query;
pub mod value;

pub use catalog::{
    Cardinality, Catalog, ColumnDef, ColumnRole, EntityDef, JoinColumn, LifecycleRules, OrderBy,
    OrderDirection, RelationDef, ScalarType,
};
pub use error::{Error, ErrorKind, Result};
pub use query::{
    Brackets, Dialect, DialectKind, ExpressionMap, LockMode, LockVersion, NullsOrder, OnLocked,
    Predicate, ReplicationMode, SelectQueryBuilder,
};
pub use value::{RawRow, Value};
