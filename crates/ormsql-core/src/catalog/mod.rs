//! Entity catalog for ORMSQL.
//!
//! The catalog stores metadata about entities, their columns, and relations. The
//! compiler reads it to expand whole-entity selections and to derive join conditions.

mod catalog;
mod column;
mod entity;
mod relation;
mod types;

pub use catalog::Catalog;
pub use column::{ColumnDef, ColumnRole};
pub use entity::{EntityDef, LifecycleRules, OrderBy, OrderDirection};
pub use relation::{Cardinality, JoinColumn, RelationDef};
pub use types::ScalarType;
