//! Hydration seam.
//!
//! The executor hands raw rows to a [`Hydrator`], which turns them into the
//! caller's entity type. Deferred relation-id and relation-count loads run
//! first, on the same runner, so their results can be folded in.

use async_trait::async_trait;
use ormsql_core::{Catalog, ColumnDef, Dialect, ExpressionMap, RawRow, Value};

use crate::driver::QueryRunner;
use crate::error::Result;

/// What a hydrator sees of the executed query.
#[derive(Debug, Clone, Copy)]
pub struct HydrationContext<'a> {
    /// The query that produced the rows.
    pub map: &'a ExpressionMap,
    /// Schema the query was built against.
    pub catalog: &'a Catalog,
    /// Dialect the query was compiled for.
    pub dialect: &'a Dialect,
}

/// Rows returned by deferred relation loads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadedRelations {
    /// One row set per relation-id attribute, in declaration order.
    pub relation_ids: Vec<Vec<RawRow>>,
    /// One row set per relation-count attribute, in declaration order.
    pub relation_counts: Vec<Vec<RawRow>>,
}

/// Turns raw rows into entities.
#[async_trait]
pub trait Hydrator: Send + Sync {
    /// Entity type produced.
    type Entity: Send;

    /// Load ids for the query's `load_relation_id_and_map` attributes.
    async fn load_relation_ids(
        &self,
        _runner: &dyn QueryRunner,
        _ctx: &HydrationContext<'_>,
        _rows: &[RawRow],
    ) -> Result<Vec<Vec<RawRow>>> {
        Ok(Vec::new())
    }

    /// Load counts for the query's `load_relation_count_and_map` attributes.
    async fn load_relation_counts(
        &self,
        _runner: &dyn QueryRunner,
        _ctx: &HydrationContext<'_>,
        _rows: &[RawRow],
    ) -> Result<Vec<Vec<RawRow>>> {
        Ok(Vec::new())
    }

    /// Build entities from the rows of the main alias.
    fn transform(
        &self,
        ctx: &HydrationContext<'_>,
        rows: &[RawRow],
        relations: &LoadedRelations,
    ) -> Result<Vec<Self::Entity>>;

    /// Read a column back from a built entity.
    ///
    /// `key` is the result column the value was selected as.
    fn column_value(&self, entity: &Self::Entity, column: &ColumnDef, key: &str) -> Option<Value>;

    /// Called once after entities of a catalog-backed alias are built.
    async fn after_load(&self, _entities: &[Self::Entity]) -> Result<()> {
        Ok(())
    }
}

/// Hydrator that returns the raw rows unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawHydrator;

#[async_trait]
impl Hydrator for RawHydrator {
    type Entity = RawRow;

    fn transform(
        &self,
        _ctx: &HydrationContext<'_>,
        rows: &[RawRow],
        _relations: &LoadedRelations,
    ) -> Result<Vec<RawRow>> {
        Ok(rows.to_vec())
    }

    fn column_value(&self, entity: &RawRow, _column: &ColumnDef, key: &str) -> Option<Value> {
        entity.get(key).cloned()
    }
}
