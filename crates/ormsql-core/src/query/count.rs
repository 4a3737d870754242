//! Count and existence queries derived from a select.

use super::builder::SelectQueryBuilder;
use super::dialect::DistinctCount;
use super::expression::DISABLE_GLOBAL_ORDER;
use crate::error::{Error, Result};

/// Result column holding the count.
pub const COUNT_COLUMN: &str = "cnt";

/// Result column of the existence probe.
pub const EXISTS_COLUMN: &str = "row_exists";

/// Derived table used when the dialect has no dummy table.
const DUMMY_SUB_QUERY: &str = "(SELECT 1 AS dummy_column)";

/// Separator placed between concatenated key parts.
const KEY_SEPARATOR: &str = "'|;|'";

impl<'c> SelectQueryBuilder<'c> {
    /// Expression counting distinct main entities.
    ///
    /// Without joins or deferred relation loads every row is one entity and
    /// `COUNT(1)` suffices.
    pub fn count_expression(&self) -> Result<String> {
        let map = self.expression_map();
        if map.joins.is_empty()
            && map.relation_id_attributes.is_empty()
            && map.relation_count_attributes.is_empty()
        {
            return Ok("COUNT(1)".to_string());
        }

        let main = map.main_alias_name()?;
        let entity = self.main_entity()?.ok_or_else(|| {
            Error::InvalidArgument(format!(
                "distinct count requires \"{}\" to be an entity alias",
                main
            ))
        })?;
        let dialect = self.dialect();
        let keys: Vec<String> = entity
            .primary_columns()
            .map(|pk| format!("{}.{}", dialect.escape(main), dialect.escape(&pk.database_name)))
            .collect();
        if keys.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "entity \"{}\" has no primary key",
                entity.name
            )));
        }

        let single = keys.len() == 1;
        Ok(match dialect.capabilities().distinct_count {
            DistinctCount::TupleFunction => format!("COUNT(DISTINCT({}))", keys.join(", ")),
            DistinctCount::TupleConstruct => format!("COUNT(DISTINCT {})", keys.join(", ")),
            DistinctCount::ConcatFunction if single => format!("COUNT(DISTINCT({}))", keys[0]),
            DistinctCount::ConcatFunction => format!(
                "COUNT(DISTINCT(CONCAT({})))",
                keys.join(&format!(", {}, ", KEY_SEPARATOR))
            ),
            DistinctCount::CastConcatFunction if single => {
                format!("COUNT(DISTINCT({}))", keys[0])
            }
            DistinctCount::CastConcatFunction => format!(
                "COUNT(DISTINCT(CONCAT({})))",
                keys.iter()
                    .map(|k| format!("CAST({} AS STRING)", k))
                    .collect::<Vec<_>>()
                    .join(&format!(", {}, ", KEY_SEPARATOR))
            ),
            DistinctCount::ConcatOperator => format!(
                "COUNT(DISTINCT({}))",
                keys.join(&format!(" || {} || ", KEY_SEPARATOR))
            ),
        })
    }

    /// Query returning the number of distinct main entities in column `cnt`.
    ///
    /// Ordering, grouping and paging are dropped.
    pub fn count_query(&self) -> Result<Self> {
        if let Some(e) = self.pending_error() {
            return Err(e.clone());
        }
        let expression = self.count_expression()?;
        let mut counted = self.clone();
        {
            let map = counted.expression_map_mut();
            map.order_bys.clear();
            map.group_bys.clear();
            map.offset = None;
            map.limit = None;
            map.skip = None;
            map.take = None;
            map.query_entity = false;
        }
        Ok(counted
            .select_as(expression, COUNT_COLUMN)
            .set_option(DISABLE_GLOBAL_ORDER))
    }

    /// Query returning one row with column `row_exists` when this query matches anything.
    pub fn exists_query(&self) -> Result<Self> {
        if let Some(e) = self.pending_error() {
            return Err(e.clone());
        }
        let mut probe = self.clone();
        {
            let map = probe.expression_map_mut();
            map.order_bys.clear();
            map.group_bys.clear();
            map.offset = None;
            map.limit = None;
            map.skip = None;
            map.take = None;
            map.query_entity = false;
            map.is_subquery = false;
        }
        let probe = probe.select("1").set_option(DISABLE_GLOBAL_ORDER);
        let inner = probe.get_query()?;

        let dummy = self
            .dialect()
            .capabilities()
            .dummy_table
            .unwrap_or(DUMMY_SUB_QUERY);
        let mut exists = SelectQueryBuilder::new(self.catalog(), *self.dialect())
            .select_as("1", EXISTS_COLUMN)
            .from(dummy, "dummy_table")
            .where_(format!("EXISTS ({})", inner))
            .limit(1);
        {
            let source = self.expression_map();
            let map = exists.expression_map_mut();
            map.parameters = probe.get_parameters();
            map.parameter_index = source.parameter_index;
            map.cache = source.cache.clone();
            map.replication = source.replication;
            map.use_transaction = source.use_transaction;
        }
        Ok(exists)
    }
}
