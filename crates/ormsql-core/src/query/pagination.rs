//! Entity-aware pagination.
//!
//! With joins present a flat LIMIT counts joined rows, not parent entities. The
//! window query selects the distinct primary keys of one page from the joined
//! result; the full query is then restricted to those keys.

use super::builder::SelectQueryBuilder;
use super::compiler::effective_order_bys;
use super::expression::{OrderSpec, SelectItem, DISABLE_GLOBAL_ORDER};
use super::naming::{alias_column, property_column};
use crate::catalog::{ColumnDef, EntityDef, OrderDirection};
use crate::error::{Error, Result};
use crate::value::{RawRow, Value};

/// Alias of the derived table the window query selects from.
pub const DISTINCT_ALIAS: &str = "distinctAlias";

/// Suffix appended to the cache id of the window query.
pub const PAGINATION_CACHE_SUFFIX: &str = "-pagination";

/// One order key as seen from the window query.
struct WindowOrder {
    /// Key used in the window's ORDER BY.
    key: String,
    /// Column the window must select so DISTINCT can order by it.
    select: Option<String>,
    /// Column the inner query must add to its projection.
    projection: Option<SelectItem>,
}

impl WindowOrder {
    fn verbatim(key: &str) -> Self {
        Self {
            key: key.to_string(),
            select: None,
            projection: None,
        }
    }
}

impl<'c> SelectQueryBuilder<'c> {
    /// Whether skip/take must be applied through a window query.
    pub fn needs_window_query(&self) -> bool {
        let map = self.expression_map();
        map.has_skip_or_take() && !map.joins.is_empty()
    }

    fn paginated_entity(&self) -> Result<(&str, &'c EntityDef)> {
        let main = self.expression_map().main_alias_name()?;
        let entity = self.main_entity()?.ok_or_else(|| {
            Error::InvalidArgument(format!(
                "skip/take with joins requires \"{}\" to be an entity alias",
                main
            ))
        })?;
        Ok((main, entity))
    }

    /// Build the query that selects the primary keys of the requested page.
    ///
    /// Returns `None` when skip/take can be rendered directly.
    pub fn window_query(&self) -> Result<Option<SelectQueryBuilder<'c>>> {
        if let Some(e) = self.pending_error() {
            return Err(e.clone());
        }
        if !self.needs_window_query() {
            return Ok(None);
        }
        let (main, entity) = self.paginated_entity()?;
        let dialect = *self.dialect();
        let map = self.expression_map();

        let distinct = dialect.escape(DISTINCT_ALIAS);
        let key_selects: Vec<String> = entity
            .primary_columns()
            .map(|pk| {
                format!(
                    "{}.{} AS {}",
                    distinct,
                    dialect.escape(&alias_column(&dialect, main, &pk.database_name)),
                    dialect.escape(&alias_column(&dialect, &format!("ids_{}", main), &pk.database_name))
                )
            })
            .collect();

        let mut orders: Vec<(String, OrderSpec)> = Vec::new();
        let mut order_selects: Vec<String> = Vec::new();
        let mut inner_projections: Vec<SelectItem> = Vec::new();
        for (key, spec) in effective_order_bys(map, self.catalog())? {
            let order = self.window_order_key(&key)?;
            if let Some(select) = order.select {
                order_selects.push(select);
            }
            inner_projections.extend(order.projection);
            orders.push((order.key, spec));
        }
        for pk in entity.primary_columns() {
            let key = dialect.escape(&alias_column(&dialect, main, &pk.database_name));
            let qualified = format!("{}.{}", distinct, key);
            if !orders.iter().any(|(k, _)| *k == key || *k == qualified) {
                orders.push((key, OrderSpec::new(OrderDirection::Asc)));
            }
        }

        let mut inner = self.clone();
        {
            let inner_map = inner.expression_map_mut();
            inner_map.order_bys.clear();
            inner_map.options.insert(DISABLE_GLOBAL_ORDER.to_string());
            inner_map.time_travel = None;
            for projection in inner_projections {
                if !inner_map.selects.contains(&projection) {
                    inner_map.selects.push(projection);
                }
            }
        }
        let inner_sql = inner.get_query()?;

        let mut window = SelectQueryBuilder::new(self.catalog(), dialect)
            .select(format!("DISTINCT {}", key_selects.join(", ")))
            .add_select_many(order_selects)
            .from(&format!("({})", inner_sql), DISTINCT_ALIAS)
            .offset(map.skip)
            .limit(map.take);

        let mut cache = map.cache.clone();
        if let Some(id) = &cache.id {
            cache.id = Some(format!("{}{}", id, PAGINATION_CACHE_SUFFIX));
        }
        let parameters = self.get_parameters();
        {
            let window_map = window.expression_map_mut();
            window_map.order_bys = orders;
            window_map.cache = cache;
            window_map.time_travel = map.time_travel.clone();
            window_map.parameter_index = map.parameter_index;
            window_map.parameters = parameters;
            window_map.replication = map.replication;
        }
        Ok(Some(window))
    }

    /// Rewrite an order key to address the window's derived table.
    ///
    /// `alias.property` keys map to the inner result column, adding it to the
    /// inner projection when the selection does not already carry it; keys
    /// naming a select alias map to that column; other keys are kept verbatim.
    fn window_order_key(&self, key: &str) -> Result<WindowOrder> {
        let dialect = self.dialect();
        let distinct = dialect.escape(DISTINCT_ALIAS);
        let map = self.expression_map();

        if let Some((alias_name, property)) = key.split_once('.') {
            let alias = map.aliases.find_by_name(alias_name)?;
            let entity = match alias.entity() {
                Some(entity) => self.catalog().entity(entity)?,
                None => return Ok(WindowOrder::verbatim(key)),
            };
            let column = property_column(entity, property).ok_or_else(|| Error::UnknownColumn {
                entity: entity.name.clone(),
                column: property.to_string(),
            })?;
            let result_column = alias_column(dialect, alias_name, &column);
            let projection = (!self.projects_column(alias_name, entity, &column)).then(|| {
                let mut item = SelectItem::new(
                    format!("{}.{}", dialect.escape(alias_name), dialect.escape(&column)),
                    Some(result_column.clone()),
                );
                item.virtual_ = true;
                item
            });
            let rendered = format!("{}.{}", distinct, dialect.escape(&result_column));
            return Ok(WindowOrder {
                key: rendered.clone(),
                select: Some(rendered),
                projection,
            });
        }

        let selected = map
            .selects
            .iter()
            .any(|s| s.selection == key || s.alias_name.as_deref() == Some(key));
        if selected {
            let rendered = format!("{}.{}", distinct, dialect.escape(key));
            return Ok(WindowOrder {
                key: rendered.clone(),
                select: Some(rendered),
                projection: None,
            });
        }
        Ok(WindowOrder::verbatim(key))
    }

    /// Whether the compiled selection already yields `column` of `alias` under
    /// its default result name.
    fn projects_column(&self, alias: &str, entity: &EntityDef, column: &str) -> bool {
        let Some(def) = entity.columns.iter().find(|c| c.database_name == column) else {
            return false;
        };
        let selects = &self.expression_map().selects;
        let whole = def.selectable && selects.iter().any(|s| s.selection == alias);
        let path = format!("{}.{}", alias, def.property_path);
        whole
            || selects
                .iter()
                .any(|s| s.selection == path && s.alias_name.is_none())
    }

    /// Restrict this query to the keys returned by its window query.
    pub fn restrict_to_ids(&self, rows: &[RawRow]) -> Result<SelectQueryBuilder<'c>> {
        let (main, entity) = self.paginated_entity()?;
        let main = main.to_string();
        let dialect = *self.dialect();
        let primary: Vec<&ColumnDef> = entity.primary_columns().collect();
        let key_of = |pk: &ColumnDef| alias_column(&dialect, &format!("ids_{}", main), &pk.database_name);

        let mut restricted = self.clone();
        let map = restricted.expression_map_mut();

        let condition = if primary.len() > 1 {
            let groups: Vec<String> = rows
                .iter()
                .enumerate()
                .map(|(index, row)| {
                    primary
                        .iter()
                        .map(|pk| {
                            let name = format!("orm_distinct_ids_{}_{}", index, pk.database_name);
                            let value = row.get(&key_of(pk)).cloned().unwrap_or(Value::Null);
                            map.parameters.insert(name.clone(), value);
                            format!("{}.{}=:{}", main, pk.property_path, name)
                        })
                        .collect::<Vec<_>>()
                        .join(" AND ")
                })
                .collect();
            format!("({})", groups.join(" OR "))
        } else {
            let pk = primary.first().ok_or_else(|| {
                Error::InvalidArgument(format!("entity \"{}\" has no primary key", entity.name))
            })?;
            let key = key_of(pk);
            let ids: Vec<Value> = rows
                .iter()
                .map(|row| row.get(&key).cloned().unwrap_or(Value::Null))
                .collect();
            if ids.iter().all(Value::is_number) {
                let list = ids.iter().map(Value::to_string).collect::<Vec<_>>().join(", ");
                format!("{}.{} IN ({})", main, pk.property_path, list)
            } else {
                map.parameters
                    .insert("orm_distinct_ids".to_string(), Value::List(ids));
                format!("{}.{} IN (:...orm_distinct_ids)", main, pk.property_path)
            }
        };
        map.extra_appended_where = Some(condition);
        Ok(restricted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, ColumnDef, RelationDef, ScalarType};
    use crate::query::{Dialect, DialectKind};

    fn catalog() -> Catalog {
        let user = EntityDef::new("User", "users")
            .with_column(ColumnDef::primary("id", ScalarType::Int64))
            .with_column(ColumnDef::new("name", ScalarType::String))
            .with_relation(RelationDef::one_to_many("posts", "User", "Post", "author"));
        let post = EntityDef::new("Post", "posts")
            .with_column(ColumnDef::primary("id", ScalarType::Int64))
            .with_relation(
                RelationDef::many_to_one("author", "Post", "User").with_join_column("author_id", "id"),
            );
        Catalog::new(1).with_entity(user).with_entity(post)
    }

    fn paged(catalog: &Catalog) -> SelectQueryBuilder<'_> {
        SelectQueryBuilder::new(catalog, Dialect::new(DialectKind::Postgres))
            .select("user")
            .from("User", "user")
            .left_join_and_select("user.posts", "post", None)
            .order_by("user.name", OrderDirection::Asc)
            .skip(10)
            .take(5)
    }

    #[test]
    fn test_no_window_without_joins() {
        let catalog = catalog();
        let qb = SelectQueryBuilder::new(&catalog, Dialect::new(DialectKind::Postgres))
            .from("User", "user")
            .take(5);
        assert!(qb.window_query().unwrap().is_none());
        assert!(qb.get_query().unwrap().ends_with("LIMIT 5"));
    }

    #[test]
    fn test_window_query_shape() {
        let catalog = catalog();
        let qb = paged(&catalog);
        let window = qb.window_query().unwrap().unwrap();
        assert_eq!(window.expression_map().selects.len(), 2);

        let sql = window.get_query().unwrap();
        assert_eq!(
            sql,
            "SELECT DISTINCT \"distinctAlias\".\"user_id\" AS \"ids_user_id\", \"distinctAlias\".\"user_name\" \
             FROM (SELECT \"user\".\"id\" AS \"user_id\", \"user\".\"name\" AS \"user_name\", \"post\".\"id\" AS \"post_id\" \
             FROM \"users\" \"user\" LEFT JOIN \"posts\" \"post\" ON \"post\".\"author_id\"=\"user\".\"id\") \"distinctAlias\" \
             ORDER BY \"distinctAlias\".\"user_name\" ASC, \"user_id\" ASC LIMIT 5 OFFSET 10"
        );
    }

    #[test]
    fn test_window_orders_by_relation_join_column() {
        let catalog = catalog();
        let qb = SelectQueryBuilder::new(&catalog, Dialect::new(DialectKind::Postgres))
            .select("post")
            .from("Post", "post")
            .left_join_and_select("post.author", "author", None)
            .order_by("post.author", OrderDirection::Desc)
            .take(5);
        assert!(qb.get_query().unwrap().ends_with("ORDER BY \"post\".\"author_id\" DESC"));

        let window = qb.window_query().unwrap().unwrap();
        let sql = window.get_query().unwrap();
        assert!(sql.starts_with(
            "SELECT DISTINCT \"distinctAlias\".\"post_id\" AS \"ids_post_id\", \
             \"distinctAlias\".\"post_author_id\" FROM (SELECT "
        ));
        assert!(sql.contains(", \"post\".\"author_id\" AS \"post_author_id\" FROM \"posts\" \"post\""));
        assert!(sql.ends_with(
            "ORDER BY \"distinctAlias\".\"post_author_id\" DESC, \"post_id\" ASC LIMIT 5"
        ));
    }

    #[test]
    fn test_window_cache_id_suffix() {
        let catalog = catalog();
        let qb = paged(&catalog).cache_with_id("users-page", None);
        let window = qb.window_query().unwrap().unwrap();
        assert_eq!(
            window.expression_map().cache.id.as_deref(),
            Some("users-page-pagination")
        );
    }

    #[test]
    fn test_restrict_to_numeric_ids_inlines_values() {
        let catalog = catalog();
        let rows: Vec<RawRow> = [3, 7]
            .iter()
            .map(|id| RawRow::from([("ids_user_id".to_string(), Value::from(*id))]))
            .collect();
        let restricted = paged(&catalog).restrict_to_ids(&rows).unwrap();
        let sql = restricted.get_query().unwrap();
        assert!(sql.contains("WHERE \"user\".\"id\" IN (3, 7)"));
        // joins are present, so skip/take do not render as LIMIT
        assert!(!sql.contains("LIMIT"));
    }

    #[test]
    fn test_restrict_to_string_ids_uses_parameter() {
        let catalog = catalog();
        let rows = vec![RawRow::from([("ids_user_id".to_string(), Value::from("a"))])];
        let restricted = paged(&catalog).restrict_to_ids(&rows).unwrap();
        let sql = restricted.get_query().unwrap();
        assert!(sql.contains("IN (:...orm_distinct_ids)"));
        assert_eq!(
            restricted.get_parameters().get("orm_distinct_ids"),
            Some(&Value::List(vec![Value::from("a")]))
        );
    }
}
