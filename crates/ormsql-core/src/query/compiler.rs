//! Clause compilers.
//!
//! A query is rendered in a fixed clause order: comment, SELECT (with FROM),
//! JOIN, WHERE, GROUP BY, HAVING, ORDER BY, LIMIT/OFFSET and lock. Each clause
//! reads the expression map and the dialect capability row; nothing here
//! mutates the model, so compiling the same model twice yields the same text.

use tracing::trace;

use super::alias::{Alias, AliasTarget};
use super::condition::render_conditions;
use super::dialect::{Dialect, LimitSyntax, LockSyntax};
use super::expression::{ExpressionMap, JoinAttribute, JoinTarget, OrderSpec, DISABLE_GLOBAL_ORDER};
use super::naming::{alias_column, replace_property_names};
use crate::catalog::{Catalog, ColumnDef, EntityDef, JoinColumn, RelationDef};
use crate::error::{Error, Result};

/// Compile an expression map into SQL with named placeholders.
pub fn compile(map: &ExpressionMap, catalog: &Catalog, dialect: &Dialect) -> Result<String> {
    QueryCompiler::new(map, catalog, dialect).compile()
}

/// Ordering actually applied: explicit keys, or the main entity's default order
/// unless `disable-global-order` is set.
pub fn effective_order_bys(
    map: &ExpressionMap,
    catalog: &Catalog,
) -> Result<Vec<(String, OrderSpec)>> {
    if !map.order_bys.is_empty() || map.has_option(DISABLE_GLOBAL_ORDER) {
        return Ok(map.order_bys.clone());
    }
    let Some(main) = map.main_alias.as_deref() else {
        return Ok(Vec::new());
    };
    let alias = map.aliases.find_by_name(main)?;
    let Some(entity) = alias.entity() else {
        return Ok(Vec::new());
    };
    let entity = catalog.entity(entity)?;
    Ok(entity
        .lifecycle
        .default_order
        .iter()
        .flatten()
        .map(|order| {
            (
                format!("{}.{}", main, order.field),
                OrderSpec::new(order.direction),
            )
        })
        .collect())
}

struct QueryCompiler<'a> {
    map: &'a ExpressionMap,
    catalog: &'a Catalog,
    dialect: &'a Dialect,
}

impl<'a> QueryCompiler<'a> {
    fn new(map: &'a ExpressionMap, catalog: &'a Catalog, dialect: &'a Dialect) -> Self {
        Self {
            map,
            catalog,
            dialect,
        }
    }

    fn compile(&self) -> Result<String> {
        let main = self.main_alias()?;
        let mut sql = self.comment_expression();
        sql.push_str(&self.select_expression(main)?);
        sql.push_str(&self.join_expression()?);
        sql.push_str(&self.where_expression(main)?);
        sql.push_str(&self.group_by_expression());
        sql.push_str(&self.having_expression());
        let order_bys = effective_order_bys(self.map, self.catalog)?;
        sql.push_str(&self.order_by_expression(&order_bys));
        sql.push_str(&self.limit_offset_expression(&order_bys)?);
        sql.push_str(&self.lock_expression()?);

        let trimmed = sql.trim();
        let sql = if self.map.is_subquery {
            format!("({})", trimmed)
        } else {
            trimmed.to_string()
        };
        let sql = replace_property_names(&sql, &self.map.aliases, self.catalog, self.dialect);
        trace!(dialect = %self.dialect.kind(), sql = %sql, "Compiled query");
        Ok(sql)
    }

    fn main_alias(&self) -> Result<&'a Alias> {
        let name = self.map.main_alias_name()?;
        self.map.aliases.find_by_name(name)
    }

    fn entity(&self, name: Option<&str>) -> Result<Option<&'a EntityDef>> {
        name.map(|n| self.catalog.entity(n)).transpose()
    }

    fn escape(&self, name: &str) -> String {
        self.dialect.escape(name)
    }

    fn column_ref(&self, alias: &str, column: &str) -> String {
        format!("{}.{}", self.escape(alias), self.escape(column))
    }

    fn comment_expression(&self) -> String {
        match &self.map.comment {
            Some(comment) if !comment.is_empty() => {
                format!("/* {} */ ", comment.replace("*/", ""))
            }
            _ => String::new(),
        }
    }

    fn distinct_expression(&self) -> String {
        let caps = self.dialect.capabilities();
        let mut select = String::from("SELECT ");
        if let Some(ms) = self.map.max_execution_time.filter(|ms| *ms > 0) {
            if caps.execution_time_hint {
                select.push_str(&format!("/*+ MAX_EXECUTION_TIME({}) */ ", ms));
            }
        }
        if caps.distinct_on && !self.map.distinct_on.is_empty() {
            select.push_str(&format!("DISTINCT ON ({}) ", self.map.distinct_on.join(", ")));
        } else if self.map.distinct {
            select.push_str("DISTINCT ");
        }
        select
    }

    /// Table hint appended after every FROM and JOIN target.
    fn table_hint(&self) -> Result<&'static str> {
        match self.dialect.lock_syntax(self.map.lock_mode)? {
            Some(LockSyntax::TableHint(hint)) => Ok(hint),
            _ => Ok(""),
        }
    }

    fn select_expression(&self, main: &Alias) -> Result<String> {
        let selects = &self.map.selects;
        let mut all: Vec<(String, Option<String>)> = Vec::new();
        let mut excluded = vec![false; selects.len()];

        if let Some(entity) = self.entity(main.entity())? {
            all.extend(self.entity_column_selects(&main.name, entity));
            self.mark_entity_selects(&main.name, entity, &mut excluded);
        }

        for join in &self.map.joins {
            if let Some(entity) = self.entity(join.entity.as_deref())? {
                all.extend(self.entity_column_selects(&join.alias, entity));
                self.mark_entity_selects(&join.alias, entity, &mut excluded);
            } else if let Some(index) = selects.iter().position(|s| s.selection == join.alias) {
                all.push((format!("{}.*", self.escape(&join.alias)), None));
                excluded[index] = true;
            }
        }

        for (index, select) in selects.iter().enumerate() {
            if !excluded[index] {
                all.push((select.selection.clone(), select.alias_name.clone()));
            }
        }

        if all.is_empty() {
            all.push(("*".to_string(), None));
        }

        let hint = self.table_hint()?;
        let froms = self
            .map
            .aliases
            .from_aliases()
            .map(|alias| {
                let target = self.target_sql(&alias.target)?;
                Ok(format!("{} {}{}", target, self.escape(&alias.name), hint))
            })
            .collect::<Result<Vec<_>>>()?;

        let use_index = match &self.map.use_index {
            Some(index) if self.dialect.capabilities().index_hints => {
                format!(" USE INDEX ({})", index)
            }
            _ => String::new(),
        };

        let selection = all
            .iter()
            .map(|(selection, alias)| match alias {
                Some(alias) => format!("{} AS {}", selection, self.escape(alias)),
                None => selection.clone(),
            })
            .collect::<Vec<_>>()
            .join(", ");

        Ok(format!(
            "{}{} FROM {}{}",
            self.distinct_expression(),
            selection,
            froms.join(", "),
            use_index
        ))
    }

    fn target_sql(&self, target: &AliasTarget) -> Result<String> {
        Ok(match target {
            AliasTarget::Table(path) => self.dialect.escape_table_path(path),
            AliasTarget::SubQuery(sql) => sql.clone(),
            AliasTarget::Entity(name) => self
                .dialect
                .escape_table_path(&self.catalog.entity(name)?.table_path),
        })
    }

    /// Columns selected for `alias`, expanded from whole-alias and `alias.property` selections.
    fn entity_column_selects(&self, alias: &str, entity: &EntityDef) -> Vec<(String, Option<String>)> {
        let selects = &self.map.selects;
        let whole = selects.iter().any(|s| s.selection == alias);
        let is_selected = |column: &ColumnDef| {
            let path = format!("{}.{}", alias, column.property_path);
            selects.iter().any(|s| s.selection == path)
        };

        let mut columns: Vec<&ColumnDef> = Vec::new();
        if whole {
            columns.extend(entity.selectable_columns());
        }
        for column in &entity.columns {
            if is_selected(column) && !columns.iter().any(|c| c.property_path == column.property_path) {
                columns.push(column);
            }
        }
        if columns.is_empty() {
            return Vec::new();
        }
        if self.map.query_entity {
            let missing: Vec<&ColumnDef> = entity
                .primary_columns()
                .filter(|pk| !columns.iter().any(|c| c.property_path == pk.property_path))
                .collect();
            columns.extend(missing);
        }

        let mut out = Vec::new();
        for column in columns {
            let mut path = self.column_ref(alias, &column.database_name);
            if column.is_spatial() {
                path = self.dialect.project_spatial(&path, column.precision);
            }
            let default_alias = alias_column(self.dialect, alias, &column.database_name);
            let property = format!("{}.{}", alias, column.property_path);
            let explicit: Vec<_> = selects.iter().filter(|s| s.selection == property).collect();
            if explicit.is_empty() {
                out.push((path, Some(default_alias)));
            } else {
                for select in explicit {
                    let name = select.alias_name.clone().unwrap_or_else(|| default_alias.clone());
                    out.push((path.clone(), Some(name)));
                }
            }
        }
        out
    }

    fn mark_entity_selects(&self, alias: &str, entity: &EntityDef, excluded: &mut [bool]) {
        for (index, select) in self.map.selects.iter().enumerate() {
            let matches = select.selection == alias
                || entity
                    .columns
                    .iter()
                    .any(|c| select.selection == format!("{}.{}", alias, c.property_path));
            if matches {
                excluded[index] = true;
            }
        }
    }

    fn soft_delete_condition(&self, alias: &str, entity: &EntityDef) -> Option<String> {
        if self.map.with_deleted {
            return None;
        }
        entity
            .delete_date_column()
            .map(|column| format!("{}.{} IS NULL", alias, column.property_path))
    }

    fn join_expression(&self) -> Result<String> {
        let hint = self.table_hint()?;
        let joins = self
            .map
            .joins
            .iter()
            .map(|join| self.render_join(join, hint))
            .collect::<Result<Vec<_>>>()?;
        Ok(joins.concat())
    }

    fn render_join(&self, join: &JoinAttribute, hint: &str) -> Result<String> {
        let direction = join.direction.as_sql();
        let alias = self.escape(&join.alias);

        let soft_delete = match self.entity(join.entity.as_deref())? {
            Some(entity) => self.soft_delete_condition(&join.alias, entity),
            None => None,
        };
        let condition = match (join.condition.as_deref(), soft_delete) {
            (Some(user), Some(soft)) => Some(format!("{} AND {}", user, soft)),
            (Some(user), None) => Some(user.to_string()),
            (None, soft) => soft,
        };

        let (parent_alias, entity_name, property) = match &join.target {
            JoinTarget::Table(path) => {
                let target = self.dialect.escape_table_path(path);
                return Ok(direct_join(direction, &target, &alias, hint, condition));
            }
            JoinTarget::SubQuery(sql) => {
                return Ok(direct_join(direction, sql, &alias, hint, condition));
            }
            JoinTarget::Entity(name) => {
                let target = self
                    .dialect
                    .escape_table_path(&self.catalog.entity(name)?.table_path);
                return Ok(direct_join(direction, &target, &alias, hint, condition));
            }
            JoinTarget::Relation {
                parent_alias,
                entity,
                property,
            } => (parent_alias, entity, property),
        };

        let parent = self.catalog.entity(entity_name)?;
        let relation = parent.relation(property)?;
        let target = self.catalog.entity(&relation.target)?;
        let table = self.dialect.escape_table_path(&target.table_path);
        let mut appended = condition
            .map(|c| format!(" AND ({})", c))
            .unwrap_or_default();

        if relation.is_many_to_one_or_one_to_one_owner() {
            let on = self.column_pairs(relation, &relation.join_columns, |jc| {
                Ok(format!(
                    "{}={}",
                    self.column_ref(&join.alias, &self.referenced(target, jc)?),
                    self.column_ref(parent_alias, &jc.name)
                ))
            })?;
            return Ok(format!(
                " {} JOIN {} {}{} ON {}{}",
                direction, table, alias, hint, on, appended
            ));
        }

        if relation.is_one_to_many_or_one_to_one_inverse() {
            let inverse = self.catalog.inverse_relation(relation)?;
            let on = self.column_pairs(relation, &inverse.join_columns, |jc| {
                Ok(format!(
                    "{}={}",
                    self.column_ref(&join.alias, &jc.name),
                    self.column_ref(parent_alias, &self.referenced(parent, jc)?)
                ))
            })?;
            if target.is_child() {
                if let (Some(column), Some(value)) =
                    (target.discriminator_column(), target.discriminator_value.as_deref())
                {
                    appended.push_str(&format!(
                        " AND {}='{}'",
                        self.column_ref(&join.alias, &column.database_name),
                        value.replace('\'', "''")
                    ));
                }
            }
            return Ok(format!(
                " {} JOIN {} {}{} ON {}{}",
                direction, table, alias, hint, on, appended
            ));
        }

        // many-to-many: junction joined to the parent, destination joined to the junction
        let junction_alias = join
            .junction_alias
            .as_deref()
            .ok_or_else(|| Error::MissingJoinColumns {
                entity: relation.entity.clone(),
                relation: relation.property_name.clone(),
            })?;
        let junction_table = self
            .dialect
            .escape_table_path(&self.catalog.junction_table(relation)?);
        let (to_parent, to_target) = if relation.owning {
            (&relation.join_columns, &relation.inverse_join_columns)
        } else {
            let inverse = self.catalog.inverse_relation(relation)?;
            (&inverse.inverse_join_columns, &inverse.join_columns)
        };
        let junction_on = self.column_pairs(relation, to_parent, |jc| {
            Ok(format!(
                "{}={}",
                self.column_ref(junction_alias, &jc.name),
                self.column_ref(parent_alias, &self.referenced(parent, jc)?)
            ))
        })?;
        let destination_on = self.column_pairs(relation, to_target, |jc| {
            Ok(format!(
                "{}={}",
                self.column_ref(&join.alias, &self.referenced(target, jc)?),
                self.column_ref(junction_alias, &jc.name)
            ))
        })?;

        Ok(format!(
            " {dir} JOIN {junction} {jalias}{hint} ON {jon} {dir} JOIN {table} {alias}{hint} ON {don}{appended}",
            dir = direction,
            junction = junction_table,
            jalias = self.escape(junction_alias),
            hint = hint,
            jon = junction_on,
            table = table,
            alias = alias,
            don = destination_on,
            appended = appended,
        ))
    }

    /// Database name of the column a join column references on `entity`.
    fn referenced(&self, entity: &EntityDef, join_column: &JoinColumn) -> Result<String> {
        Ok(entity.column(&join_column.referenced)?.database_name.clone())
    }

    fn column_pairs<F>(&self, relation: &RelationDef, columns: &[JoinColumn], render: F) -> Result<String>
    where
        F: Fn(&JoinColumn) -> Result<String>,
    {
        if columns.is_empty() {
            return Err(Error::MissingJoinColumns {
                entity: relation.entity.clone(),
                relation: relation.property_name.clone(),
            });
        }
        Ok(columns
            .iter()
            .map(render)
            .collect::<Result<Vec<_>>>()?
            .join(" AND "))
    }

    fn where_expression(&self, main: &Alias) -> Result<String> {
        let mut conditions = Vec::new();

        let wheres = render_conditions(&self.map.wheres);
        if !wheres.is_empty() && wheres != "1=1" {
            conditions.push(wheres);
        }

        if let Some(entity) = self.entity(main.entity())? {
            if let Some(soft) = self.soft_delete_condition(&main.name, entity) {
                conditions.push(soft);
            }
            if entity.is_child() {
                if let Some(column) = entity.discriminator_column() {
                    conditions.push(format!(
                        "{}.{} IN (:...discriminator_values)",
                        main.name, column.property_path
                    ));
                }
            }
        }

        if let Some(extra) = &self.map.extra_appended_where {
            conditions.push(extra.clone());
        }

        let mut sql = String::new();
        if let Some(expr) = &self.map.time_travel {
            if self.dialect.capabilities().time_travel {
                sql.push_str(&format!(" AS OF SYSTEM TIME {}", expr));
            }
        }
        match conditions.len() {
            0 => {}
            1 => sql.push_str(&format!(" WHERE {}", conditions[0])),
            _ => sql.push_str(&format!(" WHERE ( {} )", conditions.join(" ) AND ( "))),
        }
        Ok(sql)
    }

    fn group_by_expression(&self) -> String {
        if self.map.group_bys.is_empty() {
            return String::new();
        }
        format!(" GROUP BY {}", self.map.group_bys.join(", "))
    }

    fn having_expression(&self) -> String {
        let having = render_conditions(&self.map.havings);
        if having.is_empty() {
            return String::new();
        }
        format!(" HAVING {}", having)
    }

    fn order_by_expression(&self, order_bys: &[(String, OrderSpec)]) -> String {
        if order_bys.is_empty() {
            return String::new();
        }
        let keys = order_bys
            .iter()
            .map(|(sort, spec)| format!("{} {}", sort, spec.to_sql()))
            .collect::<Vec<_>>()
            .join(", ");
        format!(" ORDER BY {}", keys)
    }

    fn limit_offset_expression(&self, order_bys: &[(String, OrderSpec)]) -> Result<String> {
        let map = self.map;
        let mut limit = map.limit.filter(|n| *n > 0);
        let mut offset = map.offset.filter(|n| *n > 0);
        if limit.is_none() && offset.is_none() && map.joins.is_empty() {
            limit = map.take.filter(|n| *n > 0);
            offset = map.skip.filter(|n| *n > 0);
        }

        let syntax = self.dialect.capabilities().limit_syntax;
        if let LimitSyntax::OffsetFetch { requires_order } = syntax {
            let prefix = if requires_order && (limit.is_some() || offset.is_some()) && order_bys.is_empty() {
                " ORDER BY (SELECT NULL)"
            } else {
                ""
            };
            return Ok(match (limit, offset) {
                (Some(l), Some(o)) => format!("{} OFFSET {} ROWS FETCH NEXT {} ROWS ONLY", prefix, o, l),
                (Some(l), None) if requires_order => {
                    format!("{} OFFSET 0 ROWS FETCH NEXT {} ROWS ONLY", prefix, l)
                }
                (Some(l), None) => format!(" FETCH NEXT {} ROWS ONLY", l),
                (None, Some(o)) => format!("{} OFFSET {} ROWS", prefix, o),
                (None, None) => String::new(),
            });
        }

        Ok(match (limit, offset) {
            (Some(l), Some(o)) => format!(" LIMIT {} OFFSET {}", l, o),
            (Some(l), None) => format!(" LIMIT {}", l),
            (None, Some(o)) => match syntax {
                LimitSyntax::LimitOffsetRequiresLimit => {
                    return Err(Error::OffsetWithoutLimit(self.dialect.kind()))
                }
                LimitSyntax::LimitAllOffset => format!(" LIMIT -1 OFFSET {}", o),
                _ => format!(" OFFSET {}", o),
            },
            (None, None) => String::new(),
        })
    }

    fn lock_expression(&self) -> Result<String> {
        let lock_tables = match &self.map.lock_tables {
            None => String::new(),
            Some(_) if !self.dialect.capabilities().lock_tables => {
                return Err(Error::LockTablesNotSupported(self.dialect.kind()))
            }
            Some(tables) if tables.is_empty() => {
                return Err(Error::InvalidArgument(
                    "lock tables cannot be an empty list".to_string(),
                ))
            }
            Some(tables) => format!(" OF {}", tables.join(", ")),
        };

        let mode = self.map.lock_mode;
        Ok(match self.dialect.lock_syntax(mode)? {
            None | Some(LockSyntax::TableHint(_)) => String::new(),
            Some(LockSyntax::Fixed(clause)) => clause.to_string(),
            Some(LockSyntax::RowLock(clause)) => {
                let suffix = self.dialect.on_locked_suffix(mode, self.map.on_locked)?;
                format!("{}{}{}", clause, lock_tables, suffix)
            }
            Some(LockSyntax::RowLockWithSuffix(clause, suffix)) => {
                format!("{}{}{}", clause, lock_tables, suffix)
            }
        })
    }
}

fn direct_join(
    direction: &str,
    target: &str,
    alias: &str,
    hint: &str,
    condition: Option<String>,
) -> String {
    let on = condition
        .map(|c| format!(" ON {}", c))
        .unwrap_or_default();
    format!(" {} JOIN {} {}{}{}", direction, target, alias, hint, on)
}
