//! Fluent SELECT builder.
//!
//! `SelectQueryBuilder` owns one [`ExpressionMap`] and exposes consuming `with`-style
//! mutators. Resolution problems found while mutating (unknown aliases,
//! relations or columns) do not abort the chain: the first one is kept and
//! returned by [`SelectQueryBuilder::get_query`].

use std::collections::BTreeMap;
use std::time::Duration;

use super::alias::{AliasKind, AliasTarget};
use super::compiler::compile;
use super::condition::{Brackets, Combinator, Condition, Predicate, WhereClause};
use super::dialect::Dialect;
use super::expression::{
    ExpressionMap, JoinAttribute, JoinDirection, JoinTarget, LockMode, LockVersion, NullsOrder,
    OnLocked, OrderSpec, RelationCountAttribute, RelationIdAttribute, ReplicationMode, SelectItem,
};
use super::parameters::expand_parameters;
use crate::catalog::{Cardinality, Catalog, EntityDef, OrderDirection};
use crate::error::{Error, Result};
use crate::value::Value;

/// Parameter holding the discriminator values of an inheritance child.
pub const DISCRIMINATOR_PARAMETER: &str = "discriminator_values";

/// Builder for one SELECT statement against a catalog and dialect.
#[derive(Debug, Clone)]
pub struct SelectQueryBuilder<'c> {
    catalog: &'c Catalog,
    dialect: Dialect,
    map: ExpressionMap,
    pending_error: Option<Error>,
}

impl<'c> SelectQueryBuilder<'c> {
    /// Create an empty builder.
    pub fn new(catalog: &'c Catalog, dialect: impl Into<Dialect>) -> Self {
        Self {
            catalog,
            dialect: dialect.into(),
            map: ExpressionMap::new(),
            pending_error: None,
        }
    }

    /// Catalog used for resolution.
    pub fn catalog(&self) -> &'c Catalog {
        self.catalog
    }

    /// Active dialect.
    pub fn dialect(&self) -> &Dialect {
        &self.dialect
    }

    /// The underlying expression map.
    pub fn expression_map(&self) -> &ExpressionMap {
        &self.map
    }

    /// Mutable access to the expression map.
    pub fn expression_map_mut(&mut self) -> &mut ExpressionMap {
        &mut self.map
    }

    /// First resolution error recorded while building, if any.
    pub fn pending_error(&self) -> Option<&Error> {
        self.pending_error.as_ref()
    }

    fn fail(&mut self, error: Error) {
        if self.pending_error.is_none() {
            self.pending_error = Some(error);
        }
    }

    /// Entity behind the main alias, when it has one.
    pub fn main_entity(&self) -> Result<Option<&'c EntityDef>> {
        let name = self.map.main_alias_name()?;
        let alias = self.map.aliases.find_by_name(name)?;
        alias.entity().map(|e| self.catalog.entity(e)).transpose()
    }

    // ---- sub-queries -------------------------------------------------------

    /// Create a detached sub-query builder sharing this builder's catalog and dialect.
    pub fn sub_query(&self) -> Self {
        let mut sub = Self::new(self.catalog, self.dialect);
        sub.map.is_subquery = true;
        sub.map.parameter_index = self.map.parameter_index;
        sub
    }

    /// Build a sub-query, merge its parameters into this builder, and return its SQL.
    ///
    /// Intended for `where_with` callbacks that embed a sub-query in a predicate.
    pub fn create_sub_query_sql<F>(&mut self, factory: F) -> String
    where
        F: FnOnce(SelectQueryBuilder<'c>) -> SelectQueryBuilder<'c>,
    {
        let sub = factory(self.sub_query());
        self.absorb(&sub);
        match sub.get_query() {
            Ok(sql) => sql,
            Err(e) => {
                self.fail(e);
                String::new()
            }
        }
    }

    fn absorb(&mut self, sub: &SelectQueryBuilder<'c>) {
        for (name, value) in &sub.map.parameters {
            self.map.parameters.insert(name.clone(), value.clone());
        }
        self.map.parameter_index = self.map.parameter_index.max(sub.map.parameter_index);
        if let Some(e) = &sub.pending_error {
            self.fail(e.clone());
        }
    }

    // ---- selection ---------------------------------------------------------

    /// Replace the selection with one expression.
    pub fn select(mut self, selection: impl Into<String>) -> Self {
        self.map.selects = vec![SelectItem::new(selection, None)];
        self
    }

    /// Replace the selection with one aliased expression.
    pub fn select_as(mut self, selection: impl Into<String>, alias: impl Into<String>) -> Self {
        self.map.selects = vec![SelectItem::new(selection, Some(alias.into()))];
        self
    }

    /// Replace the selection with several expressions.
    pub fn select_many<I, S>(mut self, selections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.map.selects = selections
            .into_iter()
            .map(|s| SelectItem::new(s, None))
            .collect();
        self
    }

    /// Append an expression to the selection.
    pub fn add_select(mut self, selection: impl Into<String>) -> Self {
        self.map.selects.push(SelectItem::new(selection, None));
        self
    }

    /// Append an aliased expression to the selection.
    pub fn add_select_as(mut self, selection: impl Into<String>, alias: impl Into<String>) -> Self {
        self.map
            .selects
            .push(SelectItem::new(selection, Some(alias.into())));
        self
    }

    /// Append several expressions to the selection.
    pub fn add_select_many<I, S>(mut self, selections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.map
            .selects
            .extend(selections.into_iter().map(|s| SelectItem::new(s, None)));
        self
    }

    /// Replace the selection with a sub-query.
    pub fn select_sub_query<F>(mut self, factory: F, alias: impl Into<String>) -> Self
    where
        F: FnOnce(SelectQueryBuilder<'c>) -> SelectQueryBuilder<'c>,
    {
        let sql = self.create_sub_query_sql(factory);
        self.map.selects = vec![SelectItem::new(sql, Some(alias.into()))];
        self
    }

    /// Append a sub-query to the selection.
    pub fn add_select_sub_query<F>(mut self, factory: F, alias: impl Into<String>) -> Self
    where
        F: FnOnce(SelectQueryBuilder<'c>) -> SelectQueryBuilder<'c>,
    {
        let sql = self.create_sub_query_sql(factory);
        self.map
            .selects
            .push(SelectItem::new(sql, Some(alias.into())));
        self
    }

    /// `SELECT DISTINCT`.
    pub fn distinct(mut self, distinct: bool) -> Self {
        self.map.distinct = distinct;
        self
    }

    /// `SELECT DISTINCT ON (...)`; only rendered by dialects that support it.
    pub fn distinct_on<I, S>(mut self, expressions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.map.distinct_on = expressions.into_iter().map(Into::into).collect();
        self
    }

    /// MySQL/MariaDB execution time limit hint, in milliseconds.
    pub fn max_execution_time(mut self, milliseconds: u64) -> Self {
        self.map.max_execution_time = Some(milliseconds);
        self
    }

    /// Leading SQL comment.
    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.map.comment = Some(comment.into());
        self
    }

    /// MySQL/MariaDB index hint.
    pub fn use_index(mut self, index: impl Into<String>) -> Self {
        self.map.use_index = Some(index.into());
        self
    }

    /// CockroachDB `AS OF SYSTEM TIME` expression.
    pub fn time_travel(mut self, expression: impl Into<String>) -> Self {
        self.map.time_travel = Some(expression.into());
        self
    }

    // ---- from --------------------------------------------------------------

    fn from_target(&self, target: &str) -> AliasTarget {
        if target.starts_with('(') {
            AliasTarget::SubQuery(target.to_string())
        } else if self.catalog.get_entity(target).is_some() {
            AliasTarget::Entity(target.to_string())
        } else {
            AliasTarget::Table(target.to_string())
        }
    }

    fn register_from(&mut self, target: AliasTarget, alias: String) {
        if let Err(e) = self
            .map
            .aliases
            .create_alias(AliasKind::From, alias.clone(), target)
        {
            self.fail(e);
            return;
        }
        if self.map.main_alias.is_none() {
            self.map.main_alias = Some(alias);
        }
    }

    /// Set the main FROM target: an entity name, a table path, or parenthesized SQL.
    ///
    /// Replaces any previous FROM targets.
    pub fn from(mut self, target: &str, alias: impl Into<String>) -> Self {
        let target = self.from_target(target);
        self.map.aliases.remove_from_aliases();
        self.map.main_alias = None;
        self.register_from(target, alias.into());
        self
    }

    /// Add another FROM target.
    pub fn add_from(mut self, target: &str, alias: impl Into<String>) -> Self {
        let target = self.from_target(target);
        self.register_from(target, alias.into());
        self
    }

    /// Set the main FROM target to a sub-query.
    pub fn from_sub_query<F>(mut self, factory: F, alias: impl Into<String>) -> Self
    where
        F: FnOnce(SelectQueryBuilder<'c>) -> SelectQueryBuilder<'c>,
    {
        let sql = self.create_sub_query_sql(factory);
        self.map.aliases.remove_from_aliases();
        self.map.main_alias = None;
        self.register_from(AliasTarget::SubQuery(sql), alias.into());
        self
    }

    /// Add a sub-query FROM target.
    pub fn add_from_sub_query<F>(mut self, factory: F, alias: impl Into<String>) -> Self
    where
        F: FnOnce(SelectQueryBuilder<'c>) -> SelectQueryBuilder<'c>,
    {
        let sql = self.create_sub_query_sql(factory);
        self.register_from(AliasTarget::SubQuery(sql), alias.into());
        self
    }

    // ---- joins -------------------------------------------------------------

    /// Resolve a join target string.
    ///
    /// `parent.property` naming a registered alias is a relation join; a catalog
    /// entity name is a direct entity join; parenthesized text is a sub-query;
    /// anything else is a table path.
    fn resolve_join_target(&self, target: &str) -> Result<(JoinTarget, Option<String>)> {
        if target.starts_with('(') {
            return Ok((JoinTarget::SubQuery(target.to_string()), None));
        }
        if let Some((parent, property)) = target.split_once('.') {
            if self.map.aliases.has_alias(parent) {
                let parent_alias = self.map.aliases.find_by_name(parent)?;
                let entity_name = parent_alias
                    .entity()
                    .ok_or_else(|| Error::UnknownRelation {
                        entity: parent.to_string(),
                        relation: property.to_string(),
                    })?;
                let relation = self.catalog.entity(entity_name)?.relation(property)?;
                return Ok((
                    JoinTarget::Relation {
                        parent_alias: parent.to_string(),
                        entity: entity_name.to_string(),
                        property: property.to_string(),
                    },
                    Some(relation.target.clone()),
                ));
            }
        }
        if self.catalog.get_entity(target).is_some() {
            return Ok((JoinTarget::Entity(target.to_string()), Some(target.to_string())));
        }
        Ok((JoinTarget::Table(target.to_string()), None))
    }

    #[allow(clippy::too_many_arguments)]
    fn join(
        mut self,
        direction: JoinDirection,
        target: &str,
        alias: &str,
        condition: Option<&str>,
        select: bool,
        map_to: Option<(String, bool)>,
    ) -> Self {
        if let Err(e) = self.add_join(direction, target, alias, condition, select, map_to) {
            self.fail(e);
        }
        self
    }

    fn add_join(
        &mut self,
        direction: JoinDirection,
        target: &str,
        alias: &str,
        condition: Option<&str>,
        select: bool,
        map_to: Option<(String, bool)>,
    ) -> Result<()> {
        let (join_target, entity) = self.resolve_join_target(target)?;

        let mut junction_alias = None;
        if let JoinTarget::Relation {
            parent_alias,
            entity: parent_entity,
            property,
        } = &join_target
        {
            let relation = self.catalog.entity(parent_entity)?.relation(property)?;
            if relation.is_many_to_many() {
                let name = if relation.owning {
                    format!("{}_{}", parent_alias, alias)
                } else {
                    format!("{}_{}", alias, parent_alias)
                };
                let table = self.catalog.junction_table(relation)?;
                self.map
                    .aliases
                    .create_alias(AliasKind::Other, name.clone(), AliasTarget::Table(table))?;
                junction_alias = Some(name);
            }
        }

        let alias_target = match (&join_target, &entity) {
            (JoinTarget::SubQuery(sql), _) => AliasTarget::SubQuery(sql.clone()),
            (_, Some(entity)) => AliasTarget::Entity(entity.clone()),
            (JoinTarget::Table(path), None) => AliasTarget::Table(path.clone()),
            (_, None) => AliasTarget::Table(target.to_string()),
        };
        self.map
            .aliases
            .create_alias(AliasKind::Join, alias, alias_target)?;

        if select {
            self.map.selects.push(SelectItem::new(alias, None));
        }

        let (map_to_property, is_mapping_many) = match map_to {
            Some((property, many)) => (Some(property), many),
            None => (None, false),
        };
        self.map.joins.push(JoinAttribute {
            direction,
            target: join_target,
            alias: alias.to_string(),
            condition: condition.map(str::to_string),
            entity,
            junction_alias,
            map_to_property,
            is_mapping_many,
            is_selected: select,
        });
        Ok(())
    }

    /// `INNER JOIN` a relation (`alias.property`), entity, table or sub-query text.
    pub fn inner_join(self, target: &str, alias: &str, condition: Option<&str>) -> Self {
        self.join(JoinDirection::Inner, target, alias, condition, false, None)
    }

    /// `LEFT JOIN` a relation (`alias.property`), entity, table or sub-query text.
    pub fn left_join(self, target: &str, alias: &str, condition: Option<&str>) -> Self {
        self.join(JoinDirection::Left, target, alias, condition, false, None)
    }

    /// `INNER JOIN` and select every column of the joined alias.
    pub fn inner_join_and_select(self, target: &str, alias: &str, condition: Option<&str>) -> Self {
        self.join(JoinDirection::Inner, target, alias, condition, true, None)
    }

    /// `LEFT JOIN` and select every column of the joined alias.
    pub fn left_join_and_select(self, target: &str, alias: &str, condition: Option<&str>) -> Self {
        self.join(JoinDirection::Left, target, alias, condition, true, None)
    }

    /// `INNER JOIN`, select, and map one joined row onto `map_to_property`.
    pub fn inner_join_and_map_one(
        self,
        map_to_property: &str,
        target: &str,
        alias: &str,
        condition: Option<&str>,
    ) -> Self {
        let map_to = Some((map_to_property.to_string(), false));
        self.join(JoinDirection::Inner, target, alias, condition, true, map_to)
    }

    /// `INNER JOIN`, select, and map all joined rows onto `map_to_property`.
    pub fn inner_join_and_map_many(
        self,
        map_to_property: &str,
        target: &str,
        alias: &str,
        condition: Option<&str>,
    ) -> Self {
        let map_to = Some((map_to_property.to_string(), true));
        self.join(JoinDirection::Inner, target, alias, condition, true, map_to)
    }

    /// `LEFT JOIN`, select, and map one joined row onto `map_to_property`.
    pub fn left_join_and_map_one(
        self,
        map_to_property: &str,
        target: &str,
        alias: &str,
        condition: Option<&str>,
    ) -> Self {
        let map_to = Some((map_to_property.to_string(), false));
        self.join(JoinDirection::Left, target, alias, condition, true, map_to)
    }

    /// `LEFT JOIN`, select, and map all joined rows onto `map_to_property`.
    pub fn left_join_and_map_many(
        self,
        map_to_property: &str,
        target: &str,
        alias: &str,
        condition: Option<&str>,
    ) -> Self {
        let map_to = Some((map_to_property.to_string(), true));
        self.join(JoinDirection::Left, target, alias, condition, true, map_to)
    }

    /// `INNER JOIN` a sub-query.
    pub fn inner_join_sub_query<F>(mut self, factory: F, alias: &str, condition: Option<&str>) -> Self
    where
        F: FnOnce(SelectQueryBuilder<'c>) -> SelectQueryBuilder<'c>,
    {
        let sql = self.create_sub_query_sql(factory);
        self.join(JoinDirection::Inner, &sql, alias, condition, false, None)
    }

    /// `LEFT JOIN` a sub-query.
    pub fn left_join_sub_query<F>(mut self, factory: F, alias: &str, condition: Option<&str>) -> Self
    where
        F: FnOnce(SelectQueryBuilder<'c>) -> SelectQueryBuilder<'c>,
    {
        let sql = self.create_sub_query_sql(factory);
        self.join(JoinDirection::Left, &sql, alias, condition, false, None)
    }

    // ---- deferred relation loads ------------------------------------------

    fn resolve_relation_path(&self, relation: &str) -> Result<(String, String, bool, Option<String>)> {
        let (parent, property) = relation
            .split_once('.')
            .ok_or_else(|| Error::InvalidArgument(format!(
                "relation \"{}\" must be given as alias.property",
                relation
            )))?;
        let alias = self.map.aliases.find_by_name(parent)?;
        let entity_name = alias.entity().ok_or_else(|| Error::UnknownRelation {
            entity: parent.to_string(),
            relation: property.to_string(),
        })?;
        let def = self.catalog.entity(entity_name)?.relation(property)?;
        let junction = if def.is_many_to_many() {
            Some(self.catalog.junction_table(def)?)
        } else {
            None
        };
        let is_many = def.is_many_to_many() || def.cardinality == Cardinality::OneToMany;
        Ok((parent.to_string(), property.to_string(), is_many, junction))
    }

    fn register_junction_helper(&mut self, name: &str, table: String) -> Result<()> {
        self.map
            .aliases
            .create_alias(AliasKind::Other, name, AliasTarget::Table(table))?;
        Ok(())
    }

    /// Register a deferred load of the related ids of `relation` (`alias.property`)
    /// into `map_to_property`.
    pub fn load_relation_id_and_map(
        mut self,
        map_to_property: &str,
        relation: &str,
        alias: Option<&str>,
    ) -> Self {
        let result = self.resolve_relation_path(relation).and_then(|(parent, property, is_many, junction)| {
            let junction_alias = match junction {
                Some(table) => {
                    let name = format!("{}_{}_rid", parent, property);
                    self.register_junction_helper(&name, table)?;
                    Some(name)
                }
                None => None,
            };
            self.map.relation_id_attributes.push(RelationIdAttribute {
                parent_alias: parent,
                relation_property: property,
                map_to_property: map_to_property.to_string(),
                alias: alias.map(str::to_string),
                junction_alias,
                is_many,
            });
            Ok(())
        });
        if let Err(e) = result {
            self.fail(e);
        }
        self
    }

    /// Register a deferred count of `relation` (`alias.property`) into `map_to_property`.
    pub fn load_relation_count_and_map(
        mut self,
        map_to_property: &str,
        relation: &str,
        alias: Option<&str>,
    ) -> Self {
        let result = self.resolve_relation_path(relation).and_then(|(parent, property, _, junction)| {
            let junction_alias = match junction {
                Some(table) => {
                    let name = format!("{}_{}_rc", parent, property);
                    self.register_junction_helper(&name, table)?;
                    Some(name)
                }
                None => None,
            };
            self.map.relation_count_attributes.push(RelationCountAttribute {
                parent_alias: parent,
                relation_property: property,
                map_to_property: map_to_property.to_string(),
                alias: alias.map(str::to_string),
                junction_alias,
            });
            Ok(())
        });
        if let Err(e) = result {
            self.fail(e);
        }
        self
    }

    // ---- predicates --------------------------------------------------------

    fn resolve_predicate(&mut self, predicate: Predicate) -> Condition {
        match predicate {
            Predicate::Raw(sql) => Condition::Raw(sql),
            Predicate::Brackets(brackets) => self.resolve_brackets(brackets),
            Predicate::Fields(pairs) => self.resolve_fields(pairs),
        }
    }

    fn resolve_brackets(&mut self, brackets: Brackets) -> Condition {
        self.map.parameters.extend(brackets.parameters);
        let clauses = brackets
            .clauses
            .into_iter()
            .map(|(combinator, predicate)| {
                WhereClause::new(combinator, self.resolve_predicate(predicate))
            })
            .collect();
        if brackets.negated {
            Condition::NotBrackets(clauses)
        } else {
            Condition::Brackets(clauses)
        }
    }

    fn resolve_fields(&mut self, pairs: Vec<(String, Value)>) -> Condition {
        let main = match self.map.main_alias.clone() {
            Some(main) => main,
            None => {
                self.fail(Error::MissingMainAlias);
                return Condition::Raw("1=1".to_string());
            }
        };
        if let Ok(Some(entity)) = self.main_entity() {
            for (property, _) in &pairs {
                if entity.find_column(property).is_none() && entity.find_relation(property).is_none() {
                    self.fail(Error::UnknownColumn {
                        entity: entity.name.clone(),
                        column: property.clone(),
                    });
                }
            }
        }

        let mut parts: Vec<String> = pairs
            .into_iter()
            .map(|(property, value)| {
                if value.is_null() {
                    format!("{}.{} IS NULL", main, property)
                } else {
                    let name = self.map.create_parameter(value);
                    format!("{}.{} = :{}", main, property, name)
                }
            })
            .collect();

        match parts.len() {
            0 => Condition::Raw("1=1".to_string()),
            1 => Condition::Raw(parts.remove(0)),
            _ => Condition::Brackets(
                parts
                    .into_iter()
                    .map(|p| WhereClause::new(Combinator::And, Condition::Raw(p)))
                    .collect(),
            ),
        }
    }

    fn push_where(mut self, combinator: Combinator, predicate: Predicate) -> Self {
        if combinator == Combinator::Simple {
            self.map.wheres.clear();
        }
        let condition = self.resolve_predicate(predicate);
        self.map.wheres.push(WhereClause::new(combinator, condition));
        self
    }

    /// Replace all WHERE predicates with one.
    pub fn where_(self, predicate: impl Into<Predicate>) -> Self {
        self.push_where(Combinator::Simple, predicate.into())
    }

    /// Append a WHERE predicate with `AND`.
    pub fn and_where(self, predicate: impl Into<Predicate>) -> Self {
        self.push_where(Combinator::And, predicate.into())
    }

    /// Append a WHERE predicate with `OR`.
    pub fn or_where(self, predicate: impl Into<Predicate>) -> Self {
        self.push_where(Combinator::Or, predicate.into())
    }

    /// Replace all WHERE predicates with the text returned by `f`.
    pub fn where_with<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&mut Self) -> String,
    {
        let sql = f(&mut self);
        self.where_(sql)
    }

    /// Append the text returned by `f` with `AND`.
    pub fn and_where_with<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&mut Self) -> String,
    {
        let sql = f(&mut self);
        self.and_where(sql)
    }

    /// Append the text returned by `f` with `OR`.
    pub fn or_where_with<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&mut Self) -> String,
    {
        let sql = f(&mut self);
        self.or_where(sql)
    }

    /// Condition matching the main entity's primary keys against `ids`.
    ///
    /// Composite keys take each id as a [`Value::List`] in primary-key order.
    fn ids_condition(&mut self, ids: Vec<Value>) -> Condition {
        let entity = match self.main_entity() {
            Ok(Some(entity)) => entity,
            Ok(None) => {
                self.fail(Error::InvalidArgument(
                    "where_in_ids requires an entity main alias".to_string(),
                ));
                return Condition::Raw("1=0".to_string());
            }
            Err(e) => {
                self.fail(e);
                return Condition::Raw("1=0".to_string());
            }
        };
        let main = self.map.main_alias.clone().unwrap_or_default();
        let primary: Vec<String> = entity
            .primary_columns()
            .map(|c| c.property_path.clone())
            .collect();

        if ids.is_empty() || primary.is_empty() {
            return Condition::Raw("1=0".to_string());
        }

        if primary.len() == 1 {
            let name = self.map.create_parameter(Value::List(ids));
            return Condition::Raw(format!("{}.{} IN (:...{})", main, primary[0], name));
        }

        let mut groups = Vec::with_capacity(ids.len());
        for id in ids {
            let parts = match id {
                Value::List(parts) if parts.len() == primary.len() => parts,
                other => {
                    self.fail(Error::InvalidArgument(format!(
                        "composite id must list {} values, got {}",
                        primary.len(),
                        other
                    )));
                    return Condition::Raw("1=0".to_string());
                }
            };
            let group = primary
                .iter()
                .zip(parts)
                .map(|(column, value)| {
                    let name = self.map.create_parameter(value);
                    format!("{}.{} = :{}", main, column, name)
                })
                .collect::<Vec<_>>()
                .join(" AND ");
            groups.push(format!("({})", group));
        }
        Condition::Raw(format!("({})", groups.join(" OR ")))
    }

    fn push_ids(mut self, combinator: Combinator, ids: Vec<Value>) -> Self {
        if combinator == Combinator::Simple {
            self.map.wheres.clear();
        }
        let condition = self.ids_condition(ids);
        self.map.wheres.push(WhereClause::new(combinator, condition));
        self
    }

    /// Replace all WHERE predicates with a primary-key match.
    pub fn where_in_ids<I, V>(self, ids: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let ids = ids.into_iter().map(Into::into).collect();
        self.push_ids(Combinator::Simple, ids)
    }

    /// Append a primary-key match with `AND`.
    pub fn and_where_in_ids<I, V>(self, ids: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let ids = ids.into_iter().map(Into::into).collect();
        self.push_ids(Combinator::And, ids)
    }

    /// Append a primary-key match with `OR`.
    pub fn or_where_in_ids<I, V>(self, ids: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let ids = ids.into_iter().map(Into::into).collect();
        self.push_ids(Combinator::Or, ids)
    }

    fn push_having(mut self, combinator: Combinator, predicate: Predicate) -> Self {
        if combinator == Combinator::Simple {
            self.map.havings.clear();
        }
        let condition = self.resolve_predicate(predicate);
        self.map.havings.push(WhereClause::new(combinator, condition));
        self
    }

    /// Replace all HAVING predicates with one.
    pub fn having(self, predicate: impl Into<Predicate>) -> Self {
        self.push_having(Combinator::Simple, predicate.into())
    }

    /// Append a HAVING predicate with `AND`.
    pub fn and_having(self, predicate: impl Into<Predicate>) -> Self {
        self.push_having(Combinator::And, predicate.into())
    }

    /// Append a HAVING predicate with `OR`.
    pub fn or_having(self, predicate: impl Into<Predicate>) -> Self {
        self.push_having(Combinator::Or, predicate.into())
    }

    // ---- grouping and ordering --------------------------------------------

    /// Replace GROUP BY with one expression.
    pub fn group_by(mut self, expression: impl Into<String>) -> Self {
        self.map.group_bys = vec![expression.into()];
        self
    }

    /// Append a GROUP BY expression.
    pub fn add_group_by(mut self, expression: impl Into<String>) -> Self {
        self.map.group_bys.push(expression.into());
        self
    }

    /// Remove all GROUP BY expressions.
    pub fn clear_group_by(mut self) -> Self {
        self.map.group_bys.clear();
        self
    }

    /// Replace ORDER BY with one key.
    pub fn order_by(mut self, sort: impl Into<String>, direction: OrderDirection) -> Self {
        self.map.order_bys.clear();
        self.map.set_order(sort.into(), OrderSpec::new(direction));
        self
    }

    /// Replace ORDER BY with one key and nulls placement.
    pub fn order_by_nulls(
        mut self,
        sort: impl Into<String>,
        direction: OrderDirection,
        nulls: NullsOrder,
    ) -> Self {
        self.map.order_bys.clear();
        self.map.set_order(
            sort.into(),
            OrderSpec {
                direction,
                nulls: Some(nulls),
            },
        );
        self
    }

    /// Append an ORDER BY key.
    pub fn add_order_by(mut self, sort: impl Into<String>, direction: OrderDirection) -> Self {
        self.map.set_order(sort.into(), OrderSpec::new(direction));
        self
    }

    /// Append an ORDER BY key with nulls placement.
    pub fn add_order_by_nulls(
        mut self,
        sort: impl Into<String>,
        direction: OrderDirection,
        nulls: NullsOrder,
    ) -> Self {
        self.map.set_order(
            sort.into(),
            OrderSpec {
                direction,
                nulls: Some(nulls),
            },
        );
        self
    }

    /// Remove all ORDER BY keys.
    pub fn clear_order_by(mut self) -> Self {
        self.map.order_bys.clear();
        self
    }

    fn parse_order(order: &str, nulls: Option<&str>) -> Result<OrderSpec> {
        Ok(OrderSpec {
            direction: order.parse()?,
            nulls: nulls.map(|n| n.parse::<NullsOrder>()).transpose()?,
        })
    }

    /// Replace ORDER BY from textual direction and nulls placement.
    ///
    /// Fails with `InvalidArgument` unless `order` is `ASC`/`DESC` and `nulls`
    /// is `NULLS FIRST`/`NULLS LAST`.
    pub fn order_by_str(mut self, sort: impl Into<String>, order: &str, nulls: Option<&str>) -> Result<Self> {
        let spec = Self::parse_order(order, nulls)?;
        self.map.order_bys.clear();
        self.map.set_order(sort.into(), spec);
        Ok(self)
    }

    /// Append an ORDER BY key from textual direction and nulls placement.
    pub fn add_order_by_str(
        mut self,
        sort: impl Into<String>,
        order: &str,
        nulls: Option<&str>,
    ) -> Result<Self> {
        let spec = Self::parse_order(order, nulls)?;
        self.map.set_order(sort.into(), spec);
        Ok(self)
    }

    // ---- pagination --------------------------------------------------------

    /// Flat LIMIT. `None` or zero means no limit.
    pub fn limit(mut self, limit: impl Into<Option<u64>>) -> Self {
        self.map.limit = limit.into();
        self
    }

    /// Flat OFFSET. `None` or zero means no offset.
    pub fn offset(mut self, offset: impl Into<Option<u64>>) -> Self {
        self.map.offset = offset.into();
        self
    }

    /// Entity-aware skip; paginates parent rows when joins are present.
    pub fn skip(mut self, skip: impl Into<Option<u64>>) -> Self {
        self.map.skip = skip.into();
        self
    }

    /// Entity-aware take; paginates parent rows when joins are present.
    pub fn take(mut self, take: impl Into<Option<u64>>) -> Self {
        self.map.take = take.into();
        self
    }

    /// LIMIT from text, failing with `InvalidArgument` if it is not a number.
    pub fn try_limit(self, limit: &str) -> Result<Self> {
        let value = parse_count("limit", limit)?;
        Ok(self.limit(value))
    }

    /// OFFSET from text, failing with `InvalidArgument` if it is not a number.
    pub fn try_offset(self, offset: &str) -> Result<Self> {
        let value = parse_count("offset", offset)?;
        Ok(self.offset(value))
    }

    /// Skip from text, failing with `InvalidArgument` if it is not a number.
    pub fn try_skip(self, skip: &str) -> Result<Self> {
        let value = parse_count("skip", skip)?;
        Ok(self.skip(value))
    }

    /// Take from text, failing with `InvalidArgument` if it is not a number.
    pub fn try_take(self, take: &str) -> Result<Self> {
        let value = parse_count("take", take)?;
        Ok(self.take(value))
    }

    // ---- locking -----------------------------------------------------------

    /// Set the lock mode. Dialect support is checked when the query is compiled.
    pub fn set_lock(mut self, mode: LockMode) -> Self {
        self.map.lock_mode = mode;
        self
    }

    /// Request optimistic locking against `version`.
    pub fn set_optimistic_lock(mut self, version: LockVersion) -> Self {
        self.map.lock_mode = LockMode::Optimistic;
        self.map.lock_version = Some(version);
        self
    }

    /// Restrict a row lock to the given aliases (`FOR UPDATE OF ...`).
    pub fn set_lock_tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.map.lock_tables = Some(tables.into_iter().map(Into::into).collect());
        self
    }

    /// Behavior when rows are already locked.
    pub fn set_on_locked(mut self, on_locked: OnLocked) -> Self {
        self.map.on_locked = Some(on_locked);
        self
    }

    /// Include soft-deleted rows.
    pub fn with_deleted(mut self) -> Self {
        self.map.with_deleted = true;
        self
    }

    // ---- execution settings -----------------------------------------------

    /// Enable or disable result caching for this query.
    pub fn cache(mut self, enabled: bool) -> Self {
        self.map.cache.enabled = Some(enabled);
        self
    }

    /// Enable caching with a custom lifetime.
    pub fn cache_for(mut self, duration: Duration) -> Self {
        self.map.cache.enabled = Some(true);
        self.map.cache.duration = Some(duration);
        self
    }

    /// Enable caching under an identifier with a custom lifetime.
    pub fn cache_with_id(mut self, id: impl Into<String>, duration: Option<Duration>) -> Self {
        self.map.cache.enabled = Some(true);
        self.map.cache.id = Some(id.into());
        self.map.cache.duration = duration;
        self
    }

    /// Set an option flag such as `disable-global-order`.
    pub fn set_option(mut self, option: impl Into<String>) -> Self {
        self.map.options.insert(option.into());
        self
    }

    /// Run inside a transaction owned by the executor when none is active.
    pub fn use_transaction(mut self, enabled: bool) -> Self {
        self.map.use_transaction = Some(enabled);
        self
    }

    /// Route the query to the primary or a replica.
    pub fn set_replication_mode(mut self, mode: ReplicationMode) -> Self {
        self.map.replication = Some(mode);
        self
    }

    /// Select unrequested primary keys so rows can be hydrated into entities.
    pub fn set_query_entity(mut self, query_entity: bool) -> Self {
        self.map.query_entity = query_entity;
        self
    }

    // ---- parameters --------------------------------------------------------

    /// Set a named parameter referenced as `:name` or `:...name`.
    pub fn set_parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let name = name.into();
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.') {
            self.fail(Error::InvalidArgument(format!(
                "parameter name \"{}\" may only contain numbers, letters, underscores, or periods",
                name
            )));
            return self;
        }
        self.map.parameters.insert(name, value.into());
        self
    }

    /// Set several named parameters.
    pub fn set_parameters<I, K, V>(self, parameters: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        parameters
            .into_iter()
            .fold(self, |qb, (name, value)| qb.set_parameter(name, value))
    }

    /// All parameters, including the discriminator values of an inheritance child.
    pub fn get_parameters(&self) -> BTreeMap<String, Value> {
        let mut parameters = self.map.parameters.clone();
        if let Ok(Some(entity)) = self.main_entity() {
            if entity.is_child() && entity.discriminator_column().is_some() {
                let mut values: Vec<Value> = self
                    .catalog
                    .descendants(&entity.name)
                    .into_iter()
                    .filter_map(|e| e.discriminator_value.clone())
                    .map(Value::String)
                    .collect();
                values.sort_by_key(|v| v.to_string());
                if let Some(own) = &entity.discriminator_value {
                    values.push(Value::String(own.clone()));
                }
                parameters.insert(DISCRIMINATOR_PARAMETER.to_string(), Value::List(values));
            }
        }
        parameters
    }

    // ---- compilation -------------------------------------------------------

    /// Compile to SQL with named placeholders.
    pub fn get_query(&self) -> Result<String> {
        if let Some(e) = &self.pending_error {
            return Err(e.clone());
        }
        compile(&self.map, self.catalog, &self.dialect)
    }

    /// Same as [`get_query`](Self::get_query).
    pub fn get_sql(&self) -> Result<String> {
        self.get_query()
    }

    /// Compile to SQL with positional placeholders and the bound values in order.
    pub fn get_query_and_parameters(&self) -> Result<(String, Vec<Value>)> {
        let sql = self.get_query()?;
        Ok(expand_parameters(&sql, &self.get_parameters(), &self.dialect))
    }
}

/// Parse a row count the way numeric coercion treats text: blank is zero,
/// fractions are truncated, anything else that is not a finite non-negative
/// number is rejected.
fn parse_count(name: &str, raw: &str) -> Result<u64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(0);
    }
    let number: f64 = trimmed.parse().map_err(|_| {
        Error::InvalidArgument(format!(
            "provided \"{}\" value is not a number, please provide a numeric value",
            name
        ))
    })?;
    if !number.is_finite() || number < 0.0 {
        return Err(Error::InvalidArgument(format!(
            "provided \"{}\" value must be a finite non-negative number",
            name
        )));
    }
    Ok(number.trunc() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnDef, ColumnRole, RelationDef, ScalarType};
    use crate::query::DialectKind;

    fn catalog() -> Catalog {
        let user = EntityDef::new("User", "users")
            .with_column(ColumnDef::primary("id", ScalarType::Int64))
            .with_column(ColumnDef::new("name", ScalarType::String))
            .with_relation(RelationDef::one_to_many("posts", "User", "Post", "author"));
        let post = EntityDef::new("Post", "posts")
            .with_column(ColumnDef::primary("id", ScalarType::Int64))
            .with_column(ColumnDef::new("title", ScalarType::String))
            .with_column(
                ColumnDef::new("deletedAt", ScalarType::Timestamp)
                    .with_database_name("deleted_at")
                    .nullable()
                    .with_role(ColumnRole::DeleteDate),
            )
            .with_relation(
                RelationDef::many_to_one("author", "Post", "User").with_join_column("author_id", "id"),
            );
        Catalog::new(1).with_entity(user).with_entity(post)
    }

    fn pg() -> Dialect {
        Dialect::new(DialectKind::Postgres)
    }

    #[test]
    fn test_simple_select() {
        let catalog = catalog();
        let sql = SelectQueryBuilder::new(&catalog, pg())
            .select("user")
            .from("User", "user")
            .where_("user.name = :name")
            .set_parameter("name", "Ann")
            .get_query()
            .unwrap();
        assert_eq!(
            sql,
            "SELECT \"user\".\"id\" AS \"user_id\", \"user\".\"name\" AS \"user_name\" \
             FROM \"users\" \"user\" WHERE \"user\".\"name\" = :name"
        );
    }

    #[test]
    fn test_where_replaces_and_combinators_append() {
        let catalog = catalog();
        let qb = SelectQueryBuilder::new(&catalog, pg())
            .from("User", "user")
            .where_("a = 1")
            .where_("b = 2")
            .and_where("c = 3")
            .or_where(Brackets::new().where_("d = 4").and_where("e = 5"));
        assert_eq!(qb.expression_map().wheres.len(), 3);
        let sql = qb.get_query().unwrap();
        assert!(sql.ends_with("WHERE b = 2 AND c = 3 OR (d = 4 AND e = 5)"));
    }

    #[test]
    fn test_field_shorthand_generates_parameters() {
        let catalog = catalog();
        let qb = SelectQueryBuilder::new(&catalog, pg())
            .select("user")
            .from("User", "user")
            .where_(Predicate::fields([("name", Value::from("Ann")), ("id", Value::Null)]));
        let (sql, params) = qb.get_query_and_parameters().unwrap();
        assert!(sql.ends_with("WHERE (\"user\".\"name\" = $1 AND \"user\".\"id\" IS NULL)"));
        assert_eq!(params, vec![Value::from("Ann")]);
    }

    #[test]
    fn test_field_shorthand_unknown_property_fails_late() {
        let catalog = catalog();
        let qb = SelectQueryBuilder::new(&catalog, pg())
            .from("User", "user")
            .where_(Predicate::fields([("nope", 1)]));
        assert!(matches!(qb.get_query(), Err(Error::UnknownColumn { .. })));
    }

    #[test]
    fn test_unknown_relation_fails_late() {
        let catalog = catalog();
        let qb = SelectQueryBuilder::new(&catalog, pg())
            .from("User", "user")
            .left_join_and_select("user.comments", "comment", None)
            .where_("user.id = 1");
        assert!(matches!(qb.get_query(), Err(Error::UnknownRelation { .. })));
    }

    #[test]
    fn test_duplicate_alias_fails_late() {
        let catalog = catalog();
        let qb = SelectQueryBuilder::new(&catalog, pg())
            .from("User", "user")
            .left_join("user.posts", "user", None);
        assert!(matches!(qb.get_query(), Err(Error::DuplicateAlias(_))));
    }

    #[test]
    fn test_order_by_validation() {
        let catalog = catalog();
        let qb = SelectQueryBuilder::new(&catalog, pg()).from("User", "user");
        assert!(matches!(
            qb.clone().order_by_str("user.id", "up", None),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            qb.clone().order_by_str("user.id", "ASC", Some("NULLS SOMETIMES")),
            Err(Error::InvalidArgument(_))
        ));
        let sql = qb
            .order_by_str("user.id", "DESC", Some("NULLS LAST"))
            .unwrap()
            .get_query()
            .unwrap();
        assert!(sql.ends_with("ORDER BY \"user\".\"id\" DESC NULLS LAST"));
    }

    #[test]
    fn test_order_by_without_key_clears() {
        let catalog = catalog();
        let qb = SelectQueryBuilder::new(&catalog, pg())
            .from("User", "user")
            .order_by("user.id", OrderDirection::Asc)
            .add_order_by("user.name", OrderDirection::Desc)
            .clear_order_by();
        assert!(qb.expression_map().order_bys.is_empty());
    }

    #[test]
    fn test_numeric_coercion() {
        let catalog = catalog();
        let qb = SelectQueryBuilder::new(&catalog, pg()).from("User", "user");
        assert_eq!(qb.clone().try_limit(" 10 ").unwrap().expression_map().limit, Some(10));
        assert_eq!(qb.clone().try_take("2.9").unwrap().expression_map().take, Some(2));
        assert!(matches!(qb.clone().try_offset("ten"), Err(Error::InvalidArgument(_))));
        assert!(matches!(qb.try_skip("-1"), Err(Error::InvalidArgument(_))));
        assert_eq!(parse_count("limit", "").unwrap(), 0);
    }

    #[test]
    fn test_where_in_ids_single_key() {
        let catalog = catalog();
        let (sql, params) = SelectQueryBuilder::new(&catalog, Dialect::new(DialectKind::MySql))
            .select("user.id")
            .from("User", "user")
            .where_in_ids(vec![1, 2, 3])
            .get_query_and_parameters()
            .unwrap();
        assert_eq!(
            sql,
            "SELECT `user`.`id` AS `user_id` FROM `users` `user` WHERE `user`.`id` IN (?, ?, ?)"
        );
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn test_sub_query_parameters_merge() {
        let catalog = catalog();
        let qb = SelectQueryBuilder::new(&catalog, pg())
            .select("user.id")
            .from("User", "user")
            .where_with(|qb| {
                let sub = qb.create_sub_query_sql(|sub| {
                    sub.select("post.author")
                        .from("Post", "post")
                        .where_("post.title = :title")
                        .set_parameter("title", "Hi")
                });
                format!("user.id IN {}", sub)
            });
        let (sql, params) = qb.get_query_and_parameters().unwrap();
        assert!(sql.ends_with(
            "WHERE \"user\".\"id\" IN (SELECT \"post\".\"author_id\" FROM \"posts\" \"post\" \
             WHERE ( \"post\".\"title\" = $1 ) AND ( \"post\".\"deleted_at\" IS NULL ))"
        ));
        assert_eq!(params, vec![Value::from("Hi")]);
    }

    #[test]
    fn test_soft_delete_respects_with_deleted() {
        let catalog = catalog();
        let base = SelectQueryBuilder::new(&catalog, pg())
            .select("post.id")
            .from("Post", "post");
        assert!(base.get_query().unwrap().ends_with("WHERE \"post\".\"deleted_at\" IS NULL"));
        assert!(!base.with_deleted().get_query().unwrap().contains("IS NULL"));
    }

    #[test]
    fn test_clone_is_independent() {
        let catalog = catalog();
        let original = SelectQueryBuilder::new(&catalog, pg())
            .select("user")
            .from("User", "user")
            .where_("user.id = 1");
        let copy = original.clone();
        assert_eq!(original.get_query().unwrap(), copy.get_query().unwrap());

        let copy = copy.and_where("user.name = 'x'");
        assert_ne!(original.get_query().unwrap(), copy.get_query().unwrap());
        assert_eq!(original.expression_map().wheres.len(), 1);
    }

    #[test]
    fn test_invalid_parameter_name() {
        let catalog = catalog();
        let qb = SelectQueryBuilder::new(&catalog, pg())
            .from("User", "user")
            .set_parameter("bad-name", 1);
        assert!(matches!(qb.get_query(), Err(Error::InvalidArgument(_))));
    }
}
