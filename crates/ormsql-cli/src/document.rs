//! JSON query documents.
//!
//! A document describes one select the way the builder API does, so a query
//! can be compiled without writing Rust:
//!
//! ```json
//! {
//!   "from": { "entity": "User", "alias": "user" },
//!   "select": ["user"],
//!   "joins": [{ "kind": "left", "target": "user.posts", "alias": "post", "select": true }],
//!   "where": [{ "condition": "user.name = :name" }],
//!   "parameters": { "name": "ada" },
//!   "take": 10
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use ormsql_core::query::{LockMode, OnLocked, SelectQueryBuilder};
use ormsql_core::{Catalog, Dialect, Value};
use serde::Deserialize;
use thiserror::Error;

/// Errors raised while loading or applying a document.
#[derive(Debug, Error)]
pub enum DocumentError {
    /// File could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Offending path.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// File is not a valid document.
    #[error("invalid document: {0}")]
    Json(#[from] serde_json::Error),

    /// A parameter value has no query counterpart.
    #[error("parameter \"{0}\" must be a scalar or an array of scalars")]
    UnsupportedParameter(String),

    /// The builder rejected the document.
    #[error(transparent)]
    Query(#[from] ormsql_core::Error),
}

/// Join direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinKind {
    /// `INNER JOIN`.
    Inner,
    /// `LEFT JOIN`.
    #[default]
    Left,
}

/// Main FROM target.
#[derive(Debug, Clone, Deserialize)]
pub struct FromTarget {
    /// Entity name or table path.
    pub entity: String,
    /// Alias.
    pub alias: String,
}

/// One selection, either `"expr"` or `{ "selection": "expr", "alias": "name" }`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Selection {
    /// Bare expression.
    Plain(String),
    /// Aliased expression.
    Aliased {
        /// Selected expression.
        selection: String,
        /// Result column name.
        alias: String,
    },
}

/// One join.
#[derive(Debug, Clone, Deserialize)]
pub struct JoinSpec {
    /// Join direction.
    #[serde(default)]
    pub kind: JoinKind,
    /// `alias.relation`, entity name or table path.
    pub target: String,
    /// Alias of the joined target.
    pub alias: String,
    /// Extra ON condition.
    #[serde(default)]
    pub condition: Option<String>,
    /// Also select the joined columns.
    #[serde(default)]
    pub select: bool,
}

/// Boolean combinator of a condition with the ones before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connective {
    /// `AND`.
    #[default]
    And,
    /// `OR`.
    Or,
}

/// One WHERE or HAVING condition.
#[derive(Debug, Clone, Deserialize)]
pub struct ConditionSpec {
    /// How it combines with earlier conditions.
    #[serde(default)]
    pub combinator: Connective,
    /// Condition text with `:name` placeholders.
    pub condition: String,
}

/// One ORDER BY entry.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderSpec {
    /// Sort expression or `alias.property`.
    pub sort: String,
    /// `ASC` or `DESC`.
    #[serde(default = "default_order")]
    pub order: String,
    /// `NULLS FIRST` or `NULLS LAST`.
    #[serde(default)]
    pub nulls: Option<String>,
}

fn default_order() -> String {
    "ASC".to_string()
}

/// A select query described in JSON.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryDocument {
    pub from: FromTarget,
    #[serde(default)]
    pub select: Vec<Selection>,
    #[serde(default)]
    pub distinct: bool,
    #[serde(default)]
    pub distinct_on: Vec<String>,
    #[serde(default)]
    pub joins: Vec<JoinSpec>,
    #[serde(default, rename = "where")]
    pub wheres: Vec<ConditionSpec>,
    #[serde(default)]
    pub where_in_ids: Vec<serde_json::Value>,
    #[serde(default)]
    pub group_by: Vec<String>,
    #[serde(default)]
    pub having: Vec<ConditionSpec>,
    #[serde(default)]
    pub order_by: Vec<OrderSpec>,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub offset: Option<u64>,
    #[serde(default)]
    pub skip: Option<u64>,
    #[serde(default)]
    pub take: Option<u64>,
    #[serde(default)]
    pub lock: Option<LockMode>,
    #[serde(default)]
    pub lock_tables: Option<Vec<String>>,
    #[serde(default)]
    pub on_locked: Option<OnLocked>,
    #[serde(default)]
    pub with_deleted: bool,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub max_execution_time: Option<u64>,
    #[serde(default)]
    pub use_index: Option<String>,
    #[serde(default)]
    pub time_travel: Option<String>,
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
}

impl QueryDocument {
    /// Parse a document.
    pub fn from_json(json: &str) -> Result<Self, DocumentError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a document file.
    pub fn load(path: &Path) -> Result<Self, DocumentError> {
        Self::from_json(&read(path)?)
    }

    /// Apply the document to a fresh builder.
    pub fn build<'c>(
        &self,
        catalog: &'c Catalog,
        dialect: Dialect,
    ) -> Result<SelectQueryBuilder<'c>, DocumentError> {
        let mut qb = SelectQueryBuilder::new(catalog, dialect)
            .from(&self.from.entity, self.from.alias.as_str());

        for (index, selection) in self.select.iter().enumerate() {
            qb = match (index, selection) {
                (0, Selection::Plain(s)) => qb.select(s.as_str()),
                (0, Selection::Aliased { selection, alias }) => {
                    qb.select_as(selection.as_str(), alias.as_str())
                }
                (_, Selection::Plain(s)) => qb.add_select(s.as_str()),
                (_, Selection::Aliased { selection, alias }) => {
                    qb.add_select_as(selection.as_str(), alias.as_str())
                }
            };
        }
        if self.distinct {
            qb = qb.distinct(true);
        }
        if !self.distinct_on.is_empty() {
            qb = qb.distinct_on(self.distinct_on.iter().cloned());
        }

        for join in &self.joins {
            let condition = join.condition.as_deref();
            qb = match (join.kind, join.select) {
                (JoinKind::Inner, false) => qb.inner_join(&join.target, &join.alias, condition),
                (JoinKind::Inner, true) => {
                    qb.inner_join_and_select(&join.target, &join.alias, condition)
                }
                (JoinKind::Left, false) => qb.left_join(&join.target, &join.alias, condition),
                (JoinKind::Left, true) => {
                    qb.left_join_and_select(&join.target, &join.alias, condition)
                }
            };
        }

        for spec in &self.wheres {
            qb = match spec.combinator {
                Connective::And => qb.and_where(spec.condition.as_str()),
                Connective::Or => qb.or_where(spec.condition.as_str()),
            };
        }
        if !self.where_in_ids.is_empty() {
            let ids = self
                .where_in_ids
                .iter()
                .map(|id| json_to_value("where_in_ids", id))
                .collect::<Result<Vec<_>, _>>()?;
            qb = qb.and_where_in_ids(ids);
        }

        for expression in &self.group_by {
            qb = qb.add_group_by(expression.as_str());
        }
        for spec in &self.having {
            qb = match spec.combinator {
                Connective::And => qb.and_having(spec.condition.as_str()),
                Connective::Or => qb.or_having(spec.condition.as_str()),
            };
        }
        for spec in &self.order_by {
            qb = qb.add_order_by_str(spec.sort.as_str(), &spec.order, spec.nulls.as_deref())?;
        }

        qb = qb
            .limit(self.limit)
            .offset(self.offset)
            .skip(self.skip)
            .take(self.take);

        if let Some(mode) = self.lock {
            qb = qb.set_lock(mode);
        }
        if let Some(tables) = &self.lock_tables {
            qb = qb.set_lock_tables(tables.iter().cloned());
        }
        if let Some(on_locked) = self.on_locked {
            qb = qb.set_on_locked(on_locked);
        }
        if self.with_deleted {
            qb = qb.with_deleted();
        }
        if let Some(comment) = &self.comment {
            qb = qb.comment(comment.as_str());
        }
        if let Some(ms) = self.max_execution_time {
            qb = qb.max_execution_time(ms);
        }
        if let Some(index) = &self.use_index {
            qb = qb.use_index(index.as_str());
        }
        if let Some(expression) = &self.time_travel {
            qb = qb.time_travel(expression.as_str());
        }

        for (name, value) in &self.parameters {
            qb = qb.set_parameter(name.as_str(), json_to_value(name, value)?);
        }
        Ok(qb)
    }
}

/// Read a file, naming it in the error.
pub fn read(path: &Path) -> Result<String, DocumentError> {
    std::fs::read_to_string(path).map_err(|source| DocumentError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// Load a catalog file.
pub fn load_catalog(path: &Path) -> Result<Catalog, DocumentError> {
    Ok(Catalog::from_json(&read(path)?)?)
}

/// Convert a JSON parameter to a query value.
pub fn json_to_value(name: &str, json: &serde_json::Value) -> Result<Value, DocumentError> {
    Ok(match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        serde_json::Value::String(s) => Value::String(s.clone()),
        serde_json::Value::Array(items) => Value::List(
            items
                .iter()
                .map(|item| match item {
                    serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
                        Err(DocumentError::UnsupportedParameter(name.to_string()))
                    }
                    scalar => json_to_value(name, scalar),
                })
                .collect::<Result<_, _>>()?,
        ),
        serde_json::Value::Object(_) => {
            return Err(DocumentError::UnsupportedParameter(name.to_string()))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ormsql_core::catalog::{ColumnDef, EntityDef, RelationDef, ScalarType};
    use ormsql_core::DialectKind;

    fn catalog() -> Catalog {
        let user = EntityDef::new("User", "users")
            .with_column(ColumnDef::primary("id", ScalarType::Int64))
            .with_column(ColumnDef::new("name", ScalarType::String))
            .with_relation(RelationDef::one_to_many("posts", "User", "Post", "author"));
        let post = EntityDef::new("Post", "posts")
            .with_column(ColumnDef::primary("id", ScalarType::Int64))
            .with_relation(
                RelationDef::many_to_one("author", "Post", "User")
                    .with_join_column("author_id", "id"),
            );
        Catalog::new(1).with_entity(user).with_entity(post)
    }

    #[test]
    fn test_build_simple_document() {
        let catalog = catalog();
        let doc = QueryDocument::from_json(
            r#"{
                "from": { "entity": "User", "alias": "user" },
                "select": ["user.id", { "selection": "user.name", "alias": "n" }],
                "where": [{ "condition": "user.name = :name" }],
                "order_by": [{ "sort": "user.id", "order": "DESC" }],
                "limit": 3,
                "parameters": { "name": "ada" }
            }"#,
        )
        .unwrap();
        let qb = doc.build(&catalog, Dialect::new(DialectKind::Postgres)).unwrap();
        let (sql, params) = qb.get_query_and_parameters().unwrap();

        assert!(sql.starts_with("SELECT \"user\".\"id\" AS \"user_id\""));
        assert!(sql.contains("WHERE \"user\".\"name\" = $1"));
        assert!(sql.ends_with("ORDER BY \"user\".\"id\" DESC LIMIT 3"));
        assert_eq!(params, vec![Value::from("ada")]);
    }

    #[test]
    fn test_join_and_take() {
        let catalog = catalog();
        let doc = QueryDocument::from_json(
            r#"{
                "from": { "entity": "User", "alias": "user" },
                "select": ["user"],
                "joins": [{ "kind": "inner", "target": "user.posts", "alias": "post", "select": true }],
                "take": 5
            }"#,
        )
        .unwrap();
        let qb = doc.build(&catalog, Dialect::new(DialectKind::Postgres)).unwrap();
        assert!(qb.needs_window_query());
        assert!(qb
            .get_query()
            .unwrap()
            .contains("INNER JOIN \"posts\" \"post\" ON \"post\".\"author_id\"=\"user\".\"id\""));
    }

    #[test]
    fn test_invalid_order_rejected() {
        let catalog = catalog();
        let doc = QueryDocument::from_json(
            r#"{ "from": { "entity": "User", "alias": "user" },
                 "order_by": [{ "sort": "user.id", "order": "SIDEWAYS" }] }"#,
        )
        .unwrap();
        let err = doc
            .build(&catalog, Dialect::new(DialectKind::Postgres))
            .unwrap_err();
        assert!(matches!(
            err,
            DocumentError::Query(ormsql_core::Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = QueryDocument::from_json(r#"{ "from": { "entity": "User", "alias": "u" }, "limt": 3 }"#)
            .unwrap_err();
        assert!(matches!(err, DocumentError::Json(_)));
    }

    #[test]
    fn test_json_to_value() {
        assert_eq!(json_to_value("n", &serde_json::json!(4)).unwrap(), Value::Int(4));
        assert_eq!(json_to_value("n", &serde_json::json!(1.5)).unwrap(), Value::Float(1.5));
        assert_eq!(
            json_to_value("n", &serde_json::json!([1, "a"])).unwrap(),
            Value::List(vec![Value::Int(1), Value::from("a")])
        );
        assert!(matches!(
            json_to_value("n", &serde_json::json!({ "a": 1 })),
            Err(DocumentError::UnsupportedParameter(name)) if name == "n"
        ));
    }
}
