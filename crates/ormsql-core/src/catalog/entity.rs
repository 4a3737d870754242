//! Entity definitions.

use std::fmt;
use std::str::FromStr;

use super::column::{ColumnDef, ColumnRole};
use super::relation::RelationDef;
use crate::error::Error;
use serde::{Deserialize, Serialize};

/// An entity definition (table schema).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDef {
    /// Entity name (unique within the catalog).
    pub name: String,
    /// Physical table path, optionally schema-qualified (`public.users`).
    pub table_path: String,
    /// Column definitions.
    #[serde(default)]
    pub columns: Vec<ColumnDef>,
    /// Relations declared on this entity.
    #[serde(default)]
    pub relations: Vec<RelationDef>,
    /// Lifecycle rules.
    #[serde(default)]
    pub lifecycle: LifecycleRules,
    /// Parent entity for single-table inheritance children.
    #[serde(default)]
    pub parent_entity: Option<String>,
    /// Discriminator value stored for rows of this entity.
    #[serde(default)]
    pub discriminator_value: Option<String>,
}

/// Lifecycle rules for an entity.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LifecycleRules {
    /// Default ordering for queries without explicit order.
    #[serde(default)]
    pub default_order: Option<Vec<OrderBy>>,
}

/// Order specification for default ordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    /// Property path to order by.
    pub field: String,
    /// Sort direction.
    pub direction: OrderDirection,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderDirection {
    /// Ascending order.
    #[serde(rename = "ASC")]
    Asc,
    /// Descending order.
    #[serde(rename = "DESC")]
    Desc,
}

impl OrderDirection {
    /// SQL keyword for this direction.
    pub fn as_sql(&self) -> &'static str {
        match self {
            OrderDirection::Asc => "ASC",
            OrderDirection::Desc => "DESC",
        }
    }
}

impl fmt::Display for OrderDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

impl FromStr for OrderDirection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ASC" => Ok(OrderDirection::Asc),
            "DESC" => Ok(OrderDirection::Desc),
            other => Err(Error::InvalidArgument(format!(
                "order can accept only \"ASC\" and \"DESC\" values, got \"{}\"",
                other
            ))),
        }
    }
}

impl EntityDef {
    /// Create a new entity definition.
    pub fn new(name: impl Into<String>, table_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table_path: table_path.into(),
            columns: Vec::new(),
            relations: Vec::new(),
            lifecycle: LifecycleRules::default(),
            parent_entity: None,
            discriminator_value: None,
        }
    }

    /// Add a column to the entity.
    pub fn with_column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    /// Add multiple columns.
    pub fn with_columns(mut self, columns: impl IntoIterator<Item = ColumnDef>) -> Self {
        self.columns.extend(columns);
        self
    }

    /// Add a relation.
    pub fn with_relation(mut self, relation: RelationDef) -> Self {
        self.relations.push(relation);
        self
    }

    /// Set the default ordering.
    pub fn with_default_order(mut self, order: Vec<OrderBy>) -> Self {
        self.lifecycle.default_order = Some(order);
        self
    }

    /// Declare this entity as an inheritance child stored with `value` in the discriminator.
    pub fn with_parent(mut self, parent: impl Into<String>, value: impl Into<String>) -> Self {
        self.parent_entity = Some(parent.into());
        self.discriminator_value = Some(value.into());
        self
    }

    /// Get a column by property path.
    pub fn find_column(&self, property_path: &str) -> Option<&ColumnDef> {
        self.columns
            .iter()
            .find(|c| c.property_path == property_path)
    }

    /// Get a column by property path, failing with `UnknownColumn`.
    pub fn column(&self, property_path: &str) -> Result<&ColumnDef, Error> {
        self.find_column(property_path)
            .ok_or_else(|| Error::UnknownColumn {
                entity: self.name.clone(),
                column: property_path.to_string(),
            })
    }

    /// Get a relation by property name.
    pub fn find_relation(&self, property_name: &str) -> Option<&RelationDef> {
        self.relations
            .iter()
            .find(|r| r.property_name == property_name)
    }

    /// Get a relation by property name, failing with `UnknownRelation`.
    pub fn relation(&self, property_name: &str) -> Result<&RelationDef, Error> {
        self.find_relation(property_name)
            .ok_or_else(|| Error::UnknownRelation {
                entity: self.name.clone(),
                relation: property_name.to_string(),
            })
    }

    /// Primary key columns in declaration order.
    pub fn primary_columns(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns.iter().filter(|c| c.primary)
    }

    /// Columns included when the whole entity is selected.
    pub fn selectable_columns(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns.iter().filter(|c| c.selectable)
    }

    /// Check for a composite primary key.
    pub fn has_multiple_primary_keys(&self) -> bool {
        self.primary_columns().count() > 1
    }

    fn column_with_role(&self, role: ColumnRole) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.role == role)
    }

    /// Soft-delete marker column.
    pub fn delete_date_column(&self) -> Option<&ColumnDef> {
        self.column_with_role(ColumnRole::DeleteDate)
    }

    /// Version column.
    pub fn version_column(&self) -> Option<&ColumnDef> {
        self.column_with_role(ColumnRole::Version)
    }

    /// Update timestamp column.
    pub fn update_date_column(&self) -> Option<&ColumnDef> {
        self.column_with_role(ColumnRole::UpdateDate)
    }

    /// Discriminator column.
    pub fn discriminator_column(&self) -> Option<&ColumnDef> {
        self.column_with_role(ColumnRole::Discriminator)
    }

    /// Check if this entity is an inheritance child with a discriminator value.
    pub fn is_child(&self) -> bool {
        self.parent_entity.is_some() && self.discriminator_value.is_some()
    }
}

impl OrderBy {
    /// Create ascending order.
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: OrderDirection::Asc,
        }
    }

    /// Create descending order.
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: OrderDirection::Desc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ScalarType;

    fn post() -> EntityDef {
        EntityDef::new("Post", "posts")
            .with_column(ColumnDef::primary("id", ScalarType::Int64))
            .with_column(ColumnDef::new("title", ScalarType::String))
            .with_column(
                ColumnDef::new("deletedAt", ScalarType::Timestamp)
                    .with_database_name("deleted_at")
                    .nullable()
                    .with_role(ColumnRole::DeleteDate),
            )
            .with_column(ColumnDef::new("version", ScalarType::Int32).with_role(ColumnRole::Version))
            .with_relation(
                RelationDef::many_to_one("author", "Post", "User").with_join_column("author_id", "id"),
            )
    }

    #[test]
    fn test_entity_builder() {
        let entity = post();

        assert_eq!(entity.name, "Post");
        assert_eq!(entity.table_path, "posts");
        assert_eq!(entity.columns.len(), 4);
        assert_eq!(entity.primary_columns().count(), 1);
        assert!(!entity.has_multiple_primary_keys());
    }

    #[test]
    fn test_role_columns() {
        let entity = post();

        assert_eq!(entity.delete_date_column().unwrap().database_name, "deleted_at");
        assert_eq!(entity.version_column().unwrap().property_path, "version");
        assert!(entity.update_date_column().is_none());
        assert!(entity.discriminator_column().is_none());
    }

    #[test]
    fn test_lookup_errors() {
        let entity = post();

        assert!(entity.column("title").is_ok());
        assert!(matches!(
            entity.column("missing"),
            Err(Error::UnknownColumn { .. })
        ));
        assert!(entity.relation("author").is_ok());
        assert!(matches!(
            entity.relation("comments"),
            Err(Error::UnknownRelation { .. })
        ));
    }

    #[test]
    fn test_order_direction_parse() {
        assert_eq!("ASC".parse::<OrderDirection>().unwrap(), OrderDirection::Asc);
        assert_eq!("DESC".parse::<OrderDirection>().unwrap(), OrderDirection::Desc);
        assert!(matches!(
            "asc".parse::<OrderDirection>(),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_child_entity() {
        let entity = EntityDef::new("Photo", "content").with_parent("Content", "photo");
        assert!(entity.is_child());
    }
}
