//! Column definitions for entities.

use super::types::ScalarType;
use serde::{Deserialize, Serialize};

/// Special meaning a column carries for the query layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnRole {
    /// Ordinary data column.
    #[default]
    Regular,
    /// Monotonic version counter used by optimistic locking.
    Version,
    /// Last-update timestamp, used by optimistic locking when no version column exists.
    UpdateDate,
    /// Soft-delete marker; rows with a non-null value are hidden unless deleted rows are requested.
    DeleteDate,
    /// Discriminator for single-table inheritance.
    Discriminator,
}

/// A column definition within an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Property path on the entity (dot-separated for embedded columns).
    pub property_path: String,
    /// Physical column name.
    pub database_name: String,
    /// Column data type.
    pub column_type: ScalarType,
    /// Whether the column is part of the primary key.
    #[serde(default)]
    pub primary: bool,
    /// Whether selecting the whole entity includes this column.
    #[serde(default = "default_selectable")]
    pub selectable: bool,
    /// Whether the column accepts NULL.
    #[serde(default)]
    pub nullable: bool,
    /// Role of the column for locking, soft delete, or inheritance.
    #[serde(default)]
    pub role: ColumnRole,
    /// Coordinate precision for spatial GeoJSON projection.
    #[serde(default)]
    pub precision: Option<u8>,
}

fn default_selectable() -> bool {
    true
}

impl ColumnDef {
    /// Create a new column whose database name equals its property path.
    pub fn new(property_path: impl Into<String>, column_type: ScalarType) -> Self {
        let property_path = property_path.into();
        Self {
            database_name: property_path.replace('.', "_"),
            property_path,
            column_type,
            primary: false,
            selectable: true,
            nullable: false,
            role: ColumnRole::Regular,
            precision: None,
        }
    }

    /// Create a primary key column.
    pub fn primary(property_path: impl Into<String>, column_type: ScalarType) -> Self {
        let mut column = Self::new(property_path, column_type);
        column.primary = true;
        column
    }

    /// Set the physical column name.
    pub fn with_database_name(mut self, name: impl Into<String>) -> Self {
        self.database_name = name.into();
        self
    }

    /// Mark as nullable.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Exclude from whole-entity selection.
    pub fn hidden(mut self) -> Self {
        self.selectable = false;
        self
    }

    /// Set the column role.
    pub fn with_role(mut self, role: ColumnRole) -> Self {
        self.role = role;
        self
    }

    /// Set spatial projection precision.
    pub fn with_precision(mut self, precision: u8) -> Self {
        self.precision = Some(precision);
        self
    }

    /// Check if the column is spatial.
    pub fn is_spatial(&self) -> bool {
        self.column_type.is_spatial()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_builder() {
        let column = ColumnDef::new("createdAt", ScalarType::Timestamp)
            .with_database_name("created_at")
            .nullable()
            .with_role(ColumnRole::UpdateDate);

        assert_eq!(column.property_path, "createdAt");
        assert_eq!(column.database_name, "created_at");
        assert!(column.nullable);
        assert!(column.selectable);
        assert!(!column.primary);
        assert_eq!(column.role, ColumnRole::UpdateDate);
    }

    #[test]
    fn test_embedded_property_database_name() {
        let column = ColumnDef::new("address.city", ScalarType::String);
        assert_eq!(column.database_name, "address_city");
    }

    #[test]
    fn test_primary_and_hidden() {
        let id = ColumnDef::primary("id", ScalarType::Int64);
        assert!(id.primary);

        let secret = ColumnDef::new("password", ScalarType::String).hidden();
        assert!(!secret.selectable);
    }

    #[test]
    fn test_deserialize_defaults() {
        let column: ColumnDef = serde_json::from_str(
            r#"{"property_path":"name","database_name":"name","column_type":"string"}"#,
        )
        .unwrap();
        assert!(column.selectable);
        assert_eq!(column.role, ColumnRole::Regular);
    }
}
