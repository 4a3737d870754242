//! Relation definitions between entities.

use serde::{Deserialize, Serialize};

/// Cardinality of a relation, seen from the entity that declares it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    /// One-to-one relation (unique foreign key on the owning side).
    OneToOne,
    /// Many-to-one relation (foreign key on this side).
    ManyToOne,
    /// One-to-many relation (foreign key on the other side).
    OneToMany,
    /// Many-to-many relation (requires a junction table).
    ManyToMany,
}

/// A foreign-key column pair.
///
/// `name` is the physical column that holds the key (on the owning table or the
/// junction table); `referenced` is the property path of the column it points to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinColumn {
    /// Physical foreign-key column name.
    pub name: String,
    /// Property path of the referenced column.
    pub referenced: String,
}

impl JoinColumn {
    /// Create a join column.
    pub fn new(name: impl Into<String>, referenced: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            referenced: referenced.into(),
        }
    }
}

/// A relation declared on an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationDef {
    /// Property name on the declaring entity (unique within that entity).
    pub property_name: String,
    /// Declaring entity name.
    pub entity: String,
    /// Target entity name.
    pub target: String,
    /// Relation cardinality.
    pub cardinality: Cardinality,
    /// Whether this side holds the foreign key (or the junction join columns).
    pub owning: bool,
    /// Foreign-key columns; for many-to-many, junction columns pointing at this entity.
    #[serde(default)]
    pub join_columns: Vec<JoinColumn>,
    /// Junction columns pointing at the target entity (many-to-many owner only).
    #[serde(default)]
    pub inverse_join_columns: Vec<JoinColumn>,
    /// Junction table path for many-to-many relations.
    #[serde(default)]
    pub junction_table: Option<String>,
    /// Property name of the inverse relation on the target entity.
    #[serde(default)]
    pub inverse_property: Option<String>,
}

impl RelationDef {
    fn base(
        property_name: impl Into<String>,
        entity: impl Into<String>,
        target: impl Into<String>,
        cardinality: Cardinality,
        owning: bool,
    ) -> Self {
        Self {
            property_name: property_name.into(),
            entity: entity.into(),
            target: target.into(),
            cardinality,
            owning,
            join_columns: Vec::new(),
            inverse_join_columns: Vec::new(),
            junction_table: None,
            inverse_property: None,
        }
    }

    /// Create a many-to-one relation holding the foreign key.
    pub fn many_to_one(
        property_name: impl Into<String>,
        entity: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self::base(property_name, entity, target, Cardinality::ManyToOne, true)
    }

    /// Create a one-to-many relation; the foreign key lives on the inverse many-to-one.
    pub fn one_to_many(
        property_name: impl Into<String>,
        entity: impl Into<String>,
        target: impl Into<String>,
        inverse_property: impl Into<String>,
    ) -> Self {
        Self::base(property_name, entity, target, Cardinality::OneToMany, false)
            .with_inverse(inverse_property)
    }

    /// Create the owning side of a one-to-one relation.
    pub fn one_to_one_owner(
        property_name: impl Into<String>,
        entity: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self::base(property_name, entity, target, Cardinality::OneToOne, true)
    }

    /// Create the inverse side of a one-to-one relation.
    pub fn one_to_one_inverse(
        property_name: impl Into<String>,
        entity: impl Into<String>,
        target: impl Into<String>,
        inverse_property: impl Into<String>,
    ) -> Self {
        Self::base(property_name, entity, target, Cardinality::OneToOne, false)
            .with_inverse(inverse_property)
    }

    /// Create the owning side of a many-to-many relation through `junction_table`.
    pub fn many_to_many_owner(
        property_name: impl Into<String>,
        entity: impl Into<String>,
        target: impl Into<String>,
        junction_table: impl Into<String>,
    ) -> Self {
        let mut relation =
            Self::base(property_name, entity, target, Cardinality::ManyToMany, true);
        relation.junction_table = Some(junction_table.into());
        relation
    }

    /// Create the inverse side of a many-to-many relation.
    pub fn many_to_many_inverse(
        property_name: impl Into<String>,
        entity: impl Into<String>,
        target: impl Into<String>,
        inverse_property: impl Into<String>,
    ) -> Self {
        Self::base(property_name, entity, target, Cardinality::ManyToMany, false)
            .with_inverse(inverse_property)
    }

    /// Add a foreign-key column.
    pub fn with_join_column(mut self, name: impl Into<String>, referenced: impl Into<String>) -> Self {
        self.join_columns.push(JoinColumn::new(name, referenced));
        self
    }

    /// Add a junction column pointing at the target entity.
    pub fn with_inverse_join_column(
        mut self,
        name: impl Into<String>,
        referenced: impl Into<String>,
    ) -> Self {
        self.inverse_join_columns
            .push(JoinColumn::new(name, referenced));
        self
    }

    /// Set the inverse relation property.
    pub fn with_inverse(mut self, inverse_property: impl Into<String>) -> Self {
        self.inverse_property = Some(inverse_property.into());
        self
    }

    /// Set the junction table (for an inverse many-to-many side declared standalone).
    pub fn with_junction_table(mut self, junction_table: impl Into<String>) -> Self {
        self.junction_table = Some(junction_table.into());
        self
    }

    /// Foreign key on this side: many-to-one, or the owning end of a one-to-one.
    pub fn is_many_to_one_or_one_to_one_owner(&self) -> bool {
        self.cardinality == Cardinality::ManyToOne
            || (self.cardinality == Cardinality::OneToOne && self.owning)
    }

    /// Foreign key on the target side: one-to-many, or the inverse end of a one-to-one.
    pub fn is_one_to_many_or_one_to_one_inverse(&self) -> bool {
        self.cardinality == Cardinality::OneToMany
            || (self.cardinality == Cardinality::OneToOne && !self.owning)
    }

    /// Check if this is a many-to-many relation.
    pub fn is_many_to_many(&self) -> bool {
        self.cardinality == Cardinality::ManyToMany
    }
}
