//! Entity catalog - the schema metadata provider used by the compiler.

use std::collections::HashMap;

use super::{EntityDef, RelationDef};
use crate::error::Error;
use serde::{Deserialize, Serialize};

/// A versioned snapshot of all entity definitions.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Catalog {
    /// Schema version (monotonically increasing).
    #[serde(default)]
    pub version: u64,
    /// Entity definitions keyed by name.
    #[serde(default)]
    pub entities: HashMap<String, EntityDef>,
}

impl Catalog {
    /// Create an empty catalog.
    pub fn new(version: u64) -> Self {
        Self {
            version,
            entities: HashMap::new(),
        }
    }

    /// Add an entity to the catalog.
    pub fn with_entity(mut self, entity: EntityDef) -> Self {
        self.register(entity);
        self
    }

    /// Register or replace an entity.
    pub fn register(&mut self, entity: EntityDef) {
        self.entities.insert(entity.name.clone(), entity);
    }

    /// Get an entity by name.
    pub fn get_entity(&self, name: &str) -> Option<&EntityDef> {
        self.entities.get(name)
    }

    /// Get an entity by name, failing with `UnknownEntity`.
    pub fn entity(&self, name: &str) -> Result<&EntityDef, Error> {
        self.get_entity(name)
            .ok_or_else(|| Error::UnknownEntity(name.to_string()))
    }

    /// All entities inheriting from `name`, directly or through intermediate children.
    pub fn descendants(&self, name: &str) -> Vec<&EntityDef> {
        let mut found: Vec<&EntityDef> = Vec::new();
        let mut pending = vec![name];
        while let Some(parent) = pending.pop() {
            for entity in self.entities.values() {
                let is_child = entity.parent_entity.as_deref() == Some(parent);
                if is_child && entity.name != name && !found.iter().any(|e| e.name == entity.name) {
                    found.push(entity);
                    pending.push(&entity.name);
                }
            }
        }
        found
    }

    /// Resolve the inverse side of a relation on its target entity.
    pub fn inverse_relation(&self, relation: &RelationDef) -> Result<&RelationDef, Error> {
        let target = self.entity(&relation.target)?;
        let property = relation
            .inverse_property
            .as_deref()
            .ok_or_else(|| Error::MissingJoinColumns {
                entity: relation.entity.clone(),
                relation: relation.property_name.clone(),
            })?;
        target.relation(property)
    }

    /// Resolve the junction table of a many-to-many relation from whichever side declares it.
    pub fn junction_table(&self, relation: &RelationDef) -> Result<String, Error> {
        if let Some(table) = &relation.junction_table {
            return Ok(table.clone());
        }
        self.inverse_relation(relation)?
            .junction_table
            .clone()
            .ok_or_else(|| Error::MissingJoinColumns {
                entity: relation.entity.clone(),
                relation: relation.property_name.clone(),
            })
    }

    /// List all entity names.
    pub fn entity_names(&self) -> Vec<&str> {
        self.entities.keys().map(|s| s.as_str()).collect()
    }

    /// Serialize the catalog to JSON.
    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Load a catalog from JSON.
    ///
    /// The document may list entities either as a map keyed by name or as an array.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Entities {
            Map(HashMap<String, EntityDef>),
            List(Vec<EntityDef>),
        }

        #[derive(Deserialize)]
        struct Document {
            #[serde(default)]
            version: u64,
            entities: Entities,
        }

        let document: Document = serde_json::from_str(json)?;
        let mut catalog = Catalog::new(document.version);
        match document.entities {
            Entities::Map(map) => {
                for (_, entity) in map {
                    catalog.register(entity);
                }
            }
            Entities::List(list) => {
                for entity in list {
                    catalog.register(entity);
                }
            }
        }
        Ok(catalog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnDef, ScalarType};

    fn sample_catalog() -> Catalog {
        let user = EntityDef::new("User", "users")
            .with_column(ColumnDef::primary("id", ScalarType::Int64))
            .with_column(ColumnDef::new("name", ScalarType::String))
            .with_relation(RelationDef::one_to_many("posts", "User", "Post", "author"));

        let post = EntityDef::new("Post", "posts")
            .with_column(ColumnDef::primary("id", ScalarType::Int64))
            .with_column(ColumnDef::new("title", ScalarType::String))
            .with_relation(
                RelationDef::many_to_one("author", "Post", "User").with_join_column("author_id", "id"),
            )
            .with_relation(
                RelationDef::many_to_many_owner("tags", "Post", "Tag", "post_tags")
                    .with_join_column("post_id", "id")
                    .with_inverse_join_column("tag_id", "id")
                    .with_inverse("posts"),
            );

        let tag = EntityDef::new("Tag", "tags")
            .with_column(ColumnDef::primary("id", ScalarType::Int64))
            .with_relation(RelationDef::many_to_many_inverse("posts", "Tag", "Post", "tags"));

        Catalog::new(1)
            .with_entity(user)
            .with_entity(post)
            .with_entity(tag)
    }

    #[test]
    fn test_catalog_lookup() {
        let catalog = sample_catalog();

        assert!(catalog.get_entity("User").is_some());
        assert!(matches!(catalog.entity("Nope"), Err(Error::UnknownEntity(_))));
        assert_eq!(catalog.entity_names().len(), 3);
    }

    #[test]
    fn test_inverse_relation() {
        let catalog = sample_catalog();
        let posts = catalog.entity("User").unwrap().relation("posts").unwrap();
        let inverse = catalog.inverse_relation(posts).unwrap();

        assert_eq!(inverse.property_name, "author");
        assert_eq!(inverse.join_columns[0].name, "author_id");
    }

    #[test]
    fn test_junction_table_from_inverse_side() {
        let catalog = sample_catalog();
        let tag_posts = catalog.entity("Tag").unwrap().relation("posts").unwrap();

        assert_eq!(catalog.junction_table(tag_posts).unwrap(), "post_tags");
    }

    #[test]
    fn test_descendants_are_transitive() {
        let content = EntityDef::new("Content", "contents");
        let article = EntityDef::new("Article", "contents").with_parent("Content", "article");
        let news = EntityDef::new("News", "contents").with_parent("Article", "news");
        let breaking = EntityDef::new("Breaking", "contents").with_parent("News", "breaking");
        let catalog = Catalog::new(1)
            .with_entity(content)
            .with_entity(article)
            .with_entity(news)
            .with_entity(breaking);

        let mut names: Vec<&str> = catalog
            .descendants("Article")
            .iter()
            .map(|e| e.name.as_str())
            .collect();
        names.sort();
        assert_eq!(names, vec!["Breaking", "News"]);
        assert_eq!(catalog.descendants("Content").len(), 3);
        assert!(catalog.descendants("Breaking").is_empty());
    }

    #[test]
    fn test_json_roundtrip() {
        let catalog = sample_catalog();
        let json = catalog.to_json().unwrap();
        let loaded = Catalog::from_json(&json).unwrap();
        assert_eq!(loaded, catalog);
    }

    #[test]
    fn test_json_entity_list() {
        let json = r#"{
            "version": 3,
            "entities": [
                {"name": "User", "table_path": "users", "columns": [
                    {"property_path": "id", "database_name": "id", "column_type": "int64", "primary": true}
                ]}
            ]
        }"#;
        let catalog = Catalog::from_json(json).unwrap();
        assert_eq!(catalog.version, 3);
        assert_eq!(catalog.entity("User").unwrap().primary_columns().count(), 1);
    }
}
