//! Alias registry.
//!
//! Every name that appears in a compiled query (the main FROM target, each
//! additional FROM, each join, and internal helper aliases) is registered here
//! exactly once. Names are unique within one expression map; registering a taken
//! name fails with `DuplicateAlias` so resolution never depends on insertion order.

use crate::error::{Error, Result};

/// Role an alias plays in the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasKind {
    /// A FROM target.
    From,
    /// A joined target.
    Join,
    /// Internal helper (junction tables, derived tables).
    Other,
}

/// What an alias refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AliasTarget {
    /// Physical table path.
    Table(String),
    /// Compiled sub-query text including its parentheses.
    SubQuery(String),
    /// Catalog entity (its table path is looked up at compile time).
    Entity(String),
}

/// A named reference within one query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alias {
    /// Role of the alias.
    pub kind: AliasKind,
    /// Unique name.
    pub name: String,
    /// Backing target.
    pub target: AliasTarget,
}

impl Alias {
    /// Entity name, when the alias is backed by a catalog entity.
    pub fn entity(&self) -> Option<&str> {
        match &self.target {
            AliasTarget::Entity(name) => Some(name),
            _ => None,
        }
    }

    /// Sub-query text, when the alias wraps one.
    pub fn sub_query(&self) -> Option<&str> {
        match &self.target {
            AliasTarget::SubQuery(sql) => Some(sql),
            _ => None,
        }
    }
}

/// Ordered set of aliases with unique names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasRegistry {
    aliases: Vec<Alias>,
}

impl AliasRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new alias, failing with `DuplicateAlias` if the name is taken.
    pub fn create_alias(
        &mut self,
        kind: AliasKind,
        name: impl Into<String>,
        target: AliasTarget,
    ) -> Result<&Alias> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::InvalidArgument("alias name cannot be empty".to_string()));
        }
        if self.has_alias(&name) {
            return Err(Error::DuplicateAlias(name));
        }
        self.aliases.push(Alias { kind, name, target });
        let last = self.aliases.len() - 1;
        Ok(&self.aliases[last])
    }

    /// Look up an alias by name.
    pub fn find_by_name(&self, name: &str) -> Result<&Alias> {
        self.aliases
            .iter()
            .find(|a| a.name == name)
            .ok_or_else(|| Error::UnknownAlias(name.to_string()))
    }

    /// Check if a name is registered.
    pub fn has_alias(&self, name: &str) -> bool {
        self.aliases.iter().any(|a| a.name == name)
    }

    /// Iterate in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Alias> {
        self.aliases.iter()
    }

    /// FROM aliases in registration order.
    pub fn from_aliases(&self) -> impl Iterator<Item = &Alias> {
        self.aliases.iter().filter(|a| a.kind == AliasKind::From)
    }

    /// Drop every FROM alias (a new `from` replaces the previous ones).
    pub fn remove_from_aliases(&mut self) {
        self.aliases.retain(|a| a.kind != AliasKind::From);
    }

    /// Number of registered aliases.
    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }
}
