//! Column alias construction and property-path replacement.

use std::collections::HashMap;

use super::alias::AliasRegistry;
use super::dialect::Dialect;
use crate::catalog::{Catalog, EntityDef};

/// Number of digest characters kept when an alias is shortened.
const SHORT_HASH_LEN: usize = 16;

/// Build the result-column alias for `column` of `alias` (`alias_column`).
///
/// Names longer than the dialect's identifier limit keep a readable prefix and
/// end in a blake3 digest of the full name, so the result is deterministic.
pub fn alias_column(dialect: &Dialect, alias: &str, column: &str) -> String {
    let name = format!("{}_{}", alias, column);
    match dialect.capabilities().max_alias_length {
        Some(max) if name.chars().count() > max => shorten(&name, max),
        _ => name,
    }
}

fn shorten(name: &str, max: usize) -> String {
    let digest = hex::encode(blake3::hash(name.as_bytes()).as_bytes());
    let hash = &digest[..SHORT_HASH_LEN.min(max)];
    let keep = max.saturating_sub(hash.len() + 1);
    if keep == 0 {
        return hash.to_string();
    }
    let prefix: String = name.chars().take(keep).collect();
    format!("{}_{}", prefix, hash)
}

/// Property path to column name replacements for one entity.
fn entity_replacements(entity: &EntityDef) -> HashMap<String, String> {
    let mut replacements = HashMap::new();
    for relation in &entity.relations {
        if !relation.is_many_to_one_or_one_to_one_owner() {
            continue;
        }
        if let Some(first) = relation.join_columns.first() {
            replacements.insert(relation.property_name.clone(), first.name.clone());
        }
        for join_column in &relation.join_columns {
            replacements.insert(
                format!("{}.{}", relation.property_name, join_column.referenced),
                join_column.name.clone(),
            );
        }
    }
    for column in &entity.columns {
        replacements.insert(column.database_name.clone(), column.database_name.clone());
        replacements.insert(column.property_path.clone(), column.database_name.clone());
    }
    replacements
}

/// Column addressed by `property` of `entity`.
///
/// Owning relation properties resolve to their first join column, the same way
/// property references are rewritten in conditions.
pub fn property_column(entity: &EntityDef, property: &str) -> Option<String> {
    entity_replacements(entity).remove(property)
}

fn is_boundary_before(c: char) -> bool {
    matches!(c, ' ' | '=' | '(')
}

fn is_boundary_after(c: char) -> bool {
    matches!(c, ' ' | '=' | '(' | ')' | ',')
}

/// Rewrite `alias.propertyPath` references into escaped column references.
///
/// A reference is recognised only at a boundary: preceded by a space, `=`, `(`
/// or the start of the text, and running until a space, `=`, `(`, `)`, `,` or
/// the end. Unknown property paths and text inside single-quoted literals are
/// left untouched.
pub fn replace_property_names(
    sql: &str,
    aliases: &AliasRegistry,
    catalog: &Catalog,
    dialect: &Dialect,
) -> String {
    let mut tables: Vec<(String, HashMap<String, String>)> = aliases
        .iter()
        .filter_map(|alias| {
            let entity = catalog.get_entity(alias.entity()?)?;
            Some((format!("{}.", alias.name), entity_replacements(entity)))
        })
        .collect();
    if tables.is_empty() {
        return sql.to_string();
    }
    // Longer prefixes first so `post_tags.` wins over `post.`.
    tables.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

    let mut out = String::with_capacity(sql.len());
    let mut in_literal = false;
    let mut prev: Option<char> = None;
    let mut i = 0;

    while i < sql.len() {
        let rest = &sql[i..];
        let c = match rest.chars().next() {
            Some(c) => c,
            None => break,
        };

        if c == '\'' {
            in_literal = !in_literal;
        }

        if !in_literal && prev.map_or(true, is_boundary_before) {
            if let Some(replaced) = replace_at(rest, &tables, dialect) {
                out.push_str(&replaced.0);
                i += replaced.1;
                prev = replaced.0.chars().last();
                continue;
            }
        }

        out.push(c);
        prev = Some(c);
        i += c.len_utf8();
    }
    out
}

/// Try to replace a reference at the start of `text`; returns the rendering and consumed bytes.
fn replace_at(
    text: &str,
    tables: &[(String, HashMap<String, String>)],
    dialect: &Dialect,
) -> Option<(String, usize)> {
    for (prefix, replacements) in tables {
        let Some(after) = text.strip_prefix(prefix.as_str()) else {
            continue;
        };
        let len = after
            .find(|c: char| is_boundary_after(c))
            .unwrap_or(after.len());
        if len == 0 {
            continue;
        }
        let property = &after[..len];
        if let Some(column) = replacements.get(property) {
            let alias = &prefix[..prefix.len() - 1];
            let rendered = format!("{}.{}", dialect.escape(alias), dialect.escape(column));
            return Some((rendered, prefix.len() + len));
        }
    }
    None
}
