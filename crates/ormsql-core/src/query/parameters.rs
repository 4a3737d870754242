//! Named-parameter expansion.
//!
//! Compiled SQL refers to parameters as `:name`, or `:...name` for a list that
//! is spread into one placeholder per element. Drivers receive positional
//! placeholders in the dialect's style and a flat value list.

use std::collections::BTreeMap;

use super::dialect::Dialect;
use crate::value::Value;

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.'
}

/// Replace named placeholders with positional ones and collect the bound values.
///
/// Names missing from `parameters` are left in the text unchanged, as are
/// `::type` casts and anything inside single-quoted literals.
pub fn expand_parameters(
    sql: &str,
    parameters: &BTreeMap<String, Value>,
    dialect: &Dialect,
) -> (String, Vec<Value>) {
    let mut out = String::with_capacity(sql.len());
    let mut values = Vec::new();
    let mut in_literal = false;
    let mut chars = sql.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if c == '\'' {
            in_literal = !in_literal;
            out.push(c);
            continue;
        }
        if in_literal || c != ':' {
            out.push(c);
            continue;
        }
        if let Some(&(_, ':')) = chars.peek() {
            // `::` cast
            out.push_str("::");
            chars.next();
            continue;
        }

        let rest = &sql[i + 1..];
        let (spread, name_start) = if rest.starts_with("...") {
            (true, 3)
        } else {
            (false, 0)
        };
        let name_len = rest[name_start..]
            .find(|c: char| !is_name_char(c))
            .unwrap_or(rest.len() - name_start);
        let name = &rest[name_start..name_start + name_len];

        let Some(value) = parameters.get(name).filter(|_| !name.is_empty()) else {
            out.push(c);
            continue;
        };

        match (spread, value.as_list()) {
            (true, Some(items)) => {
                let placeholders: Vec<String> = items
                    .iter()
                    .map(|item| {
                        values.push(item.clone());
                        dialect.placeholder(values.len() - 1)
                    })
                    .collect();
                out.push_str(&placeholders.join(", "));
            }
            _ => {
                values.push(value.clone());
                out.push_str(&dialect.placeholder(values.len() - 1));
            }
        }

        let consumed = name_start + name_len;
        for _ in 0..rest[..consumed].chars().count() {
            chars.next();
        }
    }

    (out, values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::dialect::DialectKind;

    fn params(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_expand_named_parameters() {
        let pg = Dialect::new(DialectKind::Postgres);
        let p = params(&[("title", Value::from("Hello")), ("views", Value::from(3))]);
        let (sql, values) = expand_parameters("a = :title AND b > :views OR c = :title", &p, &pg);

        assert_eq!(sql, "a = $1 AND b > $2 OR c = $3");
        assert_eq!(
            values,
            vec![Value::from("Hello"), Value::from(3), Value::from("Hello")]
        );
    }

    #[test]
    fn test_expand_spread_list() {
        let mysql = Dialect::new(DialectKind::MySql);
        let p = params(&[("ids", Value::from(vec![1, 2, 3]))]);
        let (sql, values) = expand_parameters("id IN (:...ids)", &p, &mysql);

        assert_eq!(sql, "id IN (?, ?, ?)");
        assert_eq!(values.len(), 3);
    }

    #[test]
    fn test_list_without_spread_binds_once() {
        let pg = Dialect::new(DialectKind::Postgres);
        let p = params(&[("tags", Value::from(vec!["a", "b"]))]);
        let (sql, values) = expand_parameters("tags && :tags", &p, &pg);

        assert_eq!(sql, "tags && $1");
        assert_eq!(values, vec![Value::from(vec!["a", "b"])]);
    }

    #[test]
    fn test_unknown_names_casts_and_literals_untouched() {
        let pg = Dialect::new(DialectKind::Postgres);
        let p = params(&[("x", Value::from(1))]);
        let (sql, values) = expand_parameters(
            "a::int = :x AND b = ':x' AND c = :missing AND d = :",
            &p,
            &pg,
        );

        assert_eq!(sql, "a::int = $1 AND b = ':x' AND c = :missing AND d = :");
        assert_eq!(values.len(), 1);
    }

    #[test]
    fn test_sqlserver_placeholders_are_zero_based() {
        let mssql = Dialect::new(DialectKind::SqlServer);
        let p = params(&[("a", Value::from(1)), ("b", Value::from(2))]);
        let (sql, _) = expand_parameters(":a + :b", &p, &mssql);
        assert_eq!(sql, "@0 + @1");
    }
}
