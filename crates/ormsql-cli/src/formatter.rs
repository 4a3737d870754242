//! Output formatters for compiled queries and the dialect table.

use clap::ValueEnum;
use comfy_table::{Cell, Table};
use ormsql_core::query::Capabilities;
use ormsql_core::{DialectKind, Value};

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// SQL followed by one parameter per line
    Text,
    /// JSON object
    Json,
    /// ASCII table format
    Table,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Table => write!(f, "table"),
        }
    }
}

/// A compiled query ready for printing.
#[derive(Debug, Clone, PartialEq)]
pub struct Compiled {
    /// Dialect the query was compiled for.
    pub dialect: DialectKind,
    /// Positional SQL.
    pub sql: String,
    /// Bound values in placeholder order.
    pub parameters: Vec<Value>,
}

/// Trait for formatting output.
pub trait Formatter {
    /// Format a compiled query.
    fn format_compiled(&self, compiled: &Compiled) -> String;

    /// Format the capability table.
    fn format_dialects(&self, dialects: &[DialectKind]) -> String;
}

/// Create a formatter for the given output format.
pub fn create_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Text => Box::new(TextFormatter),
        OutputFormat::Json => Box::new(JsonFormatter),
        OutputFormat::Table => Box::new(TableFormatter),
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

fn lock_modes(caps: &Capabilities) -> Vec<&'static str> {
    caps.lock_modes.iter().map(|(mode, _)| mode.name()).collect()
}

fn capability_rows(kind: DialectKind) -> Vec<(&'static str, String)> {
    let caps = kind.capabilities();
    vec![
        ("limit", format!("{:?}", caps.limit_syntax)),
        ("distinct_count", format!("{:?}", caps.distinct_count)),
        ("placeholder", format!("{:?}", caps.placeholder)),
        (
            "max_alias_length",
            caps.max_alias_length
                .map_or_else(|| "-".to_string(), |n| n.to_string()),
        ),
        ("distinct_on", yes_no(caps.distinct_on).to_string()),
        ("lock_tables", yes_no(caps.lock_tables).to_string()),
        ("on_locked", yes_no(caps.on_locked).to_string()),
        ("locks", lock_modes(caps).join(", ")),
    ]
}

/// Plain text formatter.
pub struct TextFormatter;

impl Formatter for TextFormatter {
    fn format_compiled(&self, compiled: &Compiled) -> String {
        let mut output = compiled.sql.clone();
        for (index, value) in compiled.parameters.iter().enumerate() {
            output.push_str(&format!("\n-- #{}: {}", index + 1, value));
        }
        output
    }

    fn format_dialects(&self, dialects: &[DialectKind]) -> String {
        dialects
            .iter()
            .map(|kind| {
                let details = capability_rows(*kind)
                    .into_iter()
                    .map(|(key, value)| format!("  {}: {}", key, value))
                    .collect::<Vec<_>>()
                    .join("\n");
                format!("{}\n{}", kind, details)
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// JSON formatter.
pub struct JsonFormatter;

impl Formatter for JsonFormatter {
    fn format_compiled(&self, compiled: &Compiled) -> String {
        serde_json::json!({
            "dialect": compiled.dialect.name(),
            "sql": compiled.sql,
            "parameters": compiled.parameters,
        })
        .to_string()
    }

    fn format_dialects(&self, dialects: &[DialectKind]) -> String {
        let rows: Vec<serde_json::Value> = dialects
            .iter()
            .map(|kind| {
                let mut obj = serde_json::Map::new();
                obj.insert("name".into(), kind.name().into());
                for (key, value) in capability_rows(*kind) {
                    obj.insert(key.into(), value.into());
                }
                serde_json::Value::Object(obj)
            })
            .collect();
        serde_json::to_string_pretty(&rows).unwrap_or_else(|_| "[]".to_string())
    }
}

/// Table formatter using comfy-table.
pub struct TableFormatter;

impl Formatter for TableFormatter {
    fn format_compiled(&self, compiled: &Compiled) -> String {
        let mut output = compiled.sql.clone();
        if !compiled.parameters.is_empty() {
            let mut table = Table::new();
            table.set_header(vec!["#", "Value"]);
            for (index, value) in compiled.parameters.iter().enumerate() {
                table.add_row(vec![Cell::new(index + 1), Cell::new(value)]);
            }
            output.push_str("\n\n");
            output.push_str(&table.to_string());
        }
        output
    }

    fn format_dialects(&self, dialects: &[DialectKind]) -> String {
        let mut table = Table::new();
        let mut header = vec!["Dialect"];
        header.extend(capability_rows(DialectKind::Postgres).iter().map(|(key, _)| *key));
        table.set_header(header);

        for kind in dialects {
            let mut row = vec![Cell::new(kind)];
            row.extend(
                capability_rows(*kind)
                    .into_iter()
                    .map(|(_, value)| Cell::new(value)),
            );
            table.add_row(row);
        }
        table.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compiled() -> Compiled {
        Compiled {
            dialect: DialectKind::Postgres,
            sql: "SELECT 1 WHERE a = $1".to_string(),
            parameters: vec![Value::Int(7)],
        }
    }

    #[test]
    fn test_text_format() {
        let output = TextFormatter.format_compiled(&compiled());
        assert_eq!(output, "SELECT 1 WHERE a = $1\n-- #1: 7");
    }

    #[test]
    fn test_json_format() {
        let output = JsonFormatter.format_compiled(&compiled());
        let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed["dialect"], "postgres");
        assert_eq!(parsed["sql"], "SELECT 1 WHERE a = $1");
        assert_eq!(parsed["parameters"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_table_format_lists_parameters() {
        let output = TableFormatter.format_compiled(&compiled());
        assert!(output.starts_with("SELECT 1 WHERE a = $1\n\n"));
        assert!(output.contains('7'));
    }

    #[test]
    fn test_dialects_listing() {
        let output = TextFormatter.format_dialects(&DialectKind::ALL);
        assert!(output.contains("postgres\n  limit: LimitOffset"));
        assert!(output.contains("oracle"));

        let json = JsonFormatter.format_dialects(&[DialectKind::MySql]);
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed[0]["name"], "mysql");
    }
}
