//! ORMSQL Command-Line Compiler
//!
//! Compiles JSON query documents against a JSON catalog into dialect SQL.

mod document;
mod formatter;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use document::{load_catalog, DocumentError, QueryDocument};
use formatter::{Compiled, OutputFormat};
use ormsql_core::{Dialect, DialectKind};
use tracing::debug;

/// ORMSQL Command-Line Compiler
#[derive(Parser, Debug)]
#[command(name = "ormsql")]
#[command(version, about = "Compile ORMSQL query documents to SQL")]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Output format
    #[arg(long, global = true, default_value = "text", value_enum)]
    pub format: OutputFormat,
}

/// Subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compile a query document
    Compile {
        /// Catalog file (JSON)
        #[arg(short, long)]
        schema: PathBuf,

        /// Query document (JSON)
        #[arg(short, long)]
        query: PathBuf,

        /// Target dialect
        #[arg(short, long, default_value = "postgres", value_parser = parse_dialect)]
        dialect: DialectKind,

        /// Server version as MAJOR.MINOR (changes lock syntax on MySQL)
        #[arg(long, value_parser = parse_version)]
        server_version: Option<(u32, u32)>,

        /// Use pre-8.0 spatial function names on MySQL
        #[arg(long)]
        legacy_spatial: bool,

        /// Which statement to print
        #[arg(long, default_value = "select", value_enum)]
        shape: Shape,
    },

    /// List supported dialects and their capabilities
    Dialects,
}

/// Statement derived from a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Shape {
    /// The query itself
    Select,
    /// Distinct entity count
    Count,
    /// Existence probe
    Exists,
    /// Primary-key window used for paging across joins
    Window,
}

fn parse_dialect(s: &str) -> Result<DialectKind, String> {
    s.parse::<DialectKind>().map_err(|e| e.to_string())
}

fn parse_version(s: &str) -> Result<(u32, u32), String> {
    let (major, minor) = s.split_once('.').unwrap_or((s, "0"));
    let major = major.parse().map_err(|_| format!("invalid major version: {}", major))?;
    let minor = minor.parse().map_err(|_| format!("invalid minor version: {}", minor))?;
    Ok((major, minor))
}

fn main() {
    // Initialize tracing
    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    if let Ok(directive) = "ormsql_cli=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let formatter = formatter::create_formatter(args.format);
    match args.command {
        Command::Compile {
            schema,
            query,
            dialect,
            server_version,
            legacy_spatial,
            shape,
        } => {
            let mut target = Dialect::new(dialect).with_legacy_spatial_support(legacy_spatial);
            if let Some((major, minor)) = server_version {
                target = target.with_server_version(major, minor);
            }
            let compiled = compile_files(&schema, &query, target, shape)?;
            println!("{}", formatter.format_compiled(&compiled));
        }
        Command::Dialects => {
            println!("{}", formatter.format_dialects(&DialectKind::ALL));
        }
    }
    Ok(())
}

/// Load both files and compile the requested statement.
fn compile_files(
    schema: &Path,
    query: &Path,
    dialect: Dialect,
    shape: Shape,
) -> Result<Compiled, DocumentError> {
    let catalog = load_catalog(schema)?;
    debug!(entities = catalog.entities.len(), path = %schema.display(), "Loaded catalog");
    let document = QueryDocument::load(query)?;
    let qb = document.build(&catalog, dialect)?;

    let statement = match shape {
        Shape::Select => qb,
        Shape::Count => qb.count_query()?,
        Shape::Exists => qb.exists_query()?,
        Shape::Window => match qb.window_query()? {
            Some(window) => window,
            None => {
                debug!("Query pages without a window; printing it unchanged");
                qb
            }
        },
    };
    let (sql, parameters) = statement.get_query_and_parameters()?;
    debug!(dialect = %dialect.kind(), params = parameters.len(), "Compiled query");
    Ok(Compiled {
        dialect: dialect.kind(),
        sql,
        parameters,
    })
}
