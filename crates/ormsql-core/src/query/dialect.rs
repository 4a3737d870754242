//! SQL dialect capabilities.
//!
//! Clause compilers never branch on a concrete backend. They look up the
//! [`Capabilities`] row for the active [`DialectKind`] and render from it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::expression::{LockMode, OnLocked};
use crate::error::{Error, Result};

/// Supported SQL dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialectKind {
    /// PostgreSQL.
    Postgres,
    /// CockroachDB.
    CockroachDb,
    /// MySQL.
    MySql,
    /// MariaDB.
    MariaDb,
    /// SQLite.
    Sqlite,
    /// Microsoft SQL Server.
    SqlServer,
    /// Oracle.
    Oracle,
    /// SAP HANA.
    SapHana,
    /// Google Cloud Spanner.
    Spanner,
}

impl DialectKind {
    /// All dialects, in display order.
    pub const ALL: [DialectKind; 9] = [
        DialectKind::Postgres,
        DialectKind::CockroachDb,
        DialectKind::MySql,
        DialectKind::MariaDb,
        DialectKind::Sqlite,
        DialectKind::SqlServer,
        DialectKind::Oracle,
        DialectKind::SapHana,
        DialectKind::Spanner,
    ];

    /// Short name used in configuration and messages.
    pub fn name(&self) -> &'static str {
        match self {
            DialectKind::Postgres => "postgres",
            DialectKind::CockroachDb => "cockroachdb",
            DialectKind::MySql => "mysql",
            DialectKind::MariaDb => "mariadb",
            DialectKind::Sqlite => "sqlite",
            DialectKind::SqlServer => "mssql",
            DialectKind::Oracle => "oracle",
            DialectKind::SapHana => "sap",
            DialectKind::Spanner => "spanner",
        }
    }

    /// Capability row for this dialect.
    pub fn capabilities(&self) -> &'static Capabilities {
        match self {
            DialectKind::Postgres => &POSTGRES,
            DialectKind::CockroachDb => &COCKROACH,
            DialectKind::MySql => &MYSQL,
            DialectKind::MariaDb => &MARIADB,
            DialectKind::Sqlite => &SQLITE,
            DialectKind::SqlServer => &SQLSERVER,
            DialectKind::Oracle => &ORACLE,
            DialectKind::SapHana => &SAP_HANA,
            DialectKind::Spanner => &SPANNER,
        }
    }
}

impl fmt::Display for DialectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DialectKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(DialectKind::Postgres),
            "cockroachdb" | "cockroach" => Ok(DialectKind::CockroachDb),
            "mysql" => Ok(DialectKind::MySql),
            "mariadb" => Ok(DialectKind::MariaDb),
            "sqlite" => Ok(DialectKind::Sqlite),
            "mssql" | "sqlserver" => Ok(DialectKind::SqlServer),
            "oracle" => Ok(DialectKind::Oracle),
            "sap" | "hana" => Ok(DialectKind::SapHana),
            "spanner" => Ok(DialectKind::Spanner),
            other => Err(Error::InvalidArgument(format!("unknown dialect \"{}\"", other))),
        }
    }
}

/// Identifier quoting style.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierQuote {
    /// `"name"`
    Double,
    /// `` `name` ``
    Backtick,
}

/// How LIMIT/OFFSET is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitSyntax {
    /// `LIMIT n OFFSET m`, offset alone allowed.
    LimitOffset,
    /// `LIMIT n OFFSET m`, offset alone is rejected.
    LimitOffsetRequiresLimit,
    /// `LIMIT n OFFSET m`, offset alone rendered as `LIMIT -1 OFFSET m`.
    LimitAllOffset,
    /// `OFFSET m ROWS FETCH NEXT n ROWS ONLY`; `requires_order` injects
    /// `ORDER BY (SELECT NULL)` when no ordering exists.
    OffsetFetch {
        /// Whether OFFSET needs an ORDER BY.
        requires_order: bool,
    },
}

/// How a distinct count over primary-key tuples is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistinctCount {
    /// `COUNT(DISTINCT(a, b))`
    TupleFunction,
    /// `COUNT(DISTINCT a, b)`
    TupleConstruct,
    /// `COUNT(DISTINCT(CONCAT(a, '|;|', b)))`
    ConcatFunction,
    /// `COUNT(DISTINCT(CONCAT(CAST(a AS STRING), '|;|', ...)))`
    CastConcatFunction,
    /// `COUNT(DISTINCT(a || '|;|' || b))`
    ConcatOperator,
}

/// Positional parameter placeholder style.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `$1, $2, ...`
    DollarIndex,
    /// `?`
    QuestionMark,
    /// `@0, @1, ...`
    AtIndex,
    /// `:1, :2, ...`
    ColonIndex,
    /// `@param0, @param1, ...`
    AtParamIndex,
}

/// Projection applied to spatial columns in SELECT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpatialProjection {
    /// Selected as-is.
    Raw,
    /// `ST_AsText(col)` (`AsText` on legacy servers).
    WellKnownText,
    /// `ST_AsGeoJSON(col[, precision])::json`
    GeoJson,
    /// `col.ToString()`
    ToStringMethod,
}

/// SQL emitted for a lock mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockSyntax {
    /// Trailing row lock that accepts `OF tables` and an on-locked suffix.
    RowLock(&'static str),
    /// Row lock with a built-in on-locked suffix rendered after `OF tables`.
    RowLockWithSuffix(&'static str, &'static str),
    /// Trailing clause used verbatim.
    Fixed(&'static str),
    /// Table hint appended after every FROM/JOIN target; no trailing clause.
    TableHint(&'static str),
}

/// Feature table for one dialect.
#[derive(Debug)]
pub struct Capabilities {
    /// Identifier quoting.
    pub quote: IdentifierQuote,
    /// LIMIT/OFFSET rendering.
    pub limit_syntax: LimitSyntax,
    /// Distinct count strategy.
    pub distinct_count: DistinctCount,
    /// Parameter placeholders.
    pub placeholder: PlaceholderStyle,
    /// Spatial column projection.
    pub spatial: SpatialProjection,
    /// Maximum identifier length for column aliases.
    pub max_alias_length: Option<usize>,
    /// `SELECT DISTINCT ON (...)`.
    pub distinct_on: bool,
    /// `FOR UPDATE OF t1, t2`.
    pub lock_tables: bool,
    /// `NOWAIT` / `SKIP LOCKED` suffix on row locks.
    pub on_locked: bool,
    /// `AS OF SYSTEM TIME`.
    pub time_travel: bool,
    /// `/*+ MAX_EXECUTION_TIME(n) */`.
    pub execution_time_hint: bool,
    /// `USE INDEX (...)`.
    pub index_hints: bool,
    /// Table used to select a constant row, when the dialect needs one.
    pub dummy_table: Option<&'static str>,
    /// Supported pessimistic/dirty lock modes.
    pub lock_modes: &'static [(LockMode, LockSyntax)],
}

static POSTGRES: Capabilities = Capabilities {
    quote: IdentifierQuote::Double,
    limit_syntax: LimitSyntax::LimitOffset,
    distinct_count: DistinctCount::TupleFunction,
    placeholder: PlaceholderStyle::DollarIndex,
    spatial: SpatialProjection::GeoJson,
    max_alias_length: Some(63),
    distinct_on: true,
    lock_tables: true,
    on_locked: true,
    time_travel: false,
    execution_time_hint: false,
    index_hints: false,
    dummy_table: None,
    lock_modes: &[
        (LockMode::PessimisticRead, LockSyntax::RowLock(" FOR SHARE")),
        (LockMode::PessimisticWrite, LockSyntax::RowLock(" FOR UPDATE")),
        (LockMode::PessimisticPartialWrite, LockSyntax::RowLockWithSuffix(" FOR UPDATE", " SKIP LOCKED")),
        (LockMode::PessimisticWriteOrFail, LockSyntax::RowLockWithSuffix(" FOR UPDATE", " NOWAIT")),
        (LockMode::ForNoKeyUpdate, LockSyntax::RowLock(" FOR NO KEY UPDATE")),
        (LockMode::ForKeyShare, LockSyntax::RowLock(" FOR KEY SHARE")),
    ],
};

static COCKROACH: Capabilities = Capabilities {
    quote: IdentifierQuote::Double,
    limit_syntax: LimitSyntax::LimitOffset,
    distinct_count: DistinctCount::TupleFunction,
    placeholder: PlaceholderStyle::DollarIndex,
    spatial: SpatialProjection::GeoJson,
    max_alias_length: Some(63),
    distinct_on: false,
    lock_tables: false,
    on_locked: true,
    time_travel: true,
    execution_time_hint: false,
    index_hints: false,
    dummy_table: None,
    lock_modes: &[
        (LockMode::PessimisticRead, LockSyntax::RowLock(" FOR SHARE")),
        (LockMode::PessimisticWrite, LockSyntax::RowLock(" FOR UPDATE")),
        (LockMode::PessimisticPartialWrite, LockSyntax::RowLockWithSuffix(" FOR UPDATE", " SKIP LOCKED")),
        (LockMode::PessimisticWriteOrFail, LockSyntax::RowLockWithSuffix(" FOR UPDATE", " NOWAIT")),
    ],
};

static MYSQL: Capabilities = Capabilities {
    quote: IdentifierQuote::Backtick,
    limit_syntax: LimitSyntax::LimitOffsetRequiresLimit,
    distinct_count: DistinctCount::TupleConstruct,
    placeholder: PlaceholderStyle::QuestionMark,
    spatial: SpatialProjection::WellKnownText,
    max_alias_length: Some(63),
    distinct_on: false,
    lock_tables: false,
    on_locked: true,
    time_travel: false,
    execution_time_hint: true,
    index_hints: true,
    dummy_table: None,
    lock_modes: &[
        (LockMode::PessimisticRead, LockSyntax::RowLock(" FOR SHARE")),
        (LockMode::PessimisticWrite, LockSyntax::RowLock(" FOR UPDATE")),
        (LockMode::PessimisticPartialWrite, LockSyntax::RowLockWithSuffix(" FOR UPDATE", " SKIP LOCKED")),
        (LockMode::PessimisticWriteOrFail, LockSyntax::RowLockWithSuffix(" FOR UPDATE", " NOWAIT")),
    ],
};

/// Lock table for MySQL servers older than 8.0, which lack `FOR SHARE`.
static MYSQL_LEGACY_LOCKS: &[(LockMode, LockSyntax)] = &[
    (LockMode::PessimisticRead, LockSyntax::Fixed(" LOCK IN SHARE MODE")),
    (LockMode::PessimisticWrite, LockSyntax::Fixed(" FOR UPDATE")),
];

static MARIADB: Capabilities = Capabilities {
    quote: IdentifierQuote::Backtick,
    limit_syntax: LimitSyntax::LimitOffsetRequiresLimit,
    distinct_count: DistinctCount::TupleConstruct,
    placeholder: PlaceholderStyle::QuestionMark,
    spatial: SpatialProjection::WellKnownText,
    max_alias_length: Some(63),
    distinct_on: false,
    lock_tables: false,
    on_locked: true,
    time_travel: false,
    execution_time_hint: true,
    index_hints: true,
    dummy_table: None,
    lock_modes: &[
        (LockMode::PessimisticRead, LockSyntax::Fixed(" LOCK IN SHARE MODE")),
        (LockMode::PessimisticWrite, LockSyntax::RowLock(" FOR UPDATE")),
        (LockMode::PessimisticPartialWrite, LockSyntax::RowLockWithSuffix(" FOR UPDATE", " SKIP LOCKED")),
        (LockMode::PessimisticWriteOrFail, LockSyntax::RowLockWithSuffix(" FOR UPDATE", " NOWAIT")),
    ],
};

static SQLITE: Capabilities = Capabilities {
    quote: IdentifierQuote::Double,
    limit_syntax: LimitSyntax::LimitAllOffset,
    distinct_count: DistinctCount::ConcatOperator,
    placeholder: PlaceholderStyle::QuestionMark,
    spatial: SpatialProjection::Raw,
    max_alias_length: None,
    distinct_on: false,
    lock_tables: false,
    on_locked: false,
    time_travel: false,
    execution_time_hint: false,
    index_hints: false,
    dummy_table: None,
    lock_modes: &[],
};

static SQLSERVER: Capabilities = Capabilities {
    quote: IdentifierQuote::Double,
    limit_syntax: LimitSyntax::OffsetFetch { requires_order: true },
    distinct_count: DistinctCount::ConcatFunction,
    placeholder: PlaceholderStyle::AtIndex,
    spatial: SpatialProjection::ToStringMethod,
    max_alias_length: None,
    distinct_on: false,
    lock_tables: false,
    on_locked: false,
    time_travel: false,
    execution_time_hint: false,
    index_hints: false,
    dummy_table: None,
    lock_modes: &[
        (LockMode::PessimisticRead, LockSyntax::TableHint(" WITH (HOLDLOCK, ROWLOCK)")),
        (LockMode::PessimisticWrite, LockSyntax::TableHint(" WITH (UPDLOCK, ROWLOCK)")),
        (LockMode::DirtyRead, LockSyntax::TableHint(" WITH (NOLOCK)")),
    ],
};

static ORACLE: Capabilities = Capabilities {
    quote: IdentifierQuote::Double,
    limit_syntax: LimitSyntax::OffsetFetch { requires_order: false },
    distinct_count: DistinctCount::ConcatOperator,
    placeholder: PlaceholderStyle::ColonIndex,
    spatial: SpatialProjection::Raw,
    max_alias_length: Some(30),
    distinct_on: false,
    lock_tables: false,
    on_locked: false,
    time_travel: false,
    execution_time_hint: false,
    index_hints: false,
    dummy_table: Some("DUAL"),
    lock_modes: &[
        (LockMode::PessimisticRead, LockSyntax::Fixed(" FOR UPDATE")),
        (LockMode::PessimisticWrite, LockSyntax::Fixed(" FOR UPDATE")),
    ],
};

static SAP_HANA: Capabilities = Capabilities {
    quote: IdentifierQuote::Double,
    limit_syntax: LimitSyntax::LimitOffsetRequiresLimit,
    distinct_count: DistinctCount::ConcatOperator,
    placeholder: PlaceholderStyle::QuestionMark,
    spatial: SpatialProjection::Raw,
    max_alias_length: Some(128),
    distinct_on: false,
    lock_tables: false,
    on_locked: false,
    time_travel: false,
    execution_time_hint: false,
    index_hints: false,
    dummy_table: Some("SYS.DUMMY"),
    lock_modes: &[(LockMode::PessimisticWrite, LockSyntax::Fixed(" FOR UPDATE"))],
};

static SPANNER: Capabilities = Capabilities {
    quote: IdentifierQuote::Backtick,
    limit_syntax: LimitSyntax::LimitOffsetRequiresLimit,
    distinct_count: DistinctCount::CastConcatFunction,
    placeholder: PlaceholderStyle::AtParamIndex,
    spatial: SpatialProjection::Raw,
    max_alias_length: None,
    distinct_on: false,
    lock_tables: false,
    on_locked: false,
    time_travel: false,
    execution_time_hint: false,
    index_hints: false,
    dummy_table: None,
    lock_modes: &[],
};

/// An active dialect: a kind plus the server details that refine its capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dialect {
    kind: DialectKind,
    server_version: Option<(u32, u32)>,
    legacy_spatial_support: bool,
}

impl Dialect {
    /// Create a dialect.
    pub const fn new(kind: DialectKind) -> Self {
        Self {
            kind,
            server_version: None,
            legacy_spatial_support: false,
        }
    }

    /// Set the server version (major, minor).
    pub fn with_server_version(mut self, major: u32, minor: u32) -> Self {
        self.server_version = Some((major, minor));
        self
    }

    /// Use pre-`ST_` spatial function names (MySQL before 8.0).
    pub fn with_legacy_spatial_support(mut self, legacy: bool) -> Self {
        self.legacy_spatial_support = legacy;
        self
    }

    /// Dialect kind.
    pub fn kind(&self) -> DialectKind {
        self.kind
    }

    /// Capability row.
    pub fn capabilities(&self) -> &'static Capabilities {
        self.kind.capabilities()
    }

    fn is_legacy_mysql(&self) -> bool {
        self.kind == DialectKind::MySql && matches!(self.server_version, Some((major, _)) if major < 8)
    }

    /// Quote an identifier.
    pub fn escape(&self, name: &str) -> String {
        match self.capabilities().quote {
            IdentifierQuote::Double => format!("\"{}\"", name.replace('"', "\"\"")),
            IdentifierQuote::Backtick => format!("`{}`", name.replace('`', "``")),
        }
    }

    /// Quote a possibly schema-qualified table path. Sub-query text is kept verbatim.
    pub fn escape_table_path(&self, path: &str) -> String {
        if path.starts_with('(') {
            return path.to_string();
        }
        path.split('.')
            .map(|part| {
                if part.is_empty() {
                    String::new()
                } else {
                    self.escape(part)
                }
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Resolve how a lock mode is expressed, failing with `LockNotSupported`.
    ///
    /// Returns `None` for modes that produce no SQL (none, optimistic).
    pub fn lock_syntax(&self, mode: LockMode) -> Result<Option<LockSyntax>> {
        if matches!(mode, LockMode::None | LockMode::Optimistic) {
            return Ok(None);
        }
        let table = if self.is_legacy_mysql() {
            MYSQL_LEGACY_LOCKS
        } else {
            self.capabilities().lock_modes
        };
        table
            .iter()
            .find(|(m, _)| *m == mode)
            .map(|(_, syntax)| Some(*syntax))
            .ok_or(Error::LockNotSupported {
                dialect: self.kind,
                mode,
            })
    }

    /// Render the on-locked suffix for a row lock.
    pub fn on_locked_suffix(&self, mode: LockMode, on_locked: Option<OnLocked>) -> Result<&'static str> {
        match on_locked {
            None => Ok(""),
            Some(_) if !self.capabilities().on_locked || self.is_legacy_mysql() => {
                Err(Error::LockNotSupported {
                    dialect: self.kind,
                    mode,
                })
            }
            Some(OnLocked::NoWait) => Ok(" NOWAIT"),
            Some(OnLocked::SkipLocked) => Ok(" SKIP LOCKED"),
        }
    }

    /// Wrap a spatial column selection in the dialect's text projection.
    pub fn project_spatial(&self, selection: &str, precision: Option<u8>) -> String {
        match self.capabilities().spatial {
            SpatialProjection::Raw => selection.to_string(),
            SpatialProjection::WellKnownText => {
                let function = if self.legacy_spatial_support { "AsText" } else { "ST_AsText" };
                format!("{}({})", function, selection)
            }
            SpatialProjection::GeoJson => match precision {
                Some(p) => format!("ST_AsGeoJSON({}, {})::json", selection, p),
                None => format!("ST_AsGeoJSON({})::json", selection),
            },
            SpatialProjection::ToStringMethod => format!("{}.ToString()", selection),
        }
    }

    /// Placeholder for the parameter at zero-based `index`.
    pub fn placeholder(&self, index: usize) -> String {
        match self.capabilities().placeholder {
            PlaceholderStyle::DollarIndex => format!("${}", index + 1),
            PlaceholderStyle::QuestionMark => "?".to_string(),
            PlaceholderStyle::AtIndex => format!("@{}", index),
            PlaceholderStyle::ColonIndex => format!(":{}", index + 1),
            PlaceholderStyle::AtParamIndex => format!("@param{}", index),
        }
    }
}

impl From<DialectKind> for Dialect {
    fn from(kind: DialectKind) -> Self {
        Dialect::new(kind)
    }
}
