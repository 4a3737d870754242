//! The query expression model.
//!
//! An [`ExpressionMap`] is the complete mutable description of one SELECT (or
//! sub-query) before compilation. Builders own exactly one map; deriving a
//! sub-query or a paginated variant clones it structurally, so no ordered
//! collection is ever shared between two models.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::alias::AliasRegistry;
use super::condition::WhereClause;
use crate::catalog::OrderDirection;
use crate::error::Error;
use crate::value::Value;

/// Option flag that suppresses the main entity's default ordering.
pub const DISABLE_GLOBAL_ORDER: &str = "disable-global-order";

/// Kind of statement the model describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryKind {
    /// SELECT statement.
    #[default]
    Select,
}

/// Row lock requested for the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    /// No locking.
    #[default]
    None,
    /// Version check after load, no SQL lock.
    Optimistic,
    /// Shared row lock.
    PessimisticRead,
    /// Exclusive row lock.
    PessimisticWrite,
    /// Read uncommitted table hint.
    DirtyRead,
    /// Exclusive row lock skipping rows locked by others.
    PessimisticPartialWrite,
    /// Exclusive row lock failing immediately on contention.
    PessimisticWriteOrFail,
    /// Exclusive lock that does not block key-share locks.
    ForNoKeyUpdate,
    /// Shared lock that only blocks key changes.
    ForKeyShare,
}

impl LockMode {
    /// Short name used in messages.
    pub fn name(&self) -> &'static str {
        match self {
            LockMode::None => "none",
            LockMode::Optimistic => "optimistic",
            LockMode::PessimisticRead => "pessimistic_read",
            LockMode::PessimisticWrite => "pessimistic_write",
            LockMode::DirtyRead => "dirty_read",
            LockMode::PessimisticPartialWrite => "pessimistic_partial_write",
            LockMode::PessimisticWriteOrFail => "pessimistic_write_or_fail",
            LockMode::ForNoKeyUpdate => "for_no_key_update",
            LockMode::ForKeyShare => "for_key_share",
        }
    }

    /// Check whether the mode takes a row lock and therefore needs an open transaction.
    pub fn is_pessimistic(&self) -> bool {
        matches!(
            self,
            LockMode::PessimisticRead
                | LockMode::PessimisticWrite
                | LockMode::PessimisticPartialWrite
                | LockMode::PessimisticWriteOrFail
                | LockMode::ForNoKeyUpdate
                | LockMode::ForKeyShare
        )
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LockMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mode = match s {
            "none" => LockMode::None,
            "optimistic" => LockMode::Optimistic,
            "pessimistic_read" => LockMode::PessimisticRead,
            "pessimistic_write" => LockMode::PessimisticWrite,
            "dirty_read" => LockMode::DirtyRead,
            "pessimistic_partial_write" => LockMode::PessimisticPartialWrite,
            "pessimistic_write_or_fail" => LockMode::PessimisticWriteOrFail,
            "for_no_key_update" => LockMode::ForNoKeyUpdate,
            "for_key_share" => LockMode::ForKeyShare,
            other => {
                return Err(Error::InvalidArgument(format!("unknown lock mode \"{}\"", other)))
            }
        };
        Ok(mode)
    }
}

/// Behavior of a row lock when the row is already locked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnLocked {
    /// Fail immediately.
    NoWait,
    /// Skip locked rows.
    SkipLocked,
}

/// Expected version for an optimistic lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockVersion {
    /// Compared against the version column.
    Number(i64),
    /// Compared against the update-date column (milliseconds since Unix epoch).
    Timestamp(i64),
}

impl fmt::Display for LockVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockVersion::Number(n) => write!(f, "{}", n),
            LockVersion::Timestamp(t) => write!(f, "{}", t),
        }
    }
}

/// NULLS placement in ORDER BY.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NullsOrder {
    /// `NULLS FIRST`
    #[serde(rename = "NULLS FIRST")]
    First,
    /// `NULLS LAST`
    #[serde(rename = "NULLS LAST")]
    Last,
}

impl NullsOrder {
    /// SQL keywords for this placement.
    pub fn as_sql(&self) -> &'static str {
        match self {
            NullsOrder::First => "NULLS FIRST",
            NullsOrder::Last => "NULLS LAST",
        }
    }
}

impl FromStr for NullsOrder {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NULLS FIRST" => Ok(NullsOrder::First),
            "NULLS LAST" => Ok(NullsOrder::Last),
            other => Err(Error::InvalidArgument(format!(
                "nulls can accept only \"NULLS FIRST\" and \"NULLS LAST\" values, got \"{}\"",
                other
            ))),
        }
    }
}

/// Direction and nulls placement for one ORDER BY key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderSpec {
    /// Sort direction.
    pub direction: OrderDirection,
    /// Optional nulls placement.
    pub nulls: Option<NullsOrder>,
}

impl OrderSpec {
    /// Create an order spec without nulls placement.
    pub fn new(direction: OrderDirection) -> Self {
        Self {
            direction,
            nulls: None,
        }
    }

    /// Render as SQL (`ASC`, `DESC NULLS LAST`, ...).
    pub fn to_sql(&self) -> String {
        match self.nulls {
            Some(nulls) => format!("{} {}", self.direction.as_sql(), nulls.as_sql()),
            None => self.direction.as_sql().to_string(),
        }
    }
}

/// One selected expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectItem {
    /// Raw expression, an alias name (whole entity), or `alias.property`.
    pub selection: String,
    /// Output alias.
    pub alias_name: Option<String>,
    /// Selected only to hydrate entities, not requested by the caller.
    pub virtual_: bool,
}

impl SelectItem {
    /// Create a selection.
    pub fn new(selection: impl Into<String>, alias_name: Option<String>) -> Self {
        Self {
            selection: selection.into(),
            alias_name,
            virtual_: false,
        }
    }
}

/// JOIN direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinDirection {
    /// `INNER JOIN`
    Inner,
    /// `LEFT JOIN`
    Left,
}

impl JoinDirection {
    /// SQL keyword for this direction.
    pub fn as_sql(&self) -> &'static str {
        match self {
            JoinDirection::Inner => "INNER",
            JoinDirection::Left => "LEFT",
        }
    }
}

/// What a join points at, as resolved when the join was added.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinTarget {
    /// Physical table path used verbatim.
    Table(String),
    /// Compiled sub-query text, parenthesized.
    SubQuery(String),
    /// Catalog entity joined directly (caller supplies the condition).
    Entity(String),
    /// Relation declared on the entity behind `parent_alias`.
    Relation {
        /// Alias of the entity that declares the relation.
        parent_alias: String,
        /// Entity that declares the relation.
        entity: String,
        /// Relation property name.
        property: String,
    },
}

/// A join registered on the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinAttribute {
    /// Join direction.
    pub direction: JoinDirection,
    /// Join target.
    pub target: JoinTarget,
    /// Alias of the joined rows.
    pub alias: String,
    /// Extra ON condition.
    pub condition: Option<String>,
    /// Entity describing the joined rows, when known.
    pub entity: Option<String>,
    /// Alias of the junction table for many-to-many relations.
    pub junction_alias: Option<String>,
    /// Destination property for `join_and_map` variants.
    pub map_to_property: Option<String>,
    /// Whether the mapped property holds many entities.
    pub is_mapping_many: bool,
    /// Whether the joined alias is selected.
    pub is_selected: bool,
}

impl JoinAttribute {
    /// Alias of the entity that declares the joined relation.
    pub fn parent_alias(&self) -> Option<&str> {
        match &self.target {
            JoinTarget::Relation { parent_alias, .. } => Some(parent_alias),
            _ => None,
        }
    }
}

/// Deferred relation-id load (`load_relation_id_and_map`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationIdAttribute {
    /// Alias of the entity declaring the relation.
    pub parent_alias: String,
    /// Relation property name.
    pub relation_property: String,
    /// Destination property path.
    pub map_to_property: String,
    /// Alias used when filtering the loaded ids.
    pub alias: Option<String>,
    /// Junction alias for many-to-many relations.
    pub junction_alias: Option<String>,
    /// Loaded ids are mapped as a list.
    pub is_many: bool,
}

/// Deferred relation-count load (`load_relation_count_and_map`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationCountAttribute {
    /// Alias of the entity declaring the relation.
    pub parent_alias: String,
    /// Relation property name.
    pub relation_property: String,
    /// Destination property path.
    pub map_to_property: String,
    /// Alias used when filtering the counted rows.
    pub alias: Option<String>,
    /// Junction alias for many-to-many relations.
    pub junction_alias: Option<String>,
}

/// Result cache settings for one query.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CacheSetting {
    /// Explicit on/off; `None` defers to the executor configuration.
    pub enabled: Option<bool>,
    /// Cache identifier.
    pub id: Option<String>,
    /// Entry lifetime.
    pub duration: Option<Duration>,
}

/// Connection routing preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationMode {
    /// Primary server.
    #[default]
    Master,
    /// Read replica preferred.
    Slave,
}

/// The complete specification of one SELECT.
#[derive(Debug, Clone, Default)]
pub struct ExpressionMap {
    /// Statement kind.
    pub query_kind: QueryKind,
    /// Selections in column order.
    pub selects: Vec<SelectItem>,
    /// Alias registry.
    pub aliases: AliasRegistry,
    /// Name of the primary FROM alias.
    pub main_alias: Option<String>,
    /// Joins in declaration order.
    pub joins: Vec<JoinAttribute>,
    /// Deferred relation-id loads.
    pub relation_id_attributes: Vec<RelationIdAttribute>,
    /// Deferred relation-count loads.
    pub relation_count_attributes: Vec<RelationCountAttribute>,
    /// WHERE predicates.
    pub wheres: Vec<WhereClause>,
    /// HAVING predicates.
    pub havings: Vec<WhereClause>,
    /// GROUP BY expressions.
    pub group_bys: Vec<String>,
    /// ORDER BY keys in insertion order.
    pub order_bys: Vec<(String, OrderSpec)>,
    /// Flat LIMIT.
    pub limit: Option<u64>,
    /// Flat OFFSET.
    pub offset: Option<u64>,
    /// Entity-aware skip.
    pub skip: Option<u64>,
    /// Entity-aware take.
    pub take: Option<u64>,
    /// Lock mode.
    pub lock_mode: LockMode,
    /// Expected version for optimistic locking.
    pub lock_version: Option<LockVersion>,
    /// Tables named in `FOR UPDATE OF`.
    pub lock_tables: Option<Vec<String>>,
    /// NOWAIT / SKIP LOCKED.
    pub on_locked: Option<OnLocked>,
    /// Result cache settings.
    pub cache: CacheSetting,
    /// Include soft-deleted rows.
    pub with_deleted: bool,
    /// `SELECT DISTINCT`.
    pub distinct: bool,
    /// `SELECT DISTINCT ON (...)`.
    pub distinct_on: Vec<String>,
    /// MySQL execution time hint in milliseconds.
    pub max_execution_time: Option<u64>,
    /// Option flags.
    pub options: BTreeSet<String>,
    /// Compile as a parenthesized sub-query.
    pub is_subquery: bool,
    /// Leading SQL comment.
    pub comment: Option<String>,
    /// MySQL index hint.
    pub use_index: Option<String>,
    /// CockroachDB `AS OF SYSTEM TIME` expression.
    pub time_travel: Option<String>,
    /// Named parameters.
    pub parameters: BTreeMap<String, Value>,
    /// Predicate appended to WHERE by internal strategies.
    pub extra_appended_where: Option<String>,
    /// Run inside a transaction owned by the executor when none is active.
    pub use_transaction: Option<bool>,
    /// Connection routing.
    pub replication: Option<ReplicationMode>,
    /// Select non-requested primary keys so rows can be hydrated into entities.
    pub query_entity: bool,
    /// Counter for generated parameter names.
    pub parameter_index: usize,
}

impl ExpressionMap {
    /// Create an empty select model.
    pub fn new() -> Self {
        Self::default()
    }

    /// Name of the main alias, failing with `MissingMainAlias`.
    pub fn main_alias_name(&self) -> Result<&str, Error> {
        self.main_alias.as_deref().ok_or(Error::MissingMainAlias)
    }

    /// Check for an option flag.
    pub fn has_option(&self, option: &str) -> bool {
        self.options.contains(option)
    }

    /// Whether skip/take were requested with a non-zero value.
    pub fn has_skip_or_take(&self) -> bool {
        self.skip.unwrap_or(0) > 0 || self.take.unwrap_or(0) > 0
    }

    /// Register a generated parameter and return its name.
    pub fn create_parameter(&mut self, value: Value) -> String {
        let name = format!("orm_param_{}", self.parameter_index);
        self.parameter_index += 1;
        self.parameters.insert(name.clone(), value);
        name
    }

    /// Insert or replace an ORDER BY key, keeping its original position.
    pub fn set_order(&mut self, sort: String, spec: OrderSpec) {
        match self.order_bys.iter_mut().find(|(key, _)| *key == sort) {
            Some(existing) => existing.1 = spec,
            None => self.order_bys.push((sort, spec)),
        }
    }
}
