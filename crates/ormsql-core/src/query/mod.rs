//! Select query model and SQL compilation.
//!
//! [`SelectQueryBuilder`] records a query as an [`ExpressionMap`]; [`compile`]
//! turns the map into dialect SQL with named placeholders, and
//! [`expand_parameters`] rewrites those into the driver's positional form.

mod alias;
mod builder;
mod compiler;
mod condition;
mod count;
mod dialect;
mod expression;
mod naming;
mod pagination;
mod parameters;

pub use alias::{Alias, AliasKind, AliasRegistry, AliasTarget};
pub use builder::{SelectQueryBuilder, DISCRIMINATOR_PARAMETER};
pub use compiler::{compile, effective_order_bys};
pub use condition::{render_conditions, Brackets, Combinator, Condition, Predicate, WhereClause};
pub use count::{COUNT_COLUMN, EXISTS_COLUMN};
pub use dialect::{
    Capabilities, Dialect, DialectKind, DistinctCount, IdentifierQuote, LimitSyntax, LockSyntax,
    PlaceholderStyle, SpatialProjection,
};
pub use expression::{
    CacheSetting, ExpressionMap, JoinAttribute, JoinDirection, JoinTarget, LockMode, LockVersion,
    NullsOrder, OnLocked, OrderSpec, QueryKind, RelationCountAttribute, RelationIdAttribute,
    ReplicationMode, SelectItem, DISABLE_GLOBAL_ORDER,
};
pub use naming::{alias_column, replace_property_names};
pub use pagination::{DISTINCT_ALIAS, PAGINATION_CACHE_SUFFIX};
pub use parameters::expand_parameters;
