//! Predicate trees for WHERE and HAVING.

use std::collections::BTreeMap;

use crate::value::Value;

/// How a predicate joins the ones before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combinator {
    /// First predicate installed by `where`.
    Simple,
    /// `AND`
    And,
    /// `OR`
    Or,
}

/// A resolved predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// SQL text with `alias.property` references and `:name` placeholders.
    Raw(String),
    /// Nested group rendered as `(...)`.
    Brackets(Vec<WhereClause>),
    /// Negated group rendered as `NOT(...)`.
    NotBrackets(Vec<WhereClause>),
}

/// One entry of a WHERE or HAVING list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhereClause {
    /// Combinator with the previous entry.
    pub combinator: Combinator,
    /// The predicate.
    pub condition: Condition,
}

impl WhereClause {
    /// Create a clause.
    pub fn new(combinator: Combinator, condition: Condition) -> Self {
        Self {
            combinator,
            condition,
        }
    }
}

/// Caller-facing predicate input, resolved into a [`Condition`] by the builder.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Literal SQL.
    Raw(String),
    /// Nested group.
    Brackets(Brackets),
    /// Object shorthand: `alias.property = :param` conjunctions on the main alias.
    Fields(Vec<(String, Value)>),
}

impl Predicate {
    /// Build the object shorthand from property/value pairs.
    pub fn fields<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Predicate::Fields(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl From<&str> for Predicate {
    fn from(sql: &str) -> Self {
        Predicate::Raw(sql.to_string())
    }
}

impl From<String> for Predicate {
    fn from(sql: String) -> Self {
        Predicate::Raw(sql)
    }
}

impl From<Brackets> for Predicate {
    fn from(brackets: Brackets) -> Self {
        Predicate::Brackets(brackets)
    }
}

/// A bracketed predicate group built independently of the query.
///
/// ```
/// use ormsql_core::query::Brackets;
///
/// let group = Brackets::new()
///     .where_("post.title = :title")
///     .or_where("post.views > 10")
///     .set_parameter("title", "Hello");
/// assert_eq!(group.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Brackets {
    pub(crate) clauses: Vec<(Combinator, Predicate)>,
    pub(crate) parameters: BTreeMap<String, Value>,
    pub(crate) negated: bool,
}

impl Brackets {
    /// Create an empty group.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty group rendered as `NOT(...)`.
    pub fn not() -> Self {
        Self {
            negated: true,
            ..Self::default()
        }
    }

    /// Replace all predicates of the group with one.
    pub fn where_(mut self, predicate: impl Into<Predicate>) -> Self {
        self.clauses.clear();
        self.clauses.push((Combinator::Simple, predicate.into()));
        self
    }

    /// Append with `AND`.
    pub fn and_where(mut self, predicate: impl Into<Predicate>) -> Self {
        self.clauses.push((Combinator::And, predicate.into()));
        self
    }

    /// Append with `OR`.
    pub fn or_where(mut self, predicate: impl Into<Predicate>) -> Self {
        self.clauses.push((Combinator::Or, predicate.into()));
        self
    }

    /// Set a parameter; merged into the query when the group is added.
    pub fn set_parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    /// Whether the group renders negated.
    pub fn is_negated(&self) -> bool {
        self.negated
    }

    /// Number of predicates in the group.
    pub fn len(&self) -> usize {
        self.clauses.len()
    }

    /// Check if the group is empty.
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }
}

/// Render a predicate list: the first entry bare, later ones prefixed with their combinator.
pub fn render_conditions(clauses: &[WhereClause]) -> String {
    clauses
        .iter()
        .enumerate()
        .map(|(index, clause)| {
            let expression = render_condition(&clause.condition);
            match clause.combinator {
                Combinator::And if index > 0 => format!("AND {}", expression),
                Combinator::Or if index > 0 => format!("OR {}", expression),
                _ => expression,
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string()
}

fn render_condition(condition: &Condition) -> String {
    match condition {
        Condition::Raw(sql) => sql.clone(),
        Condition::Brackets(inner) => format!("({})", render_conditions(inner)),
        Condition::NotBrackets(inner) => format!("NOT({})", render_conditions(inner)),
    }
}
