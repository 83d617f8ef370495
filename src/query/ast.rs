//! Query Abstract Syntax Tree
//!
//! Typed representation of a node query and of an aggregation request.
//! No logic lives here beyond construction helpers and keyword parsing;
//! compilation to SQL happens in [`crate::query::compiler`].
//!
//! # Example
//!
//! ```text
//! find task where Status = Done and created > 7d order by -created limit 20
//! ```

use crate::query::error::{QueryError, QueryResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default page size for queries and aggregations
pub const DEFAULT_LIMIT: i64 = 100;

/// Field names that resolve to columns of the node table
pub const CORE_FIELDS: [&str; 7] = [
    "id", "name", "created", "updated", "parentId", "nodeType", "doneAt",
];

/// Prefix routing a field through the parent node
pub const PARENT_PREFIX: &str = "parent.";

/// `find` target matching every node regardless of tags
pub const ALL_NODES: &str = "*";

/// True when a `find` target skips the tag filter
pub fn targets_all_nodes(find: &str) -> bool {
    find == ALL_NODES
}

fn default_limit() -> i64 {
    DEFAULT_LIMIT
}

/// A value on the right-hand side of a condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl QueryValue {
    /// Canonical text form, used when comparing against stored text values
    pub fn as_text(&self) -> String {
        match self {
            Self::Bool(b) => b.to_string(),
            Self::Integer(i) => i.to_string(),
            Self::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
            Self::Float(f) => f.to_string(),
            Self::Text(s) => s.clone(),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Text(s) if s.eq_ignore_ascii_case("true") => Some(true),
            Self::Text(s) if s.eq_ignore_ascii_case("false") => Some(false),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl Default for QueryValue {
    fn default() -> Self {
        Self::Bool(true)
    }
}

impl fmt::Display for QueryValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_text())
    }
}

impl From<&str> for QueryValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for QueryValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for QueryValue {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<f64> for QueryValue {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<bool> for QueryValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// Condition operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Operator {
    /// Equal to
    Eq,
    /// Not equal to
    Ne,
    /// Greater than
    Gt,
    /// Less than
    Lt,
    /// Greater than or equal to
    Gte,
    /// Less than or equal to
    Lte,
    /// Substring match
    Contains,
    /// Field has a value
    Exists,
    /// Field is missing or blank
    IsEmpty,
}

impl Operator {
    /// Parse from a symbolic or word spelling
    pub fn parse(s: &str) -> QueryResult<Self> {
        match s.trim().to_lowercase().as_str() {
            "=" | "==" | "eq" => Ok(Self::Eq),
            "!=" | "<>" | "ne" | "neq" => Ok(Self::Ne),
            ">" | "gt" => Ok(Self::Gt),
            "<" | "lt" => Ok(Self::Lt),
            ">=" | "gte" => Ok(Self::Gte),
            "<=" | "lte" => Ok(Self::Lte),
            "~" | "contains" => Ok(Self::Contains),
            "exists" => Ok(Self::Exists),
            "is_empty" | "is empty" => Ok(Self::IsEmpty),
            other => Err(QueryError::validation(format!("unknown operator '{}'", other))),
        }
    }

    /// True for the ordering comparisons `>`, `<`, `>=`, `<=`
    pub fn is_ordering(&self) -> bool {
        matches!(self, Self::Gt | Self::Lt | Self::Gte | Self::Lte)
    }

    /// SQL comparison symbol for the binary operators
    pub fn sql_symbol(&self) -> Option<&'static str> {
        match self {
            Self::Eq => Some("="),
            Self::Ne => Some("!="),
            Self::Gt => Some(">"),
            Self::Lt => Some("<"),
            Self::Gte => Some(">="),
            Self::Lte => Some("<="),
            Self::Contains | Self::Exists | Self::IsEmpty => None,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Gte => ">=",
            Self::Lte => "<=",
            Self::Contains => "~",
            Self::Exists => "exists",
            Self::IsEmpty => "is_empty",
        };
        write!(f, "{}", s)
    }
}

impl TryFrom<String> for Operator {
    type Error = QueryError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Operator> for String {
    fn from(op: Operator) -> Self {
        op.to_string()
    }
}

/// A single condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhereClause {
    pub field: String,
    pub operator: Operator,
    #[serde(default)]
    pub value: QueryValue,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub negated: bool,
}

impl WhereClause {
    pub fn new(field: impl Into<String>, operator: Operator, value: impl Into<QueryValue>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
            negated: false,
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<QueryValue>) -> Self {
        Self::new(field, Operator::Eq, value)
    }

    pub fn contains(field: impl Into<String>, value: impl Into<QueryValue>) -> Self {
        Self::new(field, Operator::Contains, value)
    }

    pub fn exists(field: impl Into<String>) -> Self {
        Self::new(field, Operator::Exists, true)
    }

    pub fn is_empty(field: impl Into<String>) -> Self {
        Self::new(field, Operator::IsEmpty, true)
    }

    /// Flip the negation flag
    pub fn negate(mut self) -> Self {
        self.negated = !self.negated;
        self
    }
}

/// Boolean combinator of a [`WhereGroup`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupType {
    And,
    Or,
}

impl GroupType {
    pub fn sql_keyword(&self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
        }
    }
}

/// Boolean group of nested conditions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhereGroup {
    #[serde(rename = "type")]
    pub kind: GroupType,
    pub clauses: Vec<WhereEntry>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub negated: bool,
}

impl WhereGroup {
    pub fn or(clauses: Vec<WhereEntry>) -> Self {
        Self {
            kind: GroupType::Or,
            clauses,
            negated: false,
        }
    }

    pub fn and(clauses: Vec<WhereEntry>) -> Self {
        Self {
            kind: GroupType::And,
            clauses,
            negated: false,
        }
    }

    pub fn negate(mut self) -> Self {
        self.negated = !self.negated;
        self
    }
}

/// Entry of a where list: a condition or a nested group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WhereEntry {
    Group(WhereGroup),
    Clause(WhereClause),
}

impl WhereEntry {
    /// Visit every clause in the tree, depth first
    pub fn for_each_clause_mut<F>(&mut self, f: &mut F) -> QueryResult<()>
    where
        F: FnMut(&mut WhereClause) -> QueryResult<()>,
    {
        match self {
            Self::Clause(clause) => f(clause),
            Self::Group(group) => group
                .clauses
                .iter_mut()
                .try_for_each(|entry| entry.for_each_clause_mut(f)),
        }
    }
}

impl From<WhereClause> for WhereEntry {
    fn from(clause: WhereClause) -> Self {
        Self::Clause(clause)
    }
}

impl From<WhereGroup> for WhereEntry {
    fn from(group: WhereGroup) -> Self {
        Self::Group(group)
    }
}

/// Columns of the node table addressable by field name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoreColumn {
    Id,
    Name,
    Created,
    Updated,
    ParentId,
    NodeType,
    DoneAt,
}

impl CoreColumn {
    /// Exact, case-sensitive match against [`CORE_FIELDS`]
    pub fn from_field(field: &str) -> Option<Self> {
        match field {
            "id" => Some(Self::Id),
            "name" => Some(Self::Name),
            "created" => Some(Self::Created),
            "updated" => Some(Self::Updated),
            "parentId" => Some(Self::ParentId),
            "nodeType" => Some(Self::NodeType),
            "doneAt" => Some(Self::DoneAt),
            _ => None,
        }
    }

    /// Column name in the node table
    pub fn column(&self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Name => "name",
            Self::Created => "created",
            Self::Updated => "updated",
            Self::ParentId => "parent_id",
            Self::NodeType => "node_type",
            Self::DoneAt => "done_at",
        }
    }

    /// Epoch-millisecond columns
    pub fn is_date(&self) -> bool {
        matches!(self, Self::Created | Self::Updated | Self::DoneAt)
    }
}

/// Sort order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "OrderByRepr")]
pub struct OrderBy {
    pub field: String,
    #[serde(default)]
    pub desc: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OrderByRepr {
    Text(String),
    Full {
        field: String,
        #[serde(default)]
        desc: bool,
    },
}

impl From<OrderByRepr> for OrderBy {
    fn from(repr: OrderByRepr) -> Self {
        match repr {
            OrderByRepr::Text(s) => OrderBy::parse(&s),
            OrderByRepr::Full { field, desc } => OrderBy { field, desc },
        }
    }
}

impl OrderBy {
    /// Parse `field` or `-field` (descending)
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        match s.strip_prefix('-') {
            Some(field) => Self {
                field: field.to_string(),
                desc: true,
            },
            None => Self {
                field: s.to_string(),
                desc: false,
            },
        }
    }

    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            desc: false,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            desc: true,
        }
    }
}

impl Default for OrderBy {
    fn default() -> Self {
        Self::desc("created")
    }
}

/// A node query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryAst {
    /// Tag name, or `*` for all nodes
    pub find: String,
    /// Top-level entries are AND-ed
    #[serde(default, rename = "where")]
    pub where_: Vec<WhereEntry>,
    #[serde(default)]
    pub order_by: Option<OrderBy>,
    /// Custom field names to resolve, or `["*"]`
    #[serde(default)]
    pub select: Option<Vec<String>>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

impl QueryAst {
    /// Start a query for nodes carrying `tag`
    pub fn find(tag: impl Into<String>) -> Self {
        Self {
            find: tag.into(),
            where_: Vec::new(),
            order_by: None,
            select: None,
            limit: DEFAULT_LIMIT,
            offset: 0,
        }
    }

    pub fn filter(mut self, entry: impl Into<WhereEntry>) -> Self {
        self.where_.push(entry.into());
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by = Some(order);
        self
    }

    pub fn select(mut self, fields: &[&str]) -> Self {
        self.select = Some(fields.iter().map(|f| f.to_string()).collect());
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }

    /// True when `find` addresses every node
    pub fn is_all_nodes(&self) -> bool {
        targets_all_nodes(&self.find)
    }
}

/// Time bucket sizes for grouping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimePeriod {
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl TimePeriod {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "day" => Some(Self::Day),
            "week" => Some(Self::Week),
            "month" => Some(Self::Month),
            "quarter" => Some(Self::Quarter),
            "year" => Some(Self::Year),
            _ => None,
        }
    }
}

impl fmt::Display for TimePeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Day => write!(f, "day"),
            Self::Week => write!(f, "week"),
            Self::Month => write!(f, "month"),
            Self::Quarter => write!(f, "quarter"),
            Self::Year => write!(f, "year"),
        }
    }
}

/// Date column used for time bucketing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DateField {
    #[default]
    Created,
    Updated,
}

impl DateField {
    pub fn column(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
        }
    }
}

/// One grouping dimension
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GroupBySpec {
    Period {
        period: TimePeriod,
        #[serde(default, rename = "dateField")]
        date_field: DateField,
    },
    Field {
        field: String,
    },
}

impl GroupBySpec {
    pub fn field(name: impl Into<String>) -> Self {
        Self::Field { field: name.into() }
    }

    pub fn period(period: TimePeriod) -> Self {
        Self::Period {
            period,
            date_field: DateField::Created,
        }
    }

    /// Split a comma-separated list; period keywords become time dimensions
    pub fn parse_csv(csv: &str) -> Vec<Self> {
        csv.split(',')
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(|token| match TimePeriod::parse(token) {
                Some(period) => Self::period(period),
                None => Self::field(token),
            })
            .collect()
    }
}

impl fmt::Display for GroupBySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Period { period, date_field } => {
                write!(f, "{}({})", period, date_field.column())
            }
            Self::Field { field } => write!(f, "{}", field),
        }
    }
}

/// Aggregate functions; only counting is supported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFunction {
    #[default]
    Count,
}

fn default_aggregate() -> Vec<AggregateFunction> {
    vec![AggregateFunction::Count]
}

/// A grouping/counting request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateAst {
    pub find: String,
    pub group_by: Vec<GroupBySpec>,
    #[serde(default, rename = "where")]
    pub where_: Vec<WhereEntry>,
    #[serde(default = "default_aggregate")]
    pub aggregate: Vec<AggregateFunction>,
    #[serde(default)]
    pub show_percent: bool,
    #[serde(default)]
    pub top: Option<i64>,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

impl AggregateAst {
    pub fn new(find: impl Into<String>, group_by: Vec<GroupBySpec>) -> Self {
        Self {
            find: find.into(),
            group_by,
            where_: Vec::new(),
            aggregate: default_aggregate(),
            show_percent: false,
            top: None,
            limit: DEFAULT_LIMIT,
        }
    }

    pub fn filter(mut self, entry: impl Into<WhereEntry>) -> Self {
        self.where_.push(entry.into());
        self
    }

    pub fn with_percent(mut self) -> Self {
        self.show_percent = true;
        self
    }

    pub fn top(mut self, n: i64) -> Self {
        self.top = Some(n);
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    /// True when `find` addresses every node
    pub fn is_all_nodes(&self) -> bool {
        targets_all_nodes(&self.find)
    }
}
