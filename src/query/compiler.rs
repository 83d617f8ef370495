//! Where-Clause Compiler
//!
//! Turns conditions into SQL fragments, bound parameters and join
//! requirements. Shared by the query executor and the aggregation engine.
//!
//! # Field routing
//!
//! Every field name takes exactly one path:
//!
//! ```text
//! id, name, created, ...  → column of the node table   n.<column> OP ?
//! parent.name             → LEFT JOIN nodes parent      parent.name OP ?
//! parent.tags             → + LEFT JOIN tag_applications ptN
//! anything else           → LEFT JOIN field_values fvN  fvN.value_text OP ?
//! ```
//!
//! Field names and values are always bound as parameters. Aliases are
//! generated from a counter and never derived from user input.
//!
//! `exists` / `is_empty` on custom fields compile to `[NOT] EXISTS`
//! subqueries: a join would drop or duplicate rows for nodes without the
//! field. The same subquery form is used for custom fields and both parent
//! fields underneath a negation, so that `NOT (...)` is the exact complement,
//! including nodes without a parent.

use crate::query::ast::{
    CoreColumn, Operator, QueryValue, WhereClause, WhereEntry, WhereGroup, PARENT_PREFIX,
};
use crate::query::error::{QueryError, QueryResult};
use crate::storage::schema::{FIELD_VALUES_TABLE, NODES_TABLE, TAG_APPLICATIONS_TABLE};
use rusqlite::types::Value;
use std::collections::HashSet;

/// Alias of the node table in every generated statement
pub const NODE_ALIAS: &str = "n";

/// Alias of the joined parent node
pub const PARENT_ALIAS: &str = "parent";

/// Where a field name resolves to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRoute<'a> {
    /// Column of the node table
    Core(CoreColumn),
    /// Attribute of the parent node
    Parent(ParentField),
    /// Custom field stored as field values
    Custom(&'a str),
}

/// Fields reachable through `parent.`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentField {
    Name,
    Tags,
}

/// Resolve a field name to its routing path
pub fn route_field(field: &str) -> QueryResult<FieldRoute<'_>> {
    if let Some(rest) = field.strip_prefix(PARENT_PREFIX) {
        return match rest {
            "name" => Ok(FieldRoute::Parent(ParentField::Name)),
            "tags" => Ok(FieldRoute::Parent(ParentField::Tags)),
            _ => Err(QueryError::validation(format!(
                "unknown parent field '{}', expected parent.name or parent.tags",
                field
            ))),
        };
    }

    if let Some(column) = CoreColumn::from_field(field) {
        return Ok(FieldRoute::Core(column));
    }

    if field.trim().is_empty() {
        return Err(QueryError::validation("field name must not be empty"));
    }

    Ok(FieldRoute::Custom(field))
}

/// Canonical identity of a join, used for deduplication
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JoinKey {
    /// The parent node, shared by every parent condition
    Parent,
    /// One occurrence of the parent's tag memberships
    ParentTags(String),
    /// One occurrence of a custom field's values
    FieldValue(String),
    /// Tag membership filter on the node itself
    Tag,
    /// Grouping dimension over a custom field
    GroupField(String),
}

/// A join clause with its bound parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub key: JoinKey,
    pub sql: String,
    pub params: Vec<Value>,
}

/// Ordered, deduplicated set of joins
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JoinSet {
    joins: Vec<Join>,
    keys: HashSet<JoinKey>,
}

impl JoinSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a join unless one with the same key is present
    pub fn insert(&mut self, join: Join) -> bool {
        if self.keys.contains(&join.key) {
            return false;
        }
        self.keys.insert(join.key.clone());
        self.joins.push(join);
        true
    }

    pub fn extend(&mut self, other: JoinSet) {
        for join in other.joins {
            self.insert(join);
        }
    }

    pub fn contains(&self, key: &JoinKey) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Join> {
        self.joins.iter()
    }

    /// Join clauses in insertion order, space separated
    pub fn sql(&self) -> String {
        self.joins
            .iter()
            .map(|j| j.sql.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Parameters of all joins in textual order
    pub fn params(&self) -> Vec<Value> {
        self.joins.iter().flat_map(|j| j.params.clone()).collect()
    }
}

/// Compiled condition
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fragment {
    /// Boolean SQL expression; empty when there is no constraint
    pub sql: String,
    /// Parameters for the placeholders in `sql`, in order
    pub params: Vec<Value>,
    /// Joins the expression refers to
    pub joins: JoinSet,
}

impl Fragment {
    fn new(sql: String, params: Vec<Value>) -> Self {
        Self {
            sql,
            params,
            joins: JoinSet::new(),
        }
    }

    fn with_join(mut self, join: Join) -> Self {
        self.joins.insert(join);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.sql.is_empty()
    }

    /// `WHERE ...` clause, or an empty string
    pub fn where_sql(&self) -> String {
        if self.sql.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", self.sql)
        }
    }

    fn negated(self) -> Self {
        if self.sql.is_empty() {
            return self;
        }
        Self {
            sql: format!("NOT ({})", self.sql),
            ..self
        }
    }
}

/// Compiles where entries, numbering per-occurrence join aliases
#[derive(Debug, Clone)]
pub struct WhereCompiler {
    alias_prefix: &'static str,
    next_alias: usize,
}

impl Default for WhereCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl WhereCompiler {
    pub fn new() -> Self {
        Self::with_alias_prefix("fv")
    }

    /// Use a distinct prefix when several compilers feed one statement
    pub fn with_alias_prefix(alias_prefix: &'static str) -> Self {
        Self {
            alias_prefix,
            next_alias: 0,
        }
    }

    /// Number of per-occurrence aliases handed out so far
    pub fn join_index(&self) -> usize {
        self.next_alias
    }

    /// Compile a list of entries combined with AND
    pub fn compile_all(&mut self, entries: &[WhereEntry]) -> QueryResult<Fragment> {
        let parts = entries
            .iter()
            .map(|entry| self.compile(entry))
            .collect::<QueryResult<Vec<_>>>()?;
        Ok(combine(parts, "AND"))
    }

    /// Compile a single clause or group
    pub fn compile(&mut self, entry: &WhereEntry) -> QueryResult<Fragment> {
        self.compile_entry(entry, false)
    }

    fn compile_entry(&mut self, entry: &WhereEntry, under_not: bool) -> QueryResult<Fragment> {
        match entry {
            WhereEntry::Clause(clause) => self.compile_clause(clause, under_not),
            WhereEntry::Group(group) => self.compile_group(group, under_not),
        }
    }

    fn compile_group(&mut self, group: &WhereGroup, under_not: bool) -> QueryResult<Fragment> {
        let inner_not = under_not || group.negated;
        let parts = group
            .clauses
            .iter()
            .map(|entry| self.compile_entry(entry, inner_not))
            .collect::<QueryResult<Vec<_>>>()?;

        let mut fragment = combine(parts, group.kind.sql_keyword());
        if !fragment.sql.is_empty() {
            fragment.sql = format!("({})", fragment.sql);
        }

        Ok(if group.negated {
            fragment.negated()
        } else {
            fragment
        })
    }

    fn compile_clause(&mut self, clause: &WhereClause, under_not: bool) -> QueryResult<Fragment> {
        let op = effective_operator(clause);
        let subquery_form = under_not || clause.negated;

        let fragment = match route_field(&clause.field)? {
            FieldRoute::Core(column) => {
                let expr = format!("{}.{}", NODE_ALIAS, column.column());
                let (sql, params) = column_condition(&expr, op, &clause.value, false)?;
                Fragment::new(sql, params)
            }
            FieldRoute::Parent(ParentField::Name) => {
                self.compile_parent_name(op, &clause.value, subquery_form)?
            }
            FieldRoute::Parent(ParentField::Tags) => {
                self.compile_parent_tags(&clause.field, op, &clause.value, subquery_form)?
            }
            FieldRoute::Custom(field) => {
                self.compile_custom(field, op, &clause.value, subquery_form)?
            }
        };

        Ok(if clause.negated {
            fragment.negated()
        } else {
            fragment
        })
    }

    fn compile_parent_name(
        &mut self,
        op: Operator,
        value: &QueryValue,
        subquery_form: bool,
    ) -> QueryResult<Fragment> {
        let existence_test = matches!(op, Operator::Exists | Operator::IsEmpty);

        if subquery_form && !existence_test {
            let alias = self.next_alias("pn");
            let (cond, params) = column_condition(&format!("{}.name", alias), op, value, false)?;
            let sql = format!(
                "EXISTS (SELECT 1 FROM {table} {alias} WHERE {alias}.id = {n}.parent_id AND {cond})",
                table = NODES_TABLE,
                alias = alias,
                n = NODE_ALIAS,
                cond = cond
            );
            return Ok(Fragment::new(sql, params));
        }

        let expr = format!("{}.name", PARENT_ALIAS);
        let (sql, params) = column_condition(&expr, op, value, false)?;
        Ok(Fragment::new(sql, params).with_join(parent_join()))
    }

    fn compile_parent_tags(
        &mut self,
        field: &str,
        op: Operator,
        value: &QueryValue,
        subquery_form: bool,
    ) -> QueryResult<Fragment> {
        match op {
            Operator::Exists | Operator::IsEmpty => {
                let sql = format!(
                    "EXISTS (SELECT 1 FROM {} pt WHERE pt.data_node_id = {}.parent_id)",
                    TAG_APPLICATIONS_TABLE, NODE_ALIAS
                );
                let sql = if op == Operator::IsEmpty {
                    format!("NOT {}", sql)
                } else {
                    sql
                };
                return Ok(Fragment::new(sql, Vec::new()));
            }
            Operator::Eq | Operator::Ne | Operator::Contains => {}
            other => {
                return Err(QueryError::validation(format!(
                    "operator '{}' is not supported for {}",
                    other, field
                )))
            }
        }

        let alias = self.next_alias("pt");
        let (cond, params) = column_condition(&format!("{}.tag_name", alias), op, value, true)?;

        if subquery_form {
            let sql = format!(
                "EXISTS (SELECT 1 FROM {table} {alias} WHERE {alias}.data_node_id = {n}.parent_id AND {cond})",
                table = TAG_APPLICATIONS_TABLE,
                alias = alias,
                n = NODE_ALIAS,
                cond = cond
            );
            return Ok(Fragment::new(sql, params));
        }

        let tags_join = Join {
            key: JoinKey::ParentTags(alias.clone()),
            sql: format!(
                "LEFT JOIN {table} {alias} ON {alias}.data_node_id = {parent}.id",
                table = TAG_APPLICATIONS_TABLE,
                alias = alias,
                parent = PARENT_ALIAS
            ),
            params: Vec::new(),
        };

        Ok(Fragment::new(cond, params)
            .with_join(parent_join())
            .with_join(tags_join))
    }

    fn compile_custom(
        &mut self,
        field: &str,
        op: Operator,
        value: &QueryValue,
        subquery_form: bool,
    ) -> QueryResult<Fragment> {
        let alias = self.next_alias(self.alias_prefix);
        let value_expr = format!("{}.value_text", alias);

        let existence = |alias: &str| {
            format!(
                "EXISTS (SELECT 1 FROM {table} {alias} WHERE {alias}.parent_id = {n}.id \
                 AND {alias}.field_name = ? AND {alias}.value_text IS NOT NULL AND {alias}.value_text != '')",
                table = FIELD_VALUES_TABLE,
                alias = alias,
                n = NODE_ALIAS
            )
        };

        match op {
            Operator::Exists => {
                return Ok(Fragment::new(existence(&alias), vec![text(field)]));
            }
            Operator::IsEmpty => {
                return Ok(Fragment::new(
                    format!("NOT {}", existence(&alias)),
                    vec![text(field)],
                ));
            }
            _ => {}
        }

        let (cond, cond_params) = if op.is_ordering() {
            numeric_condition(field, &value_expr, op, value)?
        } else {
            column_condition(&value_expr, op, value, true)?
        };

        if subquery_form {
            let sql = format!(
                "EXISTS (SELECT 1 FROM {table} {alias} WHERE {alias}.parent_id = {n}.id \
                 AND {alias}.field_name = ? AND {cond})",
                table = FIELD_VALUES_TABLE,
                alias = alias,
                n = NODE_ALIAS,
                cond = cond
            );
            let mut params = vec![text(field)];
            params.extend(cond_params);
            return Ok(Fragment::new(sql, params));
        }

        let join = Join {
            key: JoinKey::FieldValue(alias.clone()),
            sql: format!(
                "LEFT JOIN {table} {alias} ON {alias}.parent_id = {n}.id AND {alias}.field_name = ?",
                table = FIELD_VALUES_TABLE,
                alias = alias,
                n = NODE_ALIAS
            ),
            params: vec![text(field)],
        };

        Ok(Fragment::new(cond, cond_params).with_join(join))
    }

    fn next_alias(&mut self, prefix: &str) -> String {
        let alias = format!("{}{}", prefix, self.next_alias);
        self.next_alias += 1;
        alias
    }
}

/// Shared LEFT JOIN to the parent node
pub fn parent_join() -> Join {
    Join {
        key: JoinKey::Parent,
        sql: format!(
            "LEFT JOIN {table} {parent} ON {parent}.id = {n}.parent_id",
            table = NODES_TABLE,
            parent = PARENT_ALIAS,
            n = NODE_ALIAS
        ),
        params: Vec::new(),
    }
}

/// INNER JOIN restricting nodes to holders of `tag`
pub fn tag_join(tag: &str) -> Join {
    Join {
        key: JoinKey::Tag,
        sql: format!(
            "INNER JOIN {table} ta ON ta.data_node_id = {n}.id AND ta.tag_name = ?",
            table = TAG_APPLICATIONS_TABLE,
            n = NODE_ALIAS
        ),
        params: vec![text(tag)],
    }
}

/// Bind a value with its natural SQLite type
pub fn sql_value(value: &QueryValue) -> Value {
    match value {
        QueryValue::Bool(b) => Value::Integer(i64::from(*b)),
        QueryValue::Integer(i) => Value::Integer(*i),
        QueryValue::Float(f) => Value::Real(*f),
        QueryValue::Text(s) => Value::Text(s.clone()),
    }
}

/// `%value%` with LIKE wildcards escaped by backslash
pub fn like_pattern(value: &str) -> String {
    let mut pattern = String::with_capacity(value.len() + 2);
    pattern.push('%');
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

fn text(s: &str) -> Value {
    Value::Text(s.to_string())
}

/// `exists: false` behaves as `is_empty` and vice versa
fn effective_operator(clause: &WhereClause) -> Operator {
    match (clause.operator, clause.value.as_bool()) {
        (Operator::Exists, Some(false)) => Operator::IsEmpty,
        (Operator::IsEmpty, Some(false)) => Operator::Exists,
        (op, _) => op,
    }
}

/// Condition on a single column expression
fn column_condition(
    expr: &str,
    op: Operator,
    value: &QueryValue,
    as_text: bool,
) -> QueryResult<(String, Vec<Value>)> {
    let bound = if as_text {
        Value::Text(value.as_text())
    } else {
        sql_value(value)
    };

    Ok(match op {
        Operator::Contains => (
            format!("{} LIKE ? ESCAPE '\\'", expr),
            vec![Value::Text(like_pattern(&value.as_text()))],
        ),
        Operator::Exists => (format!("{} IS NOT NULL", expr), Vec::new()),
        Operator::IsEmpty => (format!("({expr} IS NULL OR {expr} = '')", expr = expr), Vec::new()),
        binary => {
            let symbol = binary.sql_symbol().ok_or_else(|| {
                QueryError::validation(format!("operator '{}' needs a value", binary))
            })?;
            (format!("{} {} ?", expr, symbol), vec![bound])
        }
    })
}

/// Ordering comparison on a text column holding numbers.
///
/// Values that do not look numeric never match; SQLite would otherwise cast
/// them to 0.
fn numeric_condition(
    field: &str,
    expr: &str,
    op: Operator,
    value: &QueryValue,
) -> QueryResult<(String, Vec<Value>)> {
    let number = match value {
        QueryValue::Integer(i) => Value::Integer(*i),
        QueryValue::Float(f) => Value::Real(*f),
        QueryValue::Text(s) => match s.trim().parse::<f64>() {
            Ok(f) => Value::Real(f),
            Err(_) => {
                return Err(QueryError::validation(format!(
                    "'{}' on '{}' needs a numeric value, got '{}'",
                    op, field, s
                )))
            }
        },
        QueryValue::Bool(_) => {
            return Err(QueryError::validation(format!(
                "'{}' on '{}' needs a numeric value",
                op, field
            )))
        }
    };

    let symbol = op.sql_symbol().unwrap_or("=");
    let sql = format!(
        "({e} GLOB '*[0-9]*' AND {e} NOT GLOB '*[^0-9.+-]*' AND {e} NOT GLOB '?*[+-]*' \
         AND {e} NOT GLOB '*.*.*' AND CAST({e} AS REAL) {op} ?)",
        e = expr,
        op = symbol
    );
    Ok((sql, vec![number]))
}

/// Join fragments with a boolean keyword, skipping empty ones
fn combine(parts: Vec<Fragment>, keyword: &str) -> Fragment {
    let mut sql_parts = Vec::with_capacity(parts.len());
    let mut params = Vec::new();
    let mut joins = JoinSet::new();

    for part in parts {
        if part.sql.is_empty() {
            continue;
        }
        sql_parts.push(part.sql);
        params.extend(part.params);
        joins.extend(part.joins);
    }

    Fragment {
        sql: sql_parts.join(&format!(" {} ", keyword)),
        params,
        joins,
    }
}
