//! Query Executor
//!
//! Runs a [`QueryAst`] against the node store:
//! 1. Validation of limits and the target tag
//! 2. Date resolution inside the where tree
//! 3. SQL assembly through the shared where compiler
//! 4. Field enrichment for `select`
//!
//! # Execution Pipeline
//!
//! ```text
//! QueryAst → validate → resolve dates → build SQL → run → resolve fields → result
//! ```

use crate::query::ast::*;
use crate::query::compiler::{
    route_field, tag_join, FieldRoute, JoinSet, ParentField, WhereCompiler, NODE_ALIAS,
};
use crate::query::dates::{looks_like_date, resolve_date_at, resolve_value_at};
use crate::query::error::{QueryError, QueryResult};
use crate::query::resolver::{FieldResolver, SqliteFieldResolver};
use crate::storage::schema::{FIELD_VALUES_TABLE, NODES_TABLE, NODE_COLUMNS};
use crate::storage::Store;
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

/// One node of a query result, columns in [`NODE_COLUMNS`] order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRow {
    pub id: String,
    pub name: Option<String>,
    pub parent_id: Option<String>,
    pub node_type: Option<String>,
    pub created: Option<i64>,
    pub updated: Option<i64>,
    pub done_at: Option<i64>,
    /// Resolved custom fields, present when the query selects fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<BTreeMap<String, String>>,
}

impl NodeRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            parent_id: row.get(2)?,
            node_type: row.get(3)?,
            created: row.get(4)?,
            updated: row.get(5)?,
            done_at: row.get(6)?,
            fields: None,
        })
    }
}

/// Result of a query execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResultData {
    pub results: Vec<NodeRow>,
    pub count: usize,
    /// `results.len() == limit`; may be true when no further rows exist
    pub has_more: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_names: Option<Vec<String>>,
}

impl QueryResultData {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Ids of the returned nodes, in result order
    pub fn ids(&self) -> Vec<&str> {
        self.results.iter().map(|r| r.id.as_str()).collect()
    }
}

/// SQL text with its bound parameters, in placeholder order
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltQuery {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Node query engine
pub struct QueryEngine {
    store: Arc<Store>,
    resolver: Arc<dyn FieldResolver>,
}

impl QueryEngine {
    /// Create an engine resolving fields from the same store
    pub fn new(store: Arc<Store>) -> Self {
        let resolver = Arc::new(SqliteFieldResolver::new(Arc::clone(&store)));
        Self { store, resolver }
    }

    /// Replace the field resolver used for `select`
    pub fn with_field_resolver(mut self, resolver: Arc<dyn FieldResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Execute a query string (parses and executes)
    pub async fn execute_str(&self, query_str: &str) -> QueryResult<QueryResultData> {
        let query = crate::query::parser::parse_query(query_str)?;
        self.execute(query).await
    }

    /// Execute a query
    pub async fn execute(&self, ast: QueryAst) -> QueryResult<QueryResultData> {
        let start = Instant::now();

        // 1. Reject bad shapes before touching storage
        validate(&ast)?;

        // 2. Dates become epoch milliseconds
        let ast = resolve_dates(ast, Utc::now())?;

        // 3. Compile
        let built = build_query(&ast)?;
        tracing::debug!(sql = %built.sql, params = built.params.len(), "Executing node query");

        // 4. Run; the lock is released before field resolution
        let mut results = {
            let conn = self.store.lock().await;
            let mut stmt = conn.prepare(&built.sql)?;
            let rows = stmt.query_map(
                rusqlite::params_from_iter(built.params.iter()),
                NodeRow::from_row,
            )?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        let has_more = results.len() as i64 == ast.limit;

        // 5. Enrich with selected fields
        let field_names = match &ast.select {
            Some(select) => Some(self.attach_fields(&ast.find, select, &mut results).await?),
            None => None,
        };

        tracing::debug!(
            rows = results.len(),
            has_more,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Node query finished"
        );

        Ok(QueryResultData {
            count: results.len(),
            has_more,
            results,
            field_names,
        })
    }

    async fn attach_fields(
        &self,
        find: &str,
        select: &[String],
        results: &mut [NodeRow],
    ) -> QueryResult<Vec<String>> {
        let field_names = if select.len() == 1 && select[0] == "*" {
            self.resolver.supertag_fields(find).await?
        } else {
            select.to_vec()
        };

        let ids: Vec<String> = results.iter().map(|r| r.id.clone()).collect();
        let mut resolved = self.resolver.resolve_fields(&ids, &field_names).await?;

        for row in results.iter_mut() {
            let values = resolved.remove(&row.id).unwrap_or_default();
            row.fields = Some(values.into_iter().collect());
        }

        Ok(field_names)
    }
}

impl std::fmt::Debug for QueryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryEngine")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

/// Check the query shape; fails before any storage access
pub fn validate(ast: &QueryAst) -> QueryResult<()> {
    if ast.find.trim().is_empty() {
        return Err(QueryError::validation("find is required"));
    }
    if ast.limit < 1 {
        return Err(QueryError::validation(format!(
            "limit must be at least 1, got {}",
            ast.limit
        )));
    }
    if ast.offset < 0 {
        return Err(QueryError::validation(format!(
            "offset must not be negative, got {}",
            ast.offset
        )));
    }
    Ok(())
}

/// Rewrite date-like clause values into epoch milliseconds.
///
/// Values on `created`, `updated` and `doneAt` are always resolved; values on
/// other fields only when they look like a relative or ISO date.
pub fn resolve_dates(mut ast: QueryAst, now: DateTime<Utc>) -> QueryResult<QueryAst> {
    resolve_entry_dates(&mut ast.where_, now)?;
    Ok(ast)
}

pub(crate) fn resolve_entry_dates(
    entries: &mut [WhereEntry],
    now: DateTime<Utc>,
) -> QueryResult<()> {
    for entry in entries.iter_mut() {
        entry.for_each_clause_mut(&mut |clause: &mut WhereClause| {
            if matches!(clause.operator, Operator::Exists | Operator::IsEmpty) {
                return Ok(());
            }

            let date_column = CoreColumn::from_field(&clause.field)
                .map(|c| c.is_date())
                .unwrap_or(false);

            if date_column {
                clause.value = QueryValue::Integer(resolve_value_at(&clause.value, now)?);
            } else if let QueryValue::Text(s) = &clause.value {
                if looks_like_date(s) {
                    let ts = resolve_date_at(s, now)?;
                    clause.value = QueryValue::Integer(ts);
                }
            }
            Ok(())
        })?;
    }
    Ok(())
}

/// Assemble the SELECT statement for a validated, date-resolved query
pub fn build_query(ast: &QueryAst) -> QueryResult<BuiltQuery> {
    let mut joins = JoinSet::new();
    if !ast.is_all_nodes() {
        joins.insert(tag_join(&ast.find));
    }

    let mut compiler = WhereCompiler::new();
    let condition = compiler.compile_all(&ast.where_)?;
    joins.extend(condition.joins.clone());

    let order = ast.order_by.clone().unwrap_or_default();
    let (order_expr, order_params) = order_expression(&order.field)?;
    let direction = if order.desc { "DESC" } else { "ASC" };

    let columns = NODE_COLUMNS
        .iter()
        .map(|c| format!("{}.{}", NODE_ALIAS, c))
        .collect::<Vec<_>>()
        .join(", ");

    let sql = format!(
        "SELECT DISTINCT {columns} FROM {table} {n} {joins} {filter} \
         ORDER BY {order} {dir}, {n}.id ASC LIMIT ? OFFSET ?",
        columns = columns,
        n = NODE_ALIAS,
        table = NODES_TABLE,
        joins = joins.sql(),
        filter = condition.where_sql(),
        order = order_expr,
        dir = direction
    );

    let mut params = joins.params();
    params.extend(condition.params);
    params.extend(order_params);
    params.push(Value::Integer(ast.limit));
    params.push(Value::Integer(ast.offset));

    Ok(BuiltQuery { sql, params })
}

/// Sort expression for a field name
fn order_expression(field: &str) -> QueryResult<(String, Vec<Value>)> {
    match route_field(field)? {
        FieldRoute::Core(column) => Ok((format!("{}.{}", NODE_ALIAS, column.column()), Vec::new())),
        FieldRoute::Parent(ParentField::Name) => Ok((
            format!(
                "(SELECT p.name FROM {} p WHERE p.id = {}.parent_id)",
                NODES_TABLE, NODE_ALIAS
            ),
            Vec::new(),
        )),
        FieldRoute::Parent(ParentField::Tags) => Err(QueryError::validation(
            "cannot order by parent.tags",
        )),
        FieldRoute::Custom(name) => Ok((
            format!(
                "(SELECT o.value_text FROM {} o WHERE o.parent_id = {}.id AND o.field_name = ? \
                 ORDER BY o.value_order LIMIT 1)",
                FIELD_VALUES_TABLE, NODE_ALIAS
            ),
            vec![Value::Text(name.to_string())],
        )),
    }
}
