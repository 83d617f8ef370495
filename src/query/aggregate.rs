//! Aggregation Engine
//!
//! Groups the nodes matching a tag and where-conditions along one or two
//! dimensions and counts them. A dimension is either a time bucket over a
//! date column or the value of a field:
//!
//! ```text
//! day      2024-01-15
//! week     2024-W02      (strftime %W: Monday-based, not ISO-8601)
//! month    2024-01
//! quarter  2024-Q1
//! year     2024
//! Status   Active / Done / (none)
//! ```
//!
//! Counts use `COUNT(DISTINCT n.id)` so join multiplicity never inflates a
//! group. Totals are computed by a separate ungrouped count.

use crate::query::ast::*;
use crate::query::compiler::{
    parent_join, route_field, tag_join, FieldRoute, Join, JoinKey, JoinSet, ParentField,
    WhereCompiler, NODE_ALIAS, PARENT_ALIAS,
};
use crate::query::error::{QueryError, QueryResult};
use crate::query::executor::resolve_entry_dates;
use crate::storage::schema::{FIELD_VALUES_TABLE, NODES_TABLE, TAG_APPLICATIONS_TABLE};
use crate::storage::Store;
use chrono::Utc;
use rusqlite::types::Value;
use serde::ser::{Serialize, Serializer};
use std::sync::Arc;

/// Group key for rows without a value
pub const NONE_KEY: &str = "(none)";

/// Group key → count, in result order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupCounts(Vec<(String, i64)>);

impl GroupCounts {
    pub fn get(&self, key: &str) -> Option<i64> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| *v)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn sum(&self) -> i64 {
        self.0.iter().map(|(_, v)| v).sum()
    }

    fn push(&mut self, key: String, count: i64) {
        self.0.push((key, count));
    }
}

impl Serialize for GroupCounts {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|(k, v)| (k, v)))
    }
}

/// Outer key → inner counts, in order of first appearance
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NestedGroupCounts(Vec<(String, GroupCounts)>);

impl NestedGroupCounts {
    pub fn get(&self, outer: &str) -> Option<&GroupCounts> {
        self.0.iter().find(|(k, _)| k == outer).map(|(_, v)| v)
    }

    /// Number of outer keys
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of (outer, inner) pairs
    pub fn pair_count(&self) -> usize {
        self.0.iter().map(|(_, inner)| inner.len()).sum()
    }

    fn push(&mut self, outer: String, inner: String, count: i64) {
        match self.0.iter_mut().find(|(k, _)| *k == outer) {
            Some((_, counts)) => counts.push(inner, count),
            None => {
                let mut counts = GroupCounts::default();
                counts.push(inner, count);
                self.0.push((outer, counts));
            }
        }
    }
}

impl Serialize for NestedGroupCounts {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|(k, v)| (k, v)))
    }
}

/// Flat or nested group map
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(untagged)]
pub enum Groups {
    Flat(GroupCounts),
    Nested(NestedGroupCounts),
}

impl Groups {
    pub fn flat(&self) -> Option<&GroupCounts> {
        match self {
            Self::Flat(counts) => Some(counts),
            Self::Nested(_) => None,
        }
    }

    pub fn nested(&self) -> Option<&NestedGroupCounts> {
        match self {
            Self::Nested(counts) => Some(counts),
            Self::Flat(_) => None,
        }
    }
}

/// Result of an aggregation
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateResult {
    /// Distinct matching nodes, ignoring grouping
    pub total: i64,
    /// Groups returned (pairs for two dimensions)
    pub group_count: usize,
    pub groups: Groups,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percentages: Option<GroupCounts>,
    /// Set when more groups exist than were returned
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// A compiled grouping dimension
struct Dimension {
    expr: String,
    joins: Vec<Join>,
}

/// Grouping and counting engine
#[derive(Debug, Clone)]
pub struct AggregationEngine {
    store: Arc<Store>,
}

impl AggregationEngine {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Split a comma-separated group-by list into dimensions
    pub fn parse_group_by(csv: &str) -> Vec<GroupBySpec> {
        GroupBySpec::parse_csv(csv)
    }

    /// Count nodes per group
    pub async fn aggregate(&self, ast: AggregateAst) -> QueryResult<AggregateResult> {
        validate(&ast)?;

        let mut where_ = ast.where_.clone();
        resolve_entry_dates(&mut where_, Utc::now())?;

        let cap = ast.top.unwrap_or(ast.limit);
        let grouped = build_grouped_query(&ast.find, &where_, &ast.group_by, cap)?;
        let total_query = build_total_query(&ast.find, &where_)?;

        tracing::debug!(
            sql = %grouped.0,
            params = grouped.1.len(),
            dimensions = ast.group_by.len(),
            "Executing aggregation"
        );

        let (mut rows, total) = {
            let conn = self.store.lock().await;

            let mut stmt = conn.prepare(&grouped.0)?;
            let dims = ast.group_by.len();
            let mapped = stmt.query_map(rusqlite::params_from_iter(grouped.1.iter()), |row| {
                let outer: String = row.get(0)?;
                let inner: Option<String> = if dims == 2 { Some(row.get(1)?) } else { None };
                let count: i64 = row.get(dims)?;
                Ok((outer, inner, count))
            })?;
            let rows = mapped.collect::<Result<Vec<_>, _>>()?;

            let total: i64 = conn.query_row(
                &total_query.0,
                rusqlite::params_from_iter(total_query.1.iter()),
                |row| row.get(0),
            )?;
            (rows, total)
        };

        let truncated = rows.len() as i64 > cap;
        if truncated {
            rows.truncate(cap as usize);
        }
        let warning = truncated.then(|| {
            let warning = format!(
                "Showing top {} groups only; more groups exist beyond this limit",
                cap
            );
            tracing::warn!(find = %ast.find, cap, "Aggregation truncated");
            warning
        });

        let (groups, group_count) = if ast.group_by.len() == 1 {
            let mut counts = GroupCounts::default();
            for (key, _, count) in rows {
                counts.push(key, count);
            }
            let n = counts.len();
            (Groups::Flat(counts), n)
        } else {
            let mut nested = NestedGroupCounts::default();
            for (outer, inner, count) in rows {
                nested.push(outer, inner.unwrap_or_else(|| NONE_KEY.to_string()), count);
            }
            let n = nested.pair_count();
            (Groups::Nested(nested), n)
        };

        let percentages = match (&groups, ast.show_percent) {
            (Groups::Flat(counts), true) => Some(percentages(counts, total)),
            _ => None,
        };

        Ok(AggregateResult {
            total,
            group_count,
            groups,
            percentages,
            warning,
        })
    }

    /// Number of distinct nodes holding `tag`
    pub async fn count_only(&self, tag: &str) -> QueryResult<i64> {
        if tag.trim().is_empty() {
            return Err(QueryError::validation("find is required"));
        }

        let (sql, params) = build_total_query(tag, &[])?;
        let conn = self.store.lock().await;
        let total = conn.query_row(&sql, rusqlite::params_from_iter(params.iter()), |row| {
            row.get(0)
        })?;
        Ok(total)
    }
}

/// Check the aggregation shape; fails before any storage access
pub fn validate(ast: &AggregateAst) -> QueryResult<()> {
    if ast.find.trim().is_empty() {
        return Err(QueryError::validation("find is required"));
    }
    if ast.group_by.is_empty() || ast.group_by.len() > 2 {
        return Err(QueryError::validation(format!(
            "groupBy requires 1 or 2 dimensions, got {}",
            ast.group_by.len()
        )));
    }
    if ast.limit < 1 {
        return Err(QueryError::validation(format!(
            "limit must be at least 1, got {}",
            ast.limit
        )));
    }
    if let Some(top) = ast.top {
        if top < 1 {
            return Err(QueryError::validation(format!(
                "top must be at least 1, got {}",
                top
            )));
        }
    }
    Ok(())
}

/// `round(count / total * 100)` per group
fn percentages(counts: &GroupCounts, total: i64) -> GroupCounts {
    let mut out = GroupCounts::default();
    for (key, count) in counts.iter() {
        let pct = if total > 0 {
            (count as f64 / total as f64 * 100.0).round() as i64
        } else {
            0
        };
        out.push(key.to_string(), pct);
    }
    out
}

/// Tag join plus compiled where-conditions shared by both statements
fn filter_parts(find: &str, where_: &[WhereEntry]) -> QueryResult<(JoinSet, String, Vec<Value>)> {
    let mut joins = JoinSet::new();
    if !targets_all_nodes(find) {
        joins.insert(tag_join(find));
    }

    let condition = WhereCompiler::new().compile_all(where_)?;
    let where_sql = condition.where_sql();
    joins.extend(condition.joins);
    Ok((joins, where_sql, condition.params))
}

fn build_grouped_query(
    find: &str,
    where_: &[WhereEntry],
    group_by: &[GroupBySpec],
    cap: i64,
) -> QueryResult<(String, Vec<Value>)> {
    let (mut joins, where_sql, where_params) = filter_parts(find, where_)?;

    let mut keys = Vec::with_capacity(group_by.len());
    for (index, spec) in group_by.iter().enumerate() {
        let dimension = dimension(spec, index)?;
        for join in dimension.joins {
            joins.insert(join);
        }
        keys.push(dimension.expr);
    }

    let aliases: Vec<String> = (0..keys.len()).map(|i| format!("k{}", i)).collect();
    let select = keys
        .iter()
        .zip(&aliases)
        .map(|(expr, alias)| format!("{} AS {}", expr, alias))
        .collect::<Vec<_>>()
        .join(", ");
    let group = aliases.join(", ");

    let sql = format!(
        "SELECT {select}, COUNT(DISTINCT {n}.id) AS cnt FROM {table} {n} {joins} {filter} \
         GROUP BY {group} ORDER BY cnt DESC, {group} LIMIT ?",
        select = select,
        n = NODE_ALIAS,
        table = NODES_TABLE,
        joins = joins.sql(),
        filter = where_sql,
        group = group
    );

    let mut params = joins.params();
    params.extend(where_params);
    params.push(Value::Integer(cap.saturating_add(1)));
    Ok((sql, params))
}

fn build_total_query(find: &str, where_: &[WhereEntry]) -> QueryResult<(String, Vec<Value>)> {
    let (joins, where_sql, where_params) = filter_parts(find, where_)?;

    let sql = format!(
        "SELECT COUNT(DISTINCT {n}.id) FROM {table} {n} {joins} {filter}",
        n = NODE_ALIAS,
        table = NODES_TABLE,
        joins = joins.sql(),
        filter = where_sql
    );

    let mut params = joins.params();
    params.extend(where_params);
    Ok((sql, params))
}

/// Grouping expression and joins for one dimension
fn dimension(spec: &GroupBySpec, index: usize) -> QueryResult<Dimension> {
    match spec {
        GroupBySpec::Period { period, date_field } => Ok(Dimension {
            expr: format!(
                "COALESCE({}, '{}')",
                bucket_expr(*period, date_field.column()),
                NONE_KEY
            ),
            joins: Vec::new(),
        }),
        GroupBySpec::Field { field } => field_dimension(field, index),
    }
}

fn bucket_expr(period: TimePeriod, column: &str) -> String {
    let ts = format!("{}.{} / 1000, 'unixepoch'", NODE_ALIAS, column);
    match period {
        TimePeriod::Day => format!("strftime('%Y-%m-%d', {})", ts),
        TimePeriod::Week => format!("strftime('%Y-W%W', {})", ts),
        TimePeriod::Month => format!("strftime('%Y-%m', {})", ts),
        TimePeriod::Year => format!("strftime('%Y', {})", ts),
        TimePeriod::Quarter => format!(
            "strftime('%Y', {ts}) || '-Q' || ((CAST(strftime('%m', {ts}) AS INTEGER) + 2) / 3)",
            ts = ts
        ),
    }
}

fn field_dimension(field: &str, index: usize) -> QueryResult<Dimension> {
    let alias = format!("g{}", index);

    let dimension = match route_field(field)? {
        FieldRoute::Core(column) => Dimension {
            expr: format!(
                "COALESCE(CAST({}.{} AS TEXT), '{}')",
                NODE_ALIAS,
                column.column(),
                NONE_KEY
            ),
            joins: Vec::new(),
        },
        FieldRoute::Parent(ParentField::Name) => Dimension {
            expr: format!("COALESCE({}.name, '{}')", PARENT_ALIAS, NONE_KEY),
            joins: vec![parent_join()],
        },
        FieldRoute::Parent(ParentField::Tags) => Dimension {
            expr: format!("COALESCE({}.tag_name, '{}')", alias, NONE_KEY),
            joins: vec![
                parent_join(),
                Join {
                    key: JoinKey::GroupField(alias.clone()),
                    sql: format!(
                        "LEFT JOIN {table} {alias} ON {alias}.data_node_id = {parent}.id",
                        table = TAG_APPLICATIONS_TABLE,
                        alias = alias,
                        parent = PARENT_ALIAS
                    ),
                    params: Vec::new(),
                },
            ],
        },
        FieldRoute::Custom(name) => Dimension {
            expr: format!("COALESCE({}.value_text, '{}')", alias, NONE_KEY),
            joins: vec![Join {
                key: JoinKey::GroupField(alias.clone()),
                sql: format!(
                    "LEFT JOIN {table} {alias} ON {alias}.parent_id = {n}.id AND {alias}.field_name = ?",
                    table = FIELD_VALUES_TABLE,
                    alias = alias,
                    n = NODE_ALIAS
                ),
                params: vec![Value::Text(name.to_string())],
            }],
        },
    };

    Ok(dimension)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::{field, insert_node, memory_store, tag};

    // 2024-01-15 and 2024-04-02 00:00 UTC
    const JAN_15: i64 = 1705276800000;
    const APR_02: i64 = 1712016000000;

    async fn create_test_engine() -> AggregationEngine {
        let store = memory_store().await;
        {
            let conn = store.lock().await;
            insert_node(&conn, "t1", "One", None, JAN_15);
            insert_node(&conn, "t2", "Two", None, JAN_15 + 3_600_000);
            insert_node(&conn, "t3", "Three", None, APR_02);
            insert_node(&conn, "n1", "Note", None, APR_02);
            for id in ["t1", "t2", "t3"] {
                tag(&conn, id, "task");
            }
            field(&conn, "t1", "Status", "Active", 0);
            field(&conn, "t2", "Status", "Active", 0);
            field(&conn, "t3", "Status", "Done", 0);
            field(&conn, "t1", "Priority", "High", 0);
            field(&conn, "t2", "Priority", "Low", 0);
            field(&conn, "t3", "Priority", "High", 0);
        }
        AggregationEngine::new(store)
    }

    fn status_counts(result: &AggregateResult) -> &GroupCounts {
        result.groups.flat().unwrap()
    }

    #[tokio::test]
    async fn test_group_by_field() {
        let engine = create_test_engine().await;

        let result = engine
            .aggregate(AggregateAst::new("task", vec![GroupBySpec::field("Status")]))
            .await
            .unwrap();

        let groups = status_counts(&result);
        assert_eq!(groups.keys().collect::<Vec<_>>(), vec!["Active", "Done"]);
        assert_eq!(groups.get("Active"), Some(2));
        assert_eq!(groups.get("Done"), Some(1));
        assert_eq!(result.total, 3);
        assert_eq!(groups.sum(), result.total);
        assert_eq!(result.group_count, 2);
        assert!(result.warning.is_none());
        assert!(result.percentages.is_none());
    }

    #[tokio::test]
    async fn test_missing_field_groups_as_none() {
        let engine = create_test_engine().await;

        let result = engine
            .aggregate(AggregateAst::new("*", vec![GroupBySpec::field("Status")]))
            .await
            .unwrap();
        assert_eq!(status_counts(&result).get(NONE_KEY), Some(1));
        assert_eq!(result.total, 4);
    }

    #[tokio::test]
    async fn test_two_dimensions_nested() {
        let engine = create_test_engine().await;

        let result = engine
            .aggregate(AggregateAst::new(
                "task",
                vec![GroupBySpec::field("Status"), GroupBySpec::field("Priority")],
            ))
            .await
            .unwrap();

        let nested = result.groups.nested().unwrap();
        assert_eq!(nested.len(), 2);
        assert_eq!(nested.get("Active").unwrap().get("High"), Some(1));
        assert_eq!(nested.get("Active").unwrap().get("Low"), Some(1));
        assert_eq!(nested.get("Done").unwrap().get("High"), Some(1));
        assert_eq!(result.group_count, 3);

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["groups"]["Done"]["High"], 1);
        assert!(json.get("percentages").is_none());
    }

    #[tokio::test]
    async fn test_percentages() {
        let engine = create_test_engine().await;

        let result = engine
            .aggregate(AggregateAst::new("task", vec![GroupBySpec::field("Status")]).with_percent())
            .await
            .unwrap();

        let pct = result.percentages.as_ref().unwrap();
        assert_eq!(pct.get("Active"), Some(67));
        assert_eq!(pct.get("Done"), Some(33));
        assert_eq!(pct.sum(), 100);
    }

    #[tokio::test]
    async fn test_top_n_truncates_with_warning() {
        let engine = create_test_engine().await;

        let result = engine
            .aggregate(AggregateAst::new("task", vec![GroupBySpec::field("Status")]).top(1))
            .await
            .unwrap();

        let groups = status_counts(&result);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups.get("Active"), Some(2));
        assert!(result.warning.is_some());
        assert_eq!(result.total, 3);

        let result = engine
            .aggregate(AggregateAst::new("task", vec![GroupBySpec::field("Status")]).top(2))
            .await
            .unwrap();
        assert!(result.warning.is_none());
    }

    #[tokio::test]
    async fn test_time_buckets() {
        let engine = create_test_engine().await;

        let by_month = engine
            .aggregate(AggregateAst::new("task", vec![GroupBySpec::period(TimePeriod::Month)]))
            .await
            .unwrap();
        let months = status_counts(&by_month);
        assert_eq!(months.get("2024-01"), Some(2));
        assert_eq!(months.get("2024-04"), Some(1));

        let by_quarter = engine
            .aggregate(AggregateAst::new("task", vec![GroupBySpec::period(TimePeriod::Quarter)]))
            .await
            .unwrap();
        let quarters = status_counts(&by_quarter);
        assert_eq!(quarters.get("2024-Q1"), Some(2));
        assert_eq!(quarters.get("2024-Q2"), Some(1));

        let by_day = engine
            .aggregate(AggregateAst::new("task", vec![GroupBySpec::period(TimePeriod::Day)]))
            .await
            .unwrap();
        assert_eq!(status_counts(&by_day).get("2024-01-15"), Some(2));

        let by_week = engine
            .aggregate(AggregateAst::new("task", vec![GroupBySpec::period(TimePeriod::Week)]))
            .await
            .unwrap();
        assert_eq!(status_counts(&by_week).get("2024-W03"), Some(2));
    }

    #[tokio::test]
    async fn test_where_conditions_apply_to_groups_and_total() {
        let engine = create_test_engine().await;

        let result = engine
            .aggregate(
                AggregateAst::new("task", vec![GroupBySpec::field("Status")])
                    .filter(WhereClause::eq("Priority", "High")),
            )
            .await
            .unwrap();

        let groups = status_counts(&result);
        assert_eq!(groups.get("Active"), Some(1));
        assert_eq!(groups.get("Done"), Some(1));
        assert_eq!(result.total, 2);
    }

    #[tokio::test]
    async fn test_existence_conditions_under_group_by() {
        let engine = create_test_engine().await;
        {
            let conn = engine.store.lock().await;
            insert_node(&conn, "t4", "Four", None, APR_02);
            tag(&conn, "t4", "task");
            field(&conn, "t4", "Status", "Done", 0);
            field(&conn, "t4", "Priority", "", 0);
        }

        let without = engine
            .aggregate(
                AggregateAst::new("task", vec![GroupBySpec::field("Status")])
                    .filter(WhereClause::is_empty("Priority")),
            )
            .await
            .unwrap();
        let groups = status_counts(&without);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups.get("Done"), Some(1));
        assert_eq!(without.total, 1);

        let with = engine
            .aggregate(
                AggregateAst::new("task", vec![GroupBySpec::field("Status")])
                    .filter(WhereClause::exists("Priority")),
            )
            .await
            .unwrap();
        let groups = status_counts(&with);
        assert_eq!(groups.get("Active"), Some(2));
        assert_eq!(groups.get("Done"), Some(1));
        assert_eq!(with.total, 3);
        assert_eq!(groups.sum(), with.total);
    }

    #[tokio::test]
    async fn test_null_dates_bucket_as_none() {
        let engine = create_test_engine().await;
        {
            let conn = engine.store.lock().await;
            conn.execute(
                "INSERT INTO nodes (id, name, created, updated) VALUES ('t4', 'Undated', NULL, ?1)",
                [JAN_15],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO nodes (id, name, created, updated) VALUES ('t5', 'Untouched', ?1, NULL)",
                [APR_02],
            )
            .unwrap();
            tag(&conn, "t4", "task");
            tag(&conn, "t5", "task");
        }

        let by_quarter = engine
            .aggregate(AggregateAst::new("task", vec![GroupBySpec::period(TimePeriod::Quarter)]))
            .await
            .unwrap();
        let quarters = status_counts(&by_quarter);
        assert_eq!(quarters.get(NONE_KEY), Some(1));
        assert_eq!(quarters.get("2024-Q1"), Some(2));
        assert_eq!(quarters.get("2024-Q2"), Some(2));
        assert_eq!(by_quarter.total, 5);

        let by_updated = engine
            .aggregate(AggregateAst::new(
                "task",
                vec![GroupBySpec::Period {
                    period: TimePeriod::Month,
                    date_field: DateField::Updated,
                }],
            ))
            .await
            .unwrap();
        let months = status_counts(&by_updated);
        assert_eq!(months.get(NONE_KEY), Some(1));
        assert_eq!(months.get("2024-01"), Some(3));
        assert_eq!(months.get("2024-04"), Some(1));
    }

    #[tokio::test]
    async fn test_period_over_updated_date() {
        let engine = create_test_engine().await;
        {
            let conn = engine.store.lock().await;
            conn.execute(
                "UPDATE nodes SET updated = ?1 WHERE id = 't3'",
                [JAN_15 + 7 * 86_400_000],
            )
            .unwrap();
        }

        let by_updated = engine
            .aggregate(AggregateAst::new(
                "task",
                vec![GroupBySpec::Period {
                    period: TimePeriod::Week,
                    date_field: DateField::Updated,
                }],
            ))
            .await
            .unwrap();
        let weeks = status_counts(&by_updated);
        assert_eq!(weeks.keys().collect::<Vec<_>>(), vec!["2024-W03", "2024-W04"]);
        assert_eq!(weeks.get("2024-W03"), Some(2));
        assert_eq!(weeks.get("2024-W04"), Some(1));

        let by_created = engine
            .aggregate(AggregateAst::new("task", vec![GroupBySpec::period(TimePeriod::Week)]))
            .await
            .unwrap();
        assert_eq!(status_counts(&by_created).get("2024-W14"), Some(1));
        assert_eq!(status_counts(&by_created).get("2024-W04"), None);
    }

    #[tokio::test]
    async fn test_two_dimension_top_n_counts_pairs() {
        let engine = create_test_engine().await;

        let result = engine
            .aggregate(
                AggregateAst::new(
                    "task",
                    vec![GroupBySpec::field("Status"), GroupBySpec::field("Priority")],
                )
                .top(2),
            )
            .await
            .unwrap();

        let nested = result.groups.nested().unwrap();
        assert_eq!(nested.pair_count(), 2);
        assert_eq!(result.group_count, 2);
        assert_eq!(nested.len(), 1);
        assert_eq!(nested.get("Active").unwrap().get("High"), Some(1));
        assert_eq!(nested.get("Active").unwrap().get("Low"), Some(1));
        assert!(nested.get("Done").is_none());
        assert_eq!(
            result.warning.as_deref(),
            Some("Showing top 2 groups only; more groups exist beyond this limit")
        );
        assert_eq!(result.total, 3);

        let result = engine
            .aggregate(
                AggregateAst::new(
                    "task",
                    vec![GroupBySpec::field("Status"), GroupBySpec::field("Priority")],
                )
                .top(3),
            )
            .await
            .unwrap();
        assert_eq!(result.group_count, 3);
        assert!(result.warning.is_none());
    }

    #[tokio::test]
    async fn test_count_only() {
        let engine = create_test_engine().await;
        assert_eq!(engine.count_only("task").await.unwrap(), 3);
        assert_eq!(engine.count_only("missing").await.unwrap(), 0);
        assert!(engine.count_only(" ").await.unwrap_err().is_validation());
    }

    #[tokio::test]
    async fn test_validation() {
        let engine = create_test_engine().await;

        let three = vec![
            GroupBySpec::field("a"),
            GroupBySpec::field("b"),
            GroupBySpec::field("c"),
        ];
        for ast in [
            AggregateAst::new("task", Vec::new()),
            AggregateAst::new("task", three),
            AggregateAst::new("", vec![GroupBySpec::field("Status")]),
            AggregateAst::new("task", vec![GroupBySpec::field("Status")]).top(0),
            AggregateAst::new("task", vec![GroupBySpec::field("Status")]).limit(0),
            AggregateAst::new("task", vec![GroupBySpec::field("parent.created")]),
        ] {
            let err = engine.aggregate(ast).await.unwrap_err();
            assert!(err.is_validation(), "{:?}", err);
        }
    }

    #[test]
    fn test_parse_group_by() {
        assert_eq!(
            AggregationEngine::parse_group_by("Status,week"),
            vec![
                GroupBySpec::field("Status"),
                GroupBySpec::period(TimePeriod::Week)
            ]
        );
    }

    #[test]
    fn test_field_names_bound_in_grouped_query() {
        let (sql, params) = build_grouped_query(
            "task",
            &[WhereClause::eq("Status", "Done").into()],
            &[GroupBySpec::field("Owner's team")],
            10,
        )
        .unwrap();

        assert!(!sql.contains("Owner's"));
        assert!(sql.contains("LEFT JOIN field_values g0 ON g0.parent_id = n.id AND g0.field_name = ?"));
        assert_eq!(
            params,
            vec![
                Value::Text("task".into()),
                Value::Text("Status".into()),
                Value::Text("Owner's team".into()),
                Value::Text("Done".into()),
                Value::Integer(11),
            ]
        );
    }
}
