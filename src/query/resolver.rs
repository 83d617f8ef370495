//! Field Resolver
//!
//! Resolves custom field values for a page of result nodes. The query
//! executor only depends on the [`FieldResolver`] trait; the schema registry
//! in a full deployment provides its own implementation. [`SqliteFieldResolver`]
//! reads the field value table directly.

use crate::query::error::QueryResult;
use crate::storage::{Store, FIELD_VALUES_TABLE, TAG_APPLICATIONS_TABLE};
use async_trait::async_trait;
use rusqlite::types::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Node id → field name → value
pub type ResolvedFields = HashMap<String, HashMap<String, String>>;

/// Separator for fields holding several values
pub const MULTI_VALUE_SEPARATOR: &str = ", ";

/// Bound parameters per statement, below SQLite's historic 999 limit
const CHUNK_SIZE: usize = 500;

/// Source of custom field values
#[async_trait]
pub trait FieldResolver: Send + Sync {
    /// Values of `field_names` for each of `node_ids`; absent fields are omitted
    async fn resolve_fields(
        &self,
        node_ids: &[String],
        field_names: &[String],
    ) -> QueryResult<ResolvedFields>;

    /// Field names defined for a tag, used for `select *`
    async fn supertag_fields(&self, tag_name: &str) -> QueryResult<Vec<String>>;
}

/// Resolver reading the field value table of a [`Store`]
#[derive(Debug, Clone)]
pub struct SqliteFieldResolver {
    store: Arc<Store>,
}

impl SqliteFieldResolver {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl FieldResolver for SqliteFieldResolver {
    async fn resolve_fields(
        &self,
        node_ids: &[String],
        field_names: &[String],
    ) -> QueryResult<ResolvedFields> {
        let mut resolved = ResolvedFields::new();
        if node_ids.is_empty() || field_names.is_empty() {
            return Ok(resolved);
        }

        let conn = self.store.lock().await;
        let names: Vec<Value> = field_names.iter().map(|n| Value::Text(n.clone())).collect();
        let id_chunk = CHUNK_SIZE.saturating_sub(names.len()).max(1);

        for ids in node_ids.chunks(id_chunk) {
            let sql = format!(
                "SELECT parent_id, field_name, value_text FROM {table}
                 WHERE parent_id IN ({ids}) AND field_name IN ({names})
                 AND value_text IS NOT NULL
                 ORDER BY parent_id, field_name, value_order",
                table = FIELD_VALUES_TABLE,
                ids = placeholders(ids.len()),
                names = placeholders(names.len())
            );

            let params = ids
                .iter()
                .map(|id| Value::Text(id.clone()))
                .chain(names.iter().cloned());

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(rusqlite::params_from_iter(params), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?;

            for row in rows {
                let (node_id, field_name, value) = row?;
                resolved
                    .entry(node_id)
                    .or_default()
                    .entry(field_name)
                    .and_modify(|existing: &mut String| {
                        existing.push_str(MULTI_VALUE_SEPARATOR);
                        existing.push_str(&value);
                    })
                    .or_insert(value);
            }
        }

        Ok(resolved)
    }

    async fn supertag_fields(&self, tag_name: &str) -> QueryResult<Vec<String>> {
        let conn = self.store.lock().await;

        let names = if tag_name == "*" {
            let mut stmt = conn.prepare(&format!(
                "SELECT DISTINCT field_name FROM {} ORDER BY field_name",
                FIELD_VALUES_TABLE
            ))?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            rows.collect::<Result<Vec<_>, _>>()?
        } else {
            let mut stmt = conn.prepare(&format!(
                "SELECT DISTINCT fv.field_name FROM {fv} fv
                 INNER JOIN {ta} ta ON ta.data_node_id = fv.parent_id
                 WHERE ta.tag_name = ?
                 ORDER BY fv.field_name",
                fv = FIELD_VALUES_TABLE,
                ta = TAG_APPLICATIONS_TABLE
            ))?;
            let rows = stmt.query_map([tag_name], |row| row.get::<_, String>(0))?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        Ok(names)
    }
}

/// `?, ?, ?` for `n` parameters
pub(crate) fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::{field, insert_node, memory_store, tag};

    #[tokio::test]
    async fn test_resolve_fields_joins_multi_values_in_order() {
        let store = memory_store().await;
        {
            let conn = store.lock().await;
            insert_node(&conn, "a", "Task A", None, 1);
            insert_node(&conn, "b", "Task B", None, 2);
            field(&conn, "a", "Status", "Active", 0);
            field(&conn, "a", "Owner", "Sam", 1);
            field(&conn, "a", "Owner", "Kim", 0);
            field(&conn, "b", "Status", "Done", 0);
        }

        let resolver = SqliteFieldResolver::new(store);
        let resolved = resolver
            .resolve_fields(
                &["a".to_string(), "b".to_string(), "missing".to_string()],
                &["Status".to_string(), "Owner".to_string()],
            )
            .await
            .unwrap();

        assert_eq!(resolved["a"]["Status"], "Active");
        assert_eq!(resolved["a"]["Owner"], "Kim, Sam");
        assert_eq!(resolved["b"]["Status"], "Done");
        assert!(!resolved["b"].contains_key("Owner"));
        assert!(!resolved.contains_key("missing"));
    }

    #[tokio::test]
    async fn test_resolve_fields_across_chunks() {
        let store = memory_store().await;
        let ids: Vec<String> = (0..1200).map(|i| format!("node-{}", i)).collect();
        {
            let conn = store.lock().await;
            for (i, id) in ids.iter().enumerate() {
                insert_node(&conn, id, id, None, i as i64);
                field(&conn, id, "Status", &format!("S{}", i % 7), 0);
                field(&conn, id, "Owner", &format!("owner-{}", i), 0);
            }
        }

        let resolver = SqliteFieldResolver::new(store);
        let resolved = resolver
            .resolve_fields(&ids, &["Status".to_string(), "Owner".to_string()])
            .await
            .unwrap();

        assert!(ids.len() > 2 * CHUNK_SIZE);
        assert_eq!(resolved.len(), ids.len());
        for (i, id) in ids.iter().enumerate() {
            assert_eq!(resolved[id]["Status"], format!("S{}", i % 7));
            assert_eq!(resolved[id]["Owner"], format!("owner-{}", i));
        }
    }

    #[tokio::test]
    async fn test_supertag_fields() {
        let store = memory_store().await;
        {
            let conn = store.lock().await;
            insert_node(&conn, "a", "Task A", None, 1);
            insert_node(&conn, "p", "Person", None, 1);
            tag(&conn, "a", "task");
            tag(&conn, "p", "person");
            field(&conn, "a", "Status", "Active", 0);
            field(&conn, "a", "Due", "2024-01-01", 0);
            field(&conn, "p", "Email", "x@example.com", 0);
        }

        let resolver = SqliteFieldResolver::new(store);
        assert_eq!(
            resolver.supertag_fields("task").await.unwrap(),
            vec!["Due".to_string(), "Status".to_string()]
        );
        assert_eq!(resolver.supertag_fields("*").await.unwrap().len(), 3);
        assert!(resolver.supertag_fields("nothing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resolve_nothing_requested() {
        let store = memory_store().await;
        let resolver = SqliteFieldResolver::new(store);
        let resolved = resolver.resolve_fields(&[], &["Status".to_string()]).await.unwrap();
        assert!(resolved.is_empty());
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(placeholders(3), "?, ?, ?");
        assert_eq!(placeholders(1), "?");
    }
}
