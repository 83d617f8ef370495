//! Storage schema
//!
//! Tables are populated by the ingestion pipeline; the query core only reads
//! them. Column names and types must stay compatible with existing stores.

/// Node table
pub const NODES_TABLE: &str = "nodes";

/// Node ↔ tag membership table
pub const TAG_APPLICATIONS_TABLE: &str = "tag_applications";

/// Custom field value table
pub const FIELD_VALUES_TABLE: &str = "field_values";

/// Node columns selected by queries, in row order
pub const NODE_COLUMNS: [&str; 7] = [
    "id", "name", "parent_id", "node_type", "created", "updated", "done_at",
];

/// DDL for the three tables and their lookup indexes
pub const SCHEMA_SQL: &str = "
    CREATE TABLE IF NOT EXISTS nodes (
        id TEXT PRIMARY KEY,
        name TEXT,
        parent_id TEXT,
        node_type TEXT,
        created INTEGER,
        updated INTEGER,
        done_at INTEGER
    );

    CREATE TABLE IF NOT EXISTS tag_applications (
        data_node_id TEXT NOT NULL,
        tag_id TEXT,
        tag_name TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS field_values (
        tuple_id TEXT,
        parent_id TEXT NOT NULL,
        field_def_id TEXT,
        field_name TEXT NOT NULL,
        value_node_id TEXT,
        value_text TEXT,
        value_order INTEGER,
        created INTEGER
    );

    CREATE INDEX IF NOT EXISTS idx_nodes_parent ON nodes(parent_id);
    CREATE INDEX IF NOT EXISTS idx_nodes_created ON nodes(created);
    CREATE INDEX IF NOT EXISTS idx_tag_applications_node ON tag_applications(data_node_id);
    CREATE INDEX IF NOT EXISTS idx_tag_applications_name ON tag_applications(tag_name);
    CREATE INDEX IF NOT EXISTS idx_field_values_parent_name ON field_values(parent_id, field_name);
";
