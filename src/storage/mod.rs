//! Graph store access
//!
//! - **schema**: table names and DDL of the indexed export
//! - **store**: shared SQLite handle used by the engines
//!
//! The ingestion pipeline owns the data; this crate only reads it. The DDL is
//! provided so tests and fresh databases start from the same layout.

pub mod schema;
mod store;

pub use schema::{FIELD_VALUES_TABLE, NODES_TABLE, NODE_COLUMNS, TAG_APPLICATIONS_TABLE};
pub use store::Store;
