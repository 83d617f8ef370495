//! # Graphdex
//!
//! Query compiler and aggregation engine for an indexed knowledge graph
//! stored in SQLite: nodes, the tags applied to them, and their field values.
//!
//! ## Features
//!
//! - **Structured queries**: tag filter, nested AND/OR/NOT conditions, sorting and paging
//! - **Query strings**: `find task where Status = Done order by -created`
//! - **Relative dates**: `7d`, `2w`, `today`, ISO dates
//! - **Aggregation**: counts grouped by fields or time buckets, top-N and percentages
//! - **Safe SQL**: every value and field name is a bound parameter
//!
//! ## Modules
//!
//! - [`query`]: AST, parser, compiler and the two engines
//! - [`storage`]: SQLite handle and schema
//! - [`config`]: TOML and environment configuration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use graphdex::query::{AggregateAst, AggregationEngine, QueryEngine};
//! use graphdex::storage::Store;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(Store::open("index.db")?);
//!
//!     let engine = QueryEngine::new(Arc::clone(&store));
//!     let result = engine.execute_str("find task where Status = Done limit 10").await?;
//!     println!("Found {} tasks", result.count);
//!
//!     let aggregation = AggregationEngine::new(store);
//!     let ast = AggregateAst::new("task", AggregationEngine::parse_group_by("Status"));
//!     let counts = aggregation.aggregate(ast).await?;
//!     println!("{} tasks in {} groups", counts.total, counts.group_count);
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod query;
pub mod storage;

// Re-export top-level types for convenience
pub use config::{generate_default_config, Config, ConfigError, ConfigSource, LoggingConfig};

pub use query::{
    parse_query, where_from_json, AggregateAst, AggregateResult, AggregationEngine, FieldResolver,
    QueryAst, QueryEngine, QueryError, QueryResult, QueryResultData, SqliteFieldResolver,
};

pub use storage::Store;
