//! Graphdex Query Engine
//!
//! Compiles node queries over the indexed graph into SQL:
//!
//! - **AST**: query and aggregation types
//! - **Parser**: parse query strings into AST
//! - **Shorthand**: normalize structured JSON conditions
//! - **Compiler**: shared where-clause to SQL compilation
//! - **Executor**: run node queries
//! - **Aggregate**: group and count nodes
//!
//! # Query Language
//!
//! ```text
//! find <tag|*>
//! [where <condition> [and|or ...]]
//! [order by [-]field]
//! [limit n] [offset n]
//! [select field, ... | *]
//! ```
//!
//! # Examples
//!
//! ## Using the AST
//!
//! ```rust,ignore
//! use graphdex::query::{QueryAst, QueryEngine, WhereClause, OrderBy};
//!
//! let query = QueryAst::find("task")
//!     .filter(WhereClause::eq("Status", "Done"))
//!     .order_by(OrderBy::desc("updated"))
//!     .limit(20);
//!
//! let result = engine.execute(query).await?;
//! ```
//!
//! ## Using a Query String
//!
//! ```rust,ignore
//! let result = engine
//!     .execute_str("find task where created > 7d and Priority exists select *")
//!     .await?;
//! ```
//!
//! ## Aggregating
//!
//! ```rust,ignore
//! let ast = AggregateAst::new("task", AggregationEngine::parse_group_by("Status,month"));
//! let result = aggregation.aggregate(ast).await?;
//! ```

mod aggregate;
mod ast;
mod compiler;
mod dates;
mod error;
mod executor;
mod parser;
mod resolver;
mod shorthand;

pub use aggregate::{
    AggregateResult, AggregationEngine, GroupCounts, Groups, NestedGroupCounts, NONE_KEY,
};
pub use ast::{
    AggregateAst, AggregateFunction, CoreColumn, DateField, GroupBySpec, GroupType, Operator,
    OrderBy, QueryAst, QueryValue, TimePeriod, WhereClause, WhereEntry, WhereGroup,
    targets_all_nodes, ALL_NODES, CORE_FIELDS, DEFAULT_LIMIT,
};
pub use compiler::{route_field, FieldRoute, Fragment, JoinKey, JoinSet, ParentField, WhereCompiler};
pub use dates::{resolve_date, resolve_date_at};
pub use error::{QueryError, QueryResult};
pub use executor::{build_query, BuiltQuery, NodeRow, QueryEngine, QueryResultData};
pub use parser::parse_query;
pub use resolver::{FieldResolver, ResolvedFields, SqliteFieldResolver};
pub use shorthand::{parse_shorthand, where_from_json};
