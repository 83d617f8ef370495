//! Graphdex CLI
//!
//! Command-line interface over the query and aggregation engines:
//! - Run queries from a query string or JSON
//! - Aggregate counts by fields or time buckets
//! - Count tagged nodes
//! - Initialize the schema of an empty database
//!
//! Results are written to stdout as JSON; logs go to stderr.

use anyhow::Context;
use clap::{Parser, Subcommand};
use graphdex::config::{generate_default_config, Config, ConfigSource, LoggingConfig};
use graphdex::query::{
    where_from_json, AggregateAst, AggregationEngine, QueryAst, QueryEngine,
};
use graphdex::storage::Store;
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "graphdex")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Query and aggregate an indexed knowledge graph")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Database file (overrides config and GRAPHDEX_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Config file (default: search standard locations)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pretty: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a node query
    Query {
        /// Query string, e.g. "find task where Status = Done"
        #[arg(required_unless_present = "json")]
        text: Option<String>,
        /// Query as JSON ({"find": ..., "where": ..., ...})
        #[arg(long, conflicts_with = "text")]
        json: Option<String>,
    },

    /// Count nodes grouped by fields or time periods
    Aggregate {
        /// Tag to aggregate, or "*"
        #[arg(long)]
        find: String,
        /// Comma-separated dimensions: field names or day|week|month|quarter|year
        #[arg(long)]
        group_by: String,
        /// Conditions as JSON (shorthand object or explicit list)
        #[arg(long = "where")]
        where_json: Option<String>,
        /// Keep only the N largest groups
        #[arg(long)]
        top: Option<i64>,
        /// Add percentages of the total
        #[arg(long)]
        percent: bool,
        /// Maximum number of groups
        #[arg(long)]
        limit: Option<i64>,
    },

    /// Count nodes carrying a tag
    Count {
        /// Tag name
        tag: String,
    },

    /// Create missing tables and indexes
    InitSchema,

    /// Print a default configuration file
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (config, source) = match &cli.config {
        Some(path) => (Config::load_with_env(path)?, ConfigSource::file(path)),
        None => Config::load_default_with_source(),
    };
    init_logging(&config.logging);
    source.log();

    if let Commands::Config = cli.command {
        print!("{}", generate_default_config());
        return Ok(());
    }

    let db_path = cli.db.clone().unwrap_or_else(|| config.database_path());
    tracing::debug!("Database: {:?}", db_path);
    let store = Arc::new(
        Store::open(&db_path).with_context(|| format!("opening database {:?}", db_path))?,
    );

    match cli.command {
        Commands::Query { text, json } => {
            let engine = QueryEngine::new(store);
            let result = match (text, json) {
                (_, Some(json)) => engine.execute(query_from_json(&json, &config)?).await?,
                (Some(text), None) => engine.execute_str(&text).await?,
                (None, None) => anyhow::bail!("a query string or --json is required"),
            };
            print_json(&result, cli.pretty)?;
        }

        Commands::Aggregate {
            find,
            group_by,
            where_json,
            top,
            percent,
            limit,
        } => {
            let mut ast = AggregateAst::new(find, AggregationEngine::parse_group_by(&group_by))
                .limit(limit.unwrap_or(config.query.default_aggregate_limit));
            if let Some(raw) = where_json {
                let value: Value = serde_json::from_str(&raw).context("parsing --where")?;
                ast.where_ = where_from_json(&value)?;
            }
            if let Some(n) = top {
                ast = ast.top(n);
            }
            if percent {
                ast = ast.with_percent();
            }

            let result = AggregationEngine::new(store).aggregate(ast).await?;
            print_json(&result, cli.pretty)?;
        }

        Commands::Count { tag } => {
            let total = AggregationEngine::new(store).count_only(&tag).await?;
            print_json(&serde_json::json!({ "tag": tag, "count": total }), cli.pretty)?;
        }

        Commands::InitSchema => {
            store.ensure_schema().await?;
            tracing::info!("Schema ready at {:?}", db_path);
            print_json(
                &serde_json::json!({ "initialized": db_path.display().to_string() }),
                cli.pretty,
            )?;
        }

        Commands::Config => {}
    }

    Ok(())
}

/// Build a query from JSON; an object `where` uses the shorthand rules
fn query_from_json(raw: &str, config: &Config) -> anyhow::Result<QueryAst> {
    let mut value: Value = serde_json::from_str(raw).context("parsing --json")?;

    let shorthand_where = match value.get("where") {
        Some(w @ Value::Object(_)) => Some(where_from_json(w)?),
        _ => None,
    };
    if let Some(map) = value.as_object_mut() {
        if shorthand_where.is_some() {
            map.remove("where");
        }
        map.entry("limit")
            .or_insert_with(|| Value::from(config.query.default_limit));
    }

    let mut ast: QueryAst = serde_json::from_value(value).context("invalid query")?;
    if let Some(entries) = shorthand_where {
        ast.where_ = entries;
    }
    Ok(ast)
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> anyhow::Result<()> {
    let out = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", out);
    Ok(())
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("graphdex={}", config.level)));
    let registry = tracing_subscriber::registry().with(filter);

    if config.format == "json" {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
