//! Benchmarks for query parsing, compilation and execution
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use graphdex::query::*;
use graphdex::storage::Store;
use serde_json::json;
use std::sync::Arc;

const QUERY: &str = "find task where Status = Active and created > 30d \
     and (Priority = High or Priority = Urgent) and not Owner is empty \
     order by -updated limit 50 select Status, Priority";

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse");

    group.bench_function("query_string", |b| {
        b.iter(|| parse_query(black_box(QUERY)).unwrap())
    });

    let shorthand = json!({
        "Status": ["Active", "Blocked"],
        "created": ">=2024-01-01",
        "name": "~review",
        "Priority": {"exists": true},
        "or": [{"Owner": "kim"}, {"parent.tags": "project"}]
    });
    group.bench_function("shorthand_json", |b| {
        b.iter(|| where_from_json(black_box(&shorthand)).unwrap())
    });

    group.finish();
}

fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile");

    for clauses in [1, 10, 50] {
        let ast = (0..clauses).fold(QueryAst::find("task"), |ast, i| {
            ast.filter(WhereClause::eq(format!("Field{}", i), "value"))
        });

        group.throughput(Throughput::Elements(clauses as u64));
        group.bench_function(format!("build_query_{}", clauses), |b| {
            b.iter(|| build_query(black_box(&ast)).unwrap())
        });
    }

    let nested = WhereGroup::or(
        (0..8)
            .map(|i| {
                WhereGroup::and(vec![
                    WhereClause::eq("Status", format!("S{}", i)).into(),
                    WhereClause::eq("parent.tags", "project").negate().into(),
                ])
                .into()
            })
            .collect(),
    );
    let entries: Vec<WhereEntry> = vec![nested.into()];
    group.bench_function("nested_groups", |b| {
        b.iter(|| WhereCompiler::new().compile_all(black_box(&entries)).unwrap())
    });

    group.finish();
}

fn bench_execute(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = Arc::new(Store::open_in_memory().unwrap());

    rt.block_on(async {
        store.ensure_schema().await.unwrap();
        let conn = store.lock().await;
        for i in 0..5000i64 {
            let id = format!("n{}", i);
            conn.execute(
                "INSERT INTO nodes (id, name, created, updated) VALUES (?1, ?2, ?3, ?3)",
                rusqlite::params![id, format!("Node {}", i), 1_700_000_000_000 + i * 60_000],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO tag_applications (data_node_id, tag_id, tag_name) VALUES (?1, 't', 'task')",
                rusqlite::params![id],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO field_values (tuple_id, parent_id, field_def_id, field_name, value_text, value_order, created)
                 VALUES (?1, ?2, 'status', 'Status', ?3, 0, 0)",
                rusqlite::params![format!("fv{}", i), id, ["Active", "Done", "Blocked"][(i % 3) as usize]],
            )
            .unwrap();
        }
    });

    let engine = QueryEngine::new(Arc::clone(&store));
    let aggregation = AggregationEngine::new(store);

    let mut group = c.benchmark_group("execute");

    group.bench_function("query_by_field", |b| {
        b.iter(|| {
            rt.block_on(engine.execute(
                QueryAst::find("task")
                    .filter(WhereClause::eq("Status", "Done"))
                    .limit(100),
            ))
            .unwrap()
        })
    });

    group.bench_function("aggregate_status_month", |b| {
        b.iter(|| {
            rt.block_on(aggregation.aggregate(AggregateAst::new(
                "task",
                AggregationEngine::parse_group_by("Status,month"),
            )))
            .unwrap()
        })
    });

    group.finish();
}

criterion_group!(benches, bench_parse, bench_compile, bench_execute);
criterion_main!(benches);
