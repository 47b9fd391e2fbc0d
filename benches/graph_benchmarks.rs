use blockgraph::query::parse_query;
use blockgraph::{Database, DatabaseConfig, Label, Params, PropertyMap, PropertyValue};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

fn person(i: usize) -> PropertyMap {
    let mut properties = PropertyMap::new();
    properties.insert("name".to_string(), PropertyValue::from(format!("Person{}", i)));
    properties.insert("age".to_string(), PropertyValue::from((i % 100) as i64));
    properties
}

/// Database with `size` people in a single commit
fn people(size: usize) -> Database {
    let db = Database::in_memory().unwrap();
    let mut tx = db.begin().unwrap();
    for i in 0..size {
        tx.create_entity(vec![Label::new("Person")], person(i)).unwrap();
    }
    db.commit(tx).unwrap();
    db
}

/// Benchmark entity insertion plus commit
fn bench_entity_insertion(c: &mut Criterion) {
    let mut group = c.benchmark_group("entity_insertion");

    for size in [100, 1000, 10_000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| criterion::black_box(people(size).head_root()));
        });
    }
    group.finish();
}

/// Benchmark small commits on a growing graph; only touched index pages are rewritten
fn bench_incremental_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("incremental_commit");

    for size in [1000, 10_000].iter() {
        let db = people(*size);
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                db.execute("CREATE (:Person {name: 'New', age: 1})", &Params::new(), None)
                    .unwrap();
            });
        });
    }
    group.finish();
}

/// Benchmark label scan performance
fn bench_label_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("label_scan");

    for size in [100, 1000, 10_000].iter() {
        let db = people(*size);
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let result = db
                    .execute("MATCH (n:Person) RETURN count(*) AS c", &Params::new(), None)
                    .unwrap();
                criterion::black_box(result.len());
            });
        });
    }
    group.finish();
}

/// Benchmark multi-hop traversal latency
fn bench_traversal(c: &mut Criterion) {
    let mut group = c.benchmark_group("traversal");

    // Create a chain: n0 -> n1 -> n2 -> ... -> n99
    let db = Database::in_memory().unwrap();
    let mut tx = db.begin().unwrap();
    let mut ids = Vec::new();
    for i in 0..100 {
        ids.push(tx.create_entity(vec![Label::new("Person")], person(i)).unwrap());
    }
    for pair in ids.windows(2) {
        tx.create_relationship("KNOWS", pair[0], pair[1], PropertyMap::new())
            .unwrap();
    }
    db.commit(tx).unwrap();

    group.bench_function("1_hop", |b| {
        b.iter(|| {
            let result = db
                .execute(
                    "MATCH (a:Person)-[:KNOWS]->(b:Person) RETURN b.name",
                    &Params::new(),
                    None,
                )
                .unwrap();
            criterion::black_box(result.len());
        });
    });

    group.bench_function("2_hop", |b| {
        b.iter(|| {
            let result = db
                .execute(
                    "MATCH (a:Person)-[:KNOWS]->(b:Person)-[:KNOWS]->(c:Person) RETURN c.name",
                    &Params::new(),
                    None,
                )
                .unwrap();
            criterion::black_box(result.len());
        });
    });

    group.bench_function("variable_length", |b| {
        b.iter(|| {
            let result = db
                .execute(
                    "MATCH (a:Person {name: 'Person0'})-[:KNOWS*1..10]->(b) RETURN b.name",
                    &Params::new(),
                    None,
                )
                .unwrap();
            criterion::black_box(result.len());
        });
    });

    group.finish();
}

/// Benchmark WHERE clause filtering speed
fn bench_where_filter(c: &mut Criterion) {
    let mut group = c.benchmark_group("where_filter");
    let db = people(1000);

    for (name, query) in [
        ("equality", "MATCH (n:Person) WHERE n.age = 25 RETURN n.name"),
        ("comparison", "MATCH (n:Person) WHERE n.age > 50 RETURN n.name"),
        ("compound", "MATCH (n:Person) WHERE n.age > 20 AND n.age < 40 RETURN n.name"),
    ] {
        group.bench_function(name, |b| {
            b.iter(|| {
                let result = db.execute(query, &Params::new(), None).unwrap();
                criterion::black_box(result.len());
            });
        });
    }

    group.finish();
}

/// Benchmark Cypher parse time
fn bench_cypher_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("cypher_parse");

    group.bench_function("simple_match", |b| {
        b.iter(|| {
            criterion::black_box(parse_query("MATCH (n:Person) RETURN n").unwrap());
        });
    });

    group.bench_function("multi_hop", |b| {
        b.iter(|| {
            criterion::black_box(
                parse_query(
                    "MATCH (a:Person)-[:KNOWS]->(b:Person)-[:WORKS_AT]->(c:Company) WHERE a.age > 25 RETURN a.name, b.name, c.name",
                )
                .unwrap(),
            );
        });
    });

    group.bench_function("aggregation", |b| {
        b.iter(|| {
            criterion::black_box(
                parse_query("MATCH (n:Person) RETURN n.dept, count(n), avg(n.age) ORDER BY count(n) DESC LIMIT 10")
                    .unwrap(),
            );
        });
    });

    group.finish();
}

/// Benchmark full compilation with and without the plan cache
fn bench_plan_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan_cache");
    let query = "MATCH (a:Person)-[:KNOWS]->(b:Person) WHERE a.age > 25 RETURN b.name, count(*) ORDER BY b.name";

    for capacity in [0, 256] {
        let db = Database::open(DatabaseConfig {
            plan_cache_capacity: capacity,
            ..DatabaseConfig::default()
        })
        .unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(capacity), &capacity, |b, _| {
            b.iter(|| criterion::black_box(db.compile(query).unwrap()));
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_entity_insertion,
    bench_incremental_commit,
    bench_label_scan,
    bench_traversal,
    bench_where_filter,
    bench_cypher_parse,
    bench_plan_cache,
);
criterion_main!(benches);
