use anyhow::Context;
use blockgraph::{Database, DatabaseConfig, IsolationLevel, Params, QueryResult};
use tracing::info;

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    println!("Blockgraph v{}", blockgraph::version());
    println!("==========================================");
    println!();

    // An optional YAML config file selects durable storage
    let config = match std::env::args().nth(1) {
        Some(path) => DatabaseConfig::from_file(&path).with_context(|| format!("loading config {}", path))?,
        None => DatabaseConfig::default(),
    };
    let db = Database::open(config).context("opening database")?;
    info!("Database at version {}", db.version());

    demo_social_graph(&db)?;
    demo_transactions(&db)?;
    demo_history(&db)?;
    Ok(())
}

fn demo_social_graph(db: &Database) -> anyhow::Result<()> {
    println!("=== Demo 1: Social graph ===");
    db.execute(
        "CREATE (alice:Person {name: 'Alice', age: 30, city: 'New York'}), \
                (bob:Person {name: 'Bob', age: 25, city: 'San Francisco'}), \
                (charlie:Person {name: 'Charlie', age: 35, city: 'New York'}), \
                (alice)-[:KNOWS {since: 2019}]->(bob), \
                (bob)-[:KNOWS {since: 2021}]->(charlie)",
        &Params::new(),
        None,
    )?;
    println!("Created 3 people and 2 KNOWS relationships");

    let result = db.execute(
        "MATCH (a:Person)-[:KNOWS*1..2]->(b:Person) WHERE a.name = $name RETURN b.name AS reachable ORDER BY reachable",
        &Params::new().with("name", "Alice"),
        None,
    )?;
    print_result("Reachable from Alice", &result);

    let result = db.execute(
        "MATCH (p:Person) RETURN p.city AS city, count(*) AS people, avg(p.age) AS average_age ORDER BY city",
        &Params::new(),
        None,
    )?;
    print_result("People per city", &result);
    println!();
    Ok(())
}

fn demo_transactions(db: &Database) -> anyhow::Result<()> {
    println!("=== Demo 2: Optimistic transactions ===");
    let mut first = db.begin_transaction(IsolationLevel::Snapshot)?;
    let mut second = db.begin_transaction(IsolationLevel::Snapshot)?;

    db.execute(
        "MATCH (p:Person {name: 'Bob'}) SET p.age = 26",
        &Params::new(),
        Some(&mut first),
    )?;
    db.execute(
        "MATCH (p:Person {name: 'Bob'}) SET p.city = 'Boston'",
        &Params::new(),
        Some(&mut second),
    )?;

    let root = db.commit(first)?;
    println!("First transaction committed as {}", root.short());
    match db.commit(second) {
        Ok(root) => println!("Second transaction committed as {}", root.short()),
        Err(err) => println!("Second transaction rejected ({}): {}", err.kind(), err),
    }
    println!();
    Ok(())
}

fn demo_history(db: &Database) -> anyhow::Result<()> {
    println!("=== Demo 3: History ===");
    for commit in db.history()? {
        println!(
            "  v{} {} at {} ({} entities, {} relationships)",
            commit.version,
            commit.root.short(),
            commit.committed_at.to_rfc3339(),
            commit.entity_count,
            commit.relationship_count
        );
    }
    let sequence = db.checkpoint()?;
    println!("Checkpointed WAL at sequence {}", sequence);
    Ok(())
}

fn print_result(title: &str, result: &QueryResult) {
    println!("{}:", title);
    println!("  {}", result.columns.join(" | "));
    for row in &result.rows {
        let values: Vec<String> = row.values().map(|v| v.to_string()).collect();
        println!("  {}", values.join(" | "));
    }
}
