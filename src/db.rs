//! Database facade
//!
//! [`Database`] wires a block store, the graph engine, the transaction
//! manager and the query engine together from a [`DatabaseConfig`].
//!
//! On-disk layout of a durable database:
//! - `blocks/`: the block store (one file per block, or a RocksDB instance)
//! - `wal/`: write-ahead log segments
//! - `ROOT`: hex hash of the published root manifest

use crate::cancel::CancellationToken;
use crate::config::{ConfigError, DatabaseConfig, StorageConfig};
use crate::error::Result;
use crate::graph::{BlockStore, ContentHash, GraphEngine, GraphRead, GraphSnapshot, MemoryBlockStore};
use crate::persistence::{FileBlockStore, FileRootPointer, MemoryRootPointer, RootPointer, Wal};
use crate::query::{
    execute_plan, ExecContext, ExecutionResult, FunctionId, GraphAccess, LogicalPlan, Params, QueryEngine, QueryResult,
    Value,
};
use crate::transaction::{IsolationLevel, RecoveryReport, Transaction, TransactionManager};
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// One published graph version, as listed by [`Database::history`]
#[derive(Debug, Clone, PartialEq)]
pub struct CommitInfo {
    pub root: ContentHash,
    pub version: u64,
    pub committed_at: DateTime<Utc>,
    pub entity_count: u64,
    pub relationship_count: u64,
}

/// An open graph database
pub struct Database {
    config: DatabaseConfig,
    engine: Arc<GraphEngine>,
    manager: TransactionManager,
    queries: QueryEngine,
    recovery: RecoveryReport,
}

impl Database {
    /// Open (or create) a database and bring it in line with its WAL
    pub fn open(config: DatabaseConfig) -> Result<Self> {
        config.validate()?;

        let (store, root_pointer, mut wal): (Arc<dyn BlockStore>, Box<dyn RootPointer>, Wal) = match &config.storage {
            StorageConfig::Memory => (
                Arc::new(MemoryBlockStore::new()),
                Box::new(MemoryRootPointer::new()),
                Wal::in_memory(),
            ),
            StorageConfig::Directory { path } => {
                std::fs::create_dir_all(path).map_err(ConfigError::Io)?;
                (
                    Arc::new(FileBlockStore::open(path.join("blocks"))?),
                    Box::new(FileRootPointer::new(path.join("ROOT"))),
                    Wal::open(path.join("wal"))?,
                )
            }
            StorageConfig::RocksDb { path } => {
                std::fs::create_dir_all(path).map_err(ConfigError::Io)?;
                (
                    open_rocks_store(path)?,
                    Box::new(FileRootPointer::new(path.join("ROOT"))),
                    Wal::open(path.join("wal"))?,
                )
            }
        };
        wal.set_sync_mode(config.wal_sync);

        let engine = Arc::new(GraphEngine::open(store, root_pointer, config.engine_options())?);
        let manager = TransactionManager::new(engine.clone(), wal);
        let recovery = manager.recover()?;
        let queries = QueryEngine::new(config.plan_cache_capacity);

        let head = engine.head();
        info!(
            "Opened database ({:?}) at version {} ({})",
            config.storage,
            head.version,
            head.root.short()
        );
        Ok(Self {
            config,
            engine,
            manager,
            queries,
            recovery,
        })
    }

    /// Fresh database that lives only in memory
    pub fn in_memory() -> Result<Self> {
        Self::open(DatabaseConfig::default())
    }

    /// Open (or create) a durable database in `path` with default settings
    pub fn open_directory(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(DatabaseConfig::directory(path.as_ref()))
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<GraphEngine> {
        &self.engine
    }

    pub fn manager(&self) -> &TransactionManager {
        &self.manager
    }

    pub fn query_engine(&self) -> &QueryEngine {
        &self.queries
    }

    /// What recovery found when this database was opened
    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.recovery
    }

    /// Read-only view at `root`, or at the published root when `None`
    pub fn open_snapshot(&self, root: Option<ContentHash>) -> Result<GraphSnapshot> {
        Ok(self.engine.snapshot(root)?)
    }

    pub fn begin_transaction(&self, isolation: IsolationLevel) -> Result<Transaction> {
        Ok(self.manager.begin(isolation)?)
    }

    /// Begin a transaction at the configured default isolation
    pub fn begin(&self) -> Result<Transaction> {
        self.begin_transaction(self.config.default_isolation)
    }

    /// Validate and publish `tx`, returning the new root
    ///
    /// On conflict the transaction is already aborted; run it again from a
    /// fresh [`begin`](Self::begin).
    pub fn commit(&self, mut tx: Transaction) -> Result<ContentHash> {
        Ok(self.manager.commit(&mut tx)?)
    }

    pub fn abort(&self, mut tx: Transaction) -> Result<()> {
        Ok(self.manager.abort(&mut tx)?)
    }

    /// Compile `query` without running it
    pub fn compile(&self, query: &str) -> Result<Arc<LogicalPlan>> {
        Ok(self.queries.compile(query)?)
    }

    /// Run a query
    ///
    /// With `tx` the query reads and writes inside that transaction; a failing
    /// query leaves the transaction as it was before the call. Without `tx` a
    /// read-only query runs on the published root and an updating query runs
    /// in its own transaction that commits on success.
    pub fn execute(&self, query: &str, params: &Params, tx: Option<&mut Transaction>) -> Result<QueryResult> {
        self.execute_with_cancel(query, params, tx, &CancellationToken::new())
    }

    /// [`execute`](Self::execute) that stops with `Cancelled` once `cancel` fires
    pub fn execute_with_cancel(
        &self,
        query: &str,
        params: &Params,
        tx: Option<&mut Transaction>,
        cancel: &CancellationToken,
    ) -> Result<QueryResult> {
        let plan = self.queries.compile(query)?;

        match tx {
            Some(tx) => {
                let savepoint = (!plan.read_only).then(|| tx.savepoint());
                let result = self.run(&plan, GraphAccess::Transaction(&mut *tx), params, cancel);
                if result.is_err() {
                    if let Some(savepoint) = savepoint {
                        debug!("Query failed, rolling back its writes in transaction {}", tx.id());
                        tx.rollback_to(savepoint);
                    }
                }
                Ok(result?)
            }
            None if plan.read_only => {
                let snapshot = self.engine.snapshot(None)?;
                Ok(self.run(&plan, GraphAccess::Snapshot(&snapshot), params, cancel)?)
            }
            None => {
                let mut tx = self.manager.begin(self.config.default_isolation)?;
                match self.run(&plan, GraphAccess::Transaction(&mut tx), params, cancel) {
                    Ok(result) => {
                        let root = self.manager.commit(&mut tx)?;
                        debug!("Auto-committed transaction {} as {}", tx.id(), root.short());
                        Ok(result)
                    }
                    Err(err) => {
                        self.manager.abort(&mut tx)?;
                        Err(err.into())
                    }
                }
            }
        }
    }

    fn run(
        &self,
        plan: &LogicalPlan,
        graph: GraphAccess<'_>,
        params: &Params,
        cancel: &CancellationToken,
    ) -> ExecutionResult<QueryResult> {
        let functions = self.queries.functions();
        let mut ctx = ExecContext::new(
            graph,
            params,
            &functions,
            cancel,
            self.engine.options().max_variable_hops,
        );
        execute_plan(plan, &mut ctx)
    }

    /// Register a scalar function callable from queries
    pub fn register_function<F>(&self, name: &str, arity: usize, function: F) -> FunctionId
    where
        F: Fn(&dyn GraphRead, &[Value]) -> ExecutionResult<Value> + Send + Sync + 'static,
    {
        self.queries.register_function(name, arity, function)
    }

    /// Hash of the published root manifest
    pub fn head_root(&self) -> ContentHash {
        self.engine.head().root
    }

    pub fn version(&self) -> u64 {
        self.engine.head().version
    }

    /// Published versions, newest first, following manifest parent links
    pub fn history(&self) -> Result<Vec<CommitInfo>> {
        let mut commits = Vec::new();
        let mut current = Some(self.engine.snapshot(None)?);
        while let Some(snapshot) = current {
            let manifest = snapshot.manifest();
            commits.push(CommitInfo {
                root: snapshot.root_hash(),
                version: manifest.version,
                committed_at: manifest.committed_at(),
                entity_count: manifest.entity_count,
                relationship_count: manifest.relationship_count,
            });
            current = snapshot.parent()?;
        }
        Ok(commits)
    }

    /// Checkpoint the WAL at the published root, returning the checkpoint's sequence number
    pub fn checkpoint(&self) -> Result<u64> {
        let sequence = self.manager.checkpoint()?;
        info!("Checkpoint at WAL sequence {}", sequence);
        Ok(sequence)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let head = self.engine.head();
        f.debug_struct("Database")
            .field("storage", &self.config.storage)
            .field("version", &head.version)
            .field("root", &head.root)
            .finish()
    }
}

#[cfg(feature = "rocksdb")]
fn open_rocks_store(path: &Path) -> Result<Arc<dyn BlockStore>> {
    Ok(Arc::new(crate::persistence::RocksBlockStore::open(path.join("blocks"))?))
}

#[cfg(not(feature = "rocksdb"))]
fn open_rocks_store(_path: &Path) -> Result<Arc<dyn BlockStore>> {
    Err(ConfigError::Invalid {
        field: "storage.backend",
        message: "rocks_db requires building with the `rocksdb` feature".to_string(),
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_read_query_on_empty_database() {
        let db = Database::in_memory().unwrap();
        let result = db.execute("MATCH (n) RETURN count(*) AS c", &Params::new(), None).unwrap();
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0].get("c"), Some(&Value::Integer(0)));
        assert_eq!(db.version(), 0);
    }

    #[test]
    fn test_write_query_auto_commits() {
        let db = Database::in_memory().unwrap();
        let genesis = db.head_root();
        db.execute("CREATE (:Person {name: 'Alice'})", &Params::new(), None)
            .unwrap();
        assert_ne!(db.head_root(), genesis);
        assert_eq!(db.version(), 1);

        let history = db.history().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].version, 1);
        assert_eq!(history[0].entity_count, 1);
        assert_eq!(history[1].root, genesis);
    }

    #[test]
    fn test_failed_auto_commit_publishes_nothing() {
        let db = Database::in_memory().unwrap();
        let err = db
            .execute("CREATE (n:Person {age: 1 / 0}) RETURN n", &Params::new(), None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Runtime);
        assert_eq!(db.version(), 0);
        assert_eq!(db.manager().active_count(), 0);
    }

    #[test]
    fn test_failed_statement_keeps_earlier_writes() {
        let db = Database::in_memory().unwrap();
        let mut tx = db.begin().unwrap();
        db.execute("CREATE (:Person {name: 'Alice'})", &Params::new(), Some(&mut tx))
            .unwrap();
        let err = db
            .execute("CREATE (:Person {name: 'Bob', age: 1 / 0})", &Params::new(), Some(&mut tx))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Runtime);

        let result = db
            .execute("MATCH (p:Person) RETURN p.name AS name", &Params::new(), Some(&mut tx))
            .unwrap();
        assert_eq!(result.rows.len(), 1);
        db.commit(tx).unwrap();
        assert_eq!(db.open_snapshot(None).unwrap().entity_count(), 1);
    }

    #[test]
    fn test_old_roots_stay_readable() {
        let db = Database::in_memory().unwrap();
        db.execute("CREATE (:Item)", &Params::new(), None).unwrap();
        let first = db.head_root();
        db.execute("CREATE (:Item)", &Params::new(), None).unwrap();

        assert_eq!(db.open_snapshot(Some(first)).unwrap().entity_count(), 1);
        assert_eq!(db.open_snapshot(None).unwrap().entity_count(), 2);
    }

    #[test]
    fn test_rocksdb_backend_requires_feature() {
        if cfg!(feature = "rocksdb") {
            return;
        }
        let config = DatabaseConfig {
            storage: StorageConfig::RocksDb {
                path: std::env::temp_dir().join("blockgraph-rocks-disabled"),
            },
            ..DatabaseConfig::default()
        };
        let err = Database::open(config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }
}
