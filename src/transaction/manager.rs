use super::state::{ActiveSet, Transaction};
use super::{IsolationLevel, TransactionError, TransactionResult, TxState};
use crate::graph::{ContentHash, GraphEngine, GraphError, GraphId, GraphSnapshot, RelationshipChange};
use crate::persistence::{Wal, WalEntry};
use rustc_hash::FxHashSet;
use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// A published commit, kept while some open transaction may still conflict with it
struct CommittedTx {
    version: u64,
    tx_id: u64,
    write_set: FxHashSet<GraphId>,
    /// Write-set plus the endpoints of changed relationships
    touched: FxHashSet<GraphId>,
}

#[derive(Default)]
struct CommitLog {
    entries: VecDeque<CommittedTx>,
}

impl CommitLog {
    /// Ids of commits newer than `since` that overlap this transaction
    fn conflicts(&self, since: u64, writes: &FxHashSet<GraphId>, reads: &FxHashSet<GraphId>) -> Vec<GraphId> {
        let mut ids = BTreeSet::new();
        for entry in self.entries.iter().filter(|e| e.version > since) {
            ids.extend(entry.write_set.intersection(writes).copied());
            ids.extend(entry.touched.intersection(reads).copied());
            if !ids.is_empty() {
                debug!("Transaction conflicts with committed transaction {}", entry.tx_id);
            }
        }
        ids.into_iter().collect()
    }

    /// Forget commits no open transaction can conflict with
    fn prune(&mut self, oldest_active: Option<u64>) {
        match oldest_active {
            Some(version) => {
                while self.entries.front().is_some_and(|e| e.version <= version) {
                    self.entries.pop_front();
                }
            }
            None => self.entries.clear(),
        }
    }
}

/// Outcome of WAL recovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Root defined by the last settled WAL record, if any
    pub committed_root: Option<ContentHash>,
    /// Whether the published root had to be moved forward
    pub rolled_forward: bool,
    /// Transactions that logged an intent but never committed
    pub aborted_intents: Vec<u64>,
    /// Number of WAL records replayed
    pub replayed: u64,
    /// Published version after recovery
    pub version: u64,
}

/// Coordinates begin, validation, commit and recovery
pub struct TransactionManager {
    engine: Arc<GraphEngine>,
    wal: Mutex<Wal>,
    log: Mutex<CommitLog>,
    active: ActiveSet,
    next_tx_id: AtomicU64,
}

impl TransactionManager {
    pub fn new(engine: Arc<GraphEngine>, wal: Wal) -> Self {
        Self {
            engine,
            wal: Mutex::new(wal),
            log: Mutex::new(CommitLog::default()),
            active: ActiveSet::default(),
            next_tx_id: AtomicU64::new(1),
        }
    }

    pub fn engine(&self) -> &Arc<GraphEngine> {
        &self.engine
    }

    /// Number of transactions currently open
    pub fn active_count(&self) -> usize {
        self.active.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Open a transaction on the current published root
    pub fn begin(&self, isolation: IsolationLevel) -> TransactionResult<Transaction> {
        let id = self.next_tx_id.fetch_add(1, Ordering::Relaxed);
        // Register under the log lock so pruning never drops a commit this transaction needs
        let log = self.lock_log();
        let snapshot = self.engine.snapshot(None)?;
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, snapshot.version());
        drop(log);

        debug!(
            "Began transaction {} ({:?}) at version {}",
            id,
            isolation,
            snapshot.version()
        );
        Ok(Transaction::new(
            id,
            isolation,
            snapshot,
            self.engine.clone(),
            self.active.clone(),
        ))
    }

    /// Abort an active transaction, discarding its writes
    pub fn abort(&self, tx: &mut Transaction) -> TransactionResult<()> {
        tx.ensure_active()?;
        tx.finish(TxState::Aborted);
        debug!("Aborted transaction {}", tx.id());
        Ok(())
    }

    /// Validate and publish a transaction's writes, returning the new root
    ///
    /// On `Conflict` the transaction is aborted; the caller decides whether to retry.
    pub fn commit(&self, tx: &mut Transaction) -> TransactionResult<ContentHash> {
        tx.ensure_active()?;
        tx.state = TxState::Committing;
        let result = self.commit_inner(tx);
        tx.finish(if result.is_ok() {
            TxState::Committed
        } else {
            TxState::Aborted
        });
        result
    }

    fn commit_inner(&self, tx: &Transaction) -> TransactionResult<ContentHash> {
        if tx.diff().is_empty() {
            debug!("Transaction {} has no writes", tx.id());
            return Ok(tx.snapshot().root_hash());
        }

        let write_set = tx.write_set();
        let head = self.engine.head();
        let base = self.engine.snapshot(Some(head.root))?;
        let candidate = self.build_candidate(tx, &base)?;
        self.append(WalEntry::Intent {
            tx_id: tx.id(),
            base_version: head.version,
            write_set: write_set.clone(),
            candidate_root: candidate,
        })?;

        match self.validate_and_publish(tx, &write_set, head.version, candidate) {
            Ok(root) => Ok(root),
            Err(e) => {
                if let Err(wal_error) = self.append(WalEntry::Abort {
                    tx_id: tx.id(),
                    reason: e.to_string(),
                }) {
                    warn!("Could not log abort of transaction {}: {}", tx.id(), wal_error);
                }
                Err(e)
            }
        }
    }

    fn validate_and_publish(
        &self,
        tx: &Transaction,
        write_set: &[GraphId],
        mut base_version: u64,
        mut candidate: ContentHash,
    ) -> TransactionResult<ContentHash> {
        let mut log = self.lock_log();

        let writes: FxHashSet<GraphId> = write_set.iter().copied().collect();
        let reads: FxHashSet<GraphId> = match tx.isolation() {
            IsolationLevel::Snapshot => FxHashSet::default(),
            IsolationLevel::Serializable => tx.read_set().into_iter().collect(),
        };
        let ids = log.conflicts(tx.base_version(), &writes, &reads);
        if !ids.is_empty() {
            warn!("Transaction {} conflicts on {} ids", tx.id(), ids.len());
            return Err(TransactionError::Conflict { tx_id: tx.id(), ids });
        }

        // Non-conflicting commits landed since the candidate was built: rebase
        let head = self.engine.head();
        if head.version != base_version {
            debug!(
                "Rebuilding transaction {} on version {} (was {})",
                tx.id(),
                head.version,
                base_version
            );
            self.append(WalEntry::Abort {
                tx_id: tx.id(),
                reason: "rebased on newer head".to_string(),
            })?;
            let base = self.engine.snapshot(Some(head.root))?;
            candidate = self.build_candidate(tx, &base)?;
            base_version = head.version;
            self.append(WalEntry::Intent {
                tx_id: tx.id(),
                base_version,
                write_set: write_set.to_vec(),
                candidate_root: candidate,
            })?;
        }

        let version = base_version + 1;
        self.append(WalEntry::Commit {
            tx_id: tx.id(),
            root: candidate,
            version,
        })?;
        if !self.engine.compare_and_publish(base_version, candidate)? {
            return Err(TransactionError::Conflict {
                tx_id: tx.id(),
                ids: write_set.to_vec(),
            });
        }

        let touched = touched_ids(tx, &writes);
        log.entries.push_back(CommittedTx {
            version,
            tx_id: tx.id(),
            write_set: writes,
            touched,
        });
        log.prune(self.oldest_active(tx.id()));

        info!(
            "Committed transaction {} at version {} (root {})",
            tx.id(),
            version,
            candidate.short()
        );
        Ok(candidate)
    }

    /// Build blocks for the transaction on `base`; broken endpoints mean a concurrent delete won
    fn build_candidate(&self, tx: &Transaction, base: &GraphSnapshot) -> TransactionResult<ContentHash> {
        match self.engine.build_root(base, tx.diff()) {
            Ok(root) => Ok(root),
            Err(GraphError::DanglingRelationship { relationship, entity }) => {
                warn!(
                    "Transaction {}: relationship {} lost endpoint {} to a concurrent commit",
                    tx.id(),
                    relationship,
                    entity
                );
                Err(TransactionError::Conflict {
                    tx_id: tx.id(),
                    ids: vec![GraphId::Entity(entity), GraphId::Relationship(relationship)],
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Oldest begin version among open transactions other than `except`
    fn oldest_active(&self, except: u64) -> Option<u64> {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(id, _)| **id != except)
            .map(|(_, version)| *version)
            .min()
    }

    /// Bring the published root in line with the WAL and settle dangling intents
    ///
    /// Safe to run repeatedly; the second run finds only the checkpoint it left.
    pub fn recover(&self) -> TransactionResult<RecoveryReport> {
        let _log = self.lock_log();
        let mut wal = self.wal.lock().unwrap_or_else(|e| e.into_inner());

        let mut committed: Vec<(u64, ContentHash, u64)> = Vec::new();
        let mut checkpoint: Option<(ContentHash, u64)> = None;
        let mut pending: BTreeSet<u64> = BTreeSet::new();
        let mut replayed = 0u64;
        let mut max_tx_id = 0u64;

        wal.replay(0, |_, entry| {
            replayed += 1;
            match entry {
                WalEntry::Intent { tx_id, .. } => {
                    max_tx_id = max_tx_id.max(*tx_id);
                    pending.insert(*tx_id);
                }
                WalEntry::Commit { tx_id, root, version } => {
                    pending.remove(tx_id);
                    committed.push((*tx_id, *root, *version));
                }
                WalEntry::Abort { tx_id, .. } => {
                    pending.remove(tx_id);
                    committed.retain(|(id, _, _)| id != tx_id);
                }
                WalEntry::Checkpoint { root, version, .. } => {
                    committed.clear();
                    pending.clear();
                    checkpoint = Some((*root, *version));
                }
            }
            Ok(())
        })?;

        self.next_tx_id.fetch_max(max_tx_id + 1, Ordering::Relaxed);

        let committed_root = committed
            .last()
            .map(|(_, root, version)| (*root, *version))
            .or(checkpoint);

        let mut rolled_forward = false;
        let mut head = self.engine.head();
        if let Some((root, version)) = committed_root {
            if version > head.version && root != head.root {
                info!(
                    "Rolling root forward from version {} to {} ({})",
                    head.version,
                    version,
                    root.short()
                );
                head = self.engine.publish(root)?;
                rolled_forward = true;
            }
        }

        for tx_id in &pending {
            warn!("Transaction {} logged an intent without a commit, aborting", tx_id);
            wal.append(WalEntry::Abort {
                tx_id: *tx_id,
                reason: "no commit record at recovery".to_string(),
            })?;
        }

        wal.checkpoint(head.root, head.version)?;

        info!(
            "Recovery complete: {} records replayed, {} intents aborted, version {}",
            replayed,
            pending.len(),
            head.version
        );
        Ok(RecoveryReport {
            committed_root: committed_root.map(|(root, _)| root),
            rolled_forward,
            aborted_intents: pending.into_iter().collect(),
            replayed,
            version: head.version,
        })
    }

    /// Write a checkpoint for the published root and drop older WAL segments
    pub fn checkpoint(&self) -> TransactionResult<u64> {
        let _log = self.lock_log();
        let head = self.engine.head();
        let sequence = self
            .wal
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .checkpoint(head.root, head.version)?;
        Ok(sequence)
    }

    fn append(&self, entry: WalEntry) -> TransactionResult<u64> {
        let mut wal = self.wal.lock().unwrap_or_else(|e| e.into_inner());
        Ok(wal.append(entry)?)
    }

    fn lock_log(&self) -> MutexGuard<'_, CommitLog> {
        self.log.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Write-set plus relationship endpoints, used against serializable read-sets
fn touched_ids(tx: &Transaction, writes: &FxHashSet<GraphId>) -> FxHashSet<GraphId> {
    let mut touched = writes.clone();
    for (_, change) in tx.diff().relationships() {
        let rel = match change {
            RelationshipChange::Created(rel) | RelationshipChange::Updated(rel) | RelationshipChange::Deleted(rel) => {
                rel
            }
        };
        touched.insert(GraphId::Entity(rel.start));
        touched.insert(GraphId::Entity(rel.end));
    }
    touched
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{EngineOptions, EntityId, GraphRead, Label, MemoryBlockStore, PropertyMap, PropertyPatch};
    use crate::persistence::MemoryRootPointer;

    fn manager() -> TransactionManager {
        let engine = GraphEngine::open(
            Arc::new(MemoryBlockStore::new()),
            Box::new(MemoryRootPointer::new()),
            EngineOptions::default(),
        )
        .unwrap();
        TransactionManager::new(Arc::new(engine), Wal::in_memory())
    }

    fn seed(manager: &TransactionManager) -> EntityId {
        let mut tx = manager.begin(IsolationLevel::Snapshot).unwrap();
        let id = tx.create_entity(vec![Label::new("Account")], PropertyMap::new()).unwrap();
        manager.commit(&mut tx).unwrap();
        id
    }

    fn patch(key: &str, value: i64) -> PropertyPatch {
        let mut patch = PropertyPatch::new();
        patch.insert(key.to_string(), value.into());
        patch
    }

    #[test]
    fn test_commit_publishes() {
        let manager = manager();
        let id = seed(&manager);
        assert_eq!(manager.engine().head().version, 1);
        assert!(manager.engine().snapshot(None).unwrap().entity(id).unwrap().is_some());
        assert_eq!(manager.active_count(), 0);
    }

    #[test]
    fn test_write_write_conflict() {
        let manager = manager();
        let id = seed(&manager);

        let mut t1 = manager.begin(IsolationLevel::Snapshot).unwrap();
        let mut t2 = manager.begin(IsolationLevel::Snapshot).unwrap();
        t1.set_properties(GraphId::Entity(id), &patch("balance", 1)).unwrap();
        t2.set_properties(GraphId::Entity(id), &patch("balance", 2)).unwrap();

        manager.commit(&mut t1).unwrap();
        let err = manager.commit(&mut t2).unwrap_err();
        assert!(matches!(err, TransactionError::Conflict { ref ids, .. } if ids == &vec![GraphId::Entity(id)]));
        assert_eq!(t2.state(), TxState::Aborted);

        let snapshot = manager.engine().snapshot(None).unwrap();
        assert_eq!(
            snapshot.get_entity(id).unwrap().get_property("balance"),
            Some(&1i64.into())
        );
    }

    #[test]
    fn test_disjoint_commits_rebase() {
        let manager = manager();
        let a = seed(&manager);
        let b = seed(&manager);

        let mut t1 = manager.begin(IsolationLevel::Snapshot).unwrap();
        let mut t2 = manager.begin(IsolationLevel::Snapshot).unwrap();
        t1.set_properties(GraphId::Entity(a), &patch("x", 1)).unwrap();
        t2.set_properties(GraphId::Entity(b), &patch("y", 2)).unwrap();
        manager.commit(&mut t1).unwrap();
        manager.commit(&mut t2).unwrap();

        let snapshot = manager.engine().snapshot(None).unwrap();
        assert_eq!(snapshot.version(), 4);
        assert!(snapshot.get_entity(a).unwrap().get_property("x").is_some());
        assert!(snapshot.get_entity(b).unwrap().get_property("y").is_some());
    }

    #[test]
    fn test_serializable_read_write_conflict() {
        let manager = manager();
        let a = seed(&manager);
        let b = seed(&manager);

        // Write skew: each reads one account and writes the other
        let mut t1 = manager.begin(IsolationLevel::Serializable).unwrap();
        let mut t2 = manager.begin(IsolationLevel::Serializable).unwrap();
        t1.entity(a).unwrap();
        t1.set_properties(GraphId::Entity(b), &patch("v", 1)).unwrap();
        t2.entity(b).unwrap();
        t2.set_properties(GraphId::Entity(a), &patch("v", 2)).unwrap();

        manager.commit(&mut t1).unwrap();
        assert!(matches!(manager.commit(&mut t2), Err(TransactionError::Conflict { .. })));
    }

    #[test]
    fn test_snapshot_isolation_allows_write_skew() {
        let manager = manager();
        let a = seed(&manager);
        let b = seed(&manager);

        let mut t1 = manager.begin(IsolationLevel::Snapshot).unwrap();
        let mut t2 = manager.begin(IsolationLevel::Snapshot).unwrap();
        t1.entity(a).unwrap();
        t1.set_properties(GraphId::Entity(b), &patch("v", 1)).unwrap();
        t2.entity(b).unwrap();
        t2.set_properties(GraphId::Entity(a), &patch("v", 2)).unwrap();

        manager.commit(&mut t1).unwrap();
        manager.commit(&mut t2).unwrap();
    }

    #[test]
    fn test_concurrent_delete_and_new_relationship_conflict() {
        let manager = manager();
        let a = seed(&manager);
        let b = seed(&manager);

        let mut deleter = manager.begin(IsolationLevel::Snapshot).unwrap();
        let mut linker = manager.begin(IsolationLevel::Snapshot).unwrap();
        deleter.delete_entity(b, false).unwrap();
        linker.create_relationship("OWES", a, b, PropertyMap::new()).unwrap();

        manager.commit(&mut deleter).unwrap();
        let err = manager.commit(&mut linker).unwrap_err();
        assert!(matches!(err, TransactionError::Conflict { ref ids, .. } if ids.contains(&GraphId::Entity(b))));
    }

    #[test]
    fn test_finished_transaction_is_not_active() {
        let manager = manager();
        let mut tx = manager.begin(IsolationLevel::Snapshot).unwrap();
        manager.abort(&mut tx).unwrap();
        assert!(matches!(
            tx.create_entity(vec![], PropertyMap::new()),
            Err(TransactionError::NotActive { state: TxState::Aborted, .. })
        ));
        assert!(matches!(manager.commit(&mut tx), Err(TransactionError::NotActive { .. })));
    }

    #[test]
    fn test_empty_commit_returns_base_root() {
        let manager = manager();
        let head = manager.engine().head();
        let mut tx = manager.begin(IsolationLevel::Snapshot).unwrap();
        assert_eq!(manager.commit(&mut tx).unwrap(), head.root);
        assert_eq!(manager.engine().head(), head);
    }

    #[test]
    fn test_dropped_transaction_leaves_active_set() {
        let manager = manager();
        {
            let _tx = manager.begin(IsolationLevel::Snapshot).unwrap();
            assert_eq!(manager.active_count(), 1);
        }
        assert_eq!(manager.active_count(), 0);
    }

    #[test]
    fn test_recover_is_idempotent() {
        let manager = manager();
        seed(&manager);
        let first = manager.recover().unwrap();
        assert!(!first.rolled_forward);
        assert_eq!(first.version, 1);

        let second = manager.recover().unwrap();
        assert_eq!(second.replayed, 1);
        assert_eq!(second.committed_root, Some(manager.engine().head().root));
        assert!(second.aborted_intents.is_empty());
    }
}
