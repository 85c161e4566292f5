//! Transaction Manager - lifecycle coordination for MVCC transactions
//!
//! Allocates TIDs and commit CIDs, hands out snapshot CIDs, and drives the
//! commit protocol. Commit publication is ordered: `last_cid` only advances
//! over a contiguous prefix of finished commits, so a reader never observes
//! transaction N+1 without transaction N.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};

use crate::{Result, StrataError};

use super::context::{TransactionContext, TransactionPhase};
use super::{Cid, Tid, MAX_CID};

static TRANSACTION_MANAGER: Lazy<TransactionManager> = Lazy::new(TransactionManager::new);

/// Get the global transaction manager
pub fn transaction_manager() -> &'static TransactionManager {
    &TRANSACTION_MANAGER
}

/// Central transaction manager.
///
/// Protocol:
/// 1. `new_transaction_context`: fresh TID, snapshot at the published CID
/// 2. operators stamp write intents while the transaction is Active
/// 3. `prepare_commit`: reserve the next commit CID (unpublished)
/// 4. `commit` (via the CommitRecords operator): stamp the change sets,
///    then publish in CID order
/// 5. `abort`: revert intents and tombstone uncommitted inserts
pub struct TransactionManager {
    next_tid: AtomicU64,
    /// Highest CID whose transaction (and all before it) is fully visible.
    last_cid: AtomicU64,
    /// Reservation counter for commit CIDs.
    next_cid: AtomicU64,
    /// Active transactions: tid → context
    active: RwLock<HashMap<Tid, Arc<TransactionContext>>>,
    /// Reserved commit CIDs → finished flag, for ordered publication.
    pending_commits: Mutex<BTreeMap<Cid, bool>>,
}

impl TransactionManager {
    /// Create a standalone manager (tests; the process normally uses
    /// [`transaction_manager`]).
    pub fn new() -> Self {
        Self {
            next_tid: AtomicU64::new(1),
            last_cid: AtomicU64::new(0),
            next_cid: AtomicU64::new(0),
            active: RwLock::new(HashMap::new()),
            pending_commits: Mutex::new(BTreeMap::new()),
        }
    }

    /// The currently published commit horizon.
    pub fn last_cid(&self) -> Cid {
        self.last_cid.load(Ordering::Acquire)
    }

    pub fn active_count(&self) -> usize {
        self.active.read().len()
    }

    /// Begin a transaction: fresh TID, snapshot at the published horizon.
    pub fn new_transaction_context(&self) -> Arc<TransactionContext> {
        let tid = self.next_tid.fetch_add(1, Ordering::SeqCst);
        let snapshot_cid = self.last_cid();
        let ctx = Arc::new(TransactionContext::new(tid, snapshot_cid));
        self.active.write().insert(tid, Arc::clone(&ctx));
        ctx
    }

    /// Transition to Committing and reserve the commit CID. The CID is not
    /// published until the commit finishes.
    pub fn prepare_commit(&self, ctx: &TransactionContext) -> Result<Cid> {
        if !ctx.transition(TransactionPhase::Active, TransactionPhase::Committing) {
            return Err(StrataError::TransactionNotActive {
                tid: ctx.tid(),
                reason: format!("cannot prepare commit from phase {:?}", ctx.phase()),
            });
        }
        let cid = self.next_cid.fetch_add(1, Ordering::SeqCst) + 1;
        ctx.set_commit_cid(cid);
        self.pending_commits.lock().insert(cid, false);
        Ok(cid)
    }

    /// Stamp the change sets with the reserved commit CID and publish.
    ///
    /// Stamping happens before publication: `begin_cid`/`end_cid` release
    /// stores are visible to any reader whose snapshot includes the new
    /// `last_cid`. Intents are cleared last.
    pub fn commit(&self, ctx: &TransactionContext) -> Result<Cid> {
        let commit_cid = ctx.commit_cid().ok_or_else(|| StrataError::TransactionNotActive {
            tid: ctx.tid(),
            reason: "commit without prepare_commit".to_string(),
        })?;
        if ctx.phase() != TransactionPhase::Committing {
            return Err(StrataError::TransactionNotActive {
                tid: ctx.tid(),
                reason: format!("cannot commit from phase {:?}", ctx.phase()),
            });
        }

        for (table, row_id) in ctx.deleted_rows() {
            let chunk = table.get_chunk(row_id.chunk_id);
            if let Some(mvcc) = chunk.mvcc() {
                mvcc.set_end_cid(row_id.chunk_offset, commit_cid);
            }
        }
        for (table, row_id) in ctx.inserted_rows() {
            let chunk = table.get_chunk(row_id.chunk_id);
            if let Some(mvcc) = chunk.mvcc() {
                mvcc.set_begin_cid(row_id.chunk_offset, commit_cid);
            }
        }

        self.finish_pending(commit_cid);
        ctx.transition(TransactionPhase::Committing, TransactionPhase::Committed);

        for (table, row_id) in ctx.deleted_rows().into_iter().chain(ctx.inserted_rows()) {
            let chunk = table.get_chunk(row_id.chunk_id);
            if let Some(mvcc) = chunk.mvcc() {
                mvcc.release_intent(row_id.chunk_offset, ctx.tid());
            }
        }

        self.active.write().remove(&ctx.tid());
        log::debug!("transaction {} committed at cid {}", ctx.tid(), commit_cid);
        Ok(commit_cid)
    }

    /// Mark a reserved CID finished and advance `last_cid` over the
    /// contiguous finished prefix.
    fn finish_pending(&self, cid: Cid) {
        let mut pending = self.pending_commits.lock();
        pending.insert(cid, true);
        while let Some((&lowest, &done)) = pending.iter().next() {
            if !done {
                break;
            }
            pending.remove(&lowest);
            self.last_cid.store(lowest, Ordering::Release);
        }
    }

    /// Abort an Active transaction: tombstone its inserts (`end_cid = 0`),
    /// restore its deletes (`end_cid = ∞`) and clear its intents.
    pub fn abort(&self, ctx: &TransactionContext) -> Result<()> {
        if !ctx.transition(TransactionPhase::Active, TransactionPhase::Aborted) {
            return Err(StrataError::TransactionNotActive {
                tid: ctx.tid(),
                reason: format!("cannot abort from phase {:?}", ctx.phase()),
            });
        }

        for (table, row_id) in ctx.inserted_rows() {
            let chunk = table.get_chunk(row_id.chunk_id);
            if let Some(mvcc) = chunk.mvcc() {
                mvcc.set_end_cid(row_id.chunk_offset, 0);
                mvcc.release_intent(row_id.chunk_offset, ctx.tid());
            }
        }
        for (table, row_id) in ctx.deleted_rows() {
            let chunk = table.get_chunk(row_id.chunk_id);
            if let Some(mvcc) = chunk.mvcc() {
                mvcc.set_end_cid(row_id.chunk_offset, MAX_CID);
                mvcc.release_intent(row_id.chunk_offset, ctx.tid());
            }
        }

        self.active.write().remove(&ctx.tid());
        log::debug!("transaction {} aborted", ctx.tid());
        Ok(())
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DataType, Value};
    use crate::storage::Table;

    fn make_table() -> Arc<Table> {
        let table = Table::new(8);
        table.add_column_definition("x", DataType::Int32).unwrap();
        Arc::new(table)
    }

    #[test]
    fn test_snapshot_follows_commits() {
        let manager = TransactionManager::new();
        assert_eq!(manager.last_cid(), 0);

        let t1 = manager.new_transaction_context();
        assert_eq!(t1.snapshot_cid(), 0);

        manager.prepare_commit(&t1).unwrap();
        let cid = manager.commit(&t1).unwrap();
        assert_eq!(cid, 1);
        assert_eq!(manager.last_cid(), 1);

        let t2 = manager.new_transaction_context();
        assert_eq!(t2.snapshot_cid(), 1);
        assert_ne!(t2.tid(), t1.tid());
    }

    #[test]
    fn test_commit_stamps_change_sets() {
        let manager = TransactionManager::new();
        let table = make_table();

        let ctx = manager.new_transaction_context();
        let inserted = table
            .append_with_intent(vec![Value::Int32(1)], ctx.tid())
            .unwrap();
        ctx.record_inserted_row(Arc::clone(&table), inserted);

        let deleted = table.append(vec![Value::Int32(2)]).unwrap();
        let chunk = table.get_chunk(deleted.chunk_id);
        assert!(chunk
            .mvcc()
            .unwrap()
            .try_acquire_intent(deleted.chunk_offset, ctx.tid()));
        ctx.record_deleted_row(Arc::clone(&table), deleted);

        manager.prepare_commit(&ctx).unwrap();
        let cid = manager.commit(&ctx).unwrap();

        let chunk0 = table.get_chunk(0);
        let mvcc = chunk0.mvcc().unwrap();
        assert_eq!(mvcc.begin_cid(inserted.chunk_offset), cid);
        assert_eq!(mvcc.end_cid(deleted.chunk_offset), cid);
        assert_eq!(mvcc.tid(inserted.chunk_offset), 0);
        assert_eq!(mvcc.tid(deleted.chunk_offset), 0);
        assert_eq!(ctx.phase(), TransactionPhase::Committed);
    }

    #[test]
    fn test_abort_reverts_writes() {
        let manager = TransactionManager::new();
        let table = make_table();

        let ctx = manager.new_transaction_context();
        let inserted = table
            .append_with_intent(vec![Value::Int32(1)], ctx.tid())
            .unwrap();
        ctx.record_inserted_row(Arc::clone(&table), inserted);

        let deleted = table.append(vec![Value::Int32(2)]).unwrap();
        let chunk = table.get_chunk(deleted.chunk_id);
        assert!(chunk
            .mvcc()
            .unwrap()
            .try_acquire_intent(deleted.chunk_offset, ctx.tid()));
        ctx.record_deleted_row(Arc::clone(&table), deleted);

        manager.abort(&ctx).unwrap();

        let chunk0 = table.get_chunk(0);
        let mvcc = chunk0.mvcc().unwrap();
        // Tombstoned insert, restored delete, no intents left.
        assert_eq!(mvcc.end_cid(inserted.chunk_offset), 0);
        assert_eq!(mvcc.end_cid(deleted.chunk_offset), MAX_CID);
        assert_eq!(mvcc.tid(inserted.chunk_offset), 0);
        assert_eq!(mvcc.tid(deleted.chunk_offset), 0);
        assert_eq!(manager.last_cid(), 0);
    }

    #[test]
    fn test_ordered_publication() {
        let manager = TransactionManager::new();

        let t1 = manager.new_transaction_context();
        let t2 = manager.new_transaction_context();

        let cid1 = manager.prepare_commit(&t1).unwrap();
        let cid2 = manager.prepare_commit(&t2).unwrap();
        assert!(cid1 < cid2);

        // t2 finishes first: its CID must not be published before t1's.
        manager.commit(&t2).unwrap();
        assert_eq!(manager.last_cid(), 0);

        manager.commit(&t1).unwrap();
        assert_eq!(manager.last_cid(), cid2);
    }

    #[test]
    fn test_double_prepare_rejected() {
        let manager = TransactionManager::new();
        let ctx = manager.new_transaction_context();
        manager.prepare_commit(&ctx).unwrap();
        assert!(matches!(
            manager.prepare_commit(&ctx),
            Err(StrataError::TransactionNotActive { .. })
        ));
    }

    #[test]
    fn test_abort_requires_active() {
        let manager = TransactionManager::new();
        let ctx = manager.new_transaction_context();
        manager.prepare_commit(&ctx).unwrap();
        assert!(matches!(
            manager.abort(&ctx),
            Err(StrataError::TransactionNotActive { .. })
        ));
    }
}
