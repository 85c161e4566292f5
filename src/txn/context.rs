//! Per-transaction state: snapshot, phase machine and change sets.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::storage::{RowId, Table};
use crate::{Result, StrataError};

use super::{Cid, Tid};

/// Lifecycle phase of a transaction. Transitions are one-way:
/// Active → Committing → Committed, or {Active} → Aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionPhase {
    Active,
    Committing,
    Committed,
    Aborted,
}

/// A row touched by this transaction, addressed through the owning table so
/// commit and rollback can reach its MVCC cells directly.
pub type ModifiedRow = (Arc<Table>, RowId);

/// Per-transaction context.
///
/// Operators stamp rows with `tid` while the transaction is Active; the
/// change sets recorded here are what CommitRecords stamps with the commit
/// CID and what abort reverts.
pub struct TransactionContext {
    tid: Tid,
    snapshot_cid: Cid,
    /// Reserved commit CID; 0 until prepare_commit.
    commit_cid: AtomicU64,
    phase: Mutex<TransactionPhase>,
    inserted_rows: Mutex<Vec<ModifiedRow>>,
    deleted_rows: Mutex<Vec<ModifiedRow>>,
}

impl TransactionContext {
    /// Create a context with an explicit TID and snapshot CID. Contexts
    /// taking part in the commit protocol come from the transaction
    /// manager instead.
    pub fn new(tid: Tid, snapshot_cid: Cid) -> Self {
        Self {
            tid,
            snapshot_cid,
            commit_cid: AtomicU64::new(0),
            phase: Mutex::new(TransactionPhase::Active),
            inserted_rows: Mutex::new(Vec::new()),
            deleted_rows: Mutex::new(Vec::new()),
        }
    }

    pub fn tid(&self) -> Tid {
        self.tid
    }

    pub fn snapshot_cid(&self) -> Cid {
        self.snapshot_cid
    }

    /// The reserved commit CID, once prepare_commit has run.
    pub fn commit_cid(&self) -> Option<Cid> {
        match self.commit_cid.load(Ordering::Acquire) {
            0 => None,
            cid => Some(cid),
        }
    }

    pub(super) fn set_commit_cid(&self, cid: Cid) {
        self.commit_cid.store(cid, Ordering::Release);
    }

    pub fn phase(&self) -> TransactionPhase {
        *self.phase.lock()
    }

    pub fn is_active(&self) -> bool {
        self.phase() == TransactionPhase::Active
    }

    /// Guard for operators that stamp write intents: the transaction must
    /// still be Active.
    pub fn check_active(&self) -> Result<()> {
        match self.phase() {
            TransactionPhase::Active => Ok(()),
            TransactionPhase::Aborted => Err(StrataError::Aborted(self.tid)),
            phase => Err(StrataError::TransactionNotActive {
                tid: self.tid,
                reason: format!("writes are not allowed in phase {:?}", phase),
            }),
        }
    }

    /// Transition to `to` if currently in `from`. Returns whether the
    /// transition happened; contexts are finalized exactly once.
    pub(super) fn transition(&self, from: TransactionPhase, to: TransactionPhase) -> bool {
        let mut phase = self.phase.lock();
        if *phase == from {
            *phase = to;
            true
        } else {
            false
        }
    }

    // ========================================================================
    // Change sets
    // ========================================================================

    /// Record a row this transaction inserted (carries our write intent).
    pub fn record_inserted_row(&self, table: Arc<Table>, row_id: RowId) {
        self.inserted_rows.lock().push((table, row_id));
    }

    /// Record a row this transaction logically deleted.
    pub fn record_deleted_row(&self, table: Arc<Table>, row_id: RowId) {
        self.deleted_rows.lock().push((table, row_id));
    }

    pub fn inserted_rows(&self) -> Vec<ModifiedRow> {
        self.inserted_rows.lock().clone()
    }

    pub fn deleted_rows(&self) -> Vec<ModifiedRow> {
        self.deleted_rows.lock().clone()
    }

    pub fn has_writes(&self) -> bool {
        !self.inserted_rows.lock().is_empty() || !self.deleted_rows.lock().is_empty()
    }
}
