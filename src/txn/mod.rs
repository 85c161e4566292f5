//! MVCC transactions: TID/CID allocation, per-transaction contexts and the
//! commit protocol.

mod context;
mod manager;

pub use context::{TransactionContext, TransactionPhase};
pub use manager::{transaction_manager, TransactionManager};

/// Transaction identifier; doubles as the write-intent marker on rows.
/// 0 means "no intent".
pub type Tid = u64;

/// Commit identifier: a transaction's position in serial commit order.
pub type Cid = u64;

/// The "infinite" commit id: not yet committed (`begin_cid`) or still live
/// (`end_cid`).
pub const MAX_CID: Cid = Cid::MAX;

/// Serializes tests that drive the global manager through the commit
/// protocol, so publication is never held back by another test's
/// still-pending commit CID.
#[cfg(test)]
pub(crate) fn global_commit_lock() -> &'static parking_lot::Mutex<()> {
    static LOCK: once_cell::sync::Lazy<parking_lot::Mutex<()>> =
        once_cell::sync::Lazy::new(|| parking_lot::Mutex::new(()));
    &LOCK
}
