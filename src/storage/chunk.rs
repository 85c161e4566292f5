//! Chunks: fixed-capacity row groups with optional per-row MVCC metadata.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{RwLock, RwLockReadGuard};

use crate::data::Value;
use crate::txn::{Cid, Tid, MAX_CID};
use crate::Result;

use super::reference_column::ReferenceColumn;
use super::value_column::ValueColumn;
use super::{ChunkOffset, ColumnId};

/// A column slot within a chunk: either owned typed values or a zero-copy
/// reference view.
#[derive(Debug)]
pub enum Column {
    Value(ValueColumn),
    Reference(ReferenceColumn),
}

impl Column {
    pub fn size(&self) -> usize {
        match self {
            Column::Value(col) => col.size(),
            Column::Reference(col) => col.size(),
        }
    }

    pub fn get(&self, offset: usize) -> Value {
        match self {
            Column::Value(col) => col.get(offset),
            Column::Reference(col) => col.get(offset),
        }
    }

    pub fn as_reference(&self) -> Option<&ReferenceColumn> {
        match self {
            Column::Reference(col) => Some(col),
            Column::Value(_) => None,
        }
    }
}

/// MVCC initialization for a newly appended row.
#[derive(Debug, Clone, Copy)]
pub enum MvccInit {
    /// Loader append: visible from the beginning of time.
    Committed,
    /// Transactional insert: write intent held, not yet committed.
    Intent(Tid),
}

/// Per-row MVCC metadata, preallocated to the chunk capacity.
///
/// The cells are plain atomics: intent acquisition uses compare-and-set on
/// `tids`, commit stamping uses release stores on `begin_cids`/`end_cids`
/// paired with acquire loads in the visibility check. Rows at offsets past
/// the chunk's row count are never read.
#[derive(Debug)]
pub struct MvccColumns {
    tids: Vec<AtomicU64>,
    begin_cids: Vec<AtomicU64>,
    end_cids: Vec<AtomicU64>,
}

impl MvccColumns {
    pub fn with_capacity(capacity: usize) -> Self {
        let mut tids = Vec::with_capacity(capacity);
        let mut begin_cids = Vec::with_capacity(capacity);
        let mut end_cids = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            tids.push(AtomicU64::new(0));
            begin_cids.push(AtomicU64::new(MAX_CID));
            end_cids.push(AtomicU64::new(MAX_CID));
        }
        Self {
            tids,
            begin_cids,
            end_cids,
        }
    }

    pub fn tid(&self, offset: ChunkOffset) -> Tid {
        self.tids[offset as usize].load(Ordering::Acquire)
    }

    pub fn begin_cid(&self, offset: ChunkOffset) -> Cid {
        self.begin_cids[offset as usize].load(Ordering::Acquire)
    }

    pub fn end_cid(&self, offset: ChunkOffset) -> Cid {
        self.end_cids[offset as usize].load(Ordering::Acquire)
    }

    pub fn set_begin_cid(&self, offset: ChunkOffset, cid: Cid) {
        self.begin_cids[offset as usize].store(cid, Ordering::Release);
    }

    pub fn set_end_cid(&self, offset: ChunkOffset, cid: Cid) {
        self.end_cids[offset as usize].store(cid, Ordering::Release);
    }

    pub fn set_tid(&self, offset: ChunkOffset, tid: Tid) {
        self.tids[offset as usize].store(tid, Ordering::Release);
    }

    /// Try to acquire a write intent on the row. Succeeds if the row carries
    /// no intent or already carries ours.
    pub fn try_acquire_intent(&self, offset: ChunkOffset, tid: Tid) -> bool {
        match self.tids[offset as usize].compare_exchange(
            0,
            tid,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => true,
            Err(current) => current == tid,
        }
    }

    /// Release our write intent; a foreign intent is left untouched.
    pub fn release_intent(&self, offset: ChunkOffset, tid: Tid) {
        let _ = self.tids[offset as usize].compare_exchange(
            tid,
            0,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

/// A fixed-capacity group of same-length columns.
///
/// Value chunks grow row-by-row until the capacity is reached, at which
/// point the chunk is sealed. Reference chunks are built once by operators
/// and never grow.
#[derive(Debug)]
pub struct Chunk {
    capacity: usize,
    columns: RwLock<Vec<Column>>,
    mvcc: Option<MvccColumns>,
}

impl Chunk {
    /// Create an empty value chunk with the given column layout.
    pub fn new_value_chunk(columns: Vec<ValueColumn>, capacity: usize, with_mvcc: bool) -> Self {
        let mvcc = with_mvcc.then(|| MvccColumns::with_capacity(capacity));
        Self {
            capacity,
            columns: RwLock::new(columns.into_iter().map(Column::Value).collect()),
            mvcc,
        }
    }

    /// Create a reference chunk from prebuilt reference columns.
    pub fn new_reference_chunk(columns: Vec<ReferenceColumn>) -> Self {
        Self::new_view_chunk(columns.into_iter().map(Column::Reference).collect())
    }

    /// Create a sealed view chunk from prebuilt column slots. Projection
    /// outputs mix reference columns with materialized expression columns.
    pub fn new_view_chunk(columns: Vec<Column>) -> Self {
        let capacity = columns.first().map(|c| c.size()).unwrap_or(0);
        Self {
            capacity,
            columns: RwLock::new(columns),
            mvcc: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn column_count(&self) -> usize {
        self.columns.read().len()
    }

    pub fn row_count(&self) -> usize {
        self.columns
            .read()
            .first()
            .map(|c| c.size())
            .unwrap_or(0)
    }

    /// A sealed chunk no longer accepts appends.
    pub fn is_full(&self) -> bool {
        self.row_count() >= self.capacity
    }

    /// Read access to the column slots; hold the guard across a chunk scan.
    pub fn columns(&self) -> RwLockReadGuard<'_, Vec<Column>> {
        self.columns.read()
    }

    pub fn get_value(&self, column_id: ColumnId, offset: ChunkOffset) -> Value {
        self.columns.read()[column_id as usize].get(offset as usize)
    }

    pub fn mvcc(&self) -> Option<&MvccColumns> {
        self.mvcc.as_ref()
    }

    /// Append one row; the caller has already validated arity and types
    /// against the table schema. Returns the offset of the new row.
    pub(super) fn append_row(&self, values: Vec<Value>, init: MvccInit) -> Result<ChunkOffset> {
        let mut columns = self.columns.write();
        let offset = columns.first().map(|c| c.size()).unwrap_or(0) as ChunkOffset;
        for (column, value) in columns.iter_mut().zip(values) {
            match column {
                Column::Value(col) => col.push(value)?,
                Column::Reference(_) => unreachable!("append on a reference chunk"),
            }
        }
        if let Some(mvcc) = &self.mvcc {
            match init {
                MvccInit::Committed => {
                    mvcc.set_begin_cid(offset, 0);
                    mvcc.set_end_cid(offset, MAX_CID);
                }
                MvccInit::Intent(tid) => {
                    mvcc.set_tid(offset, tid);
                    mvcc.set_begin_cid(offset, MAX_CID);
                    mvcc.set_end_cid(offset, MAX_CID);
                }
            }
        }
        Ok(offset)
    }
}
