//! MVCC visibility filter.

use std::sync::Arc;

use crate::storage::{Chunk, ChunkId, MvccColumns, PosList, RowId, Table};
use crate::txn::{Cid, Tid, TransactionContext};
use crate::Result;

use super::{input_table, reference_view, AbstractOperator, ContextSlot, OutputSlot};

/// Keeps only the rows visible to the attached transaction.
///
/// With `A = (row_tid == our_tid)`, `B = (our_cid >= begin_cid)` and
/// `C = (our_cid >= end_cid)`, a row is visible iff `A ∧ ¬B ∧ ¬C` (our own
/// uncommitted insert) or `¬A ∧ B ∧ ¬C` (committed before our snapshot and
/// not yet deleted at it). Every other combination is filtered: past
/// deletes, our own uncommitted deletes, foreign uncommitted inserts, and
/// the impossible states.
pub struct Validate {
    input: Arc<dyn AbstractOperator>,
    context: ContextSlot,
    output: OutputSlot,
}

impl Validate {
    pub fn new(input: Arc<dyn AbstractOperator>) -> Self {
        Self {
            input,
            context: ContextSlot::new(),
            output: OutputSlot::new(),
        }
    }

    fn is_visible(mvcc: &MvccColumns, offset: u32, our_tid: Tid, our_cid: Cid) -> bool {
        let own = mvcc.tid(offset) == our_tid;
        let past_begin = our_cid >= mvcc.begin_cid(offset);
        let past_end = our_cid >= mvcc.end_cid(offset);
        (own && !past_begin && !past_end) || (!own && past_begin && !past_end)
    }

    /// Visibility of one input row. Rows without MVCC metadata and null row
    /// references (outer-join padding) are always visible.
    fn row_visible(base_chunk: &Chunk, row_id: RowId, our_tid: Tid, our_cid: Cid) -> bool {
        match base_chunk.mvcc() {
            Some(mvcc) => Self::is_visible(mvcc, row_id.chunk_offset, our_tid, our_cid),
            None => true,
        }
    }
}

impl AbstractOperator for Validate {
    fn name(&self) -> &'static str {
        "Validate"
    }

    fn execute(&self) -> Result<()> {
        let context = self.context.get(self.name())?;
        let our_tid = context.tid();
        let our_cid = context.snapshot_cid();
        let input = input_table(&self.input)?;

        let mut pos_list = PosList::new();

        if input.is_reference_table() {
            // Visibility is a property of the base rows the view points at.
            let chunk = input.get_chunk(0);
            let columns = chunk.columns();
            match columns.first().and_then(|c| c.as_reference()) {
                Some(reference) => {
                    let base = reference.referenced_table();
                    for (offset, row_id) in reference.pos_list().iter().enumerate() {
                        let visible = row_id.is_null()
                            || Self::row_visible(
                                &base.get_chunk(row_id.chunk_id),
                                *row_id,
                                our_tid,
                                our_cid,
                            );
                        if visible {
                            pos_list.push(RowId::new(0, offset as u32));
                        }
                    }
                }
                None => {
                    // A purely materialized view carries no MVCC state.
                    for offset in 0..chunk.row_count() {
                        pos_list.push(RowId::new(0, offset as u32));
                    }
                }
            }
        } else {
            for chunk_id in 0..input.chunk_count() {
                let chunk = input.get_chunk(chunk_id as ChunkId);
                for offset in 0..chunk.row_count() {
                    let row_id = RowId::new(chunk_id as ChunkId, offset as u32);
                    if Self::row_visible(&chunk, row_id, our_tid, our_cid) {
                        pos_list.push(row_id);
                    }
                }
            }
        }

        let (defs, columns) = reference_view(&input, Arc::new(pos_list))?;
        let output = Table::new_view(defs, Chunk::new_view_chunk(columns));
        self.output.set(Arc::new(output))
    }

    fn get_output(&self) -> Option<Arc<Table>> {
        self.output.get()
    }

    fn set_transaction_context(&self, context: Arc<TransactionContext>) {
        self.context.set(context);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DataType, Value};
    use crate::operators::TableWrapper;
    use crate::txn::MAX_CID;

    /// One-row table with explicit MVCC state, mirroring the visibility
    /// truth table: (row_tid, begin_cid, end_cid).
    fn table_with_mvcc(row_tid: Tid, begin_cid: Cid, end_cid: Cid) -> Arc<dyn AbstractOperator> {
        let table = Table::new(10);
        table
            .add_column_definition("col_1", DataType::Int32)
            .unwrap();
        table
            .add_column_definition("col_2", DataType::Int32)
            .unwrap();
        let row = table
            .append(vec![Value::Int32(123), Value::Int32(456)])
            .unwrap();
        let chunk = table.get_chunk(row.chunk_id);
        let mvcc = chunk.mvcc().unwrap();
        mvcc.set_tid(row.chunk_offset, row_tid);
        mvcc.set_begin_cid(row.chunk_offset, begin_cid);
        mvcc.set_end_cid(row.chunk_offset, end_cid);

        let wrapper = Arc::new(TableWrapper::new(Arc::new(table)));
        wrapper.execute().unwrap();
        wrapper
    }

    fn validated_row_count(input: Arc<dyn AbstractOperator>, our_tid: Tid, our_cid: Cid) -> usize {
        let validate = Validate::new(input);
        validate.set_transaction_context(Arc::new(TransactionContext::new(our_tid, our_cid)));
        validate.execute().unwrap();
        validate.get_output().unwrap().row_count()
    }

    // The eight rows of the truth table, with context (our_tid=2, our_cid=2).

    #[test]
    fn test_impossible_all_true() {
        assert_eq!(validated_row_count(table_with_mvcc(2, 2, 2), 2, 2), 0);
    }

    #[test]
    fn test_past_delete() {
        assert_eq!(validated_row_count(table_with_mvcc(42, 2, 2), 2, 2), 0);
    }

    #[test]
    fn test_impossible_own_future_begin_past_end() {
        assert_eq!(validated_row_count(table_with_mvcc(2, 4, 1), 2, 2), 0);
    }

    #[test]
    fn test_own_uncommitted_delete() {
        assert_eq!(validated_row_count(table_with_mvcc(2, 1, 6), 2, 2), 0);
    }

    #[test]
    fn test_impossible_foreign_future_begin_past_end() {
        assert_eq!(validated_row_count(table_with_mvcc(50, 3, 1), 2, 2), 0);
    }

    #[test]
    fn test_own_insert_visible() {
        assert_eq!(validated_row_count(table_with_mvcc(2, 3, 3), 2, 2), 1);
    }

    #[test]
    fn test_past_insert_future_delete_visible() {
        assert_eq!(validated_row_count(table_with_mvcc(99, 2, 3), 2, 2), 1);
        // The same row is invisible once the snapshot reaches the delete.
        assert_eq!(validated_row_count(table_with_mvcc(99, 2, 3), 2, 3), 0);
    }

    #[test]
    fn test_foreign_uncommitted_insert_hidden() {
        assert_eq!(validated_row_count(table_with_mvcc(99, 3, 3), 2, 2), 0);
    }

    #[test]
    fn test_own_uncommitted_insert_at_infinity() {
        assert_eq!(
            validated_row_count(table_with_mvcc(2, MAX_CID, MAX_CID), 2, 2),
            1
        );
    }

    #[test]
    fn test_validate_idempotent() {
        let input = table_with_mvcc(99, 2, 3);
        let context = Arc::new(TransactionContext::new(2, 2));

        let first = Arc::new(Validate::new(input));
        first.set_transaction_context(Arc::clone(&context));
        first.execute().unwrap();

        let second = Validate::new(Arc::clone(&first) as Arc<dyn AbstractOperator>);
        second.set_transaction_context(context);
        second.execute().unwrap();

        assert_eq!(
            first.get_output().unwrap().row_count(),
            second.get_output().unwrap().row_count()
        );
        assert_eq!(
            second.get_output().unwrap().get_value(0, RowId::new(0, 0)),
            Value::Int32(123)
        );
    }
}
