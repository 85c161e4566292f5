//! Transactional row update: logical delete of the original rows plus
//! insertion of their replacements.

use std::sync::Arc;

use crate::data::Value;
use crate::storage::{storage_manager, ChunkId, PosList, Table};
use crate::txn::{TransactionContext, MAX_CID};
use crate::{Result, StrataError};

use super::{input_table, AbstractOperator, ContextSlot, OutputSlot};

/// Takes two same-shape reference tables from a shared scan tail: the rows
/// to be logically removed and the new row images. Write intents are
/// acquired row-by-row; a foreign intent or an already-deleted row fails
/// with `WriteConflict`, after which the caller aborts the transaction.
pub struct Update {
    table_name: String,
    original_rows: Arc<dyn AbstractOperator>,
    updated_rows: Arc<dyn AbstractOperator>,
    context: ContextSlot,
    output: OutputSlot,
}

impl Update {
    pub fn new(
        table_name: impl Into<String>,
        original_rows: Arc<dyn AbstractOperator>,
        updated_rows: Arc<dyn AbstractOperator>,
    ) -> Self {
        Self {
            table_name: table_name.into(),
            original_rows,
            updated_rows,
            context: ContextSlot::new(),
            output: OutputSlot::new(),
        }
    }

    /// The base-table row ids selected by a scan output.
    fn base_rows(table: &Table) -> Result<(Arc<Table>, Arc<PosList>)> {
        if !table.is_reference_table() || table.chunk_count() != 1 {
            return Err(StrataError::Unsupported(
                "update expects a reference table produced by a scan".to_string(),
            ));
        }
        let chunk = table.get_chunk(0);
        let columns = chunk.columns();
        let reference = columns
            .first()
            .and_then(|c| c.as_reference())
            .ok_or_else(|| {
                StrataError::Unsupported(
                    "update expects reference columns over the stored table".to_string(),
                )
            })?;
        Ok((
            Arc::clone(reference.referenced_table()),
            Arc::clone(reference.pos_list()),
        ))
    }
}

impl AbstractOperator for Update {
    fn name(&self) -> &'static str {
        "Update"
    }

    fn execute(&self) -> Result<()> {
        let context = self.context.get(self.name())?;
        context.check_active()?;
        let original = input_table(&self.original_rows)?;
        let updated = input_table(&self.updated_rows)?;

        if original.row_count() != updated.row_count() {
            return Err(StrataError::Unsupported(format!(
                "update row sets differ in shape: {} original rows, {} updated",
                original.row_count(),
                updated.row_count()
            )));
        }

        let (base, pos_list) = Self::base_rows(&original)?;

        // Step 1: acquire write intents and mark the originals for logical
        // deletion. Each acquired row is recorded immediately so an abort
        // after a conflict reverts everything taken so far.
        for row_id in pos_list.iter() {
            let chunk = base.get_chunk(row_id.chunk_id);
            let mvcc = chunk.mvcc().ok_or_else(|| {
                StrataError::Unsupported("update target carries no MVCC metadata".to_string())
            })?;
            if !mvcc.try_acquire_intent(row_id.chunk_offset, context.tid()) {
                return Err(StrataError::WriteConflict {
                    table: self.table_name.clone(),
                    chunk_id: row_id.chunk_id,
                    chunk_offset: row_id.chunk_offset,
                });
            }
            if mvcc.end_cid(row_id.chunk_offset) != MAX_CID {
                // Deleted under us since the scan; hand the intent back so
                // the row is not left locked by a failed update.
                mvcc.release_intent(row_id.chunk_offset, context.tid());
                return Err(StrataError::WriteConflict {
                    table: self.table_name.clone(),
                    chunk_id: row_id.chunk_id,
                    chunk_offset: row_id.chunk_offset,
                });
            }
            context.record_deleted_row(Arc::clone(&base), *row_id);
        }

        // Step 2: append the new row images with our intent.
        let target = storage_manager().get_table(&self.table_name)?;
        for chunk_id in 0..updated.chunk_count() {
            let chunk = updated.get_chunk(chunk_id as ChunkId);
            let columns = chunk.columns();
            for offset in 0..chunk.row_count() {
                let values: Vec<Value> = columns.iter().map(|c| c.get(offset)).collect();
                let row_id = target.append_with_intent(values, context.tid())?;
                context.record_inserted_row(Arc::clone(&target), row_id);
            }
        }

        self.output.set(Arc::new(Table::empty()))
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
    use crate::data::DataType;
    use crate::operators::{GetTable, Projection, ProjectionDefinition, ScanType, TableScan};
    use crate::operators::expression::{ArithmeticOperator, Expression};
    use crate::txn::transaction_manager;

    fn register_district(name: &str) -> Arc<Table> {
        let table = Table::new(4);
        table.add_column_definition("d_id", DataType::Int32).unwrap();
        table
            .add_column_definition("d_next_o_id", DataType::Int32)
            .unwrap();
        table
            .append(vec![Value::Int32(1), Value::Int32(100)])
            .unwrap();
        let table = Arc::new(table);
        storage_manager().add_table(name, Arc::clone(&table)).unwrap();
        table
    }

    fn scan_district(name: &str) -> Arc<dyn AbstractOperator> {
        let get = Arc::new(GetTable::new(name));
        get.execute().unwrap();
        let scan = Arc::new(
            TableScan::new(get, "d_id", ScanType::Equals, Value::Int32(1), None).unwrap(),
        );
        scan.execute().unwrap();
        scan
    }

    fn bump_next_o_id(rows: Arc<dyn AbstractOperator>) -> Arc<dyn AbstractOperator> {
        let projection = Arc::new(Projection::new(
            rows,
            vec![
                ProjectionDefinition::column("d_id"),
                ProjectionDefinition::expression(
                    Expression::arithmetic(
                        ArithmeticOperator::Add,
                        Expression::column("d_next_o_id"),
                        Expression::literal(1i32),
                    ),
                    "d_next_o_id",
                    DataType::Int32,
                ),
            ],
        ));
        projection.execute().unwrap();
        projection
    }

    #[test]
    fn test_update_marks_and_appends() {
        let table = register_district("update_basic_test");
        let context = transaction_manager().new_transaction_context();

        let scan = scan_district("update_basic_test");
        let update = Update::new(
            "update_basic_test",
            Arc::clone(&scan),
            bump_next_o_id(scan),
        );
        update.set_transaction_context(Arc::clone(&context));
        update.execute().unwrap();

        // Original row carries our intent, new row appended with ours too.
        assert_eq!(table.row_count(), 2);
        let chunk = table.get_chunk(0);
        let mvcc = chunk.mvcc().unwrap();
        assert_eq!(mvcc.tid(0), context.tid());
        assert_eq!(mvcc.tid(1), context.tid());
        assert_eq!(context.deleted_rows().len(), 1);
        assert_eq!(context.inserted_rows().len(), 1);
        assert_eq!(
            table.get_value(1, crate::storage::RowId::new(0, 1)),
            Value::Int32(101)
        );

        transaction_manager().abort(&context).unwrap();
        storage_manager().drop_table("update_basic_test").unwrap();
    }

    #[test]
    fn test_concurrent_update_conflict() {
        register_district("update_conflict_test");

        let t1 = transaction_manager().new_transaction_context();
        let t2 = transaction_manager().new_transaction_context();

        let scan1 = scan_district("update_conflict_test");
        let update1 = Update::new(
            "update_conflict_test",
            Arc::clone(&scan1),
            bump_next_o_id(scan1),
        );
        update1.set_transaction_context(Arc::clone(&t1));
        update1.execute().unwrap();

        // T2 scans the same row while T1 still holds its intent.
        let scan2 = scan_district("update_conflict_test");
        let update2 = Update::new(
            "update_conflict_test",
            Arc::clone(&scan2),
            bump_next_o_id(scan2),
        );
        update2.set_transaction_context(Arc::clone(&t2));
        assert!(matches!(
            update2.execute(),
            Err(StrataError::WriteConflict { .. })
        ));

        transaction_manager().abort(&t2).unwrap();
        transaction_manager().abort(&t1).unwrap();
        storage_manager().drop_table("update_conflict_test").unwrap();
    }
}
