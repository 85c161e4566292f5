//! Transactional row insertion.

use std::sync::Arc;

use crate::data::Value;
use crate::storage::{storage_manager, ChunkId, Table};
use crate::Result;
use crate::txn::TransactionContext;

use super::{input_table, AbstractOperator, ContextSlot, OutputSlot};

/// Appends the child's rows into the target table's open chunk, stamped
/// with this transaction's write intent (`begin`/`end` stay at ∞ until the
/// commit stamps them). The inserted rows are recorded in the context for
/// commit and rollback.
pub struct Insert {
    table_name: String,
    values: Arc<dyn AbstractOperator>,
    context: ContextSlot,
    output: OutputSlot,
}

impl Insert {
    pub fn new(table_name: impl Into<String>, values: Arc<dyn AbstractOperator>) -> Self {
        Self {
            table_name: table_name.into(),
            values,
            context: ContextSlot::new(),
            output: OutputSlot::new(),
        }
    }
}

impl AbstractOperator for Insert {
    fn name(&self) -> &'static str {
        "Insert"
    }

    fn execute(&self) -> Result<()> {
        let context = self.context.get(self.name())?;
        context.check_active()?;
        let target = storage_manager().get_table(&self.table_name)?;
        let rows = input_table(&self.values)?;

        for chunk_id in 0..rows.chunk_count() {
            let chunk = rows.get_chunk(chunk_id as ChunkId);
            let columns = chunk.columns();
            for offset in 0..chunk.row_count() {
                let values: Vec<Value> = columns.iter().map(|c| c.get(offset)).collect();
                let row_id = target.append_with_intent(values, context.tid())?;
                context.record_inserted_row(Arc::clone(&target), row_id);
            }
        }

        self.output.set(target)
    }

    fn get_output(&self) -> Option<Arc<Table>> {
        self.output.get()
    }

    fn set_transaction_context(&self, context: Arc<TransactionContext>) {
        self.context.set(context);
    }
}
