//! Cartesian product of two inputs.

use std::sync::Arc;

use crate::storage::{Chunk, ChunkId, PosList, RowId, Table};
use crate::Result;

use super::{input_table, reference_view, AbstractOperator, OutputSlot};

/// Emits |L|·|R| rows, left columns followed by right columns. Intended for
/// tiny inputs (single-row lookups); no hash build is performed.
pub struct Product {
    left: Arc<dyn AbstractOperator>,
    right: Arc<dyn AbstractOperator>,
    output: OutputSlot,
}

impl Product {
    pub fn new(left: Arc<dyn AbstractOperator>, right: Arc<dyn AbstractOperator>) -> Self {
        Self {
            left,
            right,
            output: OutputSlot::new(),
        }
    }

    fn all_rows(table: &Table) -> PosList {
        let mut rows = PosList::with_capacity(table.row_count());
        for chunk_id in 0..table.chunk_count() {
            let count = table.get_chunk(chunk_id as ChunkId).row_count();
            for offset in 0..count {
                rows.push(RowId::new(chunk_id as ChunkId, offset as u32));
            }
        }
        rows
    }
}

impl AbstractOperator for Product {
    fn name(&self) -> &'static str {
        "Product"
    }

    fn execute(&self) -> Result<()> {
        let left = input_table(&self.left)?;
        let right = input_table(&self.right)?;

        let left_rows = Self::all_rows(&left);
        let right_rows = Self::all_rows(&right);

        let mut left_list = PosList::with_capacity(left_rows.len() * right_rows.len());
        let mut right_list = PosList::with_capacity(left_rows.len() * right_rows.len());
        for left_row in &left_rows {
            for right_row in &right_rows {
                left_list.push(*left_row);
                right_list.push(*right_row);
            }
        }

        let (mut defs, mut columns) = reference_view(&left, Arc::new(left_list))?;
        let (right_defs, right_columns) = reference_view(&right, Arc::new(right_list))?;
        defs.extend(right_defs);
        columns.extend(right_columns);

        let output = Table::new_view(defs, Chunk::new_view_chunk(columns));
        self.output.set(Arc::new(output))
    }

    fn get_output(&self) -> Option<Arc<Table>> {
        self.output.get()
    }
}
