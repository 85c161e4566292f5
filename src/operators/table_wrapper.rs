//! Wraps an already-constructed table as an operator, so loaders and tests
//! can feed literal tables into an operator DAG.

use std::sync::Arc;

use crate::storage::Table;
use crate::Result;

use super::{AbstractOperator, OutputSlot};

pub struct TableWrapper {
    table: Arc<Table>,
    output: OutputSlot,
}

impl TableWrapper {
    pub fn new(table: Arc<Table>) -> Self {
        Self {
            table,
            output: OutputSlot::new(),
        }
    }
}

impl AbstractOperator for TableWrapper {
    fn name(&self) -> &'static str {
        "TableWrapper"
    }

    fn execute(&self) -> Result<()> {
        self.output.set(Arc::clone(&self.table))
    }

    fn get_output(&self) -> Option<Arc<Table>> {
        self.output.get()
    }
}
