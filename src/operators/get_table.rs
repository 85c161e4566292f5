//! Fetches a registered table from the storage manager.

use std::sync::Arc;

use crate::storage::{storage_manager, Table};
use crate::Result;

use super::{AbstractOperator, OutputSlot};

/// Passes the registered table through without copying.
pub struct GetTable {
    table_name: String,
    output: OutputSlot,
}

impl GetTable {
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            output: OutputSlot::new(),
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }
}

impl AbstractOperator for GetTable {
    fn name(&self) -> &'static str {
        "GetTable"
    }

    fn execute(&self) -> Result<()> {
        let table = storage_manager().get_table(&self.table_name)?;
        self.output.set(table)
    }

    fn get_output(&self) -> Option<Arc<Table>> {
        self.output.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DataType, Value};
    use crate::StrataError;

    #[test]
    fn test_fetches_registered_table() {
        let table = Table::new(4);
        table.add_column_definition("x", DataType::Int32).unwrap();
        table.append(vec![Value::Int32(5)]).unwrap();
        storage_manager()
            .add_table("get_table_test", Arc::new(table))
            .unwrap();

        let op = GetTable::new("get_table_test");
        op.execute().unwrap();
        assert_eq!(op.get_output().unwrap().row_count(), 1);

        storage_manager().drop_table("get_table_test").unwrap();
    }

    #[test]
    fn test_missing_table() {
        let op = GetTable::new("no_such_table");
        assert!(matches!(
            op.execute(),
            Err(StrataError::TableNotFound(_))
        ));
        assert!(op.get_output().is_none());
    }
}
