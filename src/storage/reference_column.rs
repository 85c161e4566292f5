//! Reference columns: zero-copy views over value-column tables.

use std::sync::Arc;

use crate::data::Value;
use crate::{Result, StrataError};

use super::table::Table;
use super::{ColumnId, PosList};

/// An immutable view of one column of a concrete table, filtered and
/// reordered by a position list.
///
/// A reference column never references another reference column; operators
/// that consume reference input dereference one level when they build new
/// views, so reference depth is always 1.
#[derive(Debug, Clone)]
pub struct ReferenceColumn {
    referenced_table: Arc<Table>,
    referenced_column_id: ColumnId,
    pos_list: Arc<PosList>,
}

impl ReferenceColumn {
    /// Create a view over `referenced_table[referenced_column_id]`.
    ///
    /// The referenced table must contain only value columns.
    pub fn new(
        referenced_table: Arc<Table>,
        referenced_column_id: ColumnId,
        pos_list: Arc<PosList>,
    ) -> Result<Self> {
        if referenced_table.is_reference_table() {
            return Err(StrataError::Unsupported(
                "reference columns must reference a value-column table".to_string(),
            ));
        }
        if referenced_column_id as usize >= referenced_table.column_count() {
            return Err(StrataError::ColumnNotFound(format!(
                "column id {} out of range",
                referenced_column_id
            )));
        }
        Ok(Self {
            referenced_table,
            referenced_column_id,
            pos_list,
        })
    }

    pub fn referenced_table(&self) -> &Arc<Table> {
        &self.referenced_table
    }

    pub fn referenced_column_id(&self) -> ColumnId {
        self.referenced_column_id
    }

    pub fn pos_list(&self) -> &Arc<PosList> {
        &self.pos_list
    }

    pub fn size(&self) -> usize {
        self.pos_list.len()
    }

    /// Resolve the position-list entry at `offset` against the referenced
    /// value column. Null row references read as `Value::Null`.
    pub fn get(&self, offset: usize) -> Value {
        let row_id = self.pos_list[offset];
        if row_id.is_null() {
            return Value::Null;
        }
        self.referenced_table
            .get_value(self.referenced_column_id, row_id)
    }
}
