//! Columnar storage: typed value columns, reference-column views, chunks,
//! tables and the process-wide table registry.

mod chunk;
mod reference_column;
mod storage_manager;
mod table;
mod value_column;

pub use chunk::{Chunk, Column, MvccColumns};
pub use reference_column::ReferenceColumn;
pub use storage_manager::{storage_manager, StorageManager};
pub use table::{ColumnDefinition, Table};
pub use value_column::ValueColumn;

use serde::{Deserialize, Serialize};

/// Index of a column within a table schema.
pub type ColumnId = u32;

/// Index of a chunk within a table.
pub type ChunkId = u32;

/// Row offset within a chunk.
pub type ChunkOffset = u32;

/// Sentinel offset marking a null row reference.
pub const INVALID_CHUNK_OFFSET: ChunkOffset = ChunkOffset::MAX;

/// Address of a single row: chunk plus offset within the chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RowId {
    pub chunk_id: ChunkId,
    pub chunk_offset: ChunkOffset,
}

impl RowId {
    pub fn new(chunk_id: ChunkId, chunk_offset: ChunkOffset) -> Self {
        Self {
            chunk_id,
            chunk_offset,
        }
    }

    /// Whether this row id is the null sentinel (outer-join padding).
    pub fn is_null(&self) -> bool {
        self.chunk_offset == INVALID_CHUNK_OFFSET
    }
}

/// The null row reference used for outer-join padding.
pub const NULL_ROW_ID: RowId = RowId {
    chunk_id: 0,
    chunk_offset: INVALID_CHUNK_OFFSET,
};

/// Ordered list of row ids defining the rows visible through a reference
/// column. Shared between the columns of a reference chunk via `Arc`.
pub type PosList = Vec<RowId>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_row_id() {
        assert!(NULL_ROW_ID.is_null());
        assert!(!RowId::new(0, 0).is_null());
        assert!(RowId::new(3, INVALID_CHUNK_OFFSET).is_null());
    }
}
