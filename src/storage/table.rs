//! Tables: schema, chunk list and the append path.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::data::{DataType, Value};
use crate::txn::Tid;
use crate::{Result, StrataError};

use super::chunk::{Chunk, MvccInit};
use super::value_column::ValueColumn;
use super::{ChunkId, ColumnId, RowId};

/// One `(name, type)` entry of a table schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub name: String,
    pub data_type: DataType,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// A table: ordered schema, target chunk size and an ordered chunk list.
///
/// Value tables own their rows; all chunks except the last are full. Tables
/// produced by operators are reference tables: a single sealed chunk of
/// view columns over one or more concrete tables.
#[derive(Debug)]
pub struct Table {
    column_defs: RwLock<Vec<ColumnDefinition>>,
    target_chunk_size: usize,
    chunks: RwLock<Vec<Arc<Chunk>>>,
    reference_table: bool,
}

impl Table {
    /// Create an empty value table. Rows appended later carry MVCC metadata.
    pub fn new(target_chunk_size: usize) -> Self {
        Self {
            column_defs: RwLock::new(Vec::new()),
            target_chunk_size,
            chunks: RwLock::new(Vec::new()),
            reference_table: false,
        }
    }

    /// Create a reference table from a single prebuilt view chunk.
    pub fn new_view(column_defs: Vec<ColumnDefinition>, chunk: Chunk) -> Self {
        Self {
            column_defs: RwLock::new(column_defs),
            target_chunk_size: chunk.capacity().max(1),
            chunks: RwLock::new(vec![Arc::new(chunk)]),
            reference_table: true,
        }
    }

    /// Create an empty value table with no rows and no chunks (the shape of
    /// a modification operator's result).
    pub fn empty() -> Self {
        Self::new(1)
    }

    pub fn is_reference_table(&self) -> bool {
        self.reference_table
    }

    pub fn target_chunk_size(&self) -> usize {
        self.target_chunk_size
    }

    // ========================================================================
    // Schema
    // ========================================================================

    /// Define a column. Only valid before the first row is appended.
    pub fn add_column_definition(
        &self,
        name: impl Into<String>,
        data_type: DataType,
    ) -> Result<()> {
        if self.reference_table {
            return Err(StrataError::Unsupported(
                "cannot add columns to a reference table".to_string(),
            ));
        }
        if !self.chunks.read().is_empty() {
            return Err(StrataError::Unsupported(
                "cannot add columns after rows have been appended".to_string(),
            ));
        }
        let name = name.into();
        let mut defs = self.column_defs.write();
        if defs.iter().any(|d| d.name == name) {
            return Err(StrataError::Unsupported(format!(
                "column '{}' already defined",
                name
            )));
        }
        defs.push(ColumnDefinition::new(name, data_type));
        Ok(())
    }

    pub fn column_count(&self) -> usize {
        self.column_defs.read().len()
    }

    pub fn column_definitions(&self) -> Vec<ColumnDefinition> {
        self.column_defs.read().clone()
    }

    pub fn column_id_by_name(&self, name: &str) -> Result<ColumnId> {
        self.column_defs
            .read()
            .iter()
            .position(|d| d.name == name)
            .map(|p| p as ColumnId)
            .ok_or_else(|| StrataError::ColumnNotFound(name.to_string()))
    }

    pub fn column_name(&self, column_id: ColumnId) -> String {
        self.column_defs.read()[column_id as usize].name.clone()
    }

    pub fn column_type(&self, column_id: ColumnId) -> DataType {
        self.column_defs.read()[column_id as usize].data_type
    }

    // ========================================================================
    // Chunks & rows
    // ========================================================================

    pub fn chunk_count(&self) -> usize {
        self.chunks.read().len()
    }

    pub fn get_chunk(&self, chunk_id: ChunkId) -> Arc<Chunk> {
        Arc::clone(&self.chunks.read()[chunk_id as usize])
    }

    pub fn row_count(&self) -> usize {
        self.chunks.read().iter().map(|c| c.row_count()).sum()
    }

    /// Read a single cell. Resolves through reference columns.
    pub fn get_value(&self, column_id: ColumnId, row_id: RowId) -> Value {
        self.chunks.read()[row_id.chunk_id as usize].get_value(column_id, row_id.chunk_offset)
    }

    /// Append a row visible from the beginning of time (loader path).
    pub fn append(&self, values: Vec<Value>) -> Result<RowId> {
        self.append_row(values, MvccInit::Committed)
    }

    /// Append a row stamped with a write intent (transactional insert path).
    pub fn append_with_intent(&self, values: Vec<Value>, tid: Tid) -> Result<RowId> {
        self.append_row(values, MvccInit::Intent(tid))
    }

    fn append_row(&self, values: Vec<Value>, init: MvccInit) -> Result<RowId> {
        if self.reference_table {
            return Err(StrataError::Unsupported(
                "cannot append to a reference table".to_string(),
            ));
        }
        let defs = self.column_defs.read();
        if values.len() != defs.len() {
            return Err(StrataError::Arity {
                expected: defs.len(),
                actual: values.len(),
            });
        }
        for (value, def) in values.iter().zip(defs.iter()) {
            if value.data_type() != Some(def.data_type) {
                return Err(StrataError::TypeMismatch(format!(
                    "column '{}' expects {}, got {:?}",
                    def.name, def.data_type, value
                )));
            }
        }

        // Serialize appenders: the open chunk is owned by whoever holds the
        // chunk-list write lock.
        let mut chunks = self.chunks.write();
        let open = match chunks.last() {
            Some(chunk) if !chunk.is_full() => Arc::clone(chunk),
            _ => {
                let columns = defs
                    .iter()
                    .map(|d| ValueColumn::with_capacity(d.data_type, self.target_chunk_size))
                    .collect();
                let chunk = Arc::new(Chunk::new_value_chunk(
                    columns,
                    self.target_chunk_size,
                    true,
                ));
                chunks.push(Arc::clone(&chunk));
                chunk
            }
        };
        let chunk_id = (chunks.len() - 1) as ChunkId;
        let offset = open.append_row(values, init)?;
        Ok(RowId::new(chunk_id, offset))
    }
}
