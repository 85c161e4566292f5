//! Single-predicate table scan.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::data::Value;
use crate::storage::{Chunk, ChunkId, PosList, RowId, Table};
use crate::{Result, StrataError};

use super::{input_table, reference_view, AbstractOperator, OutputSlot};

/// The scan predicates. `Between` is inclusive on both bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanType {
    Equals,
    NotEquals,
    LessThan,
    LessThanEquals,
    GreaterThan,
    GreaterThanEquals,
    Between,
    Like,
}

impl fmt::Display for ScanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScanType::Equals => "=",
            ScanType::NotEquals => "≠",
            ScanType::LessThan => "<",
            ScanType::LessThanEquals => "≤",
            ScanType::GreaterThan => ">",
            ScanType::GreaterThanEquals => "≥",
            ScanType::Between => "BETWEEN",
            ScanType::Like => "LIKE",
        };
        write!(f, "{}", name)
    }
}

/// Filters the input row-by-row against a single predicate, emitting a
/// reference table over the scanned base table. Reference input is
/// composed, never nested.
pub struct TableScan {
    input: Arc<dyn AbstractOperator>,
    column_name: String,
    scan_type: ScanType,
    value: Value,
    value2: Option<Value>,
    like_pattern: Option<Regex>,
    output: OutputSlot,
}

impl TableScan {
    pub fn new(
        input: Arc<dyn AbstractOperator>,
        column_name: impl Into<String>,
        scan_type: ScanType,
        value: Value,
        value2: Option<Value>,
    ) -> Result<Self> {
        if scan_type == ScanType::Between && value2.is_none() {
            return Err(StrataError::Unsupported(
                "BETWEEN requires an upper bound".to_string(),
            ));
        }
        if scan_type != ScanType::Between && value2.is_some() {
            return Err(StrataError::Unsupported(format!(
                "scan type {} takes a single value",
                scan_type
            )));
        }
        let like_pattern = if scan_type == ScanType::Like {
            let pattern = value.as_str().ok_or_else(|| {
                StrataError::TypeMismatch("LIKE requires a string pattern".to_string())
            })?;
            Some(Self::compile_like(pattern)?)
        } else {
            None
        };
        Ok(Self {
            input,
            column_name: column_name.into(),
            scan_type,
            value,
            value2,
            like_pattern,
            output: OutputSlot::new(),
        })
    }

    /// Translate a SQL LIKE pattern (`%` and `_` wildcards) into a regex.
    fn compile_like(pattern: &str) -> Result<Regex> {
        let mut translated = String::with_capacity(pattern.len() + 8);
        translated.push('^');
        for c in pattern.chars() {
            match c {
                '%' => translated.push_str(".*"),
                '_' => translated.push('.'),
                c => translated.push_str(&regex::escape(&c.to_string())),
            }
        }
        translated.push('$');
        Regex::new(&translated).map_err(|e| {
            StrataError::Unsupported(format!("invalid LIKE pattern '{}': {}", pattern, e))
        })
    }

    fn check_column_type(&self, table: &Table, column_id: u32) -> Result<()> {
        let column_type = table.column_type(column_id);
        let check = |value: &Value| -> Result<()> {
            if value.data_type() != Some(column_type) {
                return Err(StrataError::TypeMismatch(format!(
                    "cannot scan {} column '{}' with {:?}",
                    column_type, self.column_name, value
                )));
            }
            Ok(())
        };
        check(&self.value)?;
        if let Some(value2) = &self.value2 {
            check(value2)?;
        }
        Ok(())
    }

    /// Whether a row value satisfies the predicate. Null values (outer-join
    /// padding) never match.
    fn matches(&self, value: &Value) -> Result<bool> {
        if value.is_null() {
            return Ok(false);
        }
        Ok(match self.scan_type {
            ScanType::Equals => value.compare(&self.value)? == Ordering::Equal,
            ScanType::NotEquals => value.compare(&self.value)? != Ordering::Equal,
            ScanType::LessThan => value.compare(&self.value)? == Ordering::Less,
            ScanType::LessThanEquals => value.compare(&self.value)? != Ordering::Greater,
            ScanType::GreaterThan => value.compare(&self.value)? == Ordering::Greater,
            ScanType::GreaterThanEquals => value.compare(&self.value)? != Ordering::Less,
            ScanType::Between => {
                let upper = self.value2.as_ref().expect("checked at construction");
                value.compare(&self.value)? != Ordering::Less
                    && value.compare(upper)? != Ordering::Greater
            }
            ScanType::Like => {
                let pattern = self.like_pattern.as_ref().expect("checked at construction");
                match value.as_str() {
                    Some(s) => pattern.is_match(s),
                    None => {
                        return Err(StrataError::TypeMismatch(
                            "LIKE requires a string column".to_string(),
                        ))
                    }
                }
            }
        })
    }

    fn scan_chunk(
        &self,
        chunk: &Chunk,
        chunk_id: ChunkId,
        column_id: u32,
        pos_list: &mut PosList,
    ) -> Result<()> {
        let columns = chunk.columns();
        let column = &columns[column_id as usize];
        for offset in 0..column.size() {
            if self.matches(&column.get(offset))? {
                pos_list.push(RowId::new(chunk_id, offset as u32));
            }
        }
        Ok(())
    }
}

impl AbstractOperator for TableScan {
    fn name(&self) -> &'static str {
        "TableScan"
    }

    fn execute(&self) -> Result<()> {
        let input = input_table(&self.input)?;
        let column_id = input.column_id_by_name(&self.column_name)?;
        self.check_column_type(&input, column_id)?;

        let mut pos_list = PosList::new();
        for chunk_id in 0..input.chunk_count() {
            let chunk = input.get_chunk(chunk_id as ChunkId);
            self.scan_chunk(&chunk, chunk_id as ChunkId, column_id, &mut pos_list)?;
        }

        let (defs, columns) = reference_view(&input, Arc::new(pos_list))?;
        let output = Table::new_view(defs, Chunk::new_view_chunk(columns));
        self.output.set(Arc::new(output))
    }

    fn get_output(&self) -> Option<Arc<Table>> {
        self.output.get()
    }
}
