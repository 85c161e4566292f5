//! Physical operators.
//!
//! Every operator has up to two input operators and produces exactly one
//! output table. The lifecycle has three phases: construction (inputs may
//! not have executed yet, so inputs' outputs must not be read), a single
//! `execute` call (ordered after all predecessors by the scheduler), and
//! cheap `get_output` reads by consumers. Operators are never executed
//! twice.

mod commit_records;
mod expression;
mod get_table;
mod insert;
mod product;
mod projection;
mod sort_merge_join;
mod table_scan;
mod table_wrapper;
mod update;
mod validate;


pub use commit_records::CommitRecords;
pub use expression::{ArithmeticOperator, Expression};
pub use get_table::GetTable;
pub use insert::Insert;
pub use product::Product;
pub use projection::{Projection, ProjectionDefinition};
pub use sort_merge_join::{JoinMode, SortMergeJoin};
pub use table_scan::{ScanType, TableScan};
pub use table_wrapper::TableWrapper;
pub use update::Update;
pub use validate::Validate;

use std::sync::Arc;

use parking_lot::RwLock;

use crate::storage::{Column, ColumnDefinition, PosList, ReferenceColumn, Table, NULL_ROW_ID};
use crate::txn::TransactionContext;
use crate::{Result, StrataError};

/// Common interface of all physical operators.
pub trait AbstractOperator: Send + Sync {
    /// Operator name for diagnostics and task labels.
    fn name(&self) -> &'static str;

    /// Perform the operator's work. All predecessors have executed.
    fn execute(&self) -> Result<()>;

    /// The produced table; `None` until `execute` has completed.
    fn get_output(&self) -> Option<Arc<Table>>;

    /// Attach the transaction context. Pure transforms ignore it; operators
    /// touching MVCC metadata require it before execution.
    fn set_transaction_context(&self, _context: Arc<TransactionContext>) {}
}

/// Write-once output slot shared by operator implementations.
pub(crate) struct OutputSlot {
    output: RwLock<Option<Arc<Table>>>,
}

impl OutputSlot {
    pub fn new() -> Self {
        Self {
            output: RwLock::new(None),
        }
    }

    pub fn set(&self, table: Arc<Table>) -> Result<()> {
        let mut slot = self.output.write();
        if slot.is_some() {
            return Err(StrataError::Unsupported(
                "operator executed twice".to_string(),
            ));
        }
        *slot = Some(table);
        Ok(())
    }

    pub fn get(&self) -> Option<Arc<Table>> {
        self.output.read().clone()
    }
}

/// Transaction-context slot for operators that participate in MVCC.
pub(crate) struct ContextSlot {
    context: RwLock<Option<Arc<TransactionContext>>>,
}

impl ContextSlot {
    pub fn new() -> Self {
        Self {
            context: RwLock::new(None),
        }
    }

    pub fn set(&self, context: Arc<TransactionContext>) {
        *self.context.write() = Some(context);
    }

    pub fn get(&self, operator: &str) -> Result<Arc<TransactionContext>> {
        self.context
            .read()
            .clone()
            .ok_or_else(|| StrataError::Unsupported(format!(
                "{} requires a transaction context",
                operator
            )))
    }
}

/// Fetch an input operator's output, which the scheduler guarantees exists.
pub(crate) fn input_table(op: &Arc<dyn AbstractOperator>) -> Result<Arc<Table>> {
    op.get_output().ok_or_else(|| StrataError::SchedulerFailure {
        operator: op.name().to_string(),
        message: "input operator has not produced an output".to_string(),
    })
}

/// Build reference columns exposing every column of `input` through
/// `pos_list`, dereferencing one level so reference depth stays at 1.
///
/// For a value-table input all columns share `pos_list` directly. For a
/// reference-table input each column's own position list is composed with
/// `pos_list`; composed lists are shared between columns that share their
/// underlying list.
pub(crate) fn reference_view(
    input: &Arc<Table>,
    pos_list: Arc<PosList>,
) -> Result<(Vec<ColumnDefinition>, Vec<Column>)> {
    let defs = input.column_definitions();
    let mut columns = Vec::with_capacity(defs.len());

    if !input.is_reference_table() {
        for column_id in 0..defs.len() {
            columns.push(Column::Reference(ReferenceColumn::new(
                Arc::clone(input),
                column_id as u32,
                Arc::clone(&pos_list),
            )?));
        }
        return Ok((defs, columns));
    }

    // Reference input: compose through each column's own position list.
    // Columns sharing an underlying list also share the composed list.
    let chunk = input.get_chunk(0);
    let input_columns = chunk.columns();
    let mut composed: Vec<(*const PosList, Arc<PosList>)> = Vec::new();

    for column in input_columns.iter() {
        let ref_column = match column {
            Column::Reference(ref_column) => ref_column,
            // Materialized expression columns are copied through the
            // position list; they have no base table to reference.
            Column::Value(value_column) => {
                let mut subset = crate::storage::ValueColumn::with_capacity(
                    value_column.data_type(),
                    pos_list.len(),
                );
                for row in pos_list.iter() {
                    if row.is_null() {
                        return Err(StrataError::Unsupported(
                            "cannot pad a materialized expression column with nulls"
                                .to_string(),
                        ));
                    }
                    subset.push(value_column.get(row.chunk_offset as usize))?;
                }
                columns.push(Column::Value(subset));
                continue;
            }
        };
        let inner = ref_column.pos_list();
        let inner_ptr = Arc::as_ptr(inner);
        let list = match composed.iter().find(|(ptr, _)| *ptr == inner_ptr) {
            Some((_, list)) => Arc::clone(list),
            None => {
                let list: Arc<PosList> = Arc::new(
                    pos_list
                        .iter()
                        .map(|row| {
                            if row.is_null() {
                                NULL_ROW_ID
                            } else {
                                inner[row.chunk_offset as usize]
                            }
                        })
                        .collect(),
                );
                composed.push((inner_ptr, Arc::clone(&list)));
                list
            }
        };
        columns.push(Column::Reference(ReferenceColumn::new(
            Arc::clone(ref_column.referenced_table()),
            ref_column.referenced_column_id(),
            list,
        )?));
    }

    Ok((defs, columns))
}
