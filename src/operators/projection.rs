//! Column projection with optional scalar expressions.

use std::sync::Arc;

use crate::data::{DataType, Value};
use crate::storage::{
    Chunk, ChunkId, Column, ColumnDefinition, PosList, ReferenceColumn, RowId, Table, ValueColumn,
};
use crate::{Result, StrataError};

use super::expression::Expression;
use super::{input_table, AbstractOperator, OutputSlot};

/// One output column of a projection: a named input column (zero-copy) or a
/// scalar expression with an explicit output type (materialized).
#[derive(Debug, Clone)]
pub enum ProjectionDefinition {
    Column(String),
    Expression {
        expression: Expression,
        name: String,
        data_type: DataType,
    },
}

impl ProjectionDefinition {
    pub fn column(name: impl Into<String>) -> Self {
        ProjectionDefinition::Column(name.into())
    }

    pub fn expression(
        expression: Expression,
        name: impl Into<String>,
        data_type: DataType,
    ) -> Self {
        ProjectionDefinition::Expression {
            expression,
            name: name.into(),
            data_type,
        }
    }
}

/// Emits a reference table whose columns correspond one-for-one to the
/// projection definitions, in definition order.
pub struct Projection {
    input: Arc<dyn AbstractOperator>,
    definitions: Vec<ProjectionDefinition>,
    output: OutputSlot,
}

impl Projection {
    pub fn new(input: Arc<dyn AbstractOperator>, definitions: Vec<ProjectionDefinition>) -> Self {
        Self {
            input,
            definitions,
            output: OutputSlot::new(),
        }
    }

    /// The row ids of every input row, in storage order. Shared by all
    /// plain-column outputs when the input owns its values.
    fn identity_pos_list(input: &Table) -> PosList {
        let mut pos_list = PosList::with_capacity(input.row_count());
        for chunk_id in 0..input.chunk_count() {
            let rows = input.get_chunk(chunk_id as ChunkId).row_count();
            for offset in 0..rows {
                pos_list.push(RowId::new(chunk_id as ChunkId, offset as u32));
            }
        }
        pos_list
    }

    /// Evaluate an expression across all input rows into a typed column.
    fn materialize_expression(
        input: &Table,
        expression: &Expression,
        data_type: DataType,
        name: &str,
    ) -> Result<ValueColumn> {
        // Resolve referenced columns once, not per row.
        let referenced = expression.referenced_columns();
        let mut column_ids = Vec::with_capacity(referenced.len());
        for column_name in &referenced {
            column_ids.push((column_name.clone(), input.column_id_by_name(column_name)?));
        }

        let mut result = ValueColumn::with_capacity(data_type, input.row_count());
        for chunk_id in 0..input.chunk_count() {
            let chunk = input.get_chunk(chunk_id as ChunkId);
            let columns = chunk.columns();
            for offset in 0..chunk.row_count() {
                let resolve = |wanted: &str| -> Result<Value> {
                    let (_, column_id) = column_ids
                        .iter()
                        .find(|(name, _)| name == wanted)
                        .expect("resolved at start of materialization");
                    Ok(columns[*column_id as usize].get(offset))
                };
                let value = expression.evaluate(&resolve)?;
                if value.data_type() != Some(data_type) {
                    return Err(StrataError::TypeMismatch(format!(
                        "expression column '{}' declared {} but produced {:?}",
                        name, data_type, value
                    )));
                }
                result.push(value)?;
            }
        }
        Ok(result)
    }
}

impl AbstractOperator for Projection {
    fn name(&self) -> &'static str {
        "Projection"
    }

    fn execute(&self) -> Result<()> {
        let input = input_table(&self.input)?;

        let input_chunk = (input.chunk_count() > 0).then(|| input.get_chunk(0));
        let mut identity: Option<Arc<PosList>> = None;

        let mut defs = Vec::with_capacity(self.definitions.len());
        let mut columns = Vec::with_capacity(self.definitions.len());

        for definition in &self.definitions {
            match definition {
                ProjectionDefinition::Column(name) => {
                    let column_id = input.column_id_by_name(name)?;
                    defs.push(ColumnDefinition::new(name.clone(), input.column_type(column_id)));

                    if input.is_reference_table() {
                        // Clone the view: shares the position list and the
                        // referenced base table, keeping depth at 1.
                        let chunk = input_chunk.as_ref().expect("reference tables have one chunk");
                        let guard = chunk.columns();
                        match &guard[column_id as usize] {
                            Column::Reference(ref_column) => {
                                columns.push(Column::Reference(ref_column.clone()));
                            }
                            Column::Value(value_column) => {
                                columns.push(Column::Value(value_column.clone()));
                            }
                        }
                    } else {
                        let pos_list = identity
                            .get_or_insert_with(|| Arc::new(Self::identity_pos_list(&input)));
                        columns.push(Column::Reference(ReferenceColumn::new(
                            Arc::clone(&input),
                            column_id,
                            Arc::clone(pos_list),
                        )?));
                    }
                }
                ProjectionDefinition::Expression {
                    expression,
                    name,
                    data_type,
                } => {
                    defs.push(ColumnDefinition::new(name.clone(), *data_type));
                    columns.push(Column::Value(Self::materialize_expression(
                        &input, expression, *data_type, name,
                    )?));
                }
            }
        }

        let output = Table::new_view(defs, Chunk::new_view_chunk(columns));
        self.output.set(Arc::new(output))
    }

    fn get_output(&self) -> Option<Arc<Table>> {
        self.output.get()
    }
}
