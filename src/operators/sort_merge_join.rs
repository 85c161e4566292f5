//! Sort-merge join with radix partitioning and parallel per-partition
//! merge phases.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::data::Value;
use crate::storage::{Chunk, ChunkId, PosList, RowId, Table, NULL_ROW_ID};
use crate::{Result, StrataError};

use super::table_scan::ScanType;
use super::{input_table, reference_view, AbstractOperator, OutputSlot};

/// Join modes. `Cross` exists as a plan vocabulary name only; cross joins
/// are executed by the Product operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinMode {
    Inner,
    Left,
    Right,
    Outer,
    Cross,
}

impl fmt::Display for JoinMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JoinMode::Inner => "Inner",
            JoinMode::Left => "Left",
            JoinMode::Right => "Right",
            JoinMode::Outer => "Outer",
            JoinMode::Cross => "Cross",
        };
        write!(f, "{}", name)
    }
}

/// A join key materialized out of an input table: the row it came from and
/// its value.
type Materialized = Vec<(RowId, Value)>;

/// Joins two inputs on one column pair with a comparison operator in
/// {=, <, ≤, >, ≥}.
///
/// Phases: materialize each input as (row id, key) pairs, radix-partition
/// by key hash (equal keys co-partitioned; a single partition for non-equi
/// predicates and tiny inputs), sort each partition, then merge
/// run-by-run, a run being a maximal stretch of equal keys. Left/Right/
/// Outer modes pad unmatched rows with null row references. Per-partition
/// position lists are concatenated in partition order, and inputs that were
/// already reference tables are dereferenced so the output stays depth-1.
pub struct SortMergeJoin {
    left: Arc<dyn AbstractOperator>,
    right: Arc<dyn AbstractOperator>,
    left_column: String,
    right_column: String,
    op: ScanType,
    mode: JoinMode,
    output: OutputSlot,
}

impl SortMergeJoin {
    pub fn new<L: Into<String>, R: Into<String>>(
        left: Arc<dyn AbstractOperator>,
        right: Arc<dyn AbstractOperator>,
        column_names: (L, R),
        op: ScanType,
        mode: JoinMode,
    ) -> Result<Self> {
        if mode == JoinMode::Cross {
            return Err(StrataError::Unsupported(
                "cross joins are executed by the Product operator".to_string(),
            ));
        }
        if !matches!(
            op,
            ScanType::Equals
                | ScanType::LessThan
                | ScanType::LessThanEquals
                | ScanType::GreaterThan
                | ScanType::GreaterThanEquals
        ) {
            return Err(StrataError::Unsupported(format!(
                "sort-merge join does not support the {} operator",
                op
            )));
        }
        if op != ScanType::Equals && mode != JoinMode::Inner {
            return Err(StrataError::Unsupported(
                "outer modes are only implemented for equi joins".to_string(),
            ));
        }
        Ok(Self {
            left,
            right,
            left_column: column_names.0.into(),
            right_column: column_names.1.into(),
            op,
            mode,
            output: OutputSlot::new(),
        })
    }

    fn pad_left(&self) -> bool {
        matches!(self.mode, JoinMode::Right | JoinMode::Outer)
    }

    fn pad_right(&self) -> bool {
        matches!(self.mode, JoinMode::Left | JoinMode::Outer)
    }

    /// Materialize a key column. Null keys (outer-join padding upstream)
    /// never match and are kept aside for padding.
    fn materialize(table: &Table, column_id: u32) -> (Materialized, Vec<RowId>) {
        let mut rows = Materialized::with_capacity(table.row_count());
        let mut null_rows = Vec::new();
        for chunk_id in 0..table.chunk_count() {
            let chunk = table.get_chunk(chunk_id as ChunkId);
            let columns = chunk.columns();
            let column = &columns[column_id as usize];
            for offset in 0..column.size() {
                let row_id = RowId::new(chunk_id as ChunkId, offset as u32);
                let value = column.get(offset);
                if value.is_null() {
                    null_rows.push(row_id);
                } else {
                    rows.push((row_id, value));
                }
            }
        }
        (rows, null_rows)
    }

    /// Pick the partition count: a power of two, 1 for non-equi predicates
    /// (the merge needs global order) and for inputs too small to be worth
    /// fanning out.
    fn partition_count(&self, left_rows: usize, right_rows: usize) -> usize {
        if self.op != ScanType::Equals {
            return 1;
        }
        if left_rows.max(right_rows) < 256 {
            return 1;
        }
        rayon::current_num_threads().next_power_of_two().min(16)
    }

    /// Split into `count` partitions by key hash and sort each by key.
    /// Equal keys always land in the same partition.
    fn partition_and_sort(rows: Materialized, count: usize) -> Vec<Materialized> {
        let hasher = ahash::RandomState::with_seeds(
            0x9e37_79b9, 0x85eb_ca6b, 0xc2b2_ae35, 0x27d4_eb2f,
        );
        let mut partitions: Vec<Materialized> = vec![Vec::new(); count];
        let mask = count as u64 - 1;
        for (row_id, value) in rows {
            let slot = if count == 1 {
                0
            } else {
                (value.partition_hash(&hasher) & mask) as usize
            };
            partitions[slot].push((row_id, value));
        }
        for partition in &mut partitions {
            partition.sort_by(|a, b| a.1.compare(&b.1).unwrap_or(Ordering::Equal));
        }
        partitions
    }

    /// Length of the run of equal keys starting at `start`.
    fn run_length(rows: &Materialized, start: usize) -> usize {
        let value = &rows[start].1;
        let mut offset = 1;
        while start + offset < rows.len()
            && rows[start + offset].1.compare(value).unwrap_or(Ordering::Equal) == Ordering::Equal
        {
            offset += 1;
        }
        offset
    }

    /// Merge one partition pair into output position lists.
    fn join_partition(
        &self,
        left: &Materialized,
        right: &Materialized,
    ) -> (PosList, PosList) {
        let mut out_left = PosList::new();
        let mut out_right = PosList::new();

        let emit = |out_left: &mut PosList,
                    out_right: &mut PosList,
                    left_range: std::ops::Range<usize>,
                    right_range: std::ops::Range<usize>| {
            for l in left_range {
                for r in right_range.clone() {
                    out_left.push(left[l].0);
                    out_right.push(right[r].0);
                }
            }
        };
        let pad_right = |out_left: &mut PosList,
                         out_right: &mut PosList,
                         left_range: std::ops::Range<usize>| {
            for l in left_range {
                out_left.push(left[l].0);
                out_right.push(NULL_ROW_ID);
            }
        };
        let pad_left = |out_left: &mut PosList,
                        out_right: &mut PosList,
                        right_range: std::ops::Range<usize>| {
            for r in right_range {
                out_left.push(NULL_ROW_ID);
                out_right.push(right[r].0);
            }
        };

        let left_size = left.len();
        let right_size = right.len();
        let mut l = 0;
        let mut r = 0;
        let mut l_end = if left_size > 0 {
            Self::run_length(left, 0)
        } else {
            0
        };
        let mut r_end = if right_size > 0 {
            Self::run_length(right, 0)
        } else {
            0
        };

        while l < left_size && r < right_size {
            let cmp = left[l].1.compare(&right[r].1).unwrap_or(Ordering::Equal);

            match self.op {
                ScanType::Equals => match cmp {
                    Ordering::Equal => emit(&mut out_left, &mut out_right, l..l_end, r..r_end),
                    Ordering::Less => {
                        if self.pad_right() {
                            pad_right(&mut out_left, &mut out_right, l..l_end);
                        }
                    }
                    Ordering::Greater => {
                        if self.pad_left() {
                            pad_left(&mut out_left, &mut out_right, r..r_end);
                        }
                    }
                },
                ScanType::GreaterThan => {
                    if cmp == Ordering::Greater {
                        emit(&mut out_left, &mut out_right, l..left_size, r..r_end);
                    } else if cmp == Ordering::Equal {
                        emit(&mut out_left, &mut out_right, l_end..left_size, r..r_end);
                    }
                }
                ScanType::GreaterThanEquals => {
                    if cmp != Ordering::Less {
                        emit(&mut out_left, &mut out_right, l..left_size, r..r_end);
                    }
                }
                ScanType::LessThan => {
                    if cmp == Ordering::Less {
                        emit(&mut out_left, &mut out_right, l..l_end, r..right_size);
                    } else if cmp == Ordering::Equal {
                        emit(&mut out_left, &mut out_right, l..l_end, r_end..right_size);
                    }
                }
                ScanType::LessThanEquals => {
                    if cmp != Ordering::Greater {
                        emit(&mut out_left, &mut out_right, l..l_end, r..right_size);
                    }
                }
                _ => unreachable!("rejected at construction"),
            }

            // Advance the side with the smaller run value, or both on a tie.
            if cmp != Ordering::Greater {
                l = l_end;
                if l < left_size {
                    l_end = l + Self::run_length(left, l);
                }
            }
            if cmp != Ordering::Less {
                r = r_end;
                if r < right_size {
                    r_end = r + Self::run_length(right, r);
                }
            }
        }

        // One side exhausted: the tail of the other side pads if the mode
        // asks for it.
        if l == left_size && self.pad_left() {
            pad_left(&mut out_left, &mut out_right, r..right_size);
        }
        if r == right_size && self.pad_right() {
            pad_right(&mut out_left, &mut out_right, l..left_size);
        }

        (out_left, out_right)
    }
}

impl AbstractOperator for SortMergeJoin {
    fn name(&self) -> &'static str {
        "SortMergeJoin"
    }

    fn execute(&self) -> Result<()> {
        let left = input_table(&self.left)?;
        let right = input_table(&self.right)?;

        let left_column = left.column_id_by_name(&self.left_column)?;
        let right_column = right.column_id_by_name(&self.right_column)?;
        let left_type = left.column_type(left_column);
        let right_type = right.column_type(right_column);
        if left_type != right_type {
            return Err(StrataError::TypeMismatch(format!(
                "cannot join {} column '{}' with {} column '{}'",
                left_type, self.left_column, right_type, self.right_column
            )));
        }

        let (left_rows, left_nulls) = Self::materialize(&left, left_column);
        let (right_rows, right_nulls) = Self::materialize(&right, right_column);

        let partition_count = self.partition_count(left_rows.len(), right_rows.len());
        let left_partitions = Self::partition_and_sort(left_rows, partition_count);
        let right_partitions = Self::partition_and_sort(right_rows, partition_count);

        // Per-partition merges are independent; run them in parallel and
        // concatenate in partition order.
        let merged: Vec<(PosList, PosList)> = (0..partition_count)
            .into_par_iter()
            .map(|p| self.join_partition(&left_partitions[p], &right_partitions[p]))
            .collect();

        let mut out_left = PosList::new();
        let mut out_right = PosList::new();
        for (partition_left, partition_right) in merged {
            out_left.extend(partition_left);
            out_right.extend(partition_right);
        }

        // Null-keyed input rows never match; they only surface as padded
        // rows in the outer modes.
        if self.pad_right() {
            for row_id in left_nulls {
                out_left.push(row_id);
                out_right.push(NULL_ROW_ID);
            }
        }
        if self.pad_left() {
            for row_id in right_nulls {
                out_left.push(NULL_ROW_ID);
                out_right.push(row_id);
            }
        }

        let (mut defs, mut columns) = reference_view(&left, Arc::new(out_left))?;
        let (right_defs, right_columns) = reference_view(&right, Arc::new(out_right))?;
        defs.extend(right_defs);
        columns.extend(right_columns);

        let output = Table::new_view(defs, Chunk::new_view_chunk(columns));
        self.output.set(Arc::new(output))
    }

    fn get_output(&self) -> Option<Arc<Table>> {
        self.output.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DataType;
    use crate::operators::TableWrapper;
    use std::collections::HashSet;

    fn keyed_table(rows: &[(&str, i32)]) -> Arc<dyn AbstractOperator> {
        let table = Table::new(8);
        table
            .add_column_definition("tag", DataType::String)
            .unwrap();
        table.add_column_definition("key", DataType::Int32).unwrap();
        for (tag, key) in rows {
            table
                .append(vec![Value::from(*tag), Value::Int32(*key)])
                .unwrap();
        }
        let wrapper = Arc::new(TableWrapper::new(Arc::new(table)));
        wrapper.execute().unwrap();
        wrapper
    }

    fn tag_pairs(join: &SortMergeJoin) -> Vec<(Value, Value)> {
        let output = join.get_output().unwrap();
        let chunk = output.get_chunk(0);
        let columns = chunk.columns();
        (0..chunk.row_count())
            .map(|i| (columns[0].get(i), columns[2].get(i)))
            .collect()
    }

    fn tag_set(join: &SortMergeJoin) -> HashSet<(String, String)> {
        tag_pairs(join)
            .into_iter()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect()
    }

    #[test]
    fn test_inner_equi_join() {
        let left = keyed_table(&[("a", 1), ("b", 1), ("c", 2)]);
        let right = keyed_table(&[("x", 1), ("y", 2), ("z", 2)]);
        let join =
            SortMergeJoin::new(left, right, ("key", "key"), ScanType::Equals, JoinMode::Inner)
                .unwrap();
        join.execute().unwrap();

        let expected: HashSet<(String, String)> = [("a", "x"), ("b", "x"), ("c", "y"), ("c", "z")]
            .iter()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect();
        assert_eq!(tag_set(&join), expected);
        assert_eq!(join.get_output().unwrap().row_count(), 4);
    }

    #[test]
    fn test_left_outer_join_pads_unmatched() {
        let left = keyed_table(&[("a", 1), ("b", 1), ("c", 2), ("d", 3)]);
        let right = keyed_table(&[("x", 1), ("y", 2), ("z", 2)]);
        let join =
            SortMergeJoin::new(left, right, ("key", "key"), ScanType::Equals, JoinMode::Left)
                .unwrap();
        join.execute().unwrap();

        let pairs = tag_set(&join);
        assert_eq!(pairs.len(), 5);
        assert!(pairs.contains(&("d".to_string(), "NULL".to_string())));
    }

    #[test]
    fn test_full_outer_join_covers_both_sides() {
        let left = keyed_table(&[("a", 1), ("d", 3)]);
        let right = keyed_table(&[("x", 1), ("w", 9)]);
        let join =
            SortMergeJoin::new(left, right, ("key", "key"), ScanType::Equals, JoinMode::Outer)
                .unwrap();
        join.execute().unwrap();

        let pairs = tag_set(&join);
        assert!(pairs.contains(&("a".to_string(), "x".to_string())));
        assert!(pairs.contains(&("d".to_string(), "NULL".to_string())));
        assert!(pairs.contains(&("NULL".to_string(), "w".to_string())));
        assert_eq!(pairs.len(), 3);
    }

    #[test]
    fn test_less_than_join() {
        let left = keyed_table(&[("a", 1), ("b", 2)]);
        let right = keyed_table(&[("x", 1), ("y", 2), ("z", 3)]);
        let join = SortMergeJoin::new(
            left,
            right,
            ("key", "key"),
            ScanType::LessThan,
            JoinMode::Inner,
        )
        .unwrap();
        join.execute().unwrap();

        // a(1) < y(2), z(3); b(2) < z(3)
        let expected: HashSet<(String, String)> = [("a", "y"), ("a", "z"), ("b", "z")]
            .iter()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect();
        assert_eq!(tag_set(&join), expected);
    }

    #[test]
    fn test_greater_equals_join() {
        let left = keyed_table(&[("a", 2)]);
        let right = keyed_table(&[("x", 1), ("y", 2), ("z", 3)]);
        let join = SortMergeJoin::new(
            left,
            right,
            ("key", "key"),
            ScanType::GreaterThanEquals,
            JoinMode::Inner,
        )
        .unwrap();
        join.execute().unwrap();

        let expected: HashSet<(String, String)> = [("a", "x"), ("a", "y")]
            .iter()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect();
        assert_eq!(tag_set(&join), expected);
    }

    #[test]
    fn test_equi_join_matches_nested_loop() {
        // Larger input so several radix partitions are in play.
        let left_rows: Vec<(String, i32)> =
            (0..600).map(|i| (format!("l{}", i), i % 37)).collect();
        let right_rows: Vec<(String, i32)> =
            (0..400).map(|i| (format!("r{}", i), i % 41)).collect();

        let left = keyed_table(
            &left_rows
                .iter()
                .map(|(t, k)| (t.as_str(), *k))
                .collect::<Vec<_>>(),
        );
        let right = keyed_table(
            &right_rows
                .iter()
                .map(|(t, k)| (t.as_str(), *k))
                .collect::<Vec<_>>(),
        );

        let join =
            SortMergeJoin::new(left, right, ("key", "key"), ScanType::Equals, JoinMode::Inner)
                .unwrap();
        join.execute().unwrap();

        let mut expected = 0usize;
        for (_, lk) in &left_rows {
            for (_, rk) in &right_rows {
                if lk == rk {
                    expected += 1;
                }
            }
        }
        assert_eq!(join.get_output().unwrap().row_count(), expected);
    }

    #[test]
    fn test_non_equi_outer_rejected() {
        let left = keyed_table(&[("a", 1)]);
        let right = keyed_table(&[("x", 1)]);
        assert!(matches!(
            SortMergeJoin::new(left, right, ("key", "key"), ScanType::LessThan, JoinMode::Left),
            Err(StrataError::Unsupported(_))
        ));
    }

    #[test]
    fn test_cross_mode_rejected() {
        let left = keyed_table(&[("a", 1)]);
        let right = keyed_table(&[("x", 1)]);
        assert!(matches!(
            SortMergeJoin::new(left, right, ("key", "key"), ScanType::Equals, JoinMode::Cross),
            Err(StrataError::Unsupported(_))
        ));
    }

    #[test]
    fn test_join_type_mismatch() {
        let left = keyed_table(&[("a", 1)]);
        let right = keyed_table(&[("x", 1)]);
        let join =
            SortMergeJoin::new(left, right, ("key", "tag"), ScanType::Equals, JoinMode::Inner)
                .unwrap();
        assert!(matches!(join.execute(), Err(StrataError::TypeMismatch(_))));
    }
}
