//! Stratabase Core Engine
//!
//! A columnar, in-memory relational engine with operator-based execution,
//! snapshot-isolated MVCC and a task scheduler for parallel query plans.

pub mod data;
pub mod operators;
pub mod scheduler;
pub mod storage;
pub mod txn;

// Re-export main types
pub use data::{DataType, ParameterVariant, Value};
pub use operators::AbstractOperator;
pub use scheduler::{install_scheduler, schedule_and_wait, OperatorTask, Scheduler};
pub use storage::{storage_manager, Chunk, PosList, RowId, StorageManager, Table};
pub use txn::{transaction_manager, TransactionContext, TransactionManager};

/// Engine error type
#[derive(Debug, thiserror::Error)]
pub enum StrataError {
    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Table already exists: {0}")]
    DuplicateTable(String),

    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Wrong number of values: expected {expected}, got {actual}")]
    Arity { expected: usize, actual: usize },

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Write conflict on row ({chunk_id}, {chunk_offset}) of table '{table}'")]
    WriteConflict {
        table: String,
        chunk_id: u32,
        chunk_offset: u32,
    },

    #[error("Transaction {0} aborted")]
    Aborted(u64),

    #[error("Transaction {tid} is not active ({reason})")]
    TransactionNotActive { tid: u64, reason: String },

    #[error("Scheduler failure in operator '{operator}': {message}")]
    SchedulerFailure { operator: String, message: String },
}

pub type Result<T> = std::result::Result<T, StrataError>;
