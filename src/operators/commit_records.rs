//! Terminal commit operator.

use std::sync::Arc;

use crate::storage::Table;
use crate::txn::{transaction_manager, TransactionContext};
use crate::Result;

use super::{AbstractOperator, ContextSlot};

/// Finishes a prepared transaction: stamps the change sets with the
/// reserved commit CID and publishes it through the transaction manager.
/// Scheduled after every modifying operator of the transaction; produces
/// no output table.
pub struct CommitRecords {
    context: ContextSlot,
}

impl CommitRecords {
    pub fn new() -> Self {
        Self {
            context: ContextSlot::new(),
        }
    }
}

impl Default for CommitRecords {
    fn default() -> Self {
        Self::new()
    }
}

impl AbstractOperator for CommitRecords {
    fn name(&self) -> &'static str {
        "CommitRecords"
    }

    fn execute(&self) -> Result<()> {
        let context = self.context.get(self.name())?;
        transaction_manager().commit(&context)?;
        Ok(())
    }

    fn get_output(&self) -> Option<Arc<Table>> {
        None
    }

    fn set_transaction_context(&self, context: Arc<TransactionContext>) {
        self.context.set(context);
    }
}
