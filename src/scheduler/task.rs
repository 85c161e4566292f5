//! Operator tasks: one operator plus its predecessor edges.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::operators::AbstractOperator;

/// Terminal and non-terminal task states. A task is done once it reaches
/// Completed, Failed or Cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }
}

/// Wraps a single operator with an ordered list of predecessor tasks.
///
/// Tasks hold strong references to their predecessors only; successor
/// references live in the scheduler for the duration of a batch, so task
/// graphs stay acyclic in ownership as well as in structure.
pub struct OperatorTask {
    operator: Arc<dyn AbstractOperator>,
    predecessors: Vec<Arc<OperatorTask>>,
    state: Mutex<TaskState>,
}

impl OperatorTask {
    pub fn new(operator: Arc<dyn AbstractOperator>, predecessors: Vec<Arc<OperatorTask>>) -> Self {
        Self {
            operator,
            predecessors,
            state: Mutex::new(TaskState::Pending),
        }
    }

    pub fn operator(&self) -> &Arc<dyn AbstractOperator> {
        &self.operator
    }

    pub fn predecessors(&self) -> &[Arc<OperatorTask>] {
        &self.predecessors
    }

    pub fn state(&self) -> TaskState {
        *self.state.lock()
    }

    /// Move from `from` to `to`; returns whether this call made the
    /// transition. Terminal states are never left again.
    pub(super) fn transition(&self, from: TaskState, to: TaskState) -> bool {
        let mut state = self.state.lock();
        if *state == from {
            *state = to;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::TableWrapper;
    use crate::storage::Table;

    fn dummy_task() -> OperatorTask {
        let wrapper: Arc<dyn AbstractOperator> =
            Arc::new(TableWrapper::new(Arc::new(Table::new(1))));
        OperatorTask::new(wrapper, Vec::new())
    }

    #[test]
    fn test_state_machine() {
        let task = dummy_task();
        assert_eq!(task.state(), TaskState::Pending);
        assert!(!TaskState::Pending.is_terminal());

        assert!(task.transition(TaskState::Pending, TaskState::Running));
        assert!(task.transition(TaskState::Running, TaskState::Completed));
        assert!(task.state().is_terminal());

        // No way out of a terminal state.
        assert!(!task.transition(TaskState::Completed, TaskState::Running));
        assert!(!task.transition(TaskState::Running, TaskState::Failed));
    }

    #[test]
    fn test_predecessor_edges() {
        let first = Arc::new(dummy_task());
        let second = OperatorTask::new(
            Arc::clone(first.operator()),
            vec![Arc::clone(&first)],
        );
        assert_eq!(second.predecessors().len(), 1);
        assert!(Arc::ptr_eq(&second.predecessors()[0], &first));
    }
}
