//! Task scheduling: dependency-ordered execution of operator DAGs on a
//! fixed-size worker pool, or inline on the caller's thread when no
//! scheduler is installed.

mod task;

pub use task::{OperatorTask, TaskState};

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex, RwLock};

use crate::{Result, StrataError};

static CURRENT_SCHEDULER: Lazy<RwLock<Option<Arc<Scheduler>>>> =
    Lazy::new(|| RwLock::new(None));

/// Install the process-wide scheduler. Decided once at startup; batches
/// submitted afterwards run on its worker pool.
pub fn install_scheduler(scheduler: Arc<Scheduler>) {
    log::info!(
        "installing scheduler with {} workers",
        scheduler.worker_count()
    );
    *CURRENT_SCHEDULER.write() = Some(scheduler);
}

/// The installed scheduler, if any.
pub fn current_scheduler() -> Option<Arc<Scheduler>> {
    CURRENT_SCHEDULER.read().clone()
}

/// Submit a batch of tasks and block until every task reaches a terminal
/// state. Runs on the installed scheduler's pool, or inline in submission
/// order when none is installed.
pub fn schedule_and_wait(tasks: Vec<Arc<OperatorTask>>) -> Result<()> {
    match current_scheduler() {
        Some(scheduler) => scheduler.schedule_and_wait(&tasks),
        None => run_inline(&tasks),
    }
}

/// Inline fallback: tasks run on the caller's thread in submission order,
/// which therefore must be a topological order of the batch.
fn run_inline(tasks: &[Arc<OperatorTask>]) -> Result<()> {
    let mut failure: Option<StrataError> = None;
    for task in tasks {
        if failure.is_some() {
            task.transition(TaskState::Pending, TaskState::Cancelled);
            continue;
        }
        for predecessor in task.predecessors() {
            if predecessor.state() != TaskState::Completed {
                return Err(StrataError::SchedulerFailure {
                    operator: task.operator().name().to_string(),
                    message: "predecessor not completed; batch not in topological order"
                        .to_string(),
                });
            }
        }
        task.transition(TaskState::Pending, TaskState::Running);
        match task.operator().execute() {
            Ok(()) => {
                task.transition(TaskState::Running, TaskState::Completed);
            }
            Err(e) => {
                task.transition(TaskState::Running, TaskState::Failed);
                failure = Some(e);
            }
        }
    }
    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

// ============================================================================
// Worker-pool scheduler
// ============================================================================

/// Executes ready tasks on a fixed-size thread pool. A task becomes ready
/// when all of its predecessors have completed; a failure cancels every
/// not-yet-started task in the same batch.
pub struct Scheduler {
    pool: Arc<rayon::ThreadPool>,
    worker_count: usize,
}

impl Scheduler {
    /// Create a scheduler with `worker_count` workers; 0 derives the count
    /// from the available parallelism.
    pub fn new(worker_count: usize) -> Self {
        let worker_count = if worker_count == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            worker_count
        };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(worker_count)
            .thread_name(|i| format!("strata-worker-{}", i))
            .build()
            .expect("worker pool construction cannot fail with a fixed thread count");
        Self {
            pool: Arc::new(pool),
            worker_count,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Submit a batch and block the caller until all of its tasks are
    /// terminal. The first failure is returned; tasks that had not started
    /// by then are cancelled and never execute.
    pub fn schedule_and_wait(&self, tasks: &[Arc<OperatorTask>]) -> Result<()> {
        if tasks.is_empty() {
            return Ok(());
        }
        let batch = Batch::build(tasks)?;

        // Seed the pool with the initially ready tasks.
        let ready: Vec<usize> = (0..tasks.len())
            .filter(|&i| batch.pending_predecessors[i].load(Ordering::Acquire) == 0)
            .collect();
        for index in ready {
            self.spawn_task(&batch, index);
        }

        let mut state = batch.state.lock();
        while state.remaining > 0 {
            batch.done.wait(&mut state);
        }
        match state.error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn spawn_task(&self, batch: &Arc<Batch>, index: usize) {
        let batch = Arc::clone(batch);
        let pool = Arc::clone(&self.pool);
        let worker_count = self.worker_count;
        self.pool.spawn(move || {
            let this = Scheduler { pool, worker_count };
            this.run_task(&batch, index);
        });
    }

    fn run_task(&self, batch: &Arc<Batch>, index: usize) {
        let task = &batch.tasks[index];

        // A failed batch cancels everything that has not started.
        if batch.state.lock().error.is_some() {
            if task.transition(TaskState::Pending, TaskState::Cancelled) {
                batch.finish_one();
            }
            return;
        }
        if !task.transition(TaskState::Pending, TaskState::Running) {
            // Cancelled between spawn and start.
            return;
        }

        let operator = Arc::clone(task.operator());
        let result = catch_unwind(AssertUnwindSafe(|| operator.execute()));

        match result {
            Ok(Ok(())) => {
                task.transition(TaskState::Running, TaskState::Completed);
                batch.finish_one();
                for &successor in &batch.successors[index] {
                    if batch.pending_predecessors[successor].fetch_sub(1, Ordering::AcqRel) == 1 {
                        self.spawn_task(batch, successor);
                    }
                }
            }
            Ok(Err(e)) => {
                task.transition(TaskState::Running, TaskState::Failed);
                batch.fail(e);
            }
            Err(_) => {
                task.transition(TaskState::Running, TaskState::Failed);
                batch.fail(StrataError::SchedulerFailure {
                    operator: task.operator().name().to_string(),
                    message: "worker thread panicked".to_string(),
                });
            }
        }
    }
}

struct BatchState {
    remaining: usize,
    error: Option<StrataError>,
}

/// Shared state of one `schedule_and_wait` batch. Successor edges live
/// here, not on the tasks, so predecessors never own their dependents.
struct Batch {
    tasks: Vec<Arc<OperatorTask>>,
    successors: Vec<Vec<usize>>,
    pending_predecessors: Vec<AtomicUsize>,
    state: Mutex<BatchState>,
    done: Condvar,
}

impl Batch {
    fn build(tasks: &[Arc<OperatorTask>]) -> Result<Arc<Self>> {
        let mut successors: Vec<Vec<usize>> = vec![Vec::new(); tasks.len()];
        let mut pending = Vec::with_capacity(tasks.len());

        for (index, task) in tasks.iter().enumerate() {
            if task.state() != TaskState::Pending {
                return Err(StrataError::Unsupported(format!(
                    "task for operator '{}' was already scheduled",
                    task.operator().name()
                )));
            }
            let mut count = 0;
            for predecessor in task.predecessors() {
                let position = tasks.iter().position(|t| Arc::ptr_eq(t, predecessor));
                match position {
                    Some(p) => {
                        successors[p].push(index);
                        count += 1;
                    }
                    None => {
                        return Err(StrataError::Unsupported(format!(
                            "predecessor of operator '{}' is not part of the batch",
                            task.operator().name()
                        )))
                    }
                }
            }
            pending.push(AtomicUsize::new(count));
        }

        Ok(Arc::new(Self {
            tasks: tasks.to_vec(),
            successors,
            pending_predecessors: pending,
            state: Mutex::new(BatchState {
                remaining: tasks.len(),
                error: None,
            }),
            done: Condvar::new(),
        }))
    }

    /// One task reached a terminal state.
    fn finish_one(&self) {
        let mut state = self.state.lock();
        state.remaining -= 1;
        if state.remaining == 0 {
            self.done.notify_all();
        }
    }

    /// Record the first failure and cancel everything still pending.
    fn fail(&self, error: StrataError) {
        let mut state = self.state.lock();
        log::debug!("batch failed: {}", error);
        if state.error.is_none() {
            state.error = Some(error);
        }
        state.remaining -= 1;
        for task in &self.tasks {
            if task.transition(TaskState::Pending, TaskState::Cancelled) {
                state.remaining -= 1;
            }
        }
        if state.remaining == 0 {
            self.done.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DataType, Value};
    use crate::operators::{AbstractOperator, Product, ScanType, TableScan, TableWrapper};
    use crate::storage::Table;

    fn number_source(values: &[i32]) -> Arc<dyn AbstractOperator> {
        let table = Table::new(16);
        table.add_column_definition("n", DataType::Int32).unwrap();
        for v in values {
            table.append(vec![Value::Int32(*v)]).unwrap();
        }
        Arc::new(TableWrapper::new(Arc::new(table)))
    }

    fn scan_gt(
        input: &Arc<dyn AbstractOperator>,
        bound: i32,
    ) -> Arc<dyn AbstractOperator> {
        Arc::new(
            TableScan::new(
                Arc::clone(input),
                "n",
                ScanType::GreaterThan,
                Value::Int32(bound),
                None,
            )
            .unwrap(),
        )
    }

    /// source → two scans → product, as a task batch.
    fn diamond() -> (Vec<Arc<OperatorTask>>, Arc<dyn AbstractOperator>) {
        let source = number_source(&[1, 2, 3, 4, 5]);
        let left = scan_gt(&source, 2);
        let right = scan_gt(&source, 3);
        let product: Arc<dyn AbstractOperator> =
            Arc::new(Product::new(Arc::clone(&left), Arc::clone(&right)));

        let source_task = Arc::new(OperatorTask::new(source, Vec::new()));
        let left_task = Arc::new(OperatorTask::new(left, vec![Arc::clone(&source_task)]));
        let right_task = Arc::new(OperatorTask::new(right, vec![Arc::clone(&source_task)]));
        let product_task = Arc::new(OperatorTask::new(
            Arc::clone(&product),
            vec![Arc::clone(&left_task), Arc::clone(&right_task)],
        ));

        (
            vec![source_task, left_task, right_task, product_task],
            product,
        )
    }

    #[test]
    fn test_inline_execution() {
        let (tasks, product) = diamond();
        run_inline(&tasks).unwrap();

        assert!(tasks.iter().all(|t| t.state() == TaskState::Completed));
        // 3 rows > 2, 2 rows > 3.
        assert_eq!(product.get_output().unwrap().row_count(), 6);
    }

    #[test]
    fn test_pool_execution() {
        let (tasks, product) = diamond();
        let scheduler = Scheduler::new(4);
        scheduler.schedule_and_wait(&tasks).unwrap();

        assert!(tasks.iter().all(|t| t.state() == TaskState::Completed));
        assert_eq!(product.get_output().unwrap().row_count(), 6);
    }

    #[test]
    fn test_failure_cancels_dependents() {
        let missing: Arc<dyn AbstractOperator> =
            Arc::new(crate::operators::GetTable::new("scheduler_no_such_table"));
        let scan = scan_gt(&missing, 0);

        let missing_task = Arc::new(OperatorTask::new(missing, Vec::new()));
        let scan_task = Arc::new(OperatorTask::new(scan, vec![Arc::clone(&missing_task)]));
        let tasks = vec![missing_task, scan_task];

        let scheduler = Scheduler::new(2);
        let result = scheduler.schedule_and_wait(&tasks);
        assert!(matches!(result, Err(StrataError::TableNotFound(_))));
        assert_eq!(tasks[0].state(), TaskState::Failed);
        assert_eq!(tasks[1].state(), TaskState::Cancelled);
        assert!(tasks[1].operator().get_output().is_none());
    }

    #[test]
    fn test_inline_failure_cancels_rest() {
        let missing: Arc<dyn AbstractOperator> =
            Arc::new(crate::operators::GetTable::new("inline_no_such_table"));
        let scan = scan_gt(&missing, 0);

        let missing_task = Arc::new(OperatorTask::new(missing, Vec::new()));
        let scan_task = Arc::new(OperatorTask::new(scan, vec![Arc::clone(&missing_task)]));
        let tasks = vec![missing_task, scan_task];

        assert!(run_inline(&tasks).is_err());
        assert_eq!(tasks[1].state(), TaskState::Cancelled);
    }

    #[test]
    fn test_batch_must_be_closed() {
        let source = number_source(&[1]);
        let scan = scan_gt(&source, 0);
        let source_task = Arc::new(OperatorTask::new(source, Vec::new()));
        let scan_task = Arc::new(OperatorTask::new(scan, vec![source_task]));

        let scheduler = Scheduler::new(2);
        // The predecessor is missing from the batch.
        assert!(matches!(
            scheduler.schedule_and_wait(&[scan_task]),
            Err(StrataError::Unsupported(_))
        ));
    }

    #[test]
    fn test_reused_task_rejected() {
        let source = number_source(&[1]);
        let task = Arc::new(OperatorTask::new(source, Vec::new()));
        let scheduler = Scheduler::new(2);
        scheduler.schedule_and_wait(&[Arc::clone(&task)]).unwrap();
        assert!(scheduler.schedule_and_wait(&[task]).is_err());
    }
}
