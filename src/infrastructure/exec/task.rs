//! Task types for the central executor

use futures::future::BoxFuture;
use std::fmt;
use uuid::Uuid;

/// Executor priority bands, most urgent first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ExecPriority {
    /// Loads for immediately visible UI nodes.
    P1UserLoad = 1,
    /// Cache loads the user is waiting on (e.g. at startup).
    P2UserRelevantCacheLoad = 2,
    /// Batched updates from disk/change-log monitoring.
    P3LiveUpdate = 3,
    /// Whole-tree downloads, diffs, and other long user tasks.
    P4LongRunningUserTask = 4,
    /// Op execution; drained from the op graph, not from a task queue.
    P5UserOpExecution = 5,
    /// Cache loads for trees not currently displayed.
    P6BackgroundCacheLoad = 6,
    /// Signature calculations.
    P7SignatureCalc = 7,
}

/// Priorities drained before op execution is considered.
pub const FIRST_PRIORITY_LIST: [ExecPriority; 4] = [
    ExecPriority::P1UserLoad,
    ExecPriority::P2UserRelevantCacheLoad,
    ExecPriority::P3LiveUpdate,
    ExecPriority::P4LongRunningUserTask,
];

/// Priorities drained only when nothing above is runnable.
pub const SECOND_PRIORITY_LIST: [ExecPriority; 2] = [
    ExecPriority::P6BackgroundCacheLoad,
    ExecPriority::P7SignatureCalc,
];

pub type TaskFuture = BoxFuture<'static, anyhow::Result<()>>;
pub type TaskFn = Box<dyn FnOnce() -> TaskFuture + Send>;

/// One unit of schedulable work.
///
/// A task may name a parent; the parent is considered complete only once all
/// of its descendants have completed, and its `next_task` (if any) is
/// released to the queues only then.
pub struct Task {
    pub task_uuid: Uuid,
    pub priority: ExecPriority,
    pub label: String,
    pub parent: Option<Uuid>,
    pub next_task: Option<Box<Task>>,
    pub func: TaskFn,
}

impl Task {
    pub fn new<F>(priority: ExecPriority, label: impl Into<String>, func: F) -> Self
    where
        F: FnOnce() -> TaskFuture + Send + 'static,
    {
        Self {
            task_uuid: Uuid::new_v4(),
            priority,
            label: label.into(),
            parent: None,
            next_task: None,
            func: Box::new(func),
        }
    }

    pub fn with_parent(mut self, parent: Uuid) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_next_task(mut self, next: Task) -> Self {
        self.next_task = Some(Box::new(next));
        self
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("task_uuid", &self.task_uuid)
            .field("priority", &self.priority)
            .field("label", &self.label)
            .field("parent", &self.parent)
            .finish()
    }
}

/// Coarse engine state derived from queue depths and pending ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineSummaryState {
    /// Still getting up to speed (user-relevant loads outstanding).
    Red,
    /// Working, but the user may be waiting on something.
    Yellow,
    /// Idle.
    Green,
}
