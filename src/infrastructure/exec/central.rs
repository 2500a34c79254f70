//! Central executor
//!
//! One scheduling loop, a bounded pool of concurrently running tasks split
//! into user-op and non-user-op capacity, and the pump that drains the op
//! graph. Op execution can be paused at runtime without stopping task
//! processing.

use super::command::CommandExecutor;
use super::task::{
    EngineSummaryState, ExecPriority, Task, FIRST_PRIORITY_LIST, SECOND_PRIORITY_LIST,
};
use crate::domain::UserOp;
use crate::infrastructure::events::{Event, EventBus};
use crate::infrastructure::ops::{OpGraph, OpLedger};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex, Notify};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How long the scheduler sleeps when idle before re-checking for stuck
/// tasks.
const CV_WAIT_TIMEOUT: Duration = Duration::from_millis(500);

struct RunningTask {
    label: String,
    priority: ExecPriority,
    started_at: Instant,
    parent: Option<Uuid>,
    next_task: Option<Box<Task>>,
    warned_slow: bool,
}

#[derive(Default)]
struct ExecState {
    submitted: BTreeMap<ExecPriority, VecDeque<Task>>,
    next_task_queues: BTreeMap<ExecPriority, VecDeque<Task>>,
    running: HashMap<Uuid, RunningTask>,
    /// Tasks whose own future finished but which still wait on descendants.
    waiting_parents: HashMap<Uuid, RunningTask>,
    /// parent task uuid -> outstanding child uuids (queued or running).
    children: HashMap<Uuid, HashSet<Uuid>>,
    running_user_ops: usize,
    running_non_user_ops: usize,
}

pub struct CentralExecutor {
    user_op_cap: usize,
    non_user_op_cap: usize,
    task_warn_threshold: Duration,
    state: Mutex<ExecState>,
    cv_has_task: Notify,
    shutdown_tx: watch::Sender<bool>,
    op_execution_enabled: AtomicBool,
    op_graph: Arc<OpGraph>,
    ledger: Arc<OpLedger>,
    commands: Arc<CommandExecutor>,
    events: Arc<EventBus>,
}

impl CentralExecutor {
    pub fn new(
        user_op_cap: usize,
        non_user_op_cap: usize,
        task_warn_threshold: Duration,
        enable_op_execution: bool,
        op_graph: Arc<OpGraph>,
        ledger: Arc<OpLedger>,
        commands: Arc<CommandExecutor>,
        events: Arc<EventBus>,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            user_op_cap: user_op_cap.max(1),
            non_user_op_cap: non_user_op_cap.max(1),
            task_warn_threshold,
            state: Mutex::new(ExecState::default()),
            cv_has_task: Notify::new(),
            shutdown_tx,
            op_execution_enabled: AtomicBool::new(enable_op_execution),
            op_graph,
            ledger,
            commands,
            events,
        }
    }

    /// Launch the scheduling loop.
    pub fn start(self: &Arc<Self>) {
        if !self.op_execution_enabled.load(Ordering::SeqCst) {
            warn!("Op execution is disabled at startup");
        }
        let executor = self.clone();
        tokio::spawn(async move { executor.run_scheduling_loop().await });
        debug!("Central executor started");
    }

    pub fn shutdown(&self) {
        info!("Central executor shutting down");
        let _ = self.shutdown_tx.send(true);
        self.op_graph.shutdown();
        self.cv_has_task.notify_waiters();
    }

    /// Submit a task. If the task names a parent, the parent is not
    /// considered complete until this task (and its own descendants) finish.
    pub async fn submit(&self, task: Task) {
        let mut state = self.state.lock().await;
        if let Some(parent) = task.parent {
            state.children.entry(parent).or_default().insert(task.task_uuid);
        }
        state
            .submitted
            .entry(task.priority)
            .or_default()
            .push_back(task);
        drop(state);
        self.cv_has_task.notify_waiters();
    }

    /// Kick the scheduler (e.g. after a batch was enqueued to the op graph).
    pub fn notify(&self) {
        self.cv_has_task.notify_waiters();
    }

    pub fn pause_op_execution(&self) {
        if self.op_execution_enabled.swap(false, Ordering::SeqCst) {
            info!("Op execution paused");
            self.events
                .emit(Event::OpExecutionPlayStateChanged { is_enabled: false });
        }
    }

    pub fn resume_op_execution(&self) {
        if !self.op_execution_enabled.swap(true, Ordering::SeqCst) {
            info!("Op execution resumed");
            self.events
                .emit(Event::OpExecutionPlayStateChanged { is_enabled: true });
        }
        self.cv_has_task.notify_waiters();
    }

    pub fn is_op_execution_enabled(&self) -> bool {
        self.op_execution_enabled.load(Ordering::SeqCst)
    }

    /// Red while user-relevant loads are outstanding, yellow while anything
    /// else (including pending ops) is in flight, green when idle.
    pub async fn summary_state(&self) -> EngineSummaryState {
        let state = self.state.lock().await;
        let depth = |p: ExecPriority| {
            state.submitted.get(&p).map(|q| q.len()).unwrap_or(0)
                + state.next_task_queues.get(&p).map(|q| q.len()).unwrap_or(0)
        };
        if depth(ExecPriority::P2UserRelevantCacheLoad) > 0
            || depth(ExecPriority::P4LongRunningUserTask) > 0
        {
            return EngineSummaryState::Red;
        }
        if depth(ExecPriority::P1UserLoad) > 0 || depth(ExecPriority::P7SignatureCalc) > 0 {
            return EngineSummaryState::Yellow;
        }
        drop(state);
        if self.op_graph.pending_op_count().await > 0 {
            return EngineSummaryState::Yellow;
        }
        EngineSummaryState::Green
    }

    pub async fn is_task_or_descendant_running(&self, task_uuid: Uuid) -> bool {
        let state = self.state.lock().await;
        state.running.contains_key(&task_uuid)
            || state.waiting_parents.contains_key(&task_uuid)
            || state
                .children
                .get(&task_uuid)
                .map(|c| !c.is_empty())
                .unwrap_or(false)
    }

    async fn run_scheduling_loop(self: Arc<Self>) {
        info!("Scheduling loop starting");
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let mut dispatched = false;

            // 1. Drain task queues while non-user-op capacity remains.
            if let Some(task) = self.next_runnable_task().await {
                self.spawn_task(task).await;
                dispatched = true;
            }

            // 2. Pump the op graph while user-op capacity remains.
            if self.op_execution_enabled.load(Ordering::SeqCst) {
                let has_capacity = {
                    let state = self.state.lock().await;
                    state.running_user_ops < self.user_op_cap
                };
                if has_capacity {
                    if let Some(op) = self.op_graph.try_get().await {
                        self.spawn_op_command(op).await;
                        dispatched = true;
                    }
                }
            }

            // 3. Nothing to do: wait for a submission, a completion, or a
            // notify, with a bounded timeout so stuck tasks get reported.
            if !dispatched {
                let notified = self.cv_has_task.notified();
                tokio::select! {
                    _ = notified => {}
                    _ = tokio::time::sleep(CV_WAIT_TIMEOUT) => {
                        self.warn_about_long_running_tasks().await;
                    }
                    _ = shutdown_rx.changed() => {}
                }
            }
        }
        info!("Scheduling loop stopped");
    }

    /// Pop the next task by priority: P1..P4 first, then P6..P7. Next-task
    /// queues win over fresh submissions at the same priority.
    async fn next_runnable_task(&self) -> Option<Task> {
        let mut state = self.state.lock().await;
        if state.running_non_user_ops >= self.non_user_op_cap {
            return None;
        }
        for priority in FIRST_PRIORITY_LIST.iter().chain(SECOND_PRIORITY_LIST.iter()) {
            if let Some(task) = state
                .next_task_queues
                .get_mut(priority)
                .and_then(|q| q.pop_front())
            {
                return Some(task);
            }
            if let Some(task) = state.submitted.get_mut(priority).and_then(|q| q.pop_front()) {
                return Some(task);
            }
        }
        None
    }

    async fn spawn_task(self: &Arc<Self>, task: Task) {
        let task_uuid = task.task_uuid;
        let func = task.func;
        {
            let mut state = self.state.lock().await;
            state.running_non_user_ops += 1;
            state.running.insert(
                task_uuid,
                RunningTask {
                    label: task.label.clone(),
                    priority: task.priority,
                    started_at: Instant::now(),
                    parent: task.parent,
                    next_task: task.next_task,
                    warned_slow: false,
                },
            );
        }
        debug!("Starting task {:?} ({})", task.label, task_uuid);

        let executor = self.clone();
        tokio::spawn(async move {
            let result = func().await;
            if let Err(e) = &result {
                error!("Task {} failed: {:#}", task_uuid, e);
            }
            executor.on_task_done(task_uuid).await;
        });
    }

    async fn on_task_done(&self, task_uuid: Uuid) {
        let mut state = self.state.lock().await;
        state.running_non_user_ops = state.running_non_user_ops.saturating_sub(1);
        let Some(running) = state.running.remove(&task_uuid) else {
            warn!("Completed task {} was not tracked", task_uuid);
            return;
        };

        let has_outstanding_children = state
            .children
            .get(&task_uuid)
            .map(|c| !c.is_empty())
            .unwrap_or(false);
        if has_outstanding_children {
            // The future is done but descendants are not; completion (and the
            // next_task release) waits for them.
            state.waiting_parents.insert(task_uuid, running);
        } else {
            finalize_task(&mut state, task_uuid, running);
        }
        drop(state);
        self.cv_has_task.notify_waiters();
    }

    async fn spawn_op_command(self: &Arc<Self>, op: Arc<UserOp>) {
        {
            let mut state = self.state.lock().await;
            state.running_user_ops += 1;
        }
        let executor = self.clone();
        tokio::spawn(async move {
            executor.run_op_command(op).await;
            {
                let mut state = executor.state.lock().await;
                state.running_user_ops = state.running_user_ops.saturating_sub(1);
            }
            executor.cv_has_task.notify_waiters();
        });
    }

    /// Run one op command to completion. Success archives and pops; failure
    /// marks the op stopped-on-error and leaves it in the graph, blocking the
    /// rest of its batch.
    async fn run_op_command(&self, op: Arc<UserOp>) {
        match self.commands.execute(&op).await {
            Ok(status) => {
                if let Err(e) = self.ledger.archive(&op, status, None).await {
                    error!("Failed to archive op {}: {}", op, e);
                }
                if let Err(e) = self.op_graph.pop(&op).await {
                    error!("Failed to pop op {} from graph: {}", op, e);
                }
                debug!("Op {} finished with {}", op.op_uid, status);
            }
            Err(e) => {
                let msg = format!("Command failed for {}: {}", op, e);
                error!("{}", msg);
                if let Err(le) = self.ledger.mark_stopped_on_error(&op, &msg).await {
                    error!("Failed to record op failure in ledger: {}", le);
                }
                self.events.emit(Event::BatchFailed {
                    batch_uid: op.batch_uid,
                    msg: format!("Failed to execute {}", op.op_type),
                    secondary_msg: e.to_string(),
                });
            }
        }
    }

    async fn warn_about_long_running_tasks(&self) {
        let mut state = self.state.lock().await;
        let threshold = self.task_warn_threshold;
        for (uuid, task) in state.running.iter_mut() {
            if !task.warned_slow && task.started_at.elapsed() > threshold {
                task.warned_slow = true;
                warn!(
                    "Task {:?} ({}, {:?}) has been running for more than {:?}",
                    task.label, uuid, task.priority, threshold
                );
            }
        }
    }
}

/// Complete `task_uuid`: release its next_task and propagate completion to
/// any parent that was only waiting on descendants.
fn finalize_task(state: &mut ExecState, task_uuid: Uuid, task: RunningTask) {
    if let Some(next) = task.next_task {
        state
            .next_task_queues
            .entry(next.priority)
            .or_default()
            .push_back(*next);
    }

    let mut current_parent = task.parent;
    let mut completed_child = task_uuid;
    while let Some(parent_uuid) = current_parent {
        let outstanding = state.children.entry(parent_uuid).or_default();
        outstanding.remove(&completed_child);
        if !outstanding.is_empty() {
            break;
        }
        state.children.remove(&parent_uuid);

        // The parent is truly complete only if its own future already ran.
        match state.waiting_parents.remove(&parent_uuid) {
            Some(parent_task) => {
                if let Some(next) = parent_task.next_task {
                    state
                        .next_task_queues
                        .entry(next.priority)
                        .or_default()
                        .push_back(*next);
                }
                completed_child = parent_uuid;
                current_parent = parent_task.parent;
            }
            None => break,
        }
    }
}
