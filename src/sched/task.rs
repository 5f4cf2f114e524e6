//! Cancellable, progress-reporting units of work.
//!
//! A [`Task`] is the body of one asynchronous computation. Submitting it to
//! the [`Scheduler`](super::Scheduler) yields a [`TaskHandle`], a cloneable
//! observer used to abort the task, inspect its state, wait for completion
//! and subscribe to progress events.
//!
//! # Cancellation contract
//!
//! Cancellation is cooperative. `run` receives a [`TaskContext`] and must
//! poll [`TaskContext::can_execute`] at least once per unit of logical
//! progress (per slice row, per item processed) and return promptly once it
//! observes `false`. A task aborted before a worker picks it up never runs.
//!
//! # Failure contract
//!
//! Errors never cross the scheduler boundary as panics. A task that returns
//! `Err` or panics ends in the `Failed` terminal state with a diagnostic;
//! the worker thread survives.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex};

use crate::error::TaskError;

// =============================================================================
// Task Trait
// =============================================================================

/// One unit of background work.
pub trait Task: Send {
    /// Execute the work. Called by exactly one worker thread.
    ///
    /// Implementations must poll `ctx.can_execute()` periodically and return
    /// `Err(TaskError::Aborted)` (or `Ok` with partial work discarded by the
    /// caller) soon after cancellation is requested.
    fn run(&mut self, ctx: &TaskContext) -> Result<(), TaskError>;

    /// Short human-readable description used in log output.
    fn description(&self) -> String {
        "task".to_string()
    }
}

// =============================================================================
// States and Priority
// =============================================================================

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    /// Created but not yet queued.
    Created = 0,
    /// Waiting in the scheduler queue.
    Queued = 1,
    /// Executing on a worker thread.
    Running = 2,
    /// Completed successfully.
    Finished = 3,
    /// Cancelled; any partial results were discarded.
    Aborted = 4,
    /// Terminated by an internal error.
    Failed = 5,
}

impl TaskState {
    fn from_u8(v: u8) -> TaskState {
        match v {
            0 => TaskState::Created,
            1 => TaskState::Queued,
            2 => TaskState::Running,
            3 => TaskState::Finished,
            4 => TaskState::Aborted,
            _ => TaskState::Failed,
        }
    }

    /// Returns true for `Finished`, `Aborted` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Finished | TaskState::Aborted | TaskState::Failed
        )
    }
}

/// Scheduling priority.
///
/// Prioritized tasks are dequeued ahead of normal ones; ties are broken by
/// submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    /// Dequeued first; used for requests matching the current viewing
    /// position.
    Prioritized,
    /// Default FIFO priority; used for prefetch.
    #[default]
    Normal,
}

/// Asynchronous notification emitted as a task progresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    /// A worker thread started executing the task.
    Started,
    /// Progress report, 0-100.
    Progress(u8),
    /// The task completed successfully.
    Finished,
    /// The task was cancelled.
    Aborted,
    /// The task terminated with an error.
    Failed(String),
}

// =============================================================================
// Shared task cell
// =============================================================================

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// State shared between a handle, its context and the scheduler.
pub(crate) struct TaskCell {
    id: u64,
    description: String,
    state: AtomicU8,
    aborted: AtomicBool,
    progress: AtomicU8,
    done: Mutex<bool>,
    done_cv: Condvar,
    observers: Mutex<Vec<Sender<TaskEvent>>>,
}

impl TaskCell {
    pub(crate) fn new(description: String) -> Arc<TaskCell> {
        Arc::new(TaskCell {
            id: NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed),
            description,
            state: AtomicU8::new(TaskState::Created as u8),
            aborted: AtomicBool::new(false),
            progress: AtomicU8::new(0),
            done: Mutex::new(false),
            done_cv: Condvar::new(),
            observers: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn description(&self) -> &str {
        &self.description
    }

    fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Created -> Queued, done by the scheduler at submission.
    pub(crate) fn mark_queued(&self) -> bool {
        self.state
            .compare_exchange(
                TaskState::Created as u8,
                TaskState::Queued as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Queued -> Running, done by the worker that claims the task.
    ///
    /// Fails if the task was aborted while still queued; the worker then
    /// drops the entry without running it.
    pub(crate) fn claim_running(&self) -> bool {
        let claimed = self
            .state
            .compare_exchange(
                TaskState::Queued as u8,
                TaskState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if claimed {
            self.emit(TaskEvent::Started);
        }
        claimed
    }

    /// Enter a terminal state and wake all waiters.
    pub(crate) fn finalize(&self, state: TaskState, diagnostic: Option<String>) {
        debug_assert!(state.is_terminal());
        self.state.store(state as u8, Ordering::Release);

        let event = match state {
            TaskState::Finished => TaskEvent::Finished,
            TaskState::Aborted => TaskEvent::Aborted,
            _ => TaskEvent::Failed(diagnostic.unwrap_or_default()),
        };
        self.emit(event);

        let mut done = self.done.lock();
        *done = true;
        self.done_cv.notify_all();
    }

    /// Abort a task that is still queued, without a worker involved.
    pub(crate) fn abort_if_queued(&self) -> bool {
        let aborted = self
            .state
            .compare_exchange(
                TaskState::Queued as u8,
                TaskState::Aborted as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if aborted {
            self.emit(TaskEvent::Aborted);
            let mut done = self.done.lock();
            *done = true;
            self.done_cv.notify_all();
        }
        aborted
    }

    pub(crate) fn request_abort(&self) {
        self.aborted.store(true, Ordering::Release);
        self.abort_if_queued();
    }

    pub(crate) fn abort_requested(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    fn emit(&self, event: TaskEvent) {
        let mut observers = self.observers.lock();
        observers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

// =============================================================================
// TaskContext
// =============================================================================

/// Handed to [`Task::run`]; the task's view of its own lifecycle.
pub struct TaskContext {
    cell: Arc<TaskCell>,
}

impl TaskContext {
    pub(crate) fn new(cell: Arc<TaskCell>) -> Self {
        Self { cell }
    }

    /// Returns false once cancellation has been requested.
    ///
    /// Poll this at least once per unit of logical progress.
    pub fn can_execute(&self) -> bool {
        !self.cell.abort_requested()
    }

    /// Unique id of the running task, matching [`TaskHandle::id`].
    pub fn task_id(&self) -> u64 {
        self.cell.id
    }

    /// Report progress in percent (clamped to 100). Safe to call only from
    /// the worker thread running the task; observers receive the event
    /// asynchronously.
    pub fn report_progress(&self, percent: u8) {
        let percent = percent.min(100);
        self.cell.progress.store(percent, Ordering::Release);
        self.cell.emit(TaskEvent::Progress(percent));
    }
}

// =============================================================================
// TaskHandle
// =============================================================================

/// Cloneable observer handle for a submitted task.
#[derive(Clone)]
pub struct TaskHandle {
    cell: Arc<TaskCell>,
}

impl TaskHandle {
    pub(crate) fn new(cell: Arc<TaskCell>) -> Self {
        Self { cell }
    }

    pub(crate) fn cell(&self) -> &Arc<TaskCell> {
        &self.cell
    }

    /// Unique id of this task, usable as a map key.
    pub fn id(&self) -> u64 {
        self.cell.id
    }

    /// The task's description, as captured at submission.
    pub fn description(&self) -> &str {
        self.cell.description()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TaskState {
        self.cell.state()
    }

    /// Returns true once the task reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// Returns true if cancellation has been requested (the task may still
    /// be winding down).
    pub fn is_aborted(&self) -> bool {
        self.cell.abort_requested() || self.state() == TaskState::Aborted
    }

    /// Last reported progress, 0-100.
    pub fn progress(&self) -> u8 {
        self.cell.progress.load(Ordering::Acquire)
    }

    /// Request cooperative cancellation.
    ///
    /// A still-queued task is dropped without ever running. A running task
    /// keeps executing until it observes the flag; use [`wait`](Self::wait)
    /// before assuming its resources are free.
    pub fn abort(&self) {
        self.cell.request_abort();
    }

    /// Block until the task reaches a terminal state.
    pub fn wait(&self) {
        let mut done = self.cell.done.lock();
        while !*done {
            self.cell.done_cv.wait(&mut done);
        }
    }

    /// Block until terminal or until `timeout` elapses. Returns true if the
    /// task terminated.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut done = self.cell.done.lock();
        if *done {
            return true;
        }
        self.cell.done_cv.wait_for(&mut done, timeout);
        *done
    }

    /// Subscribe to this task's lifecycle and progress events.
    ///
    /// Events already emitted are not replayed.
    pub fn subscribe(&self) -> Receiver<TaskEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.cell.observers.lock().push(tx);
        rx
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.cell.id)
            .field("description", &self.cell.description)
            .field("state", &self.state())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
