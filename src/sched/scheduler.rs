//! Fixed-size worker-thread pool with priority and cooperative cancellation.
//!
//! The scheduler owns a bounded set of worker threads created at
//! construction. Submission never blocks the calling thread: the task is
//! pushed onto a two-level FIFO queue (prioritized ahead of normal, ties by
//! submission order) and a sleeping worker is woken.
//!
//! # Shutdown
//!
//! Dropping the scheduler aborts every queued and running task, wakes all
//! workers and joins each one within a bounded grace period. A worker stuck
//! inside a task body that ignores the cancellation flag is detached with a
//! warning; that is the documented lossy fallback, not the common path.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace, warn};

use crate::config::CoreConfig;
use crate::error::TaskError;

use super::task::{Priority, Task, TaskCell, TaskContext, TaskHandle, TaskState};

// =============================================================================
// Queue
// =============================================================================

struct QueuedTask {
    cell: Arc<TaskCell>,
    task: Box<dyn Task>,
}

#[derive(Default)]
struct Queue {
    prioritized: VecDeque<QueuedTask>,
    normal: VecDeque<QueuedTask>,
    running: Vec<Arc<TaskCell>>,
    live_workers: usize,
    shutdown: bool,
}

impl Queue {
    fn pop(&mut self) -> Option<QueuedTask> {
        self.prioritized.pop_front().or_else(|| self.normal.pop_front())
    }

    fn pending(&self) -> usize {
        self.prioritized.len() + self.normal.len()
    }
}

struct SchedulerInner {
    queue: Mutex<Queue>,
    available: Condvar,
    idle: Condvar,
}

// =============================================================================
// Scheduler
// =============================================================================

/// Executes submitted tasks on a fixed pool of worker threads.
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
    workers: Vec<JoinHandle<()>>,
    worker_count: usize,
    shutdown_grace: Duration,
}

impl Scheduler {
    /// Create a scheduler with the worker count and grace period from
    /// `config`. Worker count is fixed for the scheduler's lifetime.
    pub fn new(config: &CoreConfig) -> Self {
        let inner = Arc::new(SchedulerInner {
            queue: Mutex::new(Queue::default()),
            available: Condvar::new(),
            idle: Condvar::new(),
        });

        let workers = (0..config.worker_count)
            .map(|index| {
                let inner = inner.clone();
                std::thread::Builder::new()
                    .name(format!("segview-worker-{index}"))
                    .spawn(move || worker_loop(index, inner))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        debug!(workers = config.worker_count, "scheduler started");

        Self {
            inner,
            workers,
            worker_count: config.worker_count,
            shutdown_grace: config.shutdown_grace,
        }
    }

    /// Submit a task at normal priority. Never blocks.
    pub fn submit(&self, task: Box<dyn Task>) -> TaskHandle {
        self.submit_with_priority(task, Priority::Normal)
    }

    /// Submit a task at the given priority. Never blocks.
    pub fn submit_with_priority(&self, task: Box<dyn Task>, priority: Priority) -> TaskHandle {
        let cell = TaskCell::new(task.description());
        cell.mark_queued();

        let handle = TaskHandle::new(cell.clone());
        let entry = QueuedTask { cell, task };

        let mut queue = self.inner.queue.lock();
        if queue.shutdown {
            // Late submission during teardown: never run, terminate quietly.
            entry.cell.request_abort();
            return handle;
        }
        match priority {
            Priority::Prioritized => queue.prioritized.push_back(entry),
            Priority::Normal => queue.normal.push_back(entry),
        }
        drop(queue);

        self.inner.available.notify_one();
        trace!(task = handle.id(), ?priority, "task submitted");
        handle
    }

    /// Request cooperative cancellation of a task.
    ///
    /// Queued tasks are discarded without running; running tasks keep
    /// executing until they observe the flag. Does not wait.
    pub fn abort(&self, handle: &TaskHandle) {
        handle.abort();
        // Drop the queue entry eagerly so the boxed task is released now
        // rather than when a worker would have dequeued it.
        let mut queue = self.inner.queue.lock();
        let id = handle.id();
        queue.prioritized.retain(|e| e.cell.id() != id);
        queue.normal.retain(|e| e.cell.id() != id);
    }

    /// Move a still-queued task to the prioritized level.
    ///
    /// Used when a prefetch request turns out to match the current viewing
    /// position. Tasks already running or terminal are left untouched.
    pub fn promote(&self, handle: &TaskHandle) {
        let mut queue = self.inner.queue.lock();
        let id = handle.id();
        if let Some(pos) = queue.normal.iter().position(|e| e.cell.id() == id) {
            if let Some(entry) = queue.normal.remove(pos) {
                queue.prioritized.push_back(entry);
                trace!(task = id, "task promoted");
            }
        }
    }

    /// Number of tasks waiting in the queue (not yet running).
    pub fn pending_count(&self) -> usize {
        self.inner.queue.lock().pending()
    }

    /// Number of worker threads.
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Block until the queue is empty and all workers are idle, or until
    /// `timeout` elapses. Returns true if the scheduler drained.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut queue = self.inner.queue.lock();
        while queue.pending() > 0 || !queue.running.is_empty() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.inner.idle.wait_for(&mut queue, deadline - now);
        }
        true
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        {
            let mut queue = self.inner.queue.lock();
            queue.shutdown = true;

            // Queued tasks never run; finalize them as aborted.
            let prioritized = std::mem::take(&mut queue.prioritized);
            let normal = std::mem::take(&mut queue.normal);
            for entry in prioritized.into_iter().chain(normal) {
                entry.cell.request_abort();
            }
            // Running tasks get the cooperative flag.
            for cell in &queue.running {
                cell.request_abort();
            }
        }
        self.inner.available.notify_all();

        // Wait for workers to come back within the grace period.
        let deadline = Instant::now() + self.shutdown_grace;
        let drained = {
            let mut queue = self.inner.queue.lock();
            loop {
                if queue.live_workers == 0 {
                    break true;
                }
                let now = Instant::now();
                if now >= deadline {
                    break false;
                }
                self.inner.idle.wait_for(&mut queue, deadline - now);
            }
        };

        if drained {
            for worker in self.workers.drain(..) {
                let _ = worker.join();
            }
            debug!("scheduler shut down cleanly");
        } else {
            // A task body is ignoring the abort flag. Detaching leaks the
            // worker; surface it, since resource cleanup may be incomplete.
            let stuck = self.inner.queue.lock().live_workers;
            warn!(
                stuck_workers = stuck,
                "scheduler shutdown exceeded grace period; detaching workers"
            );
            self.workers.clear();
        }
    }
}

// =============================================================================
// Worker loop
// =============================================================================

fn worker_loop(index: usize, inner: Arc<SchedulerInner>) {
    inner.queue.lock().live_workers += 1;

    loop {
        let entry = {
            let mut queue = inner.queue.lock();
            loop {
                if let Some(entry) = queue.pop() {
                    // Claim fails if the task was aborted while queued.
                    if !entry.cell.claim_running() {
                        continue;
                    }
                    // Registered as running under the same lock so idle
                    // observers never see the task in neither collection.
                    queue.running.push(entry.cell.clone());
                    break Some(entry);
                }
                if queue.shutdown {
                    break None;
                }
                inner.idle.notify_all();
                inner.available.wait(&mut queue);
            }
        };

        let Some(mut entry) = entry else {
            break;
        };

        trace!(
            worker = index,
            task = entry.cell.id(),
            description = entry.cell.description(),
            "task started"
        );

        let ctx = TaskContext::new(entry.cell.clone());
        let outcome = catch_unwind(AssertUnwindSafe(|| entry.task.run(&ctx)));

        let (state, diagnostic) = match outcome {
            Ok(Ok(())) => {
                if entry.cell.abort_requested() {
                    (TaskState::Aborted, None)
                } else {
                    (TaskState::Finished, None)
                }
            }
            Ok(Err(TaskError::Aborted)) => (TaskState::Aborted, None),
            Ok(Err(err)) => {
                debug!(task = entry.cell.id(), error = %err, "task failed");
                (TaskState::Failed, Some(err.to_string()))
            }
            Err(panic) => {
                let message = panic_message(panic);
                warn!(task = entry.cell.id(), message, "task panicked");
                (TaskState::Failed, Some(message))
            }
        };

        {
            let mut queue = inner.queue.lock();
            let id = entry.cell.id();
            queue.running.retain(|c| c.id() != id);
        }
        entry.cell.finalize(state, diagnostic);
        inner.idle.notify_all();
    }

    let mut queue = inner.queue.lock();
    queue.live_workers -= 1;
    inner.idle.notify_all();
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// =============================================================================
// Tests
// =============================================================================
