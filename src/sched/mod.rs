//! Cooperative multi-threaded task scheduling.
//!
//! This module provides the execution substrate the representation pools
//! build on:
//!
//! - [`Task`]: a cancellable, progress-reporting unit of work
//! - [`Scheduler`]: a fixed-size worker-thread pool with two-level priority
//! - [`TaskHandle`]: cloneable observer for abort/state/progress/wait
//! - [`TaskContext`]: the task body's view of its own lifecycle
//!
//! # Thread affinity
//!
//! `submit`, `abort` and `promote` may be called from any thread and never
//! block. `TaskContext` methods are meant for the worker thread running the
//! task. [`TaskEvent`] subscriptions deliver asynchronously on whichever
//! thread drains the channel.

mod scheduler;
mod task;

pub use scheduler::Scheduler;
pub use task::{Priority, Task, TaskContext, TaskEvent, TaskHandle, TaskState};
