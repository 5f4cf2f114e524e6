//! # segview-core
//!
//! The representation pipeline and task-scheduling core of a volumetric
//! segmentation viewer.
//!
//! This library keeps interactive slice navigation responsive while actors
//! (renderable products of per-item pipelines) are computed on background
//! threads. Every view change gets a unique timestamp, computed results are
//! committed as whole-frame snapshots keyed by those timestamps, and
//! displays always read a single self-consistent snapshot, even while
//! computation is still catching up.
//!
//! ## Features
//!
//! - **Cooperative scheduling**: a fixed worker-thread pool running
//!   cancellable, progress-reporting tasks with two-level priority
//! - **Torn-update freedom**: timestamp-keyed snapshot commits; readers
//!   never observe a mix of two view states
//! - **Windowed prefetch**: a bounded window of slice positions cached
//!   around the crosshair, nearest-first, with strict eviction
//! - **Per-item invalidation**: edits recompute only the touched items
//!   while older snapshots stay readable
//! - **Display composition**: managers and switches adapt independently
//!   progressing pools to view lifecycles and user toggles
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`clock`] - timestamps, ready ranges, frames and the frame clock
//! - [`sched`] - tasks, handles and the worker-thread scheduler
//! - [`pipeline`] - the pipeline trait, actors and settings state
//! - [`pool`] - windowed actor caches driven by pipeline tasks
//! - [`view`] - managers and switches facing the display
//! - [`config`] - configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use segview_core::{
//!     Actor, CoreConfig, FrameClock, ItemId, PipelineError, Position,
//!     RepresentationPipeline, RepresentationPool, RepresentationState,
//!     Scheduler, TaskContext,
//! };
//!
//! struct SlicePipeline;
//!
//! impl RepresentationPipeline for SlicePipeline {
//!     fn compute_actors(
//!         &self,
//!         item: ItemId,
//!         position: Position,
//!         _state: &RepresentationState,
//!         _ctx: &TaskContext,
//!     ) -> Result<Vec<Actor>, PipelineError> {
//!         Ok(vec![Actor::new(format!("{item}@{position}"), position)])
//!     }
//! }
//!
//! let config = CoreConfig::default();
//! let scheduler = Arc::new(Scheduler::new(&config));
//! let pool = RepresentationPool::new("slices", Arc::new(SlicePipeline), scheduler, &config);
//!
//! let mut clock = FrameClock::new(0, 1.0, [0, 512]);
//! pool.increment_observers();
//! pool.sources_added(&[ItemId(1)], &clock.current_frame());
//! pool.set_crosshair(&clock.crosshair_moved(42));
//!
//! // Later, on the interactive thread:
//! pool.process_events();
//! let actors = pool.actors(clock.current_time());
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod pool;
pub mod sched;
pub mod view;

// Re-export commonly used types
pub use clock::{Frame, FrameClock, Position, TimeRange, TimeStamp};
pub use config::{CoreConfig, DEFAULT_SHUTDOWN_GRACE, DEFAULT_WINDOW_SIZE};
pub use error::{PipelineError, SettingsError, TaskError};
pub use pipeline::{
    Actor, ActorMap, ItemId, RepresentationPipeline, RepresentationState, SettingValue,
};
pub use pool::{PoolEvent, RangedActors, RepresentationPool, SliceWindow};
pub use sched::{Priority, Scheduler, Task, TaskContext, TaskEvent, TaskHandle, TaskState};
pub use view::{
    ChangeAcceptance, DisplaySink, GroupMode, ManagerPolicy, RepresentationManager,
    RepresentationSwitch,
};
