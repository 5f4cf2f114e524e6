//! Representation pools: windowed caches of computed actors.
//!
//! A pool sits between a [`RepresentationPipeline`](crate::pipeline::RepresentationPipeline)
//! and the display layer. It keeps a [`SliceWindow`] of positions
//! materialized around the crosshair, schedules pipeline tasks for keys
//! that are missing or stale, and commits whole-frame snapshots into a
//! [`RangedActors`] store so readers always see a single consistent view
//! per timestamp.

mod pool;
mod ranged;
mod window;

pub use pool::{PoolEvent, RepresentationPool};
pub use ranged::RangedActors;
pub use window::SliceWindow;
