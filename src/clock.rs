//! View-state versioning: timestamps, ready ranges and frames.
//!
//! Every state-changing event (crosshair move, settings change, item
//! add/remove, invalidation) is stamped with a fresh [`TimeStamp`] issued by
//! a [`FrameClock`]. No two distinct view states ever share a timestamp, so
//! a consumer that reads data keyed by timestamp can never observe a torn
//! mix of two states.
//!
//! A [`TimeRange`] is the ordered set of timestamps a pool has fully
//! computed. It can become non-contiguous after invalidation, but its
//! maximum only moves forward.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

// =============================================================================
// TimeStamp
// =============================================================================

/// A monotonically increasing version number for the view state.
///
/// Issued exclusively by [`FrameClock`]; increments by exactly one per
/// state-changing event.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct TimeStamp(pub u64);

impl TimeStamp {
    /// The next timestamp.
    pub fn next(self) -> TimeStamp {
        TimeStamp(self.0 + 1)
    }
}

impl fmt::Display for TimeStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// A scalar viewing position (e.g. a slice index) used to key cached actors.
pub type Position = i64;

// =============================================================================
// TimeRange
// =============================================================================

/// Ordered set of timestamps for which fully-computed results exist.
///
/// The set may be non-contiguous after an invalidation dropped older
/// entries. `last()` is non-decreasing over the owner's lifetime unless an
/// explicit invalidation occurred.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimeRange {
    times: BTreeSet<TimeStamp>,
}

impl TimeRange {
    /// Create an empty range.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `t` as ready.
    pub fn insert(&mut self, t: TimeStamp) {
        self.times.insert(t);
    }

    /// Returns true if `t` itself is ready.
    pub fn contains(&self, t: TimeStamp) -> bool {
        self.times.contains(&t)
    }

    /// The most recent ready timestamp, if any.
    pub fn last(&self) -> Option<TimeStamp> {
        self.times.iter().next_back().copied()
    }

    /// The earliest ready timestamp, if any.
    pub fn first(&self) -> Option<TimeStamp> {
        self.times.iter().next().copied()
    }

    /// The latest ready timestamp at or before `t`.
    pub fn latest_at_or_before(&self, t: TimeStamp) -> Option<TimeStamp> {
        self.times.range(..=t).next_back().copied()
    }

    /// Drop every ready timestamp strictly before `t`.
    ///
    /// Used when older snapshots are explicitly invalidated; this is the one
    /// operation allowed to shrink the range.
    pub fn invalidate_before(&mut self, t: TimeStamp) {
        self.times = self.times.split_off(&t);
    }

    /// Number of ready timestamps.
    pub fn len(&self) -> usize {
        self.times.len()
    }

    /// Returns true if nothing is ready.
    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Iterate the ready timestamps in increasing order.
    pub fn iter(&self) -> impl Iterator<Item = TimeStamp> + '_ {
        self.times.iter().copied()
    }
}

// =============================================================================
// Frame
// =============================================================================

/// An immutable snapshot of the view state at one timestamp.
///
/// Frames are created by [`FrameClock`] and passed by reference through the
/// manager and pool layers; consumers compare consecutive frames to decide
/// which change dimensions they care about.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// The timestamp paired with this state.
    pub time: TimeStamp,

    /// Current crosshair position (slice coordinate).
    pub crosshair: Position,

    /// Scene resolution (voxel spacing along the sliced axis).
    pub resolution: f64,

    /// Scene bounds along the sliced axis, as `[min, max]` positions.
    pub bounds: [Position; 2],
}

impl Frame {
    /// Returns true if the crosshair differs from `prev`'s.
    pub fn crosshair_changed(&self, prev: &Frame) -> bool {
        self.crosshair != prev.crosshair
    }

    /// Returns true if the resolution differs from `prev`'s.
    pub fn resolution_changed(&self, prev: &Frame) -> bool {
        self.resolution != prev.resolution
    }

    /// Returns true if the scene bounds differ from `prev`'s.
    pub fn bounds_changed(&self, prev: &Frame) -> bool {
        self.bounds != prev.bounds
    }
}

// =============================================================================
// FrameClock
// =============================================================================

/// Issues frames with strictly increasing timestamps.
///
/// Owned by the interactive thread; every external event that changes the
/// view state must go through the clock so the event gets a unique
/// timestamp.
#[derive(Debug)]
pub struct FrameClock {
    current: TimeStamp,
    crosshair: Position,
    resolution: f64,
    bounds: [Position; 2],
}

impl FrameClock {
    /// Create a clock starting at timestamp 1 with the given initial state.
    pub fn new(crosshair: Position, resolution: f64, bounds: [Position; 2]) -> Self {
        Self {
            current: TimeStamp(1),
            crosshair,
            resolution,
            bounds,
        }
    }

    /// The timestamp of the most recently issued frame.
    pub fn current_time(&self) -> TimeStamp {
        self.current
    }

    /// The frame describing the current state, without ticking the clock.
    pub fn current_frame(&self) -> Frame {
        Frame {
            time: self.current,
            crosshair: self.crosshair,
            resolution: self.resolution,
            bounds: self.bounds,
        }
    }

    /// Issue a frame for a crosshair move.
    pub fn crosshair_moved(&mut self, crosshair: Position) -> Frame {
        self.crosshair = crosshair;
        self.tick()
    }

    /// Issue a frame for a resolution change.
    pub fn resolution_changed(&mut self, resolution: f64) -> Frame {
        self.resolution = resolution;
        self.tick()
    }

    /// Issue a frame for a scene bounds change.
    pub fn bounds_changed(&mut self, bounds: [Position; 2]) -> Frame {
        self.bounds = bounds;
        self.tick()
    }

    /// Issue a frame for an event that leaves the geometry untouched
    /// (item add/remove, settings change, invalidation).
    pub fn state_changed(&mut self) -> Frame {
        self.tick()
    }

    fn tick(&mut self) -> Frame {
        self.current = self.current.next();
        self.current_frame()
    }
}

// =============================================================================
// Tests
// =============================================================================
