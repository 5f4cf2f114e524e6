//! The sliding window of positions a pool keeps materialized.

use crate::clock::Position;

/// A contiguous span of positions centered on the crosshair.
///
/// The window width is a fixed configuration constant; positions falling
/// outside the window after a shift are evicted immediately, with no grace
/// period, which bounds a pool's live cache entries by
/// `width × item_count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceWindow {
    center: Position,
    radius: i64,
}

impl SliceWindow {
    /// Create a window of `width` positions (must be odd) centered on
    /// `center`.
    pub fn new(center: Position, width: usize) -> Self {
        debug_assert!(width % 2 == 1, "window width must be odd");
        Self {
            center,
            radius: (width / 2) as i64,
        }
    }

    /// The crosshair position at the center of the window.
    pub fn center(&self) -> Position {
        self.center
    }

    /// Total number of positions in the window.
    pub fn width(&self) -> usize {
        (2 * self.radius + 1) as usize
    }

    /// Lowest position inside the window.
    pub fn first(&self) -> Position {
        self.center - self.radius
    }

    /// Highest position inside the window.
    pub fn last(&self) -> Position {
        self.center + self.radius
    }

    /// Returns true if `position` lies inside the window.
    pub fn contains(&self, position: Position) -> bool {
        (self.center - position).abs() <= self.radius
    }

    /// Iterate the window's positions ordered by distance from the center,
    /// nearest first. This is the scheduling order for prefetch: the
    /// crosshair position itself comes first, then its neighbors outward.
    pub fn positions_by_distance(&self) -> impl Iterator<Item = Position> + '_ {
        let center = self.center;
        (0..=self.radius).flat_map(move |d| {
            let mut pair = Vec::with_capacity(2);
            pair.push(center + d);
            if d > 0 {
                pair.push(center - d);
            }
            pair
        })
    }

    /// Iterate the window's positions in ascending order.
    pub fn positions(&self) -> impl Iterator<Item = Position> {
        self.first()..=self.last()
    }

    /// Re-center the window, returning the new window.
    pub fn recentered(&self, center: Position) -> SliceWindow {
        SliceWindow {
            center,
            radius: self.radius,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
