//! Managers adapt pools to a display lifecycle.
//!
//! A [`RepresentationManager`] owns no actors of its own; it decides when
//! the pools it wraps should react to view changes, which timestamp to
//! display, and pushes the resulting actors to a [`DisplaySink`] as a diff
//! against what it pushed last. Hidden managers stand down completely: they
//! drop their pool observer registrations and leave nothing on the sink.

use std::sync::Arc;

use tracing::debug;

use crate::clock::{Frame, TimeStamp};
use crate::pipeline::Actor;
use crate::pool::RepresentationPool;

// =============================================================================
// DisplaySink
// =============================================================================

/// The rendering surface a visible manager pushes actors to.
///
/// Implemented by the embedding application; the core only ever calls these
/// two methods, from the interactive thread.
pub trait DisplaySink {
    fn add_actor(&mut self, actor: &Actor);
    fn remove_actor(&mut self, actor: &Actor);
}

// =============================================================================
// Policy and acceptance
// =============================================================================

/// How a manager picks the timestamp to display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerPolicy {
    /// Renders whatever the pools last completed; ignores the requested
    /// time. Used for content that does not track the crosshair.
    Passive,
    /// Renders the latest timestamp at or before the requested one that
    /// every pool has fully computed, falling back to older ready data
    /// while computation catches up.
    Ready,
    /// Renders on every accepted frame with the best data available at the
    /// requested time, even if some pools are still behind.
    Temporal,
}

/// Which dimensions of view change a manager reacts to.
///
/// Frames whose only changes fall in ignored dimensions are dropped before
/// they reach the pools, so a manager showing volumetric content never
/// recomputes on crosshair moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeAcceptance {
    pub crosshair: bool,
    pub resolution: bool,
    pub bounds: bool,
}

impl ChangeAcceptance {
    /// React to every dimension.
    pub fn all() -> Self {
        Self {
            crosshair: true,
            resolution: true,
            bounds: true,
        }
    }

    /// React to nothing (pool content changes still render).
    pub fn none() -> Self {
        Self {
            crosshair: false,
            resolution: false,
            bounds: false,
        }
    }
}

impl Default for ChangeAcceptance {
    fn default() -> Self {
        Self::all()
    }
}

// =============================================================================
// RepresentationManager
// =============================================================================

/// Adapts one or more pools to a single display slot.
pub struct RepresentationManager {
    name: String,
    policy: ManagerPolicy,
    acceptance: ChangeAcceptance,
    pools: Vec<Arc<RepresentationPool>>,
    visible: bool,
    last_frame: Option<Frame>,
    /// Actors currently pushed to the sink, for diffing on re-render.
    displayed: Vec<Actor>,
}

impl RepresentationManager {
    /// Create a hidden manager over `pools` with full change acceptance.
    pub fn new(
        name: impl Into<String>,
        policy: ManagerPolicy,
        pools: Vec<Arc<RepresentationPool>>,
    ) -> Self {
        Self {
            name: name.into(),
            policy,
            acceptance: ChangeAcceptance::all(),
            pools,
            visible: false,
            last_frame: None,
            displayed: Vec::new(),
        }
    }

    /// Restrict which change dimensions this manager reacts to.
    pub fn with_acceptance(mut self, acceptance: ChangeAcceptance) -> Self {
        self.acceptance = acceptance;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> ManagerPolicy {
        self.policy
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// The pools this manager drives.
    pub fn pools(&self) -> &[Arc<RepresentationPool>] {
        &self.pools
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Become visible: register as a pool observer and bring the pools up
    /// to date with the current frame. Idempotent.
    pub fn show(&mut self, frame: &Frame) {
        if self.visible {
            return;
        }
        self.visible = true;
        self.last_frame = Some(frame.clone());
        debug!(manager = %self.name, time = %frame.time, "manager shown");
        for pool in &self.pools {
            pool.increment_observers();
            pool.set_crosshair(frame);
        }
    }

    /// Become hidden: deregister from the pools and flush everything this
    /// manager pushed to the sink. Idempotent.
    pub fn hide(&mut self, frame: &Frame, sink: &mut dyn DisplaySink) {
        if !self.visible {
            return;
        }
        self.visible = false;
        debug!(manager = %self.name, time = %frame.time, "manager hidden");
        for pool in &self.pools {
            pool.decrement_observers();
        }
        for actor in self.displayed.drain(..) {
            sink.remove_actor(&actor);
        }
    }

    // -------------------------------------------------------------------------
    // Frame traffic
    // -------------------------------------------------------------------------

    /// Forward a view change to the pools, filtered by change acceptance.
    ///
    /// A frame whose only changes are in ignored dimensions is dropped.
    /// Hidden managers record the frame but forward nothing; the pools are
    /// brought up to date on the next [`show`](Self::show).
    pub fn frame_changed(&mut self, frame: &Frame) {
        let prev = self.last_frame.replace(frame.clone());
        if !self.visible {
            return;
        }

        let Some(prev) = prev else {
            for pool in &self.pools {
                pool.set_crosshair(frame);
            }
            return;
        };

        let crosshair = self.acceptance.crosshair && frame.crosshair_changed(&prev);
        let resolution = self.acceptance.resolution && frame.resolution_changed(&prev);
        let bounds = self.acceptance.bounds && frame.bounds_changed(&prev);
        if !(crosshair || resolution || bounds) {
            return;
        }

        for pool in &self.pools {
            if resolution {
                // Geometry is fed through the settings store so the
                // pipeline digest changes and stale items recompute.
                pool.set_setting("view:resolution", frame.resolution);
            }
            if bounds {
                pool.set_setting(
                    "view:bounds",
                    format!("{},{}", frame.bounds[0], frame.bounds[1]),
                );
            }
            if resolution || bounds {
                pool.update(frame);
            }
            if crosshair {
                pool.set_crosshair(frame);
            }
        }
    }

    /// Drain finished work from the pools; returns the number of applied
    /// results. Call from the interactive thread before rendering.
    pub fn poll(&self) -> usize {
        self.pools.iter().map(|pool| pool.process_events()).sum()
    }

    // -------------------------------------------------------------------------
    // Rendering
    // -------------------------------------------------------------------------

    /// The timestamp this manager would display for a request at `t`, per
    /// its policy. `None` means nothing is ready to show yet.
    pub fn display_time(&self, t: TimeStamp) -> Option<TimeStamp> {
        match self.policy {
            ManagerPolicy::Passive => self.latest_common_ready(None),
            ManagerPolicy::Ready => self.latest_common_ready(Some(t)),
            ManagerPolicy::Temporal => Some(t),
        }
    }

    /// Push the actors for time `t` to the sink as a diff against the
    /// previous render. An item's old actors are removed before its new
    /// ones appear; actors present in both renders are left untouched.
    pub fn render(&mut self, t: TimeStamp, sink: &mut dyn DisplaySink) {
        if !self.visible {
            return;
        }

        let mut current: Vec<Actor> = Vec::new();
        if let Some(display_t) = self.display_time(t) {
            for pool in &self.pools {
                for actors in pool.actors(display_t).values() {
                    current.extend(actors.iter().cloned());
                }
            }
        }

        for old in &self.displayed {
            if !current.iter().any(|actor| actor.same_as(old)) {
                sink.remove_actor(old);
            }
        }
        for new in &current {
            if !self.displayed.iter().any(|actor| actor.same_as(new)) {
                sink.add_actor(new);
            }
        }
        self.displayed = current;
    }

    /// An independent manager over the same pools, for a second display
    /// context. Shares cache state; visibility and sink state start fresh.
    pub fn clone_manager(&self) -> RepresentationManager {
        RepresentationManager {
            name: self.name.clone(),
            policy: self.policy,
            acceptance: self.acceptance,
            pools: self.pools.clone(),
            visible: false,
            last_frame: None,
            displayed: Vec::new(),
        }
    }

    /// The latest timestamp every pool has ready, optionally capped at `t`.
    fn latest_common_ready(&self, t: Option<TimeStamp>) -> Option<TimeStamp> {
        self.pools
            .iter()
            .map(|pool| match t {
                Some(t) => pool.ready_range().latest_at_or_before(t),
                None => pool.last_ready(),
            })
            .min()
            .flatten()
    }
}

// =============================================================================
// Tests
// =============================================================================
