//! Timestamp-keyed snapshot storage with a monotone ready range.
//!
//! [`RangedActors`] maps committed timestamps to immutable value snapshots.
//! A snapshot committed at time `t` also answers queries for any later time
//! up to the next committed snapshot, so consumers asking for "the latest
//! ready state at or before `t`" always get a single self-consistent value,
//! never a mix of two commits.

use crate::clock::{TimeRange, TimeStamp};

use std::collections::BTreeMap;

/// Snapshots committed at explicit timestamps plus the set of timestamps
/// known to be fully computed.
///
/// Two kinds of commit exist:
/// - [`commit`](Self::commit) stores a new snapshot at `t`;
/// - [`reuse`](Self::reuse) marks `t` ready without a new snapshot, meaning
///   "the previous snapshot is still exactly right at `t`" (cache hit on a
///   crosshair move back into the window).
#[derive(Debug, Clone)]
pub struct RangedActors<T> {
    snapshots: BTreeMap<TimeStamp, T>,
    ready: TimeRange,
    /// Queries at or after this time never fall back to a snapshot whose
    /// ready marker predates it; they return nothing until a commit or
    /// reuse at or after it lands.
    barrier: Option<TimeStamp>,
}

impl<T> Default for RangedActors<T> {
    fn default() -> Self {
        Self {
            snapshots: BTreeMap::new(),
            ready: TimeRange::new(),
            barrier: None,
        }
    }
}

impl<T> RangedActors<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new snapshot valid from `t` on, and mark `t` ready.
    ///
    /// Commits must arrive in increasing timestamp order; a commit at or
    /// before the last ready time is ignored (last-writer-wins by
    /// timestamp, not by arrival order).
    pub fn commit(&mut self, t: TimeStamp, value: T) {
        if let Some(last) = self.ready.last() {
            if t <= last {
                return;
            }
        }
        self.snapshots.insert(t, value);
        self.ready.insert(t);
    }

    /// Mark `t` ready, reusing the latest earlier snapshot.
    ///
    /// No-op if nothing was ever committed or `t` does not advance the
    /// range.
    pub fn reuse(&mut self, t: TimeStamp) {
        match self.ready.last() {
            Some(last) if t > last => self.ready.insert(t),
            _ => {}
        }
    }

    /// The timestamps currently ready.
    pub fn ready_range(&self) -> &TimeRange {
        &self.ready
    }

    /// The most recent ready timestamp.
    pub fn last_time(&self) -> Option<TimeStamp> {
        self.ready.last()
    }

    /// The snapshot valid at the latest ready timestamp at or before `t`.
    ///
    /// A query at or after the invalidation barrier is not answered from
    /// pre-barrier state; it returns `None` until recomputation commits.
    pub fn at(&self, t: TimeStamp) -> Option<&T> {
        let ready_at = self.ready.latest_at_or_before(t)?;
        if let Some(barrier) = self.barrier {
            if t >= barrier && ready_at < barrier {
                return None;
            }
        }
        // `ready_at` may be a reuse marker; walk back to the snapshot
        // backing it.
        self.snapshots.range(..=ready_at).next_back().map(|(_, v)| v)
    }

    /// The most recent snapshot, regardless of query time.
    pub fn last(&self) -> Option<&T> {
        self.snapshots.values().next_back()
    }

    /// Drop readiness (and snapshots) strictly before `t`, keeping the most
    /// recent earlier snapshot as backing for any ready times at or after
    /// `t` that reused it.
    pub fn invalidate_previous(&mut self, t: TimeStamp) {
        self.ready.invalidate_before(t);

        // Keep the newest snapshot at or before the earliest surviving
        // ready time; everything older is unreachable.
        if let Some(first_ready) = self.ready.first() {
            if let Some((&backing, _)) = self.snapshots.range(..=first_ready).next_back() {
                self.snapshots = self.snapshots.split_off(&backing);
            }
        } else {
            self.snapshots.clear();
        }
    }

    /// Mark stored state stale as of `t`. Queries strictly before `t` keep
    /// answering from history; queries at or after `t` answer only from
    /// commits or reuses at or after `t`.
    pub fn invalidate(&mut self, t: TimeStamp) {
        self.barrier = Some(match self.barrier {
            Some(previous) => previous.max(t),
            None => t,
        });
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.snapshots.clear();
        self.ready = TimeRange::new();
        self.barrier = None;
    }
}

// =============================================================================
// Tests
// =============================================================================
