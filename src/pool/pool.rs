//! The windowed, task-driven actor cache.
//!
//! A [`RepresentationPool`] owns, for a set of registered items and the
//! current view state, a window of cached actors keyed by
//! `(item, position)`, and drives background tasks to keep that window up
//! to date. Consumers read committed snapshots by timestamp and are never
//! shown a half-updated mix of old and new actors.
//!
//! # Thread affinity
//!
//! All methods are meant for the single interactive thread. Worker threads
//! communicate with the pool exclusively through a result channel drained
//! by [`process_events`](RepresentationPool::process_events); they never
//! touch the cache map directly.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::clock::{Frame, Position, TimeRange, TimeStamp};
use crate::config::CoreConfig;
use crate::error::TaskError;
use crate::pipeline::{Actor, ActorMap, ItemId, RepresentationPipeline, RepresentationState, SettingValue};
use crate::sched::{Priority, Scheduler, Task, TaskContext, TaskHandle};

use super::ranged::RangedActors;
use super::window::SliceWindow;

// =============================================================================
// Events
// =============================================================================

/// Notification emitted by a pool on the interactive thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolEvent {
    /// The snapshot for this timestamp is committed and retrievable via
    /// [`RepresentationPool::actors`].
    ActorsReady(TimeStamp),
    /// Cached actors were invalidated as of this timestamp; recomputation
    /// is underway.
    ActorsInvalidated(TimeStamp),
}

// =============================================================================
// Compute task
// =============================================================================

type CacheKey = (ItemId, Position);

struct TaskResult {
    key: CacheKey,
    task_id: u64,
    generation: u64,
    result: Result<Vec<Actor>, String>,
}

/// One pipeline invocation for one cache key, run on a worker thread.
struct ComputeTask {
    key: CacheKey,
    generation: u64,
    state: RepresentationState,
    pipeline: Arc<dyn RepresentationPipeline>,
    results: Sender<TaskResult>,
}

impl Task for ComputeTask {
    fn run(&mut self, ctx: &TaskContext) -> Result<(), TaskError> {
        if !ctx.can_execute() {
            return Err(TaskError::Aborted);
        }

        let outcome = self
            .pipeline
            .compute_actors(self.key.0, self.key.1, &self.state, ctx);

        // An abort observed during compute discards the partial result; it
        // must never reach the cache.
        if !ctx.can_execute() {
            return Err(TaskError::Aborted);
        }
        ctx.report_progress(100);

        match outcome {
            Ok(actors) => {
                let _ = self.results.send(TaskResult {
                    key: self.key,
                    task_id: ctx.task_id(),
                    generation: self.generation,
                    result: Ok(actors),
                });
                Ok(())
            }
            Err(err) => {
                let _ = self.results.send(TaskResult {
                    key: self.key,
                    task_id: ctx.task_id(),
                    generation: self.generation,
                    result: Err(err.to_string()),
                });
                Err(TaskError::Pipeline(err))
            }
        }
    }

    fn description(&self) -> String {
        format!(
            "{} {} @ slice {}",
            self.pipeline.name(),
            self.key.0,
            self.key.1
        )
    }
}

// =============================================================================
// Cache slots
// =============================================================================

enum Slot {
    /// A task is in flight for this key; at most one exists per key.
    Pending { handle: TaskHandle, generation: u64 },
    /// Actors computed and valid for the stored generation.
    Ready { actors: Vec<Actor>, generation: u64 },
    /// The pipeline failed for this key; not retried until invalidated.
    Failed { generation: u64 },
}

impl Slot {
    fn generation(&self) -> u64 {
        match self {
            Slot::Pending { generation, .. }
            | Slot::Ready { generation, .. }
            | Slot::Failed { generation } => *generation,
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, Slot::Ready { .. } | Slot::Failed { .. })
    }
}

struct PoolState {
    items: Vec<ItemId>,
    generations: HashMap<ItemId, u64>,
    digests: HashMap<ItemId, u64>,
    slots: HashMap<CacheKey, Slot>,
    window: Option<SliceWindow>,
    settings: RepresentationState,
    valid_actors: RangedActors<ActorMap>,
    /// Frames whose snapshot has not been committed yet: time → crosshair.
    pending_frames: BTreeMap<TimeStamp, Position>,
    observers: usize,
    subscribers: Vec<Sender<PoolEvent>>,
}

// =============================================================================
// RepresentationPool
// =============================================================================

/// Windowed actor cache for one pipeline over a set of registered items.
pub struct RepresentationPool {
    name: String,
    pipeline: Arc<dyn RepresentationPipeline>,
    scheduler: Arc<Scheduler>,
    window_size: usize,
    state: Mutex<PoolState>,
    results_tx: Sender<TaskResult>,
    results_rx: Receiver<TaskResult>,
}

impl RepresentationPool {
    /// Create a pool for `pipeline`, scheduling work on `scheduler`.
    pub fn new(
        name: impl Into<String>,
        pipeline: Arc<dyn RepresentationPipeline>,
        scheduler: Arc<Scheduler>,
        config: &CoreConfig,
    ) -> Self {
        let (results_tx, results_rx) = crossbeam_channel::unbounded();
        Self {
            name: name.into(),
            pipeline,
            scheduler,
            window_size: config.window_size,
            state: Mutex::new(PoolState {
                items: Vec::new(),
                generations: HashMap::new(),
                digests: HashMap::new(),
                slots: HashMap::new(),
                window: None,
                settings: RepresentationState::new(),
                valid_actors: RangedActors::new(),
                pending_frames: BTreeMap::new(),
                observers: 0,
                subscribers: Vec::new(),
            }),
            results_tx,
            results_rx,
        }
    }

    /// The pool's name, used in log output.
    pub fn name(&self) -> &str {
        &self.name
    }

    // -------------------------------------------------------------------------
    // Sources
    // -------------------------------------------------------------------------

    /// Register items added by the external model.
    pub fn sources_added(&self, items: &[ItemId], frame: &Frame) {
        let mut state = self.state.lock();
        for &item in items {
            if !state.items.contains(&item) {
                state.items.push(item);
                state.generations.insert(item, 0);
            }
        }
        debug!(pool = %self.name, added = items.len(), "sources added");
        self.refresh_window(&mut state, frame);
        if state.observers > 0 {
            state.pending_frames.insert(frame.time, frame.crosshair);
            self.try_commit(&mut state);
        }
    }

    /// Unregister items removed by the external model; their cached actors
    /// are released and their in-flight tasks aborted.
    pub fn sources_removed(&self, items: &[ItemId], frame: &Frame) {
        let mut state = self.state.lock();
        for item in items {
            state.items.retain(|i| i != item);
            state.generations.remove(item);
            state.digests.remove(item);

            let stale: Vec<CacheKey> = state
                .slots
                .keys()
                .filter(|(i, _)| i == item)
                .copied()
                .collect();
            for key in stale {
                if let Some(Slot::Pending { handle, .. }) = state.slots.remove(&key) {
                    self.scheduler.abort(&handle);
                }
            }
        }
        debug!(pool = %self.name, removed = items.len(), "sources removed");
        if state.observers > 0 {
            state.pending_frames.insert(frame.time, frame.crosshair);
            self.try_commit(&mut state);
        }
    }

    /// The currently registered items.
    pub fn sources(&self) -> Vec<ItemId> {
        self.state.lock().items.clone()
    }

    /// Returns true if any items are registered.
    pub fn has_sources(&self) -> bool {
        !self.state.lock().items.is_empty()
    }

    // -------------------------------------------------------------------------
    // Observers
    // -------------------------------------------------------------------------

    /// Record one more visible manager using this pool.
    pub fn increment_observers(&self) {
        self.state.lock().observers += 1;
    }

    /// Record one fewer visible manager. When the count reaches zero the
    /// pool aborts its in-flight tasks; cached actors stay available.
    pub fn decrement_observers(&self) {
        let mut state = self.state.lock();
        debug_assert!(state.observers > 0);
        state.observers = state.observers.saturating_sub(1);
        if state.observers == 0 {
            let pending: Vec<CacheKey> = state
                .slots
                .iter()
                .filter(|(_, slot)| matches!(slot, Slot::Pending { .. }))
                .map(|(key, _)| *key)
                .collect();
            for key in pending {
                if let Some(Slot::Pending { handle, .. }) = state.slots.remove(&key) {
                    self.scheduler.abort(&handle);
                }
            }
            state.pending_frames.clear();
            trace!(pool = %self.name, "pool idle; in-flight tasks aborted");
        }
    }

    fn is_enabled(state: &PoolState) -> bool {
        state.observers > 0 && !state.items.is_empty()
    }

    // -------------------------------------------------------------------------
    // View state changes
    // -------------------------------------------------------------------------

    /// Re-center the window on the frame's crosshair, evicting positions
    /// that fell outside and scheduling whatever became visible.
    /// Returns immediately; results arrive via [`process_events`](Self::process_events).
    pub fn set_crosshair(&self, frame: &Frame) {
        let mut state = self.state.lock();

        let window = match state.window {
            Some(window) => window.recentered(frame.crosshair),
            None => SliceWindow::new(frame.crosshair, self.window_size),
        };
        state.window = Some(window);

        // Strict window eviction: anything outside the new window is
        // dropped now, with no grace period.
        let evicted: Vec<CacheKey> = state
            .slots
            .keys()
            .filter(|(_, pos)| !window.contains(*pos))
            .copied()
            .collect();
        if !evicted.is_empty() {
            trace!(pool = %self.name, count = evicted.len(), "window eviction");
        }
        for key in evicted {
            if let Some(Slot::Pending { handle, .. }) = state.slots.remove(&key) {
                self.scheduler.abort(&handle);
            }
        }

        if Self::is_enabled(&state) {
            self.schedule_window(&mut state, window);
        }

        // A hidden pool never commits, so queueing frames for it would only
        // grow the map until the next observer cycle.
        if state.observers > 0 {
            state.pending_frames.insert(frame.time, frame.crosshair);
            self.try_commit(&mut state);
        }
    }

    /// Apply pending settings changes and recompute items whose observable
    /// pipeline inputs actually changed.
    pub fn update(&self, frame: &Frame) {
        let mut state = self.state.lock();
        state.settings.commit();

        let mut stale_items = Vec::new();
        for &item in &state.items {
            let digest = self.pipeline.representation_state(item, &state.settings);
            if state.digests.get(&item) != Some(&digest) {
                stale_items.push(item);
            }
        }

        for &item in &stale_items {
            *state.generations.entry(item).or_insert(0) += 1;
            self.drop_item_slots(&mut state, item);
        }

        if !stale_items.is_empty() {
            debug!(pool = %self.name, items = stale_items.len(), "settings changed; recomputing");
        }

        if let (true, Some(window)) = (Self::is_enabled(&state), state.window) {
            self.schedule_window(&mut state, window);
        }
        if state.observers > 0 {
            state.pending_frames.insert(frame.time, frame.crosshair);
            self.try_commit(&mut state);
        }
    }

    /// Stage a settings change; call [`update`](Self::update) with the
    /// frame of the change to apply it.
    pub fn set_setting(&self, tag: impl Into<String>, value: impl Into<SettingValue>) {
        self.state.lock().settings.set(tag, value);
    }

    /// Read a staged or committed setting.
    pub fn setting(&self, tag: &str) -> Option<SettingValue> {
        self.state.lock().settings.get(tag).cloned()
    }

    /// Mark the cached actors for `items` stale as of `frame.time`.
    ///
    /// Snapshots committed for earlier timestamps remain retrievable (the
    /// past stays as it was); queries at or after `frame.time` are served
    /// only once recomputation commits.
    pub fn invalidate_representations(&self, items: &[ItemId], frame: &Frame) {
        let mut state = self.state.lock();

        for &item in items {
            if !state.items.contains(&item) {
                continue;
            }
            *state.generations.entry(item).or_insert(0) += 1;
            self.drop_item_slots(&mut state, item);
        }

        // Older uncommitted frames could now only commit a stale mix.
        state.pending_frames.clear();

        // Reads at or after this frame must not fall back to the stale
        // snapshot; they return nothing until recomputation commits.
        state.valid_actors.invalidate(frame.time);

        debug!(pool = %self.name, time = %frame.time, items = items.len(), "representations invalidated");
        Self::emit(&mut state, PoolEvent::ActorsInvalidated(frame.time));

        if let (true, Some(window)) = (Self::is_enabled(&state), state.window) {
            self.schedule_window(&mut state, window);
        }
        if state.observers > 0 {
            state.pending_frames.insert(frame.time, frame.crosshair);
            self.try_commit(&mut state);
        }
    }

    /// Release snapshots committed strictly before `t`.
    ///
    /// Unlike [`invalidate_representations`](Self::invalidate_representations)
    /// this drops the historical views themselves (memory reclaim after all
    /// displays advanced past `t`).
    pub fn invalidate_previous_actors(&self, t: TimeStamp) {
        self.state.lock().valid_actors.invalidate_previous(t);
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// The snapshot valid at the latest ready timestamp at or before `t`.
    ///
    /// Monotone: once a timestamp is reported ready its snapshot stays
    /// retrievable until explicitly invalidated.
    pub fn actors(&self, t: TimeStamp) -> ActorMap {
        self.state
            .lock()
            .valid_actors
            .at(t)
            .cloned()
            .unwrap_or_default()
    }

    /// The set of timestamps whose snapshots are fully computed.
    pub fn ready_range(&self) -> TimeRange {
        self.state.lock().valid_actors.ready_range().clone()
    }

    /// The most recent ready timestamp.
    pub fn last_ready(&self) -> Option<TimeStamp> {
        self.state.lock().valid_actors.last_time()
    }

    /// Number of live cache slots (bounded by window size × item count).
    pub fn slot_count(&self) -> usize {
        self.state.lock().slots.len()
    }

    /// Number of keys with a task currently in flight.
    pub fn pending_task_count(&self) -> usize {
        self.state
            .lock()
            .slots
            .values()
            .filter(|slot| matches!(slot, Slot::Pending { .. }))
            .count()
    }

    /// Subscribe to readiness and invalidation events. Events are emitted
    /// from the interactive thread during
    /// [`process_events`](Self::process_events) and the mutating calls.
    pub fn subscribe(&self) -> Receiver<PoolEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.state.lock().subscribers.push(tx);
        rx
    }

    // -------------------------------------------------------------------------
    // Result application (interactive thread)
    // -------------------------------------------------------------------------

    /// Drain finished task results, apply them to the cache and commit any
    /// frames that became fully computed. Returns the number of results
    /// applied.
    ///
    /// Must be called from the interactive thread; this is the only place
    /// worker output reaches the cache map.
    pub fn process_events(&self) -> usize {
        let mut applied = 0;
        let mut state = self.state.lock();

        while let Ok(result) = self.results_rx.try_recv() {
            let Some(slot) = state.slots.get(&result.key) else {
                // Evicted while in flight.
                continue;
            };

            // Only the slot's current task may fill it; anything else is a
            // superseded writer whose output is dropped.
            let accept = matches!(
                slot,
                Slot::Pending { handle, generation }
                    if handle.id() == result.task_id && *generation == result.generation
            );
            if !accept {
                trace!(pool = %self.name, item = %result.key.0, position = result.key.1,
                       "discarding superseded result");
                continue;
            }

            let slot = match result.result {
                Ok(actors) => Slot::Ready {
                    actors,
                    generation: result.generation,
                },
                Err(message) => {
                    debug!(pool = %self.name, item = %result.key.0, position = result.key.1,
                           error = message, "pipeline failed; key marked failed");
                    Slot::Failed {
                        generation: result.generation,
                    }
                }
            };
            state.slots.insert(result.key, slot);
            applied += 1;
        }

        if applied > 0 {
            self.try_commit(&mut state);
        }
        applied
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    /// Ensure a window exists and, when enabled, schedule its stale keys.
    fn refresh_window(&self, state: &mut PoolState, frame: &Frame) {
        let window = match state.window {
            Some(window) => window.recentered(frame.crosshair),
            None => SliceWindow::new(frame.crosshair, self.window_size),
        };
        state.window = Some(window);
        if Self::is_enabled(state) {
            self.schedule_window(state, window);
        }
    }

    /// Schedule tasks for every (item, position) in the window that is
    /// missing or stale. The center position is prioritized; a key already
    /// in flight is never duplicated, at most promoted.
    fn schedule_window(&self, state: &mut PoolState, window: SliceWindow) {
        let items = state.items.clone();
        let positions: Vec<Position> = window.positions_by_distance().collect();

        for &item in &items {
            let generation = *state.generations.get(&item).unwrap_or(&0);
            let digest = self.pipeline.representation_state(item, &state.settings);
            state.digests.insert(item, digest);

            for &position in &positions {
                let key = (item, position);
                let priority = if position == window.center() {
                    Priority::Prioritized
                } else {
                    Priority::Normal
                };

                match state.slots.get(&key) {
                    Some(slot) if slot.generation() == generation => {
                        // Coalescing: a matching in-flight request is
                        // attached to, never duplicated. Promote it if the
                        // crosshair landed on it.
                        if let (Slot::Pending { handle, .. }, Priority::Prioritized) =
                            (slot, priority)
                        {
                            self.scheduler.promote(handle);
                        }
                        continue;
                    }
                    Some(Slot::Pending { handle, .. }) => {
                        // Stale generation still in flight: replace it.
                        self.scheduler.abort(handle);
                    }
                    _ => {}
                }

                let handle = self.scheduler.submit_with_priority(
                    Box::new(ComputeTask {
                        key,
                        generation,
                        state: state.settings.clone(),
                        pipeline: self.pipeline.clone(),
                        results: self.results_tx.clone(),
                    }),
                    priority,
                );
                state.slots.insert(key, Slot::Pending { handle, generation });
            }
        }
    }

    fn drop_item_slots(&self, state: &mut PoolState, item: ItemId) {
        let stale: Vec<CacheKey> = state
            .slots
            .keys()
            .filter(|(i, _)| *i == item)
            .copied()
            .collect();
        for key in stale {
            if let Some(Slot::Pending { handle, .. }) = state.slots.remove(&key) {
                self.scheduler.abort(&handle);
            }
        }
    }

    /// Commit every pending frame whose required keys are all terminal,
    /// in increasing time order. Once a frame commits, older pending
    /// frames are dropped: the view only advances.
    fn try_commit(&self, state: &mut PoolState) {
        loop {
            let Some((&time, &crosshair)) = state.pending_frames.iter().next_back() else {
                return;
            };

            let complete = state.items.iter().all(|&item| {
                let generation = *state.generations.get(&item).unwrap_or(&0);
                matches!(
                    state.slots.get(&(item, crosshair)),
                    Some(slot) if slot.is_terminal() && slot.generation() == generation
                )
            });
            if !complete {
                // Try older pending frames only if the newest cannot commit
                // yet; committing newest first makes the older ones moot.
                let newest_incomplete = time;
                let older: Vec<(TimeStamp, Position)> = state
                    .pending_frames
                    .range(..newest_incomplete)
                    .map(|(&t, &p)| (t, p))
                    .collect();
                let mut committed_any = false;
                for (t, p) in older.into_iter().rev() {
                    if self.commit_if_complete(state, t, p) {
                        committed_any = true;
                        break;
                    }
                }
                if !committed_any {
                    return;
                }
                continue;
            }

            self.commit_frame(state, time, crosshair);
        }
    }

    fn commit_if_complete(&self, state: &mut PoolState, time: TimeStamp, crosshair: Position) -> bool {
        let complete = state.items.iter().all(|&item| {
            let generation = *state.generations.get(&item).unwrap_or(&0);
            matches!(
                state.slots.get(&(item, crosshair)),
                Some(slot) if slot.is_terminal() && slot.generation() == generation
            )
        });
        if complete {
            self.commit_frame(state, time, crosshair);
        }
        complete
    }

    fn commit_frame(&self, state: &mut PoolState, time: TimeStamp, crosshair: Position) {
        let mut actors: ActorMap = HashMap::new();
        for &item in &state.items {
            if let Some(Slot::Ready { actors: list, .. }) = state.slots.get(&(item, crosshair)) {
                actors.insert(item, list.clone());
            }
            // Failed items contribute no actor: missing rather than stale.
        }

        // Drop this frame and everything older; the snapshot only advances.
        let newer = state.pending_frames.split_off(&time.next());
        state.pending_frames = newer;

        if Self::same_actors(state.valid_actors.last(), &actors) {
            state.valid_actors.reuse(time);
            trace!(pool = %self.name, time = %time, "frame ready (reused)");
        } else {
            state.valid_actors.commit(time, actors);
            trace!(pool = %self.name, time = %time, "frame ready");
        }
        Self::emit(state, PoolEvent::ActorsReady(time));
    }

    fn same_actors(previous: Option<&ActorMap>, current: &ActorMap) -> bool {
        let Some(previous) = previous else {
            return false;
        };
        if previous.len() != current.len() {
            return false;
        }
        current.iter().all(|(item, list)| {
            previous.get(item).is_some_and(|old| {
                old.len() == list.len() && old.iter().zip(list).all(|(a, b)| a.same_as(b))
            })
        })
    }

    fn emit(state: &mut PoolState, event: PoolEvent) {
        state.subscribers.retain(|tx| tx.send(event).is_ok());
    }
}

impl Drop for RepresentationPool {
    fn drop(&mut self) {
        let state = self.state.lock();
        for slot in state.slots.values() {
            if let Slot::Pending { handle, .. } = slot {
                handle.abort();
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
