//! End-to-end pool behavior: readiness, coalescing, eviction, invalidation.

use std::sync::Arc;
use std::time::Duration;

use segview_core::{
    FrameClock, ItemId, PoolEvent, RepresentationPool, Scheduler, SettingValue, TimeStamp,
};

use super::test_utils::{
    pump_until_idle, pump_until_ready, test_config, SlicePayload, TrackingPipeline,
};

fn pool_with(
    pipeline: Arc<TrackingPipeline>,
    workers: usize,
    window: usize,
) -> (Arc<Scheduler>, RepresentationPool) {
    let config = test_config(workers, window);
    let scheduler = Arc::new(Scheduler::new(&config));
    let pool = RepresentationPool::new("slices", pipeline, scheduler.clone(), &config);
    pool.increment_observers();
    (scheduler, pool)
}

fn payload(pool: &RepresentationPool, t: TimeStamp, item: ItemId) -> SlicePayload {
    let actors = pool.actors(t);
    *actors[&item][0].downcast_ref::<SlicePayload>().unwrap()
}

#[test]
fn test_three_items_window_five() {
    let pipeline = TrackingPipeline::new();
    let (scheduler, pool) = pool_with(pipeline.clone(), 2, 5);
    let mut clock = FrameClock::new(10, 1.0, [0, 100]);
    let items = [ItemId(1), ItemId(2), ItemId(3)];

    pool.sources_added(&items, &clock.current_frame());
    let frame = clock.crosshair_moved(10);
    pool.set_crosshair(&frame);

    assert!(pump_until_ready(&pool, &scheduler, frame.time));
    pump_until_idle(&pool, &scheduler);

    // Positions 8..=12 for three items, each computed exactly once.
    assert_eq!(pipeline.total_calls(), 15);
    assert_eq!(pool.slot_count(), 15);

    let actors = pool.actors(frame.time);
    assert_eq!(actors.len(), 3);
    for item in items {
        assert_eq!(payload(&pool, frame.time, item).position, 10);
    }
}

#[test]
fn test_readiness_is_monotone_across_moves() {
    let pipeline = TrackingPipeline::new();
    let (scheduler, pool) = pool_with(pipeline, 2, 3);
    let mut clock = FrameClock::new(0, 1.0, [0, 100]);
    pool.sources_added(&[ItemId(1)], &clock.current_frame());

    let mut last_seen = None;
    for position in [5, 6, 30, 31, 2] {
        let frame = clock.crosshair_moved(position);
        pool.set_crosshair(&frame);
        pump_until_idle(&pool, &scheduler);

        let now = pool.last_ready();
        assert!(now >= last_seen, "ready time went backwards at {position}");
        last_seen = now;
    }
    assert_eq!(last_seen, Some(clock.current_time()));
}

#[test]
fn test_at_most_one_task_per_key() {
    let pipeline = TrackingPipeline::gated();
    let (scheduler, pool) = pool_with(pipeline.clone(), 2, 3);
    let mut clock = FrameClock::new(5, 1.0, [0, 100]);
    pool.sources_added(&[ItemId(1)], &clock.current_frame());

    // Repeated requests for the same view must attach to the in-flight
    // tasks, never duplicate them.
    let mut last = clock.crosshair_moved(5);
    pool.set_crosshair(&last);
    for _ in 0..4 {
        last = clock.crosshair_moved(5);
        pool.set_crosshair(&last);
    }
    assert!(pool.pending_task_count() <= 3);

    pipeline.open_gate();
    assert!(pump_until_ready(&pool, &scheduler, last.time));
    pump_until_idle(&pool, &scheduler);

    assert_eq!(pipeline.calls_for(ItemId(1), 5), 1);
    assert_eq!(pipeline.total_calls(), 3);
}

#[test]
fn test_cancelled_work_leaves_no_trace() {
    let pipeline = TrackingPipeline::gated();
    let (scheduler, pool) = pool_with(pipeline.clone(), 2, 3);
    let mut clock = FrameClock::new(0, 1.0, [0, 1000]);
    pool.sources_added(&[ItemId(1)], &clock.current_frame());

    // Request slice 10, then jump far away before anything finishes.
    let abandoned = clock.crosshair_moved(10);
    pool.set_crosshair(&abandoned);
    let current = clock.crosshair_moved(500);
    pool.set_crosshair(&current);

    pipeline.open_gate();
    assert!(pump_until_ready(&pool, &scheduler, current.time));
    pump_until_idle(&pool, &scheduler);

    // The abandoned frame never becomes ready and serves nothing.
    assert!(!pool.ready_range().contains(abandoned.time));
    assert!(pool.actors(abandoned.time).is_empty());
    assert_eq!(payload(&pool, current.time, ItemId(1)).position, 500);

    // Slots from the abandoned window are gone.
    assert_eq!(pool.slot_count(), 3);
}

#[test]
fn test_eviction_bound_with_inflight_tasks() {
    let pipeline = TrackingPipeline::gated();
    let (scheduler, pool) = pool_with(pipeline.clone(), 2, 5);
    let mut clock = FrameClock::new(0, 1.0, [0, 10_000]);
    let items = [ItemId(1), ItemId(2), ItemId(3)];
    pool.sources_added(&items, &clock.current_frame());

    // Jump around while every computation is stuck at the gate; the slot
    // count must never exceed window_size * item_count.
    for step in 1..=8 {
        pool.set_crosshair(&clock.crosshair_moved(step * 100));
        assert!(pool.slot_count() <= 15, "bound exceeded at step {step}");
    }

    pipeline.open_gate();
    let last = clock.current_time();
    assert!(pump_until_ready(&pool, &scheduler, last));
    pump_until_idle(&pool, &scheduler);
    assert_eq!(pool.slot_count(), 15);
}

#[test]
fn test_commits_follow_timestamp_order() {
    let pipeline = TrackingPipeline::gated();
    let (scheduler, pool) = pool_with(pipeline.clone(), 2, 3);
    let mut clock = FrameClock::new(0, 1.0, [0, 100]);
    pool.sources_added(&[ItemId(1)], &clock.current_frame());
    let events = pool.subscribe();

    // Two overlapping requests; both windows stay live.
    let f1 = clock.crosshair_moved(10);
    pool.set_crosshair(&f1);
    let f2 = clock.crosshair_moved(11);
    pool.set_crosshair(&f2);

    pipeline.open_gate();
    assert!(pump_until_ready(&pool, &scheduler, f2.time));
    pump_until_idle(&pool, &scheduler);

    assert_eq!(pool.last_ready(), Some(f2.time));
    assert_eq!(payload(&pool, f2.time, ItemId(1)).position, 11);

    // Ready events never go backwards in time.
    let ready_times: Vec<TimeStamp> = events
        .try_iter()
        .filter_map(|event| match event {
            PoolEvent::ActorsReady(t) => Some(t),
            _ => None,
        })
        .collect();
    assert!(!ready_times.is_empty());
    assert!(ready_times.windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
fn test_invalidation_recomputes_but_keeps_history() {
    let pipeline = TrackingPipeline::new();
    let (scheduler, pool) = pool_with(pipeline.clone(), 2, 3);
    let mut clock = FrameClock::new(0, 1.0, [0, 100]);
    pool.sources_added(&[ItemId(1), ItemId(2)], &clock.current_frame());
    let events = pool.subscribe();

    let before = clock.crosshair_moved(20);
    pool.set_crosshair(&before);
    assert!(pump_until_ready(&pool, &scheduler, before.time));

    // An edit to item 1 invalidates its cached actors.
    let edit = clock.state_changed();
    pool.invalidate_representations(&[ItemId(1)], &edit);
    assert!(pump_until_ready(&pool, &scheduler, edit.time));
    pump_until_idle(&pool, &scheduler);

    // Queries before the edit still serve the original actors.
    assert_eq!(payload(&pool, before.time, ItemId(1)).nth_call, 1);

    // Queries at the edit time serve the recomputed actor for item 1
    // while item 2's cached actor was not touched.
    assert_eq!(payload(&pool, edit.time, ItemId(1)).nth_call, 2);
    assert_eq!(payload(&pool, edit.time, ItemId(2)).nth_call, 1);
    assert_eq!(pipeline.calls_for(ItemId(2), 20), 1);

    let invalidations: Vec<TimeStamp> = events
        .try_iter()
        .filter_map(|event| match event {
            PoolEvent::ActorsInvalidated(t) => Some(t),
            _ => None,
        })
        .collect();
    assert_eq!(invalidations, vec![edit.time]);
}

#[test]
fn test_invalidation_never_serves_stale_actors_while_recomputing() {
    let pipeline = TrackingPipeline::new();
    let (scheduler, pool) = pool_with(pipeline.clone(), 2, 1);
    let mut clock = FrameClock::new(0, 1.0, [0, 100]);
    pool.sources_added(&[ItemId(1)], &clock.current_frame());

    let before = clock.crosshair_moved(9);
    pool.set_crosshair(&before);
    assert!(pump_until_ready(&pool, &scheduler, before.time));
    pump_until_idle(&pool, &scheduler);

    // Hold recomputation at the gate and invalidate the item.
    pipeline.close_gate();
    let edit = clock.state_changed();
    pool.invalidate_representations(&[ItemId(1)], &edit);

    // While the recompute is pending, a query at the edit time gets
    // nothing rather than the stale pre-edit actor.
    assert!(pool.actors(edit.time).is_empty());
    // History is untouched.
    assert_eq!(payload(&pool, before.time, ItemId(1)).nth_call, 1);

    pipeline.open_gate();
    assert!(pump_until_ready(&pool, &scheduler, edit.time));
    assert_eq!(payload(&pool, edit.time, ItemId(1)).nth_call, 2);
}

#[test]
fn test_failed_item_is_isolated_and_not_retried() {
    let pipeline = TrackingPipeline::new();
    pipeline.fail_item(ItemId(2));
    let (scheduler, pool) = pool_with(pipeline.clone(), 2, 3);
    let mut clock = FrameClock::new(0, 1.0, [0, 100]);
    pool.sources_added(&[ItemId(1), ItemId(2)], &clock.current_frame());

    let frame = clock.crosshair_moved(10);
    pool.set_crosshair(&frame);
    assert!(pump_until_ready(&pool, &scheduler, frame.time));
    pump_until_idle(&pool, &scheduler);

    // The failed item contributes nothing; its sibling is unaffected.
    let actors = pool.actors(frame.time);
    assert!(actors.contains_key(&ItemId(1)));
    assert!(!actors.contains_key(&ItemId(2)));

    // Revisiting the same window does not retry the failed keys.
    let back = clock.crosshair_moved(10);
    pool.set_crosshair(&back);
    pump_until_idle(&pool, &scheduler);
    assert_eq!(pipeline.calls_for(ItemId(1), 10), 1);
    assert_eq!(pipeline.total_calls(), 3);
}

#[test]
fn test_settings_change_recomputes_once() {
    let pipeline = TrackingPipeline::new();
    let (scheduler, pool) = pool_with(pipeline.clone(), 2, 1);
    let mut clock = FrameClock::new(7, 1.0, [0, 100]);
    pool.sources_added(&[ItemId(1)], &clock.current_frame());

    let f1 = clock.crosshair_moved(7);
    pool.set_crosshair(&f1);
    assert!(pump_until_ready(&pool, &scheduler, f1.time));

    // A real settings change recomputes the window.
    pool.set_setting("opacity", 0.4);
    assert_eq!(pool.setting("opacity"), Some(SettingValue::Float(0.4)));
    let f2 = clock.state_changed();
    pool.update(&f2);
    assert!(pump_until_ready(&pool, &scheduler, f2.time));
    assert_eq!(pipeline.calls_for(ItemId(1), 7), 2);

    // An update with nothing changed is a no-op commit.
    let f3 = clock.state_changed();
    pool.update(&f3);
    pump_until_idle(&pool, &scheduler);
    assert!(pool.ready_range().contains(f3.time));
    assert_eq!(pipeline.calls_for(ItemId(1), 7), 2);
}

#[test]
fn test_removed_source_disappears_from_snapshots() {
    let pipeline = TrackingPipeline::new();
    let (scheduler, pool) = pool_with(pipeline, 2, 1);
    let mut clock = FrameClock::new(0, 1.0, [0, 100]);
    pool.sources_added(&[ItemId(1), ItemId(2)], &clock.current_frame());

    let f1 = clock.crosshair_moved(3);
    pool.set_crosshair(&f1);
    assert!(pump_until_ready(&pool, &scheduler, f1.time));
    assert_eq!(pool.actors(f1.time).len(), 2);

    let f2 = clock.state_changed();
    pool.sources_removed(&[ItemId(2)], &f2);
    pump_until_idle(&pool, &scheduler);

    assert_eq!(pool.sources(), vec![ItemId(1)]);
    assert!(pool.has_sources());
    assert!(pool.ready_range().contains(f2.time));
    assert_eq!(pool.actors(f2.time).len(), 1);
    // The old snapshot still shows both.
    assert_eq!(pool.actors(f1.time).len(), 2);
}

#[test]
fn test_invalidate_previous_reclaims_old_snapshots() {
    let pipeline = TrackingPipeline::new();
    let (scheduler, pool) = pool_with(pipeline, 2, 1);
    let mut clock = FrameClock::new(0, 1.0, [0, 100]);
    pool.sources_added(&[ItemId(1)], &clock.current_frame());

    let f1 = clock.crosshair_moved(3);
    pool.set_crosshair(&f1);
    assert!(pump_until_ready(&pool, &scheduler, f1.time));

    let f2 = clock.crosshair_moved(4);
    pool.set_crosshair(&f2);
    assert!(pump_until_ready(&pool, &scheduler, f2.time));

    // All displays advanced past f1; its snapshot can be released.
    pool.invalidate_previous_actors(f2.time);
    assert!(pool.actors(f1.time).is_empty());
    assert!(!pool.actors(f2.time).is_empty());
}

#[test]
fn test_zero_observers_aborts_and_disables() {
    let pipeline = TrackingPipeline::gated();
    let (scheduler, pool) = pool_with(pipeline.clone(), 2, 3);
    let mut clock = FrameClock::new(0, 1.0, [0, 100]);
    pool.sources_added(&[ItemId(1)], &clock.current_frame());

    pool.set_crosshair(&clock.crosshair_moved(10));
    assert!(pool.pending_task_count() > 0);

    // Last observer leaves: in-flight work is abandoned.
    pool.decrement_observers();
    assert_eq!(pool.pending_task_count(), 0);

    // Further view changes schedule nothing while disabled.
    pipeline.open_gate();
    pool.set_crosshair(&clock.crosshair_moved(20));
    scheduler.wait_idle(Duration::from_secs(1));
    pool.process_events();
    assert_eq!(pipeline.total_calls(), 0);
    assert!(pool.ready_range().is_empty());
}
