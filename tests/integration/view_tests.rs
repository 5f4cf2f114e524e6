//! End-to-end display behavior: managers, policies, switches.

use std::sync::Arc;
use std::time::Duration;

use segview_core::{
    ChangeAcceptance, FrameClock, GroupMode, ItemId, ManagerPolicy, RepresentationManager,
    RepresentationPool, RepresentationSwitch, Scheduler,
};

use super::test_utils::{test_config, RecordingSink, TrackingPipeline};

fn shared_pool(
    pipeline: Arc<TrackingPipeline>,
    window: usize,
) -> (Arc<Scheduler>, Arc<RepresentationPool>, FrameClock) {
    let config = test_config(2, window);
    let scheduler = Arc::new(Scheduler::new(&config));
    let pool = Arc::new(RepresentationPool::new(
        "slices",
        pipeline,
        scheduler.clone(),
        &config,
    ));
    (scheduler, pool, FrameClock::new(0, 1.0, [0, 100]))
}

fn settle(manager: &RepresentationManager, scheduler: &Scheduler) {
    for _ in 0..500 {
        scheduler.wait_idle(Duration::from_millis(100));
        if manager.poll() == 0 && scheduler.pending_count() == 0 {
            return;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn test_full_show_move_render_flow() {
    let pipeline = TrackingPipeline::new();
    let (scheduler, pool, mut clock) = shared_pool(pipeline, 3);
    pool.sources_added(&[ItemId(1), ItemId(2)], &clock.current_frame());

    let mut manager = RepresentationManager::new("seg", ManagerPolicy::Ready, vec![pool.clone()]);
    let mut sink = RecordingSink::new();

    let f1 = clock.crosshair_moved(10);
    manager.show(&f1);
    settle(&manager, &scheduler);
    manager.render(f1.time, &mut sink);

    assert_eq!(sink.current.len(), 2);
    assert!(sink.payloads().iter().all(|p| p.position == 10));

    // Move to a neighbor; old actors are swapped out for the new position.
    let f2 = clock.crosshair_moved(11);
    manager.frame_changed(&f2);
    settle(&manager, &scheduler);
    manager.render(f2.time, &mut sink);

    assert_eq!(sink.current.len(), 2);
    assert!(sink.payloads().iter().all(|p| p.position == 11));
}

#[test]
fn test_ready_policy_lags_temporal_shows_best_available() {
    let pipeline = TrackingPipeline::new();
    let (scheduler, pool, mut clock) = shared_pool(pipeline.clone(), 1);
    pool.sources_added(&[ItemId(1)], &clock.current_frame());

    let mut ready = RepresentationManager::new("ready", ManagerPolicy::Ready, vec![pool.clone()]);
    let mut temporal =
        RepresentationManager::new("temporal", ManagerPolicy::Temporal, vec![pool.clone()]);

    let f1 = clock.crosshair_moved(5);
    ready.show(&f1);
    temporal.show(&f1);
    settle(&ready, &scheduler);

    // Hold new work at the gate and move on.
    pipeline.close_gate();
    let f2 = clock.crosshair_moved(60);
    ready.frame_changed(&f2);

    // The ready manager falls back to the last fully-computed time; the
    // temporal one asks for the current time and takes what exists.
    assert_eq!(ready.display_time(f2.time), Some(f1.time));
    assert_eq!(temporal.display_time(f2.time), Some(f2.time));

    let mut sink = RecordingSink::new();
    temporal.render(f2.time, &mut sink);
    assert!(sink.payloads().iter().all(|p| p.position == 5));

    pipeline.open_gate();
    settle(&ready, &scheduler);
    assert_eq!(ready.display_time(f2.time), Some(f2.time));
}

#[test]
fn test_two_views_share_one_pool() {
    let pipeline = TrackingPipeline::new();
    let (scheduler, pool, mut clock) = shared_pool(pipeline.clone(), 3);
    pool.sources_added(&[ItemId(1)], &clock.current_frame());

    let mut first = RepresentationManager::new("seg", ManagerPolicy::Ready, vec![pool.clone()]);
    let mut second = first.clone_manager();

    let frame = clock.crosshair_moved(10);
    first.show(&frame);
    second.show(&frame);
    settle(&first, &scheduler);

    let mut sink_a = RecordingSink::new();
    let mut sink_b = RecordingSink::new();
    first.render(frame.time, &mut sink_a);
    second.render(frame.time, &mut sink_b);

    // Both views display the same shared actors, computed once.
    assert_eq!(sink_a.current.len(), 1);
    assert_eq!(sink_b.current.len(), 1);
    assert!(sink_a.current[0].same_as(&sink_b.current[0]));
    assert_eq!(pipeline.calls_for(ItemId(1), 10), 1);

    // Hiding one view leaves the pool alive for the other.
    first.hide(&clock.state_changed(), &mut sink_a);
    assert!(sink_a.current.is_empty());
    assert_eq!(pool.pending_task_count(), 0);
    assert!(!sink_b.current.is_empty());
}

#[test]
fn test_crosshair_ignoring_manager_skips_pool_traffic() {
    let pipeline = TrackingPipeline::new();
    let (scheduler, pool, mut clock) = shared_pool(pipeline.clone(), 1);
    pool.sources_added(&[ItemId(1)], &clock.current_frame());

    let mut manager =
        RepresentationManager::new("volume", ManagerPolicy::Passive, vec![pool.clone()])
            .with_acceptance(ChangeAcceptance {
                crosshair: false,
                resolution: true,
                bounds: true,
            });

    manager.show(&clock.crosshair_moved(5));
    settle(&manager, &scheduler);
    let calls_after_show = pipeline.total_calls();

    for position in [20, 40, 60] {
        manager.frame_changed(&clock.crosshair_moved(position));
    }
    settle(&manager, &scheduler);
    assert_eq!(pipeline.total_calls(), calls_after_show);

    // A resolution change is accepted and recomputes.
    manager.frame_changed(&clock.resolution_changed(2.0));
    settle(&manager, &scheduler);
    let calls_after_resolution = pipeline.total_calls();
    assert!(calls_after_resolution > calls_after_show);

    // So is a bounds change.
    manager.frame_changed(&clock.bounds_changed([0, 50]));
    settle(&manager, &scheduler);
    assert!(pipeline.total_calls() > calls_after_resolution);
}

#[test]
fn test_switch_swaps_display_ownership() {
    let config = test_config(2, 1);
    let scheduler = Arc::new(Scheduler::new(&config));
    let mut clock = FrameClock::new(0, 1.0, [0, 100]);

    let managers: Vec<RepresentationManager> = (0..2)
        .map(|i| {
            let pool = Arc::new(RepresentationPool::new(
                format!("pool{i}"),
                TrackingPipeline::new(),
                scheduler.clone(),
                &config,
            ));
            pool.sources_added(&[ItemId(1)], &clock.current_frame());
            RepresentationManager::new(format!("m{i}"), ManagerPolicy::Ready, vec![pool])
        })
        .collect();
    let mut switch = RepresentationSwitch::new("seg", managers, GroupMode::Exclusive);
    let mut sink = RecordingSink::new();

    let frame = clock.crosshair_moved(10);
    switch.set_enabled(true, &frame, &mut sink);
    for _ in 0..500 {
        scheduler.wait_idle(Duration::from_millis(100));
        if switch.poll() == 0 && scheduler.pending_count() == 0 {
            break;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    switch.render(frame.time, &mut sink);
    assert_eq!(sink.current.len(), 1);

    switch.activate(1, &frame, &mut sink).unwrap();
    for _ in 0..500 {
        scheduler.wait_idle(Duration::from_millis(100));
        if switch.poll() == 0 && scheduler.pending_count() == 0 {
            break;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    switch.render(frame.time, &mut sink);

    // Exactly one manager's actors occupy the display slot at any time.
    assert_eq!(sink.current.len(), 1);
    assert!(!switch.managers()[0].is_visible());
    assert!(switch.managers()[1].is_visible());

    // Persist and restore the selection on a fresh switch.
    let saved = switch.save_settings();
    assert_eq!(
        saved,
        vec![
            ("enabled".to_string(), "true".to_string()),
            ("active".to_string(), "1".to_string()),
        ]
    );
}
