use ordered_collector::{rate_per_sec, StatsTracker};

const SECOND: u128 = 1_000_000_000;

#[test]
fn zero_elapsed_reports_zero_rate() {
    assert_eq!(rate_per_sec(100, 0), 0.0);
    let mut tracker = StatsTracker::new();
    assert_eq!(tracker.rate(5), 0.0);
    tracker.record(3 * SECOND);
    assert_eq!(tracker.elapsed_ns(), 0);
    assert_eq!(tracker.rate(5), 0.0);
}

#[test]
fn rate_uses_first_and_last_observation() {
    let mut tracker = StatsTracker::new();
    tracker.record(SECOND);
    tracker.record(2 * SECOND);
    tracker.record(3 * SECOND);
    assert_eq!(tracker.first_object_ns(), Some(SECOND));
    assert_eq!(tracker.last_object_ns(), Some(3 * SECOND));
    assert_eq!(tracker.elapsed_ns(), 2 * SECOND);
    assert!((tracker.rate(100) - 50.0).abs() < 1e-9);
}

#[test]
fn tiny_windows_are_bounded_by_epsilon() {
    let rate = rate_per_sec(1, 1);
    assert!(rate.is_finite());
    assert!((rate - 1e9).abs() < 1.0);
}

#[test]
fn reset_restarts_the_window() {
    let mut tracker = StatsTracker::new();
    tracker.record(SECOND);
    tracker.record(5 * SECOND);
    tracker.reset();
    assert_eq!(tracker.first_object_ns(), None);
    tracker.record(9 * SECOND);
    assert_eq!(tracker.first_object_ns(), Some(9 * SECOND));
    assert_eq!(tracker.elapsed_ns(), 0);
}

#[test]
fn out_of_order_observations_never_shrink_the_window() {
    let mut tracker = StatsTracker::new();
    tracker.record(2 * SECOND);
    tracker.record(4 * SECOND);
    tracker.record(3 * SECOND);
    assert_eq!(tracker.last_object_ns(), Some(4 * SECOND));
}
