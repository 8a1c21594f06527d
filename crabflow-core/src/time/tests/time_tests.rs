use super::*;
use std::thread;

#[test]
fn test_tracker_single_channel_advances() {
    let mut tracker = WatermarkTracker::new(1);
    assert_eq!(tracker.current(), EVENT_TIME_MIN);
    assert_eq!(
        tracker.advance(0, Watermark::new(1_000)),
        Some(Watermark::new(1_000))
    );
    // Older watermark: no regression.
    assert_eq!(tracker.advance(0, Watermark::new(500)), None);
    assert_eq!(
        tracker.advance(0, Watermark::new(2_000)),
        Some(Watermark::new(2_000))
    );
}

#[test]
fn test_tracker_two_channels_min() {
    let mut tracker = WatermarkTracker::new(2);
    // Channel 1 has not reported yet, so the minimum stays at MIN.
    assert_eq!(tracker.advance(0, Watermark::new(1_000)), None);
    assert_eq!(
        tracker.advance(1, Watermark::new(800)),
        Some(Watermark::new(800))
    );
    assert_eq!(
        tracker.advance(1, Watermark::new(3_000)),
        Some(Watermark::new(1_000))
    );
    assert_eq!(tracker.current(), 1_000);
}

#[test]
fn test_tracker_idle_channel_excluded_until_active() {
    let mut tracker = WatermarkTracker::new(2);
    tracker.advance(0, Watermark::new(5_000));
    assert_eq!(tracker.mark_idle(1), Some(Watermark::new(5_000)));
    assert!(tracker.is_idle(1));

    // Waking with a stale watermark is clamped to the current minimum.
    assert_eq!(tracker.advance(1, Watermark::new(100)), None);
    assert!(!tracker.is_idle(1));
    assert_eq!(tracker.current(), 5_000);

    tracker.mark_idle(1);
    tracker.record_activity(1);
    assert!(!tracker.is_idle(1));
}

#[test]
fn test_tracker_all_idle_releases_furthest_watermark() {
    let mut tracker = WatermarkTracker::new(2);
    tracker.advance(0, Watermark::new(10));
    tracker.advance(1, Watermark::new(20));
    assert_eq!(tracker.mark_idle(1), None);
    assert_eq!(tracker.current(), 10);
    assert_eq!(tracker.mark_idle(0), Some(Watermark::new(20)));

    // Nothing moves backwards when a channel wakes up behind.
    assert_eq!(tracker.advance(0, Watermark::new(12)), None);
    assert_eq!(tracker.current(), 20);
}

#[test]
fn test_tracker_finished_channels() {
    let mut tracker = WatermarkTracker::new(2);
    tracker.advance(0, Watermark::new(7_000));
    tracker.advance(1, Watermark::new(2_000));
    assert_eq!(tracker.finish(1), Some(Watermark::new(7_000)));
    // Finished channels ignore further watermarks.
    assert_eq!(tracker.advance(1, Watermark::new(1)), None);
    assert!(!tracker.is_finished());

    assert_eq!(tracker.finish(0), Some(Watermark::new(EVENT_TIME_MAX)));
    assert!(tracker.is_finished());
    assert_eq!(tracker.finish(0), None);
}

#[test]
fn test_tracker_auto_idle_detection() {
    let mut tracker = WatermarkTracker::with_idle_timeout(2, Duration::from_millis(50));
    tracker.advance(0, Watermark::new(500));
    thread::sleep(Duration::from_millis(80));
    tracker.advance(0, Watermark::new(600));

    assert_eq!(tracker.detect_idle_channels(), Some(Watermark::new(600)));
    assert!(tracker.is_idle(1));
    assert!(!tracker.is_idle(0));
}

#[test]
fn test_tracker_without_timeout_never_detects_idle() {
    let mut tracker = WatermarkTracker::new(1);
    assert_eq!(tracker.detect_idle_channels(), None);
    assert!(!tracker.is_idle(0));
}

#[test]
fn test_tracker_unknown_channel_ignored() {
    let mut tracker = WatermarkTracker::new(1);
    assert_eq!(tracker.advance(3, Watermark::new(1)), None);
    assert_eq!(tracker.mark_idle(3), None);
    assert!(!tracker.is_idle(3));
}
