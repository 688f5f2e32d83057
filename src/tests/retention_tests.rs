// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use crate::config::NANOS_PER_DAY;
use crate::retention::RetentionWindow;
use crate::types::timestamp::Timestamp;

const NOW: Timestamp = Timestamp(1_700_000_000_000_000_000);

fn days_ago(days: i64) -> Timestamp {
    Timestamp(NOW.0 - days * NANOS_PER_DAY)
}

#[test]
fn test_seven_day_window() {
    let window = RetentionWindow::from_days(7);
    assert!(window.is_expired(days_ago(8), NOW));
    assert!(!window.is_expired(days_ago(6), NOW));
    assert_eq!(window.cutoff(NOW), Some(days_ago(7)));
}

#[test]
fn test_boundary_is_retained() {
    let window = RetentionWindow::from_days(7);
    // Exactly at the cutoff is not older than the window.
    assert!(!window.is_expired(days_ago(7), NOW));
    assert!(window.is_expired(Timestamp(days_ago(7).0 - 1), NOW));
}

#[test]
fn test_zero_days_disables_retention() {
    let window = RetentionWindow::from_days(0);
    assert!(!window.is_enabled());
    assert_eq!(window.cutoff(NOW), None);
    assert!(!window.is_expired(Timestamp(1), NOW));
}
