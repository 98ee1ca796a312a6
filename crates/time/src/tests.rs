use crate::{deadline_from, now_nanos, tighter_deadline, TimeSpan, TimeUnit};

#[test]
fn now_nanos_is_monotonic() {
    let a = now_nanos();
    let b = now_nanos();
    assert!(b >= a);
}

#[test]
fn to_nanos_converts_units() {
    assert_eq!(TimeUnit::Nanos.to_nanos(5), 5);
    assert_eq!(TimeUnit::Millis.to_nanos(5), 5_000_000);
    assert_eq!(TimeUnit::Seconds.to_nanos(5), 5_000_000_000);
}

#[test]
fn to_nanos_saturates_rather_than_overflows() {
    assert_eq!(TimeUnit::Seconds.to_nanos(i64::MAX), i64::MAX);
}

#[test]
fn deadline_from_saturates() {
    let start = now_nanos();
    assert_eq!(deadline_from(start, i64::MAX, TimeUnit::Seconds), i64::MAX);
    assert_eq!(deadline_from(i64::MAX, 1, TimeUnit::Nanos), i64::MAX);
}

#[test]
fn tighter_deadline_picks_the_earlier_one() {
    assert_eq!(tighter_deadline(10, 20), 10);
    assert_eq!(tighter_deadline(20, 10), 10);
}

#[test]
fn time_span_clamps_non_monotonic_pairs() {
    let span = TimeSpan::from_start_and_end(100, 40);
    assert_eq!(span.duration_nanos, 0);
}

#[test]
fn time_span_since_measures_elapsed() {
    let start = now_nanos();
    std::thread::sleep(std::time::Duration::from_millis(1));
    let span = TimeSpan::since(start);
    assert!(span.duration_nanos > 0);
}
