use super::*;
use chrono::TimeZone;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).single().expect("time")
}

#[test]
fn never_fetched_is_always_due() {
    assert!(should_fetch(None, t0(), APPLICATIONS_WINDOW));
    assert!(should_fetch(None, t0(), Duration::days(365)));
}

#[test]
fn four_minutes_is_fresh_six_minutes_is_stale() {
    let last = t0();
    assert!(!should_fetch(Some(last), last + Duration::minutes(4), APPLICATIONS_WINDOW));
    assert!(should_fetch(Some(last), last + Duration::minutes(6), APPLICATIONS_WINDOW));
}

#[test]
fn window_boundary_is_still_fresh() {
    let last = t0();
    assert!(!should_fetch(Some(last), last + APPLICATIONS_WINDOW, APPLICATIONS_WINDOW));
    assert!(should_fetch(
        Some(last),
        last + APPLICATIONS_WINDOW + Duration::milliseconds(1),
        APPLICATIONS_WINDOW
    ));
}

#[test]
fn policy_delegates_to_its_window() {
    let policy = FreshnessPolicy::new(Duration::seconds(30));
    assert!(!policy.should_fetch(Some(t0()), t0() + Duration::seconds(30)));
    assert!(policy.should_fetch(Some(t0()), t0() + Duration::seconds(31)));
    assert_eq!(FreshnessPolicy::default().window, APPLICATIONS_WINDOW);
}

#[test]
fn manual_clock_moves_only_when_told() {
    let clock = ManualClock::new(t0());
    assert_eq!(clock.now(), t0());
    clock.advance(Duration::minutes(2));
    assert_eq!(clock.now(), t0() + Duration::minutes(2));
    clock.set(t0());
    assert_eq!(clock.now(), t0());
}

#[test]
fn system_clock_has_millisecond_resolution() {
    let now = SystemClock.now();
    assert_eq!(now.timestamp_subsec_nanos() % 1_000_000, 0);
}
