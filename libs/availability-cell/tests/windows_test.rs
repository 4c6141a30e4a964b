use assert_matches::assert_matches;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use uuid::Uuid;

use availability_cell::{
    covers, AvailabilityError, AvailabilityRule, AvailabilityRuleSet, AvailabilityWindows,
    BlackoutPeriod, DateRange, TherapistSchedule, TimeInterval, WindowQuery,
};

// ==============================================================================
// FIXTURES
// ==============================================================================

const MONDAY: u8 = 1;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn time(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
}

fn rule_set(therapist: Uuid, version: u32, from: NaiveDate, tz: Tz, blocks: &[(u8, NaiveTime, NaiveTime)]) -> AvailabilityRuleSet {
    AvailabilityRuleSet {
        therapist_id: therapist,
        version,
        effective_from: from,
        timezone: tz,
        rules: blocks
            .iter()
            .map(|(day, start, end)| AvailabilityRule::new(therapist, *day, *start, *end).unwrap())
            .collect(),
    }
}

/// Monday 09:00-12:00 UTC, the reference schedule for booking scenarios.
fn monday_morning() -> TherapistSchedule {
    let therapist = Uuid::new_v4();
    let mut schedule = TherapistSchedule::new(therapist);
    schedule.rule_sets.push(rule_set(
        therapist,
        1,
        date(2025, 1, 1),
        Tz::UTC,
        &[(MONDAY, time(9, 0), time(12, 0))],
    ));
    schedule
}

fn query(from: NaiveDate, to: NaiveDate, slot_minutes: i64) -> WindowQuery {
    WindowQuery {
        range: DateRange::new(from, to),
        slot_minutes,
        granularity_minutes: 15,
        not_before: utc(2025, 1, 1, 0, 0),
    }
}

fn starts(windows: &AvailabilityWindows) -> Vec<DateTime<Utc>> {
    windows.iter().map(|slot| slot.start_time).collect()
}

// ==============================================================================
// EXPANSION
// ==============================================================================

#[test]
fn test_expands_single_rule_on_grid() {
    let monday = date(2025, 3, 3);
    let windows = AvailabilityWindows::new(monday_morning(), vec![], query(monday, monday, 50), 90).unwrap();

    let expected: Vec<_> = (0..9).map(|i| utc(2025, 3, 3, 9, 0) + Duration::minutes(15 * i)).collect();
    assert_eq!(starts(&windows), expected);

    let last = windows.iter().last().unwrap();
    assert_eq!(last.end_time, utc(2025, 3, 3, 11, 50));
    assert_eq!(last.timezone, "UTC");
}

#[test]
fn test_booked_appointment_is_subtracted_not_filtered() {
    let monday = date(2025, 3, 3);
    let booked = TimeInterval::from_start(utc(2025, 3, 3, 9, 0), 50);
    let windows = AvailabilityWindows::new(monday_morning(), vec![booked], query(monday, monday, 50), 90).unwrap();

    assert_eq!(
        starts(&windows),
        vec![
            utc(2025, 3, 3, 10, 0),
            utc(2025, 3, 3, 10, 15),
            utc(2025, 3, 3, 10, 30),
            utc(2025, 3, 3, 10, 45),
            utc(2025, 3, 3, 11, 0),
        ]
    );
    for slot in windows.iter() {
        assert!(!TimeInterval::new(slot.start_time, slot.end_time).overlaps(&booked));
    }
}

#[test]
fn test_middle_booking_leaves_two_sub_windows() {
    let monday = date(2025, 3, 3);
    let booked = TimeInterval::new(utc(2025, 3, 3, 10, 0), utc(2025, 3, 3, 11, 0));
    let windows = AvailabilityWindows::new(monday_morning(), vec![booked], query(monday, monday, 60), 90).unwrap();

    assert_eq!(starts(&windows), vec![utc(2025, 3, 3, 9, 0), utc(2025, 3, 3, 11, 0)]);
}

#[test]
fn test_sequence_is_restartable_and_chronological() {
    let windows = AvailabilityWindows::new(
        monday_morning(),
        vec![],
        query(date(2025, 3, 1), date(2025, 3, 31), 30),
        90,
    )
    .unwrap();

    let first = starts(&windows);
    let second = starts(&windows);
    assert_eq!(first, second);
    assert!(first.windows(2).all(|pair| pair[0] < pair[1]));
    // five Mondays in March 2025, 11 half-hour starts each
    assert_eq!(first.len(), 5 * 11);

    let mut partial = windows.iter();
    assert_eq!(partial.next().unwrap().start_time, utc(2025, 3, 3, 9, 0));
    assert_eq!(windows.iter().next().unwrap().start_time, utc(2025, 3, 3, 9, 0));
}

#[test]
fn test_slots_in_the_past_are_skipped() {
    let monday = date(2025, 3, 3);
    let mut q = query(monday, monday, 50);
    q.not_before = utc(2025, 3, 3, 9, 20);

    let windows = AvailabilityWindows::new(monday_morning(), vec![], q, 90).unwrap();
    assert_eq!(windows.iter().next().unwrap().start_time, utc(2025, 3, 3, 9, 30));

    q.not_before = utc(2025, 3, 3, 9, 30);
    let windows = AvailabilityWindows::new(monday_morning(), vec![], q, 90).unwrap();
    assert_eq!(windows.iter().next().unwrap().start_time, utc(2025, 3, 3, 9, 45));
}

#[test]
fn test_timezone_and_dst_shift() {
    let therapist = Uuid::new_v4();
    let mut schedule = TherapistSchedule::new(therapist);
    schedule.rule_sets.push(rule_set(
        therapist,
        1,
        date(2025, 1, 1),
        chrono_tz::America::New_York,
        &[(MONDAY, time(9, 0), time(10, 0))],
    ));

    let windows = AvailabilityWindows::new(
        schedule,
        vec![],
        query(date(2025, 3, 3), date(2025, 3, 10), 60),
        90,
    )
    .unwrap();

    // EST before the switch on 2025-03-09, EDT after
    assert_eq!(starts(&windows), vec![utc(2025, 3, 3, 14, 0), utc(2025, 3, 10, 13, 0)]);
    assert_eq!(windows.iter().next().unwrap().timezone, "America/New_York");
}

#[test]
fn test_new_rule_set_version_applies_from_effective_date() {
    let mut schedule = monday_morning();
    let therapist = schedule.therapist_id;
    schedule.rule_sets.push(rule_set(
        therapist,
        2,
        date(2025, 3, 10),
        Tz::UTC,
        &[(MONDAY, time(13, 0), time(14, 0))],
    ));

    let windows = AvailabilityWindows::new(
        schedule,
        vec![],
        query(date(2025, 3, 3), date(2025, 3, 10), 60),
        90,
    )
    .unwrap();

    let all = starts(&windows);
    assert_eq!(all.first(), Some(&utc(2025, 3, 3, 9, 0)));
    assert_eq!(all.last(), Some(&utc(2025, 3, 10, 13, 0)));
    assert!(!all.contains(&utc(2025, 3, 10, 9, 0)));
}

#[test]
fn test_overlapping_rules_do_not_duplicate_slots() {
    let therapist = Uuid::new_v4();
    let mut schedule = TherapistSchedule::new(therapist);
    schedule.rule_sets.push(rule_set(
        therapist,
        1,
        date(2025, 1, 1),
        Tz::UTC,
        &[(MONDAY, time(9, 0), time(11, 0)), (MONDAY, time(10, 0), time(12, 0))],
    ));

    let monday = date(2025, 3, 3);
    let windows = AvailabilityWindows::new(schedule, vec![], query(monday, monday, 180), 90).unwrap();
    assert_eq!(starts(&windows), vec![utc(2025, 3, 3, 9, 0)]);
}

#[test]
fn test_blackouts_are_subtracted() {
    let mut schedule = monday_morning();
    schedule.blackouts.push(BlackoutPeriod {
        id: Uuid::new_v4(),
        therapist_id: schedule.therapist_id,
        start: utc(2025, 3, 3, 10, 0),
        end: utc(2025, 3, 3, 11, 0),
        reason: Some("supervision".to_string()),
    });

    let monday = date(2025, 3, 3);
    let windows = AvailabilityWindows::new(schedule, vec![], query(monday, monday, 60), 90).unwrap();
    assert_eq!(starts(&windows), vec![utc(2025, 3, 3, 9, 0), utc(2025, 3, 3, 11, 0)]);
}

// ==============================================================================
// VALIDATION
// ==============================================================================

#[test]
fn test_rejects_wide_or_inverted_ranges() {
    let wide = AvailabilityWindows::new(
        monday_morning(),
        vec![],
        query(date(2025, 1, 1), date(2025, 4, 1), 30),
        90,
    );
    assert_matches!(wide, Err(AvailabilityError::InvalidRange(_)));

    let inverted = AvailabilityWindows::new(
        monday_morning(),
        vec![],
        query(date(2025, 3, 5), date(2025, 3, 4), 30),
        90,
    );
    assert_matches!(inverted, Err(AvailabilityError::InvalidRange(_)));
}

#[test]
fn test_rejects_bad_slot_durations() {
    let monday = date(2025, 3, 3);
    for minutes in [0, -15, 24 * 60 + 1] {
        let result = AvailabilityWindows::new(monday_morning(), vec![], query(monday, monday, minutes), 90);
        assert_matches!(result, Err(AvailabilityError::InvalidDuration(m)) if m == minutes);
    }
}

#[test]
fn test_covers_respects_rules_and_blackouts() {
    let mut schedule = monday_morning();
    assert!(covers(&schedule, &TimeInterval::from_start(utc(2025, 3, 3, 9, 0), 50)));
    assert!(covers(&schedule, &TimeInterval::from_start(utc(2025, 3, 3, 11, 10), 50)));
    assert!(!covers(&schedule, &TimeInterval::from_start(utc(2025, 3, 3, 11, 30), 50)));
    assert!(!covers(&schedule, &TimeInterval::from_start(utc(2025, 3, 4, 9, 0), 50)));

    schedule.blackouts.push(BlackoutPeriod {
        id: Uuid::new_v4(),
        therapist_id: schedule.therapist_id,
        start: utc(2025, 3, 3, 9, 30),
        end: utc(2025, 3, 3, 9, 45),
        reason: None,
    });
    assert!(!covers(&schedule, &TimeInterval::from_start(utc(2025, 3, 3, 9, 0), 50)));
    assert!(covers(&schedule, &TimeInterval::from_start(utc(2025, 3, 3, 10, 0), 50)));
}
