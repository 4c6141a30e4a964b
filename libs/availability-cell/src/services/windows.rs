// libs/availability-cell/src/services/windows.rs
//
// Expansion of weekly rules into bookable slots. Nothing here touches a store:
// callers hand in the therapist schedule and the busy intervals they loaded.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::debug;

use crate::models::{
    validate_slot_duration, AvailabilityError, AvailableSlot, DateRange, TherapistSchedule,
    TimeInterval,
};

#[derive(Debug, Clone, Copy)]
pub struct WindowQuery {
    pub range: DateRange,
    pub slot_minutes: i64,
    pub granularity_minutes: i64,
    /// Slots starting at or before this instant are never offered.
    pub not_before: DateTime<Utc>,
}

/// A bounded, restartable sequence of bookable slots. Each call to
/// [`AvailabilityWindows::iter`] starts again from the first day of the range
/// and expands one day at a time.
#[derive(Debug, Clone)]
pub struct AvailabilityWindows {
    schedule: TherapistSchedule,
    busy: Vec<TimeInterval>,
    query: WindowQuery,
}

impl AvailabilityWindows {
    pub fn new(
        schedule: TherapistSchedule,
        busy: impl IntoIterator<Item = TimeInterval>,
        query: WindowQuery,
        max_days: i64,
    ) -> Result<Self, AvailabilityError> {
        query.range.validate(max_days)?;
        validate_slot_duration(query.slot_minutes)?;
        if query.granularity_minutes <= 0 {
            return Err(AvailabilityError::InvalidRule(format!(
                "slot granularity must be positive, got {}",
                query.granularity_minutes
            )));
        }

        let mut busy: Vec<TimeInterval> = busy
            .into_iter()
            .chain(schedule.blackouts.iter().map(|b| b.interval()))
            .filter(|interval| !interval.is_empty())
            .collect();
        merge(&mut busy);

        debug!(
            "Prepared availability for therapist {} over {} days with {} busy intervals",
            schedule.therapist_id,
            query.range.days(),
            busy.len()
        );

        Ok(Self { schedule, busy, query })
    }

    pub fn iter(&self) -> SlotIter<'_> {
        SlotIter {
            windows: self,
            next_date: Some(self.query.range.from),
            free: VecDeque::new(),
            cursor: None,
            last_emitted: None,
        }
    }

    fn slot_for(&self, start: DateTime<Utc>) -> AvailableSlot {
        let local_date = start.with_timezone(&self.schedule.timezone()).date_naive();
        let timezone = self
            .schedule
            .rule_set_for(local_date)
            .map(|set| set.timezone)
            .unwrap_or_else(|| self.schedule.timezone());

        AvailableSlot {
            start_time: start,
            end_time: start + Duration::minutes(self.query.slot_minutes),
            duration_minutes: self.query.slot_minutes,
            timezone: timezone.name().to_string(),
        }
    }
}

impl<'a> IntoIterator for &'a AvailabilityWindows {
    type Item = AvailableSlot;
    type IntoIter = SlotIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

pub struct SlotIter<'a> {
    windows: &'a AvailabilityWindows,
    next_date: Option<NaiveDate>,
    free: VecDeque<TimeInterval>,
    cursor: Option<DateTime<Utc>>,
    last_emitted: Option<DateTime<Utc>>,
}

impl Iterator for SlotIter<'_> {
    type Item = AvailableSlot;

    fn next(&mut self) -> Option<Self::Item> {
        let query = self.windows.query;
        let slot = Duration::minutes(query.slot_minutes);
        let step = Duration::minutes(query.granularity_minutes);
        let earliest_allowed = query.not_before + Duration::seconds(1);

        loop {
            while let Some(interval) = self.free.front().copied() {
                let from = self.cursor.take().unwrap_or(interval.start).max(earliest_allowed);
                let start = align_up(from, query.granularity_minutes);

                if start + slot > interval.end {
                    self.free.pop_front();
                    continue;
                }

                self.cursor = Some(start + step);
                if self.last_emitted.is_some_and(|last| start <= last) {
                    continue;
                }
                self.last_emitted = Some(start);
                return Some(self.windows.slot_for(start));
            }

            let date = self.next_date?;
            self.next_date = if date < query.range.to { date.succ_opt() } else { None };
            self.cursor = None;
            self.free = free_intervals_on(&self.windows.schedule, &self.windows.busy, date).into();
        }
    }
}

/// Free time on one local date: the applicable rules as absolute intervals,
/// merged, minus `busy` (which must be sorted and merged).
pub fn free_intervals_on(
    schedule: &TherapistSchedule,
    busy: &[TimeInterval],
    date: NaiveDate,
) -> Vec<TimeInterval> {
    let mut working = working_intervals_on(schedule, date);
    merge(&mut working);
    subtract(&working, busy)
}

fn working_intervals_on(schedule: &TherapistSchedule, date: NaiveDate) -> Vec<TimeInterval> {
    let Some(rule_set) = schedule.rule_set_for(date) else {
        return Vec::new();
    };

    rule_set
        .rules_on(date)
        .filter_map(|rule| local_interval(rule_set.timezone, date, rule.start_time, rule.end_time))
        .collect()
}

/// Whether `interval` fits inside the therapist's working time, ignoring
/// appointments but honouring blackouts.
pub fn covers(schedule: &TherapistSchedule, interval: &TimeInterval) -> bool {
    let mut blackouts: Vec<TimeInterval> = schedule.blackouts.iter().map(|b| b.interval()).collect();
    merge(&mut blackouts);

    // Local dates can sit a day either side of the UTC date
    let first = interval.start.date_naive() - Duration::days(1);
    let last = interval.end.date_naive() + Duration::days(1);

    first
        .iter_days()
        .take_while(|date| *date <= last)
        .flat_map(|date| free_intervals_on(schedule, &blackouts, date))
        .any(|free| free.contains(interval))
}

fn local_interval(
    tz: Tz,
    date: NaiveDate,
    start: NaiveTime,
    end: NaiveTime,
) -> Option<TimeInterval> {
    let start = resolve_local(tz, date.and_time(start))?;
    let end = resolve_local(tz, date.and_time(end))?;
    let interval = TimeInterval::new(start, end);
    (!interval.is_empty()).then_some(interval)
}

/// Local wall time to an instant. Ambiguous times (clocks going back) take the
/// earlier instant; times inside a DST gap move forward to the first valid
/// half-hour after it.
fn resolve_local(tz: Tz, naive: NaiveDateTime) -> Option<DateTime<Utc>> {
    let resolved = match tz.from_local_datetime(&naive) {
        LocalResult::Single(t) => Some(t),
        LocalResult::Ambiguous(a, b) => Some(a.min(b)),
        LocalResult::None => (1..=4)
            .find_map(|step| tz.from_local_datetime(&(naive + Duration::minutes(30 * step))).earliest()),
    };
    resolved.map(|t| t.with_timezone(&Utc))
}

fn align_up(t: DateTime<Utc>, granularity_minutes: i64) -> DateTime<Utc> {
    let step = granularity_minutes * 60;
    let secs = t.timestamp();
    if secs.rem_euclid(step) == 0 && t.timestamp_subsec_nanos() == 0 {
        return t;
    }
    let aligned = (secs.div_euclid(step) + 1) * step;
    DateTime::from_timestamp(aligned, 0).unwrap_or(t)
}

/// Sorts and coalesces overlapping or touching intervals in place.
pub fn merge(intervals: &mut Vec<TimeInterval>) {
    intervals.sort();
    let mut merged: Vec<TimeInterval> = Vec::with_capacity(intervals.len());
    for interval in intervals.drain(..) {
        match merged.last_mut() {
            Some(last) if interval.start <= last.end => last.end = last.end.max(interval.end),
            _ => merged.push(interval),
        }
    }
    *intervals = merged;
}

/// `free` minus `busy`. A busy interval in the middle of a free one leaves two
/// sub-intervals. `busy` must be sorted by start.
pub fn subtract(free: &[TimeInterval], busy: &[TimeInterval]) -> Vec<TimeInterval> {
    let mut result = Vec::new();

    for interval in free {
        let mut cursor = interval.start;
        for blocked in busy.iter().filter(|b| b.overlaps(interval)) {
            if blocked.start > cursor {
                result.push(TimeInterval::new(cursor, blocked.start));
            }
            cursor = cursor.max(blocked.end);
            if cursor >= interval.end {
                break;
            }
        }
        if cursor < interval.end {
            result.push(TimeInterval::new(cursor, interval.end));
        }
    }

    result
}
