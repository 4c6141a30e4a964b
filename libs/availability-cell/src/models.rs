use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ==============================================================================
// WEEKLY RULES
// ==============================================================================

/// One recurring weekly block of working time, in the therapist's wall clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityRule {
    pub id: Uuid,
    pub therapist_id: Uuid,
    pub day_of_week: u8, // 0 = Sunday, 1 = Monday, etc.
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

impl AvailabilityRule {
    pub fn new(
        therapist_id: Uuid,
        day_of_week: u8,
        start_time: NaiveTime,
        end_time: NaiveTime,
    ) -> Result<Self, AvailabilityError> {
        if day_of_week > 6 {
            return Err(AvailabilityError::InvalidRule(
                "Day of week must be between 0 (Sunday) and 6 (Saturday)".to_string(),
            ));
        }
        if start_time >= end_time {
            return Err(AvailabilityError::InvalidRule(
                "Start time must be before end time".to_string(),
            ));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            therapist_id,
            day_of_week,
            start_time,
            end_time,
        })
    }

    pub fn applies_to(&self, date: NaiveDate) -> bool {
        day_of_week(date) == self.day_of_week
    }
}

pub fn day_of_week(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}

/// An immutable version of a therapist's weekly rules. Publishing new hours
/// means adding a rule set with a later `effective_from`; earlier versions stay
/// so already-booked history still resolves against the hours it was booked under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailabilityRuleSet {
    pub therapist_id: Uuid,
    pub version: u32,
    pub effective_from: NaiveDate,
    pub timezone: Tz,
    pub rules: Vec<AvailabilityRule>,
}

impl AvailabilityRuleSet {
    pub fn rules_on(&self, date: NaiveDate) -> impl Iterator<Item = &AvailabilityRule> {
        self.rules.iter().filter(move |rule| rule.applies_to(date))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlackoutPeriod {
    pub id: Uuid,
    pub therapist_id: Uuid,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub reason: Option<String>,
}

impl BlackoutPeriod {
    pub fn interval(&self) -> TimeInterval {
        TimeInterval::new(self.start, self.end)
    }
}

/// Everything the profile store knows about when a therapist works.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TherapistSchedule {
    pub therapist_id: Uuid,
    pub rule_sets: Vec<AvailabilityRuleSet>,
    pub blackouts: Vec<BlackoutPeriod>,
}

impl TherapistSchedule {
    pub fn new(therapist_id: Uuid) -> Self {
        Self {
            therapist_id,
            rule_sets: Vec::new(),
            blackouts: Vec::new(),
        }
    }

    /// The rule set in force on a local date: latest `effective_from` not after
    /// the date, highest version on ties.
    pub fn rule_set_for(&self, date: NaiveDate) -> Option<&AvailabilityRuleSet> {
        self.rule_sets
            .iter()
            .filter(|set| set.effective_from <= date)
            .max_by_key(|set| (set.effective_from, set.version))
    }

    pub fn latest_version(&self) -> u32 {
        self.rule_sets.iter().map(|set| set.version).max().unwrap_or(0)
    }

    /// Timezone of the newest rule set, used to interpret search date ranges.
    pub fn timezone(&self) -> Tz {
        self.rule_sets
            .iter()
            .max_by_key(|set| (set.effective_from, set.version))
            .map(|set| set.timezone)
            .unwrap_or(Tz::UTC)
    }
}

// ==============================================================================
// TIME ARITHMETIC
// ==============================================================================

/// Half-open interval `[start, end)` in absolute time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeInterval {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn from_start(start: DateTime<Utc>, duration_minutes: i64) -> Self {
        Self::new(start, start + Duration::minutes(duration_minutes))
    }

    pub fn overlaps(&self, other: &TimeInterval) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains(&self, other: &TimeInterval) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Inclusive range of local calendar dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Self {
        Self { from, to }
    }

    pub fn days(&self) -> i64 {
        (self.to - self.from).num_days() + 1
    }

    pub fn validate(&self, max_days: i64) -> Result<(), AvailabilityError> {
        if self.to < self.from {
            return Err(AvailabilityError::InvalidRange(format!(
                "range end {} is before range start {}",
                self.to, self.from
            )));
        }
        if self.days() > max_days {
            return Err(AvailabilityError::InvalidRange(format!(
                "range spans {} days, at most {} allowed",
                self.days(),
                max_days
            )));
        }
        Ok(())
    }
}

pub const MAX_SLOT_MINUTES: i64 = 24 * 60;

pub fn validate_slot_duration(minutes: i64) -> Result<(), AvailabilityError> {
    if minutes <= 0 || minutes > MAX_SLOT_MINUTES {
        return Err(AvailabilityError::InvalidDuration(minutes));
    }
    Ok(())
}

// ==============================================================================
// RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailableSlot {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_minutes: i64,
    pub timezone: String,
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Debug, Clone, Error, PartialEq)]
pub enum AvailabilityError {
    #[error("Invalid date range: {0}")]
    InvalidRange(String),

    #[error("Invalid slot duration: {0} minutes (must be 1..=1440)")]
    InvalidDuration(i64),

    #[error("Invalid availability rule: {0}")]
    InvalidRule(String),

    #[error("Therapist not found: {0}")]
    TherapistNotFound(Uuid),

    #[error("Profile store unavailable: {0}")]
    Unavailable(String),
}
