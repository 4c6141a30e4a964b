#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use uuid::Uuid;

use appointment_cell::{
    Appointment, BookAppointmentRequest, InMemoryAppointmentStore, Modality, SchedulingService,
};
use availability_cell::{AvailabilityRule, InMemoryProfileStore};
use shared_config::SchedulerConfig;
use shared_utils::test_utils::RecordingDispatcher;
use shared_utils::{Clock, ManualClock};

pub const MONDAY: u8 = 1;

pub fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
}

/// A wall time on Monday 2025-03-03, in UTC.
pub fn monday_at(h: u32, m: u32) -> DateTime<Utc> {
    utc(2025, 3, 3, h, m)
}

/// Scheduling service over in-memory stores, a recording dispatcher and a
/// manual clock parked on Sunday 2025-03-02 12:00 UTC.
pub struct Harness {
    pub service: Arc<SchedulingService>,
    pub store: Arc<InMemoryAppointmentStore>,
    pub profiles: Arc<InMemoryProfileStore>,
    pub dispatcher: Arc<RecordingDispatcher>,
    pub clock: Arc<ManualClock>,
    pub therapist: Uuid,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(SchedulerConfig::default()).await
    }

    pub async fn with_config(config: SchedulerConfig) -> Self {
        let store = Arc::new(InMemoryAppointmentStore::new());
        let profiles = Arc::new(InMemoryProfileStore::new());
        let dispatcher = RecordingDispatcher::new();
        let clock = Arc::new(ManualClock::new(utc(2025, 3, 2, 12, 0)));

        let therapist = Uuid::new_v4();
        add_weekly_hours(&profiles, therapist, MONDAY, (9, 0), (12, 0)).await;

        let service = Arc::new(SchedulingService::new(
            store.clone(),
            profiles.clone(),
            dispatcher.clone(),
            clock.clone(),
            config,
        ));

        Self {
            service,
            store,
            profiles,
            dispatcher,
            clock,
            therapist,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn book(&self, patient: Uuid, start: DateTime<Utc>, minutes: i64) -> Appointment {
        self.service
            .book(self.request(patient, start, minutes))
            .await
            .unwrap()
    }

    pub fn request(&self, patient: Uuid, start: DateTime<Utc>, minutes: i64) -> BookAppointmentRequest {
        BookAppointmentRequest {
            patient_id: patient,
            therapist_id: self.therapist,
            start,
            duration_minutes: minutes,
            modality: Modality::InPerson,
        }
    }
}

pub async fn add_weekly_hours(
    profiles: &InMemoryProfileStore,
    therapist: Uuid,
    day: u8,
    (start_h, start_m): (u32, u32),
    (end_h, end_m): (u32, u32),
) {
    let rule = AvailabilityRule::new(
        therapist,
        day,
        NaiveTime::from_hms_opt(start_h, start_m, 0).unwrap(),
        NaiveTime::from_hms_opt(end_h, end_m, 0).unwrap(),
    )
    .unwrap();

    profiles
        .publish_rule_set(
            therapist,
            NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            chrono_tz::Tz::UTC,
            vec![rule],
        )
        .await
        .unwrap();
}
