#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use uuid::Uuid;

use appointment_cell::{
    Appointment, AppointmentStore, BookAppointmentRequest, InMemoryAppointmentStore, ListFilter,
    Modality, SchedulingService, StoreError,
};
use availability_cell::{AvailabilityRule, InMemoryProfileStore, TimeInterval};
use reminder_cell::{NoShowSweep, ReminderSweep};
use shared_config::SchedulerConfig;
use shared_utils::test_utils::RecordingDispatcher;
use shared_utils::{Clock, ManualClock};

/// Monday 2025-03-03 09:00 UTC, the start of the session most tests book.
pub fn session_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 3, 9, 0, 0).unwrap()
}

pub fn before(minutes: i64) -> DateTime<Utc> {
    session_start() - Duration::minutes(minutes)
}

/// In-memory store whose listing and marker writes can be made to fail.
#[derive(Default)]
pub struct FlakyStore {
    inner: InMemoryAppointmentStore,
    pub fail_listing: AtomicBool,
    pub fail_markers: AtomicBool,
}

impl FlakyStore {
    fn check(&self, flag: &AtomicBool) -> Result<(), StoreError> {
        if flag.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("injected failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl AppointmentStore for FlakyStore {
    async fn get(&self, id: Uuid) -> Result<Option<Appointment>, StoreError> {
        self.inner.get(id).await
    }

    async fn active_for_therapist(
        &self,
        therapist_id: Uuid,
        window: TimeInterval,
    ) -> Result<Vec<Appointment>, StoreError> {
        self.inner.active_for_therapist(therapist_id, window).await
    }

    async fn active_for_patient(
        &self,
        patient_id: Uuid,
        window: TimeInterval,
    ) -> Result<Vec<Appointment>, StoreError> {
        self.inner.active_for_patient(patient_id, window).await
    }

    async fn insert(&self, appointment: Appointment) -> Result<(), StoreError> {
        self.inner.insert(appointment).await
    }

    async fn update(&self, appointment: Appointment) -> Result<(), StoreError> {
        self.inner.update(appointment).await
    }

    async fn replace(&self, retired: Appointment, created: Appointment) -> Result<(), StoreError> {
        self.inner.replace(retired, created).await
    }

    async fn active_starting_between(
        &self,
        from: Option<DateTime<Utc>>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, StoreError> {
        self.check(&self.fail_listing)?;
        self.inner.active_starting_between(from, to).await
    }

    async fn active_ending_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Appointment>, StoreError> {
        self.check(&self.fail_listing)?;
        self.inner.active_ending_before(cutoff).await
    }

    async fn record_reminder_fired(
        &self,
        appointment_id: Uuid,
        offset_label: &str,
        fired_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.check(&self.fail_markers)?;
        self.inner
            .record_reminder_fired(appointment_id, offset_label, fired_at)
            .await
    }

    async fn list(
        &self,
        filter: ListFilter,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<Appointment>, StoreError> {
        self.inner.list(filter, from, to).await
    }
}

/// Scheduling service and both sweeps over shared in-memory state. The
/// manual clock starts on Saturday 2025-03-01 12:00 UTC and the therapist
/// works Mondays 09:00 to 12:00 UTC.
pub struct Harness {
    pub store: Arc<FlakyStore>,
    pub profiles: Arc<InMemoryProfileStore>,
    pub dispatcher: Arc<RecordingDispatcher>,
    pub clock: Arc<ManualClock>,
    pub scheduling: Arc<SchedulingService>,
    pub reminders: Arc<ReminderSweep>,
    pub no_shows: Arc<NoShowSweep>,
    pub therapist: Uuid,
    pub config: SchedulerConfig,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_grace(300).await
    }

    pub async fn with_grace(reminder_grace_secs: u64) -> Self {
        let config = SchedulerConfig {
            reminder_grace_secs,
            ..SchedulerConfig::default()
        };

        let store = Arc::new(FlakyStore::default());
        let profiles = Arc::new(InMemoryProfileStore::new());
        let dispatcher = RecordingDispatcher::new();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
        ));

        let therapist = Uuid::new_v4();
        let rule = AvailabilityRule::new(
            therapist,
            1,
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
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

        let scheduling = Arc::new(SchedulingService::new(
            store.clone(),
            profiles.clone(),
            dispatcher.clone(),
            clock.clone(),
            config.clone(),
        ));
        let reminders = Arc::new(ReminderSweep::new(
            store.clone(),
            profiles.clone(),
            dispatcher.clone(),
            config.clone(),
        ));
        let no_shows = Arc::new(NoShowSweep::new(store.clone(), scheduling.clone()));

        Self {
            store,
            profiles,
            dispatcher,
            clock,
            scheduling,
            reminders,
            no_shows,
            therapist,
            config,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn book(&self, patient: Uuid, start: DateTime<Utc>, minutes: i64) -> Appointment {
        self.scheduling
            .book(BookAppointmentRequest {
                patient_id: patient,
                therapist_id: self.therapist,
                start,
                duration_minutes: minutes,
                modality: Modality::Video,
            })
            .await
            .unwrap()
    }
}
