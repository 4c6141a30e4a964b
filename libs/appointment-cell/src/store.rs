// libs/appointment-cell/src/store.rs
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use availability_cell::TimeInterval;

use crate::models::{Appointment, ListFilter, ReminderFired, SchedulingError};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    #[error("Appointment {0} already exists")]
    Duplicate(Uuid),

    #[error("Appointment {0} does not exist")]
    Missing(Uuid),

    #[error("Appointment store error: {0}")]
    Backend(String),
}

impl From<StoreError> for SchedulingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Missing(id) => SchedulingError::NotFound(id),
            other => SchedulingError::Unavailable(other.to_string()),
        }
    }
}

/// Durable home of appointments. Implementations only need per-call
/// atomicity; cross-call serialisation is the scheduling service's job.
#[async_trait]
pub trait AppointmentStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<Appointment>, StoreError>;

    /// Active appointments of a therapist overlapping `window`.
    async fn active_for_therapist(
        &self,
        therapist_id: Uuid,
        window: TimeInterval,
    ) -> Result<Vec<Appointment>, StoreError>;

    /// Active appointments of a patient overlapping `window`.
    async fn active_for_patient(
        &self,
        patient_id: Uuid,
        window: TimeInterval,
    ) -> Result<Vec<Appointment>, StoreError>;

    async fn insert(&self, appointment: Appointment) -> Result<(), StoreError>;

    /// Overwrites the record, except that reminder markers already stored
    /// are kept even when the incoming copy was read before they were written.
    async fn update(&self, appointment: Appointment) -> Result<(), StoreError>;

    /// Writes the retired original and its replacement in one step. The
    /// original keeps its stored reminder markers as `update` does.
    async fn replace(&self, retired: Appointment, created: Appointment) -> Result<(), StoreError>;

    /// Active appointments with `from <= start <= to`, ordered by start.
    /// `from = None` means no lower bound.
    async fn active_starting_between(
        &self,
        from: Option<DateTime<Utc>>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, StoreError>;

    /// Active appointments whose end is at or before `cutoff`.
    async fn active_ending_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Appointment>, StoreError>;

    /// Appends a reminder marker. Returns `false` without writing when the
    /// offset was already recorded.
    async fn record_reminder_fired(
        &self,
        appointment_id: Uuid,
        offset_label: &str,
        fired_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Every appointment (any status) of one party, optionally limited to
    /// those starting inside `[from, to)`, ordered by start.
    async fn list(
        &self,
        filter: ListFilter,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<Appointment>, StoreError>;
}

// ==============================================================================
// IN-MEMORY STORE
// ==============================================================================

#[derive(Default)]
pub struct InMemoryAppointmentStore {
    appointments: RwLock<HashMap<Uuid, Appointment>>,
}

impl InMemoryAppointmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.appointments.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.appointments.read().await.is_empty()
    }

    async fn select<F>(&self, predicate: F) -> Vec<Appointment>
    where
        F: Fn(&Appointment) -> bool,
    {
        let mut selected: Vec<Appointment> = self
            .appointments
            .read()
            .await
            .values()
            .filter(|appointment| predicate(appointment))
            .cloned()
            .collect();
        selected.sort_by_key(|appointment| (appointment.start, appointment.id));
        selected
    }
}

#[async_trait]
impl AppointmentStore for InMemoryAppointmentStore {
    async fn get(&self, id: Uuid) -> Result<Option<Appointment>, StoreError> {
        Ok(self.appointments.read().await.get(&id).cloned())
    }

    async fn active_for_therapist(
        &self,
        therapist_id: Uuid,
        window: TimeInterval,
    ) -> Result<Vec<Appointment>, StoreError> {
        Ok(self
            .select(|a| a.therapist_id == therapist_id && a.is_active() && a.interval().overlaps(&window))
            .await)
    }

    async fn active_for_patient(
        &self,
        patient_id: Uuid,
        window: TimeInterval,
    ) -> Result<Vec<Appointment>, StoreError> {
        Ok(self
            .select(|a| a.patient_id == patient_id && a.is_active() && a.interval().overlaps(&window))
            .await)
    }

    async fn insert(&self, appointment: Appointment) -> Result<(), StoreError> {
        let mut appointments = self.appointments.write().await;
        if appointments.contains_key(&appointment.id) {
            return Err(StoreError::Duplicate(appointment.id));
        }
        debug!("Inserting appointment {}", appointment.id);
        appointments.insert(appointment.id, appointment);
        Ok(())
    }

    async fn update(&self, mut appointment: Appointment) -> Result<(), StoreError> {
        let mut appointments = self.appointments.write().await;
        match appointments.get_mut(&appointment.id) {
            Some(existing) => {
                keep_stored_markers(existing, &mut appointment);
                *existing = appointment;
                Ok(())
            }
            None => Err(StoreError::Missing(appointment.id)),
        }
    }

    async fn replace(&self, mut retired: Appointment, created: Appointment) -> Result<(), StoreError> {
        let mut appointments = self.appointments.write().await;
        if appointments.contains_key(&created.id) {
            return Err(StoreError::Duplicate(created.id));
        }
        match appointments.get(&retired.id) {
            Some(existing) => keep_stored_markers(existing, &mut retired),
            None => return Err(StoreError::Missing(retired.id)),
        }
        appointments.insert(retired.id, retired);
        appointments.insert(created.id, created);
        Ok(())
    }

    async fn active_starting_between(
        &self,
        from: Option<DateTime<Utc>>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, StoreError> {
        Ok(self
            .select(|a| a.is_active() && from.map_or(true, |from| a.start >= from) && a.start <= to)
            .await)
    }

    async fn active_ending_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Appointment>, StoreError> {
        Ok(self.select(|a| a.is_active() && a.end() <= cutoff).await)
    }

    async fn record_reminder_fired(
        &self,
        appointment_id: Uuid,
        offset_label: &str,
        fired_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut appointments = self.appointments.write().await;
        let appointment = appointments
            .get_mut(&appointment_id)
            .ok_or(StoreError::Missing(appointment_id))?;

        if appointment.reminder_fired(offset_label) {
            return Ok(false);
        }
        appointment.reminders_fired.push(ReminderFired {
            offset_label: offset_label.to_string(),
            fired_at,
        });
        Ok(true)
    }

    async fn list(
        &self,
        filter: ListFilter,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<Appointment>, StoreError> {
        Ok(self
            .select(|a| {
                let party = match filter {
                    ListFilter::Patient(id) => a.patient_id == id,
                    ListFilter::Therapist(id) => a.therapist_id == id,
                };
                party && from.map_or(true, |from| a.start >= from) && to.map_or(true, |to| a.start < to)
            })
            .await)
    }
}

/// Markers are append-only: a sweep may record one between the caller's read
/// and its write.
fn keep_stored_markers(stored: &Appointment, incoming: &mut Appointment) {
    for marker in &stored.reminders_fired {
        if !incoming.reminder_fired(&marker.offset_label) {
            incoming.reminders_fired.push(marker.clone());
        }
    }
}
