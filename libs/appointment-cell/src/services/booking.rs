// libs/appointment-cell/src/services/booking.rs
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use futures::future::join_all;
use serde_json::json;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use availability_cell::{
    covers, validate_slot_duration, AvailabilityWindows, DateRange, ProfileStore, TherapistSchedule,
    TimeInterval, WindowQuery,
};
use shared_config::SchedulerConfig;
use shared_models::notification::{NotificationDispatcher, NotificationRequest, Template};
use shared_utils::clock::Clock;

use crate::models::{
    Actor, Appointment, AppointmentStatus, BookAppointmentRequest, Cancellation, ListFilter, SchedulingError, Transition,
    RESCHEDULED_REASON,
};
use crate::services::conflict::{check_conflict, ConflictOutcome};
use crate::services::lifecycle::{validate_transition, TransitionEffect};
use crate::services::locks::{ResourceKey, ResourceLocks};
use crate::store::AppointmentStore;

/// Entry point for every scheduling operation. All mutations go through the
/// per-resource locks, so a conflict check and the write it guards are never
/// interleaved with another mutation on the same therapist or patient.
pub struct SchedulingService {
    appointments: Arc<dyn AppointmentStore>,
    profiles: Arc<dyn ProfileStore>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    clock: Arc<dyn Clock>,
    locks: ResourceLocks,
    config: SchedulerConfig,
}

impl SchedulingService {
    pub fn new(
        appointments: Arc<dyn AppointmentStore>,
        profiles: Arc<dyn ProfileStore>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            appointments,
            profiles,
            dispatcher,
            clock,
            locks: ResourceLocks::new(config.store_timeout()),
            config,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    // ==========================================================================
    // QUERIES
    // ==========================================================================

    /// Bookable slots for a therapist over a local date range.
    #[instrument(skip(self))]
    pub async fn search_availability(
        &self,
        therapist_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
        slot_minutes: i64,
    ) -> Result<AvailabilityWindows, SchedulingError> {
        let range = DateRange::new(from, to);
        range.validate(self.config.max_search_days)?;
        validate_slot_duration(slot_minutes)?;

        let schedule = self.load_schedule(therapist_id).await?;

        // Local dates can start up to a day before and end a day after their UTC date
        let window = TimeInterval::new(
            utc_midnight(from) - Duration::days(1),
            utc_midnight(to) + Duration::days(2),
        );
        let busy = self
            .bounded("therapist calendar", self.appointments.active_for_therapist(therapist_id, window))
            .await?;

        let query = WindowQuery {
            range,
            slot_minutes,
            granularity_minutes: self.config.slot_granularity_minutes,
            not_before: self.clock.now(),
        };

        let windows = AvailabilityWindows::new(
            schedule,
            busy.iter().map(Appointment::interval),
            query,
            self.config.max_search_days,
        )?;
        Ok(windows)
    }

    pub async fn get_appointment(&self, id: Uuid) -> Result<Appointment, SchedulingError> {
        self.bounded("appointment lookup", self.appointments.get(id))
            .await?
            .ok_or(SchedulingError::NotFound(id))
    }

    pub async fn list_appointments(
        &self,
        filter: ListFilter,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<Appointment>, SchedulingError> {
        if let (Some(from), Some(to)) = (from, to) {
            if to < from {
                return Err(SchedulingError::InvalidRange(format!(
                    "range end {} is before range start {}",
                    to, from
                )));
            }
        }
        self.bounded("appointment listing", self.appointments.list(filter, from, to))
            .await
    }

    // ==========================================================================
    // BOOKING
    // ==========================================================================

    #[instrument(skip(self, request), fields(patient = %request.patient_id, therapist = %request.therapist_id))]
    pub async fn book(&self, request: BookAppointmentRequest) -> Result<Appointment, SchedulingError> {
        info!("Booking {} min at {} ({:?})", request.duration_minutes, request.start, request.modality);

        if request.patient_id == request.therapist_id {
            return Err(SchedulingError::Validation(
                "patient and therapist must be different people".to_string(),
            ));
        }
        let candidate = self
            .validate_window(request.therapist_id, request.start, request.duration_minutes)
            .await?;

        let _guard = self
            .locks
            .acquire(&parties(request.therapist_id, request.patient_id))
            .await?;

        self.ensure_clear(request.therapist_id, request.patient_id, candidate, None)
            .await?;

        let appointment = Appointment::new(
            request.patient_id,
            request.therapist_id,
            request.start,
            request.duration_minutes,
            request.modality,
            self.clock.now(),
        );
        self.bounded("appointment insert", self.appointments.insert(appointment.clone()))
            .await?;

        info!("Appointment {} booked", appointment.id);
        Ok(appointment)
    }

    #[instrument(skip(self))]
    pub async fn confirm(&self, id: Uuid) -> Result<Appointment, SchedulingError> {
        let (appointment, changed) = self.transition(id, Transition::Confirm, |_, _| {}).await?;
        if changed {
            info!("Appointment {} confirmed", id);
        }
        Ok(appointment)
    }

    #[instrument(skip(self))]
    pub async fn cancel(&self, id: Uuid, reason: &str, actor: Actor) -> Result<Appointment, SchedulingError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(SchedulingError::Validation(
                "a cancellation reason is required".to_string(),
            ));
        }

        let (appointment, _) = self
            .transition(id, Transition::Cancel, |appointment, now| {
                appointment.cancellation = Some(Cancellation {
                    reason: reason.to_string(),
                    actor,
                    cancelled_at: now,
                });
            })
            .await?;

        info!("Appointment {} cancelled by {}", id, actor);
        self.notify_cancellation(&appointment, actor);
        Ok(appointment)
    }

    /// Moves an active appointment to a new slot. The original is retired as
    /// cancelled and linked to its replacement; both records are written in
    /// one store call.
    #[instrument(skip(self))]
    pub async fn reschedule(
        &self,
        id: Uuid,
        new_start: DateTime<Utc>,
        new_duration_minutes: Option<i64>,
    ) -> Result<Appointment, SchedulingError> {
        let original = self.get_appointment(id).await?;
        validate_transition(&original, Transition::Reschedule, self.clock.now())?;

        let duration = new_duration_minutes.unwrap_or(original.duration_minutes);
        let candidate = self
            .validate_window(original.therapist_id, new_start, duration)
            .await?;

        let _guard = self
            .locks
            .acquire(&parties(original.therapist_id, original.patient_id))
            .await?;

        // Re-read under the lock: a concurrent cancel may have won
        let mut retired = self.get_appointment(id).await?;
        let now = self.clock.now();
        validate_transition(&retired, Transition::Reschedule, now)?;

        self.ensure_clear(retired.therapist_id, retired.patient_id, candidate, Some(retired.id))
            .await?;

        let mut replacement = Appointment::new(
            retired.patient_id,
            retired.therapist_id,
            new_start,
            duration,
            retired.modality,
            now,
        );
        replacement.rescheduled_from = Some(retired.id);

        retired.status = AppointmentStatus::Cancelled;
        retired.cancellation = Some(Cancellation {
            reason: RESCHEDULED_REASON.to_string(),
            actor: Actor::System,
            cancelled_at: now,
        });
        retired.rescheduled_to = Some(replacement.id);
        retired.updated_at = now;

        self.bounded(
            "appointment reschedule",
            self.appointments.replace(retired.clone(), replacement.clone()),
        )
        .await?;

        info!("Appointment {} rescheduled to {} as {}", retired.id, new_start, replacement.id);
        Ok(replacement)
    }

    #[instrument(skip(self, notes))]
    pub async fn complete(&self, id: Uuid, notes: Option<String>) -> Result<Appointment, SchedulingError> {
        let (appointment, _) = self
            .transition(id, Transition::Complete, move |appointment, _| {
                appointment.completion_notes = notes;
            })
            .await?;
        info!("Appointment {} completed", id);
        Ok(appointment)
    }

    /// Idempotent: an appointment already marked as a no-show is returned as is.
    #[instrument(skip(self))]
    pub async fn mark_no_show(&self, id: Uuid) -> Result<Appointment, SchedulingError> {
        let (appointment, changed) = self.transition(id, Transition::MarkNoShow, |_, _| {}).await?;
        if changed {
            info!("Appointment {} marked as no-show", id);
        }
        Ok(appointment)
    }

    // ==========================================================================
    // INTERNALS
    // ==========================================================================

    /// Input checks shared by `book` and `reschedule`, run before any lock.
    async fn validate_window(
        &self,
        therapist_id: Uuid,
        start: DateTime<Utc>,
        duration_minutes: i64,
    ) -> Result<TimeInterval, SchedulingError> {
        validate_slot_duration(duration_minutes)?;

        let now = self.clock.now();
        if start <= now {
            return Err(SchedulingError::Validation(format!(
                "appointment start {} is not in the future",
                start
            )));
        }

        let candidate = TimeInterval::from_start(start, duration_minutes);
        let schedule = self.load_schedule(therapist_id).await?;
        if !covers(&schedule, &candidate) {
            warn!(
                "Requested {}..{} is outside availability of therapist {}",
                candidate.start, candidate.end, therapist_id
            );
            return Err(SchedulingError::OutsideAvailability {
                start: candidate.start,
                end: candidate.end,
            });
        }
        Ok(candidate)
    }

    /// Conflict check against both calendars. Callers must hold the locks.
    async fn ensure_clear(
        &self,
        therapist_id: Uuid,
        patient_id: Uuid,
        candidate: TimeInterval,
        exclude: Option<Uuid>,
    ) -> Result<(), SchedulingError> {
        let therapist_side = self
            .bounded("therapist calendar", self.appointments.active_for_therapist(therapist_id, candidate))
            .await?;
        let patient_side = self
            .bounded("patient calendar", self.appointments.active_for_patient(patient_id, candidate))
            .await?;

        match check_conflict(&therapist_side, &patient_side, candidate, exclude) {
            ConflictOutcome::Clear => Ok(()),
            ConflictOutcome::Conflict {
                party,
                existing_appointment_id,
            } => {
                warn!(
                    "Slot {}..{} conflicts with {} appointment {}",
                    candidate.start, candidate.end, party, existing_appointment_id
                );
                Err(SchedulingError::SlotUnavailable {
                    party,
                    existing_appointment_id,
                })
            }
        }
    }

    /// Locks the appointment's parties, re-reads it, validates `action` and
    /// writes the result. Returns whether anything changed.
    async fn transition<F>(
        &self,
        id: Uuid,
        action: Transition,
        mutate: F,
    ) -> Result<(Appointment, bool), SchedulingError>
    where
        F: FnOnce(&mut Appointment, DateTime<Utc>) + Send,
    {
        let snapshot = self.get_appointment(id).await?;
        let _guard = self
            .locks
            .acquire(&parties(snapshot.therapist_id, snapshot.patient_id))
            .await?;

        let mut appointment = self.get_appointment(id).await?;
        let now = self.clock.now();

        match validate_transition(&appointment, action, now)? {
            TransitionEffect::Unchanged => {
                debug!("{} on {} is a no-op", action, id);
                Ok((appointment, false))
            }
            TransitionEffect::Apply(status) => {
                appointment.status = status;
                appointment.updated_at = now;
                mutate(&mut appointment, now);
                self.bounded("appointment update", self.appointments.update(appointment.clone()))
                    .await?;
                Ok((appointment, true))
            }
        }
    }

    async fn load_schedule(&self, therapist_id: Uuid) -> Result<TherapistSchedule, SchedulingError> {
        self.bounded("therapist schedule", self.profiles.therapist_schedule(therapist_id))
            .await?
            .ok_or(SchedulingError::TherapistNotFound(therapist_id))
    }

    /// Runs a store or profile call under the store timeout.
    async fn bounded<T, E, F>(&self, what: &str, call: F) -> Result<T, SchedulingError>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<SchedulingError>,
    {
        let limit = self.config.store_timeout();
        match timeout(limit, call).await {
            Ok(result) => result.map_err(Into::into),
            Err(_) => {
                error!("{} timed out after {} ms", what, limit.as_millis());
                Err(SchedulingError::Unavailable(format!(
                    "{} timed out after {} ms",
                    what,
                    limit.as_millis()
                )))
            }
        }
    }

    /// Sends the cancellation notices from a detached task so the caller
    /// returns as soon as the cancellation is stored. Failures are logged and
    /// never undo it.
    fn notify_cancellation(&self, appointment: &Appointment, actor: Actor) {
        let recipients = match actor {
            Actor::Patient => vec![appointment.therapist_id],
            Actor::Therapist => vec![appointment.patient_id],
            Actor::System => vec![appointment.patient_id, appointment.therapist_id],
        };

        let payload = json!({
            "appointment_id": appointment.id,
            "start": appointment.start,
            "reason": appointment
                .cancellation
                .as_ref()
                .map(|c| c.reason.clone())
                .unwrap_or_default(),
            "cancelled_by": actor,
        });

        let profiles = self.profiles.clone();
        let dispatcher = self.dispatcher.clone();
        let lookup_limit = self.config.store_timeout();
        let dispatch_limit = self.config.dispatch_timeout();

        tokio::spawn(async move {
            let (profiles, dispatcher, payload) = (&profiles, &dispatcher, &payload);
            let sends = recipients.into_iter().map(|recipient_id| async move {
                let channel = match timeout(lookup_limit, profiles.contact_preference(recipient_id)).await {
                    Ok(Ok(channel)) => channel,
                    Ok(Err(e)) => {
                        warn!("Using default channel for {}: {}", recipient_id, e);
                        Default::default()
                    }
                    Err(_) => {
                        warn!("Contact preference lookup for {} timed out, using default channel", recipient_id);
                        Default::default()
                    }
                };

                let request = NotificationRequest {
                    recipient_id,
                    channel,
                    template: Template::AppointmentCancelled,
                    payload: payload.clone(),
                };

                match timeout(dispatch_limit, dispatcher.send(&request)).await {
                    Ok(Ok(())) => debug!("Cancellation notice sent to {}", recipient_id),
                    Ok(Err(e)) => warn!("Cancellation notice to {} failed: {}", recipient_id, e),
                    Err(_) => warn!(
                        "Cancellation notice to {} timed out after {} ms",
                        recipient_id,
                        dispatch_limit.as_millis()
                    ),
                }
            });

            join_all(sends).await;
        });
    }
}

fn parties(therapist_id: Uuid, patient_id: Uuid) -> [ResourceKey; 2] {
    [ResourceKey::Therapist(therapist_id), ResourceKey::Patient(patient_id)]
}

fn utc_midnight(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::default()))
}
