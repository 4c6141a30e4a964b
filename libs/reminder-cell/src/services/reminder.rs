// libs/reminder-cell/src/services/reminder.rs
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

use appointment_cell::{Appointment, AppointmentStore};
use availability_cell::ProfileStore;
use shared_config::SchedulerConfig;
use shared_models::notification::{
    Channel, DispatchError, NotificationDispatcher, NotificationRequest, Template,
};

use crate::error::SweepError;
use crate::models::{ReminderTask, SweepMode, SweepReport};
use crate::services::runner::Sweep;

/// Fires every reminder offset that came due since the previous sweep.
///
/// A reminder is dispatched before its marker is written, so a crash in
/// between can repeat a reminder but never lose one.
pub struct ReminderSweep {
    appointments: Arc<dyn AppointmentStore>,
    profiles: Arc<dyn ProfileStore>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    config: SchedulerConfig,
}

impl ReminderSweep {
    pub fn new(
        appointments: Arc<dyn AppointmentStore>,
        profiles: Arc<dyn ProfileStore>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            appointments,
            profiles,
            dispatcher,
            config,
        }
    }

    async fn due_candidates(
        &self,
        now: DateTime<Utc>,
        mode: SweepMode,
    ) -> Result<Vec<Appointment>, SweepError> {
        let offsets = &self.config.reminder_offsets;
        let (Some(longest), Some(shortest)) = (
            offsets.iter().map(|o| o.lead()).max(),
            offsets.iter().map(|o| o.lead()).min(),
        ) else {
            return Ok(Vec::new());
        };

        // A reminder due at `d` belongs to an appointment starting at `d + lead`
        let from = match mode {
            SweepMode::Regular => Some(now - self.config.reminder_grace() + shortest),
            SweepMode::CatchUp => None,
        };
        let to = now + longest;

        let limit = self.config.store_timeout();
        let mut candidates = bounded(
            "list reminder candidates",
            limit,
            self.appointments.active_starting_between(from, to),
        )
        .await?;

        if mode == SweepMode::CatchUp {
            // Reminders for sessions that already began are no use to anyone
            candidates.retain(|a| a.start > now);
        }
        Ok(candidates)
    }

    async fn channel_for(&self, appointment: &Appointment) -> Channel {
        let lookup = timeout(
            self.config.store_timeout(),
            self.profiles.contact_preference(appointment.patient_id),
        )
        .await;

        match lookup {
            Ok(Ok(channel)) => channel,
            Ok(Err(e)) => {
                warn!("Using default channel for patient {}: {}", appointment.patient_id, e);
                Channel::default()
            }
            Err(_) => {
                warn!(
                    "Contact preference lookup for patient {} timed out",
                    appointment.patient_id
                );
                Channel::default()
            }
        }
    }

    async fn dispatch(
        &self,
        appointment: &Appointment,
        task: &ReminderTask,
        channel: Channel,
    ) -> Result<(), DispatchError> {
        let request = NotificationRequest {
            recipient_id: appointment.patient_id,
            channel,
            template: Template::AppointmentReminder,
            payload: json!({
                "appointment_id": appointment.id,
                "offset": task.offset_label,
                "start": appointment.start,
                "duration_minutes": appointment.duration_minutes,
                "therapist_id": appointment.therapist_id,
                "modality": appointment.modality,
            }),
        };

        let limit = self.config.dispatch_timeout();
        match timeout(limit, self.dispatcher.send(&request)).await {
            Ok(result) => result,
            Err(_) => Err(DispatchError::Timeout {
                timeout_ms: limit.as_millis() as u64,
            }),
        }
    }

    #[instrument(skip(self, appointment, report), fields(appointment_id = %appointment.id))]
    async fn process(
        &self,
        appointment: &Appointment,
        now: DateTime<Utc>,
        lower_bound: Option<DateTime<Utc>>,
        report: &mut SweepReport,
    ) {
        let due: Vec<ReminderTask> = ReminderTask::project(appointment, &self.config.reminder_offsets)
            .into_iter()
            .filter(|task| task.is_due(now, lower_bound, appointment.created_at))
            .collect();
        if due.is_empty() {
            return;
        }

        let channel = self.channel_for(appointment).await;

        for task in due {
            if let Err(e) = self.dispatch(appointment, &task, channel).await {
                warn!("Reminder '{}' not delivered, will retry: {}", task.offset_label, e);
                report.failed += 1;
                continue;
            }

            let marker = timeout(
                self.config.store_timeout(),
                self.appointments
                    .record_reminder_fired(appointment.id, &task.offset_label, now),
            )
            .await;

            match marker {
                Ok(Ok(true)) => {
                    debug!("Reminder '{}' sent", task.offset_label);
                    report.processed += 1;
                }
                Ok(Ok(false)) => {
                    // Another sweep got there first
                    debug!("Reminder '{}' was already marked", task.offset_label);
                    report.processed += 1;
                }
                Ok(Err(e)) => {
                    error!("Failed to mark reminder '{}': {}", task.offset_label, e);
                    report.marker_failures += 1;
                }
                Err(_) => {
                    error!("Marking reminder '{}' timed out", task.offset_label);
                    report.marker_failures += 1;
                }
            }
        }
    }
}

#[async_trait]
impl Sweep for ReminderSweep {
    fn name(&self) -> &'static str {
        "reminders"
    }

    async fn run(&self, now: DateTime<Utc>, mode: SweepMode) -> Result<SweepReport, SweepError> {
        let candidates = self.due_candidates(now, mode).await?;
        let lower_bound = match mode {
            SweepMode::Regular => Some(now - self.config.reminder_grace()),
            SweepMode::CatchUp => None,
        };

        let mut report = SweepReport {
            examined: candidates.len(),
            ..Default::default()
        };
        for appointment in &candidates {
            self.process(appointment, now, lower_bound, &mut report).await;
        }

        if report.processed > 0 || report.failed > 0 {
            info!(
                "Reminder sweep ({}) sent {} reminder(s), {} failed",
                mode, report.processed, report.failed
            );
        }
        Ok(report)
    }
}

/// Bounds a store call and folds its error into a `SweepError`.
pub(crate) async fn bounded<T, E, F>(
    operation: &'static str,
    limit: Duration,
    call: F,
) -> Result<T, SweepError>
where
    F: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    match timeout(limit, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(SweepError::Store {
            operation,
            message: e.to_string(),
        }),
        Err(_) => Err(SweepError::Timeout {
            operation,
            timeout_ms: limit.as_millis() as u64,
        }),
    }
}
