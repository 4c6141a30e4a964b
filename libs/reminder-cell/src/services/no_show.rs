// libs/reminder-cell/src/services/no_show.rs
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use appointment_cell::{AppointmentStore, SchedulingError, SchedulingService};

use crate::error::SweepError;
use crate::models::{SweepMode, SweepReport};
use crate::services::reminder::bounded;
use crate::services::runner::Sweep;

/// Marks appointments still scheduled or confirmed once their end is more
/// than the configured grace in the past. Until then the therapist can still
/// complete them. Transitions go through the scheduling service so they take
/// the same locks as user-driven changes.
pub struct NoShowSweep {
    appointments: Arc<dyn AppointmentStore>,
    scheduling: Arc<SchedulingService>,
}

impl NoShowSweep {
    pub fn new(appointments: Arc<dyn AppointmentStore>, scheduling: Arc<SchedulingService>) -> Self {
        Self {
            appointments,
            scheduling,
        }
    }
}

#[async_trait]
impl Sweep for NoShowSweep {
    fn name(&self) -> &'static str {
        "no-show"
    }

    async fn run(&self, now: DateTime<Utc>, _mode: SweepMode) -> Result<SweepReport, SweepError> {
        let config = self.scheduling.config();
        let overdue = bounded(
            "list ended appointments",
            config.store_timeout(),
            self.appointments.active_ending_before(now - config.no_show_grace()),
        )
        .await?;

        let mut report = SweepReport {
            examined: overdue.len(),
            ..Default::default()
        };

        for appointment in overdue {
            match self.scheduling.mark_no_show(appointment.id).await {
                Ok(_) => report.processed += 1,
                // Completed or cancelled since the listing
                Err(SchedulingError::InvalidTransition { .. }) | Err(SchedulingError::NotFound(_)) => {
                    report.skipped += 1
                }
                Err(e) => {
                    warn!("Could not mark appointment {} as no-show: {}", appointment.id, e);
                    report.failed += 1;
                }
            }
        }

        if report.processed > 0 {
            info!("Marked {} appointment(s) as no-show", report.processed);
        }
        Ok(report)
    }
}
