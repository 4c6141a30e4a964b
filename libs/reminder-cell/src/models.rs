use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use appointment_cell::Appointment;
use shared_config::ReminderOffset;

/// One reminder an active appointment is owed. Derived from the appointment
/// and the configured offsets on every sweep; never stored on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderTask {
    pub appointment_id: Uuid,
    pub offset_label: String,
    pub due: DateTime<Utc>,
    pub fired: bool,
}

impl ReminderTask {
    /// Tasks for every configured offset. Inactive appointments owe nothing.
    pub fn project(appointment: &Appointment, offsets: &[ReminderOffset]) -> Vec<ReminderTask> {
        if !appointment.is_active() {
            return Vec::new();
        }

        offsets
            .iter()
            .map(|offset| ReminderTask {
                appointment_id: appointment.id,
                offset_label: offset.label.clone(),
                due: appointment.start - offset.lead(),
                fired: appointment.reminder_fired(&offset.label),
            })
            .collect()
    }

    /// Unfired, due by `now`, not before `lower_bound` (when given) and not
    /// due before the appointment existed.
    pub fn is_due(
        &self,
        now: DateTime<Utc>,
        lower_bound: Option<DateTime<Utc>>,
        created_at: DateTime<Utc>,
    ) -> bool {
        !self.fired
            && self.due <= now
            && lower_bound.map_or(true, |lower| self.due >= lower)
            && self.due >= created_at
    }
}

/// Regular sweeps only look back over the grace window; the catch-up sweep
/// run at start-up looks back without limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepMode {
    Regular,
    CatchUp,
}

impl fmt::Display for SweepMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SweepMode::Regular => write!(f, "regular"),
            SweepMode::CatchUp => write!(f, "catch-up"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Appointments read from the store.
    pub examined: usize,
    /// Successful dispatches or transitions.
    pub processed: usize,
    /// Dispatches or transitions that failed and will be retried.
    pub failed: usize,
    /// Dispatched reminders whose marker could not be written.
    pub marker_failures: usize,
    /// Appointments that changed state under the sweep.
    pub skipped: usize,
}
