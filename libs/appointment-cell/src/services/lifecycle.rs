// libs/appointment-cell/src/services/lifecycle.rs
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::models::{Appointment, AppointmentStatus, SchedulingError, Transition};

/// What a valid transition does to the stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionEffect {
    /// Write the new status.
    Apply(AppointmentStatus),
    /// Already in the target state; nothing to write.
    Unchanged,
}

/// Validates `action` against the appointment's current status and, for
/// time-gated actions, against `now`.
pub fn validate_transition(
    appointment: &Appointment,
    action: Transition,
    now: DateTime<Utc>,
) -> Result<TransitionEffect, SchedulingError> {
    use AppointmentStatus::*;

    let status = appointment.status;
    let effect = match (action, status) {
        (Transition::Confirm, Scheduled) => TransitionEffect::Apply(Confirmed),
        (Transition::Confirm, Confirmed) => TransitionEffect::Unchanged,
        (Transition::Cancel, Scheduled | Confirmed) => TransitionEffect::Apply(Cancelled),
        (Transition::Reschedule, Scheduled | Confirmed) => TransitionEffect::Apply(Cancelled),
        (Transition::Complete, Scheduled | Confirmed) if now >= appointment.end() => {
            TransitionEffect::Apply(Completed)
        }
        (Transition::MarkNoShow, Scheduled | Confirmed) if now >= appointment.end() => {
            TransitionEffect::Apply(NoShow)
        }
        (Transition::MarkNoShow, NoShow) => TransitionEffect::Unchanged,
        _ => {
            warn!(
                "Rejected {} on appointment {} in status {}",
                action, appointment.id, status
            );
            return Err(SchedulingError::InvalidTransition { from: status, action });
        }
    };

    debug!("Transition {} on {} from {}: {:?}", action, appointment.id, status, effect);
    Ok(effect)
}
