// libs/appointment-cell/src/services/conflict.rs
use tracing::debug;
use uuid::Uuid;

use availability_cell::TimeInterval;

use crate::models::{Appointment, Party};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictOutcome {
    Clear,
    Conflict {
        party: Party,
        existing_appointment_id: Uuid,
    },
}

impl ConflictOutcome {
    pub fn is_clear(&self) -> bool {
        matches!(self, ConflictOutcome::Clear)
    }
}

/// Checks a candidate interval against the active appointments of both
/// parties. The therapist's calendar is checked first. Modality plays no
/// part: any overlap in time is a conflict.
pub fn check_conflict(
    therapist_appointments: &[Appointment],
    patient_appointments: &[Appointment],
    candidate: TimeInterval,
    exclude: Option<Uuid>,
) -> ConflictOutcome {
    let sides = [
        (Party::Therapist, therapist_appointments),
        (Party::Patient, patient_appointments),
    ];

    for (party, appointments) in sides {
        if let Some(existing) = first_overlap(appointments, candidate, exclude) {
            debug!(
                "Candidate {}..{} overlaps {} appointment {}",
                candidate.start, candidate.end, party, existing.id
            );
            return ConflictOutcome::Conflict {
                party,
                existing_appointment_id: existing.id,
            };
        }
    }

    ConflictOutcome::Clear
}

fn first_overlap(
    appointments: &[Appointment],
    candidate: TimeInterval,
    exclude: Option<Uuid>,
) -> Option<&Appointment> {
    appointments
        .iter()
        .filter(|a| a.is_active() && Some(a.id) != exclude)
        .filter(|a| a.interval().overlaps(&candidate))
        .min_by_key(|a| (a.start, a.id))
}
