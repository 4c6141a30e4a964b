// libs/appointment-cell/src/models.rs
use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use availability_cell::{AvailabilityError, TimeInterval};
use shared_models::error::AppError;

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub therapist_id: Uuid,
    pub start: DateTime<Utc>,
    pub duration_minutes: i64,
    pub modality: Modality,
    pub status: AppointmentStatus,
    pub cancellation: Option<Cancellation>,
    pub completion_notes: Option<String>,
    #[serde(default)]
    pub reminders_fired: Vec<ReminderFired>,
    pub rescheduled_from: Option<Uuid>,
    pub rescheduled_to: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn new(
        patient_id: Uuid,
        therapist_id: Uuid,
        start: DateTime<Utc>,
        duration_minutes: i64,
        modality: Modality,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            patient_id,
            therapist_id,
            start,
            duration_minutes,
            modality,
            status: AppointmentStatus::Scheduled,
            cancellation: None,
            completion_notes: None,
            reminders_fired: Vec::new(),
            rescheduled_from: None,
            rescheduled_to: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.start + Duration::minutes(self.duration_minutes)
    }

    pub fn interval(&self) -> TimeInterval {
        TimeInterval::from_start(self.start, self.duration_minutes)
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn involves(&self, party_id: Uuid) -> bool {
        self.patient_id == party_id || self.therapist_id == party_id
    }

    pub fn reminder_fired(&self, offset_label: &str) -> bool {
        self.reminders_fired
            .iter()
            .any(|fired| fired.offset_label == offset_label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    /// Scheduled and confirmed appointments occupy time and receive reminders.
    pub fn is_active(&self) -> bool {
        matches!(self, AppointmentStatus::Scheduled | AppointmentStatus::Confirmed)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Scheduled => write!(f, "scheduled"),
            AppointmentStatus::Confirmed => write!(f, "confirmed"),
            AppointmentStatus::Completed => write!(f, "completed"),
            AppointmentStatus::Cancelled => write!(f, "cancelled"),
            AppointmentStatus::NoShow => write!(f, "no_show"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    #[default]
    InPerson,
    Video,
    Phone,
}

/// Who asked for a cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    Patient,
    Therapist,
    System,
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::Patient => write!(f, "patient"),
            Actor::Therapist => write!(f, "therapist"),
            Actor::System => write!(f, "system"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cancellation {
    pub reason: String,
    pub actor: Actor,
    pub cancelled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReminderFired {
    pub offset_label: String,
    pub fired_at: DateTime<Utc>,
}

/// Reason recorded on the original appointment when it is rescheduled.
pub const RESCHEDULED_REASON: &str = "rescheduled";

/// A state-changing operation, used in transition errors and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Confirm,
    Cancel,
    Reschedule,
    Complete,
    MarkNoShow,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transition::Confirm => write!(f, "confirm"),
            Transition::Cancel => write!(f, "cancel"),
            Transition::Reschedule => write!(f, "reschedule"),
            Transition::Complete => write!(f, "complete"),
            Transition::MarkNoShow => write!(f, "mark_no_show"),
        }
    }
}

/// The side of a booking whose calendar produced a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Party {
    Therapist,
    Patient,
}

impl fmt::Display for Party {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Party::Therapist => write!(f, "therapist"),
            Party::Patient => write!(f, "patient"),
        }
    }
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookAppointmentRequest {
    pub patient_id: Uuid,
    pub therapist_id: Uuid,
    pub start: DateTime<Utc>,
    pub duration_minutes: i64,
    #[serde(default)]
    pub modality: Modality,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelAppointmentRequest {
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescheduleAppointmentRequest {
    pub new_start: DateTime<Utc>,
    /// Keeps the original duration when omitted.
    pub new_duration_minutes: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompleteAppointmentRequest {
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AvailabilityQueryParams {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub slot_minutes: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppointmentListQuery {
    pub patient_id: Option<Uuid>,
    pub therapist_id: Option<Uuid>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// Whose calendar to list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListFilter {
    Patient(Uuid),
    Therapist(Uuid),
}

// ==============================================================================
// ERRORS
// ==============================================================================

/// Coarse classification callers act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Conflict,
    NotFound,
    InvalidTransition,
    Unavailable,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SchedulingError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid date range: {0}")]
    InvalidRange(String),

    #[error("Invalid duration: {0} minutes (must be 1..=1440)")]
    InvalidDuration(i64),

    #[error("Therapist not found: {0}")]
    TherapistNotFound(Uuid),

    #[error("Slot unavailable: conflicts with {party} appointment {existing_appointment_id}")]
    SlotUnavailable {
        party: Party,
        existing_appointment_id: Uuid,
    },

    #[error("Requested time {start} to {end} is outside the therapist's availability")]
    OutsideAvailability {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("Appointment not found: {0}")]
    NotFound(Uuid),

    #[error("Cannot {action} an appointment that is {from}")]
    InvalidTransition {
        from: AppointmentStatus,
        action: Transition,
    },

    #[error("Scheduling backend unavailable: {0}")]
    Unavailable(String),
}

impl SchedulingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SchedulingError::Validation(_)
            | SchedulingError::InvalidRange(_)
            | SchedulingError::InvalidDuration(_) => ErrorKind::Validation,
            SchedulingError::SlotUnavailable { .. } | SchedulingError::OutsideAvailability { .. } => {
                ErrorKind::Conflict
            }
            SchedulingError::TherapistNotFound(_) | SchedulingError::NotFound(_) => ErrorKind::NotFound,
            SchedulingError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            SchedulingError::Unavailable(_) => ErrorKind::Unavailable,
        }
    }

    /// Only backend unavailability is worth retrying; everything else is a
    /// deterministic rejection of the request.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Unavailable
    }
}

impl From<AvailabilityError> for SchedulingError {
    fn from(err: AvailabilityError) -> Self {
        match err {
            AvailabilityError::InvalidRange(msg) => SchedulingError::InvalidRange(msg),
            AvailabilityError::InvalidDuration(minutes) => SchedulingError::InvalidDuration(minutes),
            AvailabilityError::InvalidRule(msg) => SchedulingError::Validation(msg),
            AvailabilityError::TherapistNotFound(id) => SchedulingError::TherapistNotFound(id),
            AvailabilityError::Unavailable(msg) => SchedulingError::Unavailable(msg),
        }
    }
}

impl From<SchedulingError> for AppError {
    fn from(err: SchedulingError) -> Self {
        let message = err.to_string();
        match err.kind() {
            ErrorKind::Validation => AppError::ValidationError(message),
            ErrorKind::Conflict => AppError::Conflict(message),
            ErrorKind::NotFound => AppError::NotFound(message),
            ErrorKind::InvalidTransition => AppError::InvalidTransition(message),
            ErrorKind::Unavailable => AppError::Unavailable(message),
        }
    }
}
