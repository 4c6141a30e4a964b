// libs/appointment-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::{Role, User};
use shared_models::error::AppError;

use crate::models::{
    Actor, Appointment, AppointmentListQuery, AvailabilityQueryParams, BookAppointmentRequest,
    CancelAppointmentRequest, CompleteAppointmentRequest, ListFilter, RescheduleAppointmentRequest,
};
use crate::services::booking::SchedulingService;

/// Shared state of the scheduling routes.
pub struct AppState {
    pub service: Arc<SchedulingService>,
    pub config: Arc<AppConfig>,
}

// ==============================================================================
// AUTHORIZATION HELPERS
// ==============================================================================

fn caller_id(user: &User) -> Result<Uuid, AppError> {
    user.uuid()
        .ok_or_else(|| AppError::Forbidden("Caller identity is not a scheduling party".to_string()))
}

/// Parties of an appointment and admins may act on it; nobody else.
fn authorize_party(user: &User, appointment: &Appointment) -> Result<(), AppError> {
    if user.is_admin() {
        return Ok(());
    }
    if appointment.involves(caller_id(user)?) {
        return Ok(());
    }
    Err(AppError::Forbidden("Not authorized to access this appointment".to_string()))
}

fn cancellation_actor(user: &User) -> Result<Actor, AppError> {
    match user.role() {
        Some(Role::Patient) => Ok(Actor::Patient),
        Some(Role::Therapist) => Ok(Actor::Therapist),
        Some(Role::Admin) => Ok(Actor::System),
        None => Err(AppError::Forbidden("A role is required to cancel appointments".to_string())),
    }
}

// ==============================================================================
// AVAILABILITY
// ==============================================================================

#[axum::debug_handler]
pub async fn search_availability(
    State(state): State<Arc<AppState>>,
    Extension(_user): Extension<User>,
    Path(therapist_id): Path<Uuid>,
    Query(params): Query<AvailabilityQueryParams>,
) -> Result<Json<Value>, AppError> {
    let windows = state
        .service
        .search_availability(therapist_id, params.from, params.to, params.slot_minutes)
        .await?;

    let slots: Vec<_> = windows.iter().collect();
    debug!("Found {} slots for therapist {}", slots.len(), therapist_id);

    Ok(Json(json!({
        "therapist_id": therapist_id,
        "from": params.from,
        "to": params.to,
        "slot_minutes": params.slot_minutes,
        "total": slots.len(),
        "slots": slots,
    })))
}

// ==============================================================================
// APPOINTMENT HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn book_appointment(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Json(request): Json<BookAppointmentRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    // Patients book for themselves; therapists only into their own calendar
    let allowed = match user.role() {
        Some(Role::Admin) => true,
        Some(Role::Patient) => caller_id(&user)? == request.patient_id,
        Some(Role::Therapist) => caller_id(&user)? == request.therapist_id,
        None => false,
    };
    if !allowed {
        return Err(AppError::Forbidden(
            "Not authorized to book appointment for this patient".to_string(),
        ));
    }

    let appointment = state.service.book(request).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "appointment": appointment,
            "message": "Appointment booked",
        })),
    ))
}

#[axum::debug_handler]
pub async fn get_appointment(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let appointment = state.service.get_appointment(appointment_id).await?;
    authorize_party(&user, &appointment)?;

    Ok(Json(json!({ "appointment": appointment })))
}

#[axum::debug_handler]
pub async fn list_appointments(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Query(query): Query<AppointmentListQuery>,
) -> Result<Json<Value>, AppError> {
    let filter = match (query.patient_id, query.therapist_id) {
        (Some(patient_id), None) => ListFilter::Patient(patient_id),
        (None, Some(therapist_id)) => ListFilter::Therapist(therapist_id),
        _ => {
            return Err(AppError::ValidationError(
                "Exactly one of patient_id or therapist_id is required".to_string(),
            ))
        }
    };

    if !user.is_admin() {
        let owner = match filter {
            ListFilter::Patient(id) | ListFilter::Therapist(id) => id,
        };
        if caller_id(&user)? != owner {
            return Err(AppError::Forbidden(
                "Not authorized to list these appointments".to_string(),
            ));
        }
    }

    let appointments = state
        .service
        .list_appointments(filter, query.from, query.to)
        .await?;

    Ok(Json(json!({
        "total": appointments.len(),
        "appointments": appointments,
    })))
}

#[axum::debug_handler]
pub async fn confirm_appointment(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let existing = state.service.get_appointment(appointment_id).await?;
    authorize_party(&user, &existing)?;

    let appointment = state.service.confirm(appointment_id).await?;
    Ok(Json(json!({ "appointment": appointment })))
}

#[axum::debug_handler]
pub async fn cancel_appointment(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<CancelAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let existing = state.service.get_appointment(appointment_id).await?;
    authorize_party(&user, &existing)?;
    let actor = cancellation_actor(&user)?;

    let appointment = state
        .service
        .cancel(appointment_id, &request.reason, actor)
        .await?;

    Ok(Json(json!({
        "appointment": appointment,
        "message": "Appointment cancelled",
    })))
}

#[axum::debug_handler]
pub async fn reschedule_appointment(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<RescheduleAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let existing = state.service.get_appointment(appointment_id).await?;
    authorize_party(&user, &existing)?;

    let appointment = state
        .service
        .reschedule(appointment_id, request.new_start, request.new_duration_minutes)
        .await?;

    Ok(Json(json!({
        "appointment": appointment,
        "rescheduled_from": appointment_id,
    })))
}

#[axum::debug_handler]
pub async fn complete_appointment(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<CompleteAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let existing = state.service.get_appointment(appointment_id).await?;
    authorize_party(&user, &existing)?;
    if !matches!(user.role(), Some(Role::Therapist | Role::Admin)) {
        return Err(AppError::Forbidden(
            "Only the therapist can complete an appointment".to_string(),
        ));
    }

    let appointment = state.service.complete(appointment_id, request.notes).await?;
    Ok(Json(json!({ "appointment": appointment })))
}
