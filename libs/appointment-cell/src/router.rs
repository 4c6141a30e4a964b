// libs/appointment-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use shared_utils::extractor::auth_middleware;

use crate::handlers::{self, AppState};

pub fn scheduling_routes(state: Arc<AppState>) -> Router {
    // Every scheduling operation requires an authenticated caller
    let protected_routes = Router::new()
        .route(
            "/therapists/{therapist_id}/availability",
            get(handlers::search_availability),
        )
        .route(
            "/appointments",
            post(handlers::book_appointment).get(handlers::list_appointments),
        )
        .route("/appointments/{appointment_id}", get(handlers::get_appointment))
        .route("/appointments/{appointment_id}/confirm", post(handlers::confirm_appointment))
        .route("/appointments/{appointment_id}/cancel", post(handlers::cancel_appointment))
        .route("/appointments/{appointment_id}/reschedule", post(handlers::reschedule_appointment))
        .route("/appointments/{appointment_id}/complete", post(handlers::complete_appointment))
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware));

    Router::new().merge(protected_routes).with_state(state)
}
