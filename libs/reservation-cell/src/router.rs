use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use shared_utils::extractor::auth_middleware;

use crate::handlers::{self, ReservationAppState};

pub fn reservation_routes(state: Arc<ReservationAppState>) -> Router {
    let public_routes = Router::new()
        .route("/doctors/{doctor_id}/slots", get(handlers::list_available_slots));

    let patient_routes = Router::new()
        .route("/reservations/lock", post(handlers::lock_slot))
        .route("/reservations/confirm", post(handlers::confirm_reservation))
        .route("/reservations/my", get(handlers::list_my_reservations))
        .route("/reservations/{reservation_id}/cancel", post(handlers::cancel_reservation))
        .route("/reservations/{reservation_id}/reschedule", post(handlers::reschedule_reservation))
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(patient_routes)
        .with_state(state)
}
