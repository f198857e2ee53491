use std::sync::Arc;

use axum::{routing::get, Router};

use reservation_cell::{reservation_routes, ReservationAppState};

pub fn create_router(state: Arc<ReservationAppState>) -> Router {
    Router::new()
        .route("/", get(|| async { "Clinic reservation API is running!" }))
        .merge(reservation_routes(state))
}
