use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;
use shared_utils::extractor::require_patient;

use crate::models::{
    AvailableSlotsQuery, ConfirmReservationRequest, LockSlotRequest, ReservationListQuery,
};
use crate::services::ReservationService;

/// Shared by every reservation route.
#[derive(Clone)]
pub struct ReservationAppState {
    pub config: Arc<AppConfig>,
    pub service: Arc<ReservationService>,
}

// ==============================================================================
// PUBLIC HANDLERS
// ==============================================================================

pub async fn list_available_slots(
    State(state): State<Arc<ReservationAppState>>,
    Path(doctor_id): Path<Uuid>,
    Query(query): Query<AvailableSlotsQuery>,
) -> Result<Json<Value>, AppError> {
    let slots = state
        .service
        .list_available_slots(doctor_id, query.horizon_days)
        .await?
        .to_vec();

    Ok(Json(json!({
        "doctor_id": doctor_id,
        "slot_duration_minutes": state.service.policy().slot_duration.num_minutes(),
        "total": slots.len(),
        "slots": slots,
    })))
}

// ==============================================================================
// PATIENT HANDLERS
// ==============================================================================

pub async fn lock_slot(
    State(state): State<Arc<ReservationAppState>>,
    Extension(user): Extension<User>,
    Json(request): Json<LockSlotRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let patient_id = require_patient(&user)?;

    let grant = state
        .service
        .lock_slot(request.doctor_id, patient_id, request.slot_start)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "reservation_id": grant.reservation_id,
            "lock_expires_at": grant.lock_expires_at,
            "message": "Slot locked. Confirm with your verification code before the lock expires.",
        })),
    ))
}

pub async fn confirm_reservation(
    State(state): State<Arc<ReservationAppState>>,
    Extension(user): Extension<User>,
    Json(request): Json<ConfirmReservationRequest>,
) -> Result<Json<Value>, AppError> {
    let patient_id = require_patient(&user)?;

    let reservation = state
        .service
        .confirm_reservation(request.reservation_id, patient_id, &request.verification_code)
        .await?;

    Ok(Json(json!({
        "reservation": reservation,
        "message": "Appointment booked",
    })))
}

pub async fn cancel_reservation(
    State(state): State<Arc<ReservationAppState>>,
    Path(reservation_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let patient_id = require_patient(&user)?;

    let reservation = state
        .service
        .cancel_reservation(reservation_id, patient_id)
        .await?;

    Ok(Json(json!({
        "reservation": reservation,
        "message": "Reservation cancelled",
    })))
}

pub async fn reschedule_reservation(
    State(state): State<Arc<ReservationAppState>>,
    Path(reservation_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let patient_id = require_patient(&user)?;

    let reservation = state
        .service
        .reschedule_reservation(reservation_id, patient_id)
        .await?;

    Ok(Json(json!({
        "reservation": reservation,
        "message": "Reservation cancelled. Please book a new slot.",
    })))
}

pub async fn list_my_reservations(
    State(state): State<Arc<ReservationAppState>>,
    Query(query): Query<ReservationListQuery>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let patient_id = require_patient(&user)?;

    let reservations = state
        .service
        .list_reservations_for_patient(patient_id, query.state_filter())
        .await?;

    Ok(Json(json!({
        "reservations": reservations,
        "total": reservations.len(),
    })))
}
