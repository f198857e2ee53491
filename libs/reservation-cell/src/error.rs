use thiserror::Error;

use shared_models::error::AppError;

use crate::models::ReservationState;

/// Failures surfaced by the reservation core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReservationError {
    #[error("Slot is not available. It may have just been booked.")]
    SlotUnavailable,

    #[error("Invalid slot: {0}")]
    InvalidSlot(String),

    #[error("Reservation not found")]
    NotFound,

    #[error("Reservation cannot be changed while {0}")]
    InvalidState(ReservationState),

    #[error("Your lock on this slot has expired. Please try again.")]
    LockExpired,

    #[error("Invalid verification code")]
    InvalidVerification,

    #[error("Cannot cancel an appointment less than {hours} hours in advance")]
    CancellationWindowClosed { hours: i64 },

    #[error("Doctor has not set up availability")]
    DoctorHasNoAvailability,

    #[error("Temporary failure, please retry: {0}")]
    Transient(String),
}

/// Failures raised by a reservation store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An active reservation already holds the (doctor, slot) key.
    #[error("slot already held by an active reservation")]
    Conflict,

    /// Contention or connectivity; the operation may succeed if retried.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store failure: {0}")]
    Backend(String),

    #[error("corrupt reservation record: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<ReservationError> for AppError {
    fn from(error: ReservationError) -> Self {
        let message = error.to_string();
        match error {
            ReservationError::SlotUnavailable => AppError::Conflict(message),
            ReservationError::InvalidSlot(_) => AppError::BadRequest(message),
            ReservationError::NotFound => AppError::NotFound(message),
            ReservationError::InvalidState(_) => AppError::Conflict(message),
            ReservationError::LockExpired => AppError::Gone(message),
            ReservationError::InvalidVerification => AppError::BadRequest(message),
            ReservationError::CancellationWindowClosed { .. } => AppError::Forbidden(message),
            ReservationError::DoctorHasNoAvailability => AppError::NotFound(message),
            ReservationError::Transient(_) => {
                AppError::ServiceUnavailable("Reservation service is busy, please try again".to_string())
            }
        }
    }
}
