use std::sync::Arc;

use chrono::{DateTime, Utc};
use doctor_cell::ScheduleProvider;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::ReservationError;
use crate::models::{LockGrant, Reservation, ReservationPolicy, ReservationState};
use crate::services::availability::{schedule_offers, AvailabilityCalculator, AvailableSlots};
use crate::services::lock_manager::LockManager;
use crate::services::verification::VerificationProvider;
use crate::store::ReservationStore;

const MAX_HORIZON_DAYS: u32 = 90;

/// Entry point for callers: validates input and delegates to the lock manager
/// and availability calculator. Holds no state of its own.
pub struct ReservationService {
    lock_manager: LockManager,
    availability: AvailabilityCalculator,
    clock: Arc<dyn Clock>,
    policy: ReservationPolicy,
}

impl ReservationService {
    pub fn new(
        store: Arc<dyn ReservationStore>,
        schedules: Arc<dyn ScheduleProvider>,
        verifier: Arc<dyn VerificationProvider>,
        clock: Arc<dyn Clock>,
        policy: ReservationPolicy,
    ) -> Self {
        Self {
            lock_manager: LockManager::new(store.clone(), clock.clone(), verifier, policy.clone()),
            availability: AvailabilityCalculator::new(schedules, store, policy.clone()),
            clock,
            policy,
        }
    }

    pub fn policy(&self) -> &ReservationPolicy {
        &self.policy
    }

    #[instrument(skip(self))]
    pub async fn lock_slot(
        &self,
        doctor_id: Uuid,
        patient_id: Uuid,
        slot_start: DateTime<Utc>,
    ) -> Result<LockGrant, ReservationError> {
        let availability = self.availability.weekly_availability(doctor_id).await?;
        if !schedule_offers(&availability, slot_start, self.policy.slot_duration) {
            debug!("Doctor {} does not offer a slot at {}", doctor_id, slot_start);
            return Err(ReservationError::InvalidSlot(format!(
                "doctor does not offer a slot starting at {}",
                slot_start
            )));
        }

        self.lock_manager.lock_slot(doctor_id, patient_id, slot_start).await
    }

    pub async fn confirm_reservation(
        &self,
        reservation_id: Uuid,
        patient_id: Uuid,
        verification_code: &str,
    ) -> Result<Reservation, ReservationError> {
        self.lock_manager
            .confirm_reservation(reservation_id, patient_id, verification_code)
            .await
    }

    pub async fn cancel_reservation(
        &self,
        reservation_id: Uuid,
        patient_id: Uuid,
    ) -> Result<Reservation, ReservationError> {
        self.lock_manager
            .cancel_reservation(reservation_id, patient_id, self.clock.now())
            .await
    }

    /// Cancels under the usual rules; the patient then locks a new slot themselves.
    #[instrument(skip(self))]
    pub async fn reschedule_reservation(
        &self,
        reservation_id: Uuid,
        patient_id: Uuid,
    ) -> Result<Reservation, ReservationError> {
        let cancelled = self.cancel_reservation(reservation_id, patient_id).await?;
        info!(
            "Reservation {} cancelled for rescheduling, patient must book a new slot",
            reservation_id
        );
        Ok(cancelled)
    }

    pub async fn list_available_slots(
        &self,
        doctor_id: Uuid,
        horizon_days: Option<u32>,
    ) -> Result<AvailableSlots, ReservationError> {
        let horizon_days = horizon_days
            .unwrap_or(self.policy.horizon_days)
            .min(MAX_HORIZON_DAYS);
        self.availability
            .list_available_slots(doctor_id, self.clock.now(), horizon_days)
            .await
    }

    pub async fn list_reservations_for_patient(
        &self,
        patient_id: Uuid,
        status: Option<ReservationState>,
    ) -> Result<Vec<Reservation>, ReservationError> {
        self.lock_manager.list_for_patient(patient_id, status).await
    }
}
