use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{ReservationError, StoreError};
use crate::models::{LockGrant, Reservation, ReservationPolicy, ReservationState};
use crate::services::verification::VerificationProvider;
use crate::store::ReservationStore;

/// Runs a store operation, retrying retryable failures with linear backoff.
pub(crate) async fn retry_store<T, F, Fut>(
    policy: &ReservationPolicy,
    operation: &'static str,
    mut attempt_fn: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempt: u32 = 0;
    loop {
        match attempt_fn().await {
            Err(e) if e.is_retryable() && attempt < policy.max_transient_retries => {
                attempt += 1;
                warn!(
                    "Store {} failed ({}), retrying attempt {}/{}",
                    operation, e, attempt, policy.max_transient_retries
                );
                tokio::time::sleep(policy.retry_backoff * attempt).await;
            }
            result => return result,
        }
    }
}

/// Every store failure is folded into the caller-facing taxonomy here.
pub(crate) fn classify(error: StoreError) -> ReservationError {
    match error {
        StoreError::Conflict => ReservationError::SlotUnavailable,
        other => ReservationError::Transient(other.to_string()),
    }
}

/// Owns the lock -> confirm/expire state machine on top of a [`ReservationStore`].
pub struct LockManager {
    store: Arc<dyn ReservationStore>,
    clock: Arc<dyn Clock>,
    verifier: Arc<dyn VerificationProvider>,
    policy: ReservationPolicy,
}

impl LockManager {
    pub fn new(
        store: Arc<dyn ReservationStore>,
        clock: Arc<dyn Clock>,
        verifier: Arc<dyn VerificationProvider>,
        policy: ReservationPolicy,
    ) -> Self {
        Self {
            store,
            clock,
            verifier,
            policy,
        }
    }

    pub fn policy(&self) -> &ReservationPolicy {
        &self.policy
    }

    /// Places a time-limited hold on `slot_start` for `patient_id`.
    #[instrument(skip(self))]
    pub async fn lock_slot(
        &self,
        doctor_id: Uuid,
        patient_id: Uuid,
        slot_start: DateTime<Utc>,
    ) -> Result<LockGrant, ReservationError> {
        let now = self.clock.now();

        if !self.policy.is_aligned(slot_start) {
            return Err(ReservationError::InvalidSlot(format!(
                "{} is not on the {}-minute slot grid",
                slot_start,
                self.policy.slot_duration.num_minutes()
            )));
        }
        if slot_start < now {
            return Err(ReservationError::InvalidSlot(format!("{} is in the past", slot_start)));
        }

        let reservation = Reservation::new_lock(
            doctor_id,
            patient_id,
            slot_start,
            self.policy.slot_duration,
            self.policy.lock_ttl,
            now,
        );
        let pending = &reservation;

        let mut retried = false;
        let inserted = retry_store(&self.policy, "insert_lock", || {
            let first = !retried;
            retried = true;
            async move {
                match self.store.insert_lock(pending, now).await {
                    // A retried insert may collide with its own earlier, unacknowledged write.
                    Err(StoreError::Conflict) if !first => match self.store.get(pending.id).await? {
                        Some(_) => Ok(()),
                        None => Err(StoreError::Conflict),
                    },
                    result => result,
                }
            }
        })
        .await;

        match inserted {
            Ok(()) => {
                info!(
                    "Slot {} of doctor {} locked by patient {} as {}",
                    slot_start, doctor_id, patient_id, reservation.id
                );
                Ok(LockGrant {
                    reservation_id: reservation.id,
                    lock_expires_at: now + self.policy.lock_ttl,
                })
            }
            Err(StoreError::Conflict) => {
                debug!("Slot {} of doctor {} already held", slot_start, doctor_id);
                Err(ReservationError::SlotUnavailable)
            }
            Err(e) => Err(classify(e)),
        }
    }

    /// Turns a live lock into a booking once the verification code checks out.
    #[instrument(skip(self, verification_code))]
    pub async fn confirm_reservation(
        &self,
        reservation_id: Uuid,
        patient_id: Uuid,
        verification_code: &str,
    ) -> Result<Reservation, ReservationError> {
        let reservation = self
            .fetch(reservation_id)
            .await?
            .filter(|r| {
                r.patient_id == patient_id && r.state.can_transition_to(ReservationState::Booked)
            })
            .ok_or(ReservationError::NotFound)?;

        let checked_at = self.clock.now();
        if reservation.is_lock_expired(checked_at) {
            self.reclaim(&reservation, checked_at).await?;
            return Err(ReservationError::LockExpired);
        }

        if !self.verifier.verify(&reservation, verification_code).await {
            warn!("Invalid verification code for reservation {}", reservation_id);
            return Err(ReservationError::InvalidVerification);
        }

        // The store re-checks the deadline at `now`, so a confirm that outlives
        // the lock while verifying cannot book.
        let now = self.clock.now();
        let booked = reservation.booked(now);
        let swapped = retry_store(&self.policy, "transition", || {
            self.store
                .transition(reservation_id, ReservationState::Locked, &booked, now)
        })
        .await
        .map_err(classify)?;

        match swapped {
            Some(booked) => {
                info!("Reservation {} booked for slot {}", booked.id, booked.slot_start);
                Ok(booked)
            }
            None if reservation.is_lock_expired(now) => {
                self.reclaim(&reservation, now).await?;
                Err(ReservationError::LockExpired)
            }
            // Lost the row to a concurrent confirm or cancel.
            None => Err(ReservationError::NotFound),
        }
    }

    /// Cancels a lock at any time, or a booking outside the cancellation window.
    #[instrument(skip(self))]
    pub async fn cancel_reservation(
        &self,
        reservation_id: Uuid,
        patient_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Reservation, ReservationError> {
        // States only move forward, so a lost compare-and-swap settles within a few rounds.
        loop {
            let reservation = self
                .fetch(reservation_id)
                .await?
                .filter(|r| r.patient_id == patient_id)
                .ok_or(ReservationError::NotFound)?;

            if !reservation.state.can_transition_to(ReservationState::Cancelled) {
                return Err(ReservationError::InvalidState(reservation.state));
            }
            if reservation.is_lock_expired(now) {
                self.reclaim(&reservation, now).await?;
                return Err(ReservationError::NotFound);
            }
            if reservation.state == ReservationState::Booked
                && reservation.slot_start - now <= self.policy.cancellation_window
            {
                return Err(ReservationError::CancellationWindowClosed {
                    hours: self.policy.cancellation_window.num_hours(),
                });
            }

            let cancelled = reservation.cancelled(now);
            let swapped = retry_store(&self.policy, "transition", || {
                self.store
                    .transition(reservation_id, reservation.state, &cancelled, now)
            })
            .await
            .map_err(classify)?;

            if let Some(cancelled) = swapped {
                info!("Reservation {} cancelled (was {})", reservation_id, reservation.state);
                return Ok(cancelled);
            }
            debug!("Reservation {} changed during cancel, re-reading", reservation_id);
        }
    }

    /// The patient's reservations, most recent slot first, without expired locks.
    #[instrument(skip(self))]
    pub async fn list_for_patient(
        &self,
        patient_id: Uuid,
        status: Option<ReservationState>,
    ) -> Result<Vec<Reservation>, ReservationError> {
        let now = self.clock.now();
        let mut reservations = retry_store(&self.policy, "list_for_patient", || {
            self.store.list_for_patient(patient_id)
        })
        .await
        .map_err(classify)?;

        reservations.retain(|r| !r.is_lock_expired(now) && status.map_or(true, |s| r.state == s));
        reservations.sort_by(|a, b| {
            b.slot_start
                .cmp(&a.slot_start)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });

        Ok(reservations)
    }

    async fn fetch(&self, reservation_id: Uuid) -> Result<Option<Reservation>, ReservationError> {
        retry_store(&self.policy, "get", || self.store.get(reservation_id))
            .await
            .map_err(classify)
    }

    async fn reclaim(
        &self,
        reservation: &Reservation,
        now: DateTime<Utc>,
    ) -> Result<(), ReservationError> {
        let removed = retry_store(&self.policy, "remove_expired_lock", || {
            self.store.remove_expired_lock(reservation.id, now)
        })
        .await
        .map_err(classify)?;

        if removed {
            info!(
                "Expired lock {} on slot {} released",
                reservation.id, reservation.slot_start
            );
        }
        Ok(())
    }
}
