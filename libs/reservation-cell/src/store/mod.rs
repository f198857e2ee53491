//! Durable reservation rows plus the (doctor, slot start) uniqueness index.
//!
//! Every method is a single atomic step against the backend. Implementations
//! must guarantee that at most one Locked or Booked row holds a given
//! (doctor, slot start) key, and that a Locked row past its deadline never
//! blocks a new lock on the same key.

pub mod memory;
pub mod redis;

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{Reservation, ReservationState};

pub use self::memory::InMemoryReservationStore;
pub use self::redis::RedisReservationStore;

#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// Inserts a freshly locked reservation.
    ///
    /// Within the same atomic step the owner's expired locks are purged and an
    /// expired lock holding the same key is reclaimed. Fails with
    /// [`StoreError::Conflict`] when a live Locked or Booked row holds the key.
    async fn insert_lock(&self, reservation: &Reservation, now: DateTime<Utc>) -> Result<(), StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Reservation>, StoreError>;

    /// Replaces the row only if its current state is `expected`.
    ///
    /// Returns `None` when the row is gone, in another state, or is a Locked
    /// row already past its deadline at `now`. Moving out of Locked/Booked
    /// releases the uniqueness key.
    async fn transition(
        &self,
        id: Uuid,
        expected: ReservationState,
        updated: &Reservation,
        now: DateTime<Utc>,
    ) -> Result<Option<Reservation>, StoreError>;

    /// Deletes the row if it is still Locked and past its deadline.
    async fn remove_expired_lock(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Slot starts in `[from, to)` held by a Booked or unexpired Locked row.
    async fn active_slot_starts(
        &self,
        doctor_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<BTreeSet<DateTime<Utc>>, StoreError>;

    async fn list_for_patient(&self, patient_id: Uuid) -> Result<Vec<Reservation>, StoreError>;

    /// Deletes every Locked row past its deadline; returns how many went.
    async fn purge_expired_locks(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}
