use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{Reservation, ReservationState};
use crate::store::ReservationStore;

type SlotKey = (Uuid, DateTime<Utc>);

#[derive(Default)]
struct Tables {
    rows: HashMap<Uuid, Reservation>,
    /// (doctor, slot start) -> id of the Locked/Booked row holding it
    active_slots: HashMap<SlotKey, Uuid>,
}

impl Tables {
    fn remove(&mut self, id: Uuid) -> Option<Reservation> {
        let row = self.rows.remove(&id)?;
        let key = (row.doctor_id, row.slot_start);
        if self.active_slots.get(&key) == Some(&id) {
            self.active_slots.remove(&key);
        }
        Some(row)
    }

    fn expired_lock_ids(&self, now: DateTime<Utc>, owner: Option<Uuid>) -> Vec<Uuid> {
        self.rows
            .values()
            .filter(|row| row.is_lock_expired(now))
            .filter(|row| owner.map_or(true, |patient_id| row.patient_id == patient_id))
            .map(|row| row.id)
            .collect()
    }
}

/// Process-local store; one write lock per operation serializes all mutations.
#[derive(Default)]
pub struct InMemoryReservationStore {
    tables: RwLock<Tables>,
}

impl InMemoryReservationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.tables.read().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl ReservationStore for InMemoryReservationStore {
    async fn insert_lock(&self, reservation: &Reservation, now: DateTime<Utc>) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;

        for id in tables.expired_lock_ids(now, Some(reservation.patient_id)) {
            tables.remove(id);
        }

        let key = (reservation.doctor_id, reservation.slot_start);
        if let Some(holder_id) = tables.active_slots.get(&key).copied() {
            match tables.rows.get(&holder_id) {
                Some(holder) if holder.holds_slot(now) => return Err(StoreError::Conflict),
                _ => {
                    debug!("Reclaiming expired lock {} on slot {}", holder_id, reservation.slot_start);
                    tables.remove(holder_id);
                    tables.active_slots.remove(&key);
                }
            }
        }

        tables.active_slots.insert(key, reservation.id);
        tables.rows.insert(reservation.id, reservation.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Reservation>, StoreError> {
        Ok(self.tables.read().await.rows.get(&id).cloned())
    }

    async fn transition(
        &self,
        id: Uuid,
        expected: ReservationState,
        updated: &Reservation,
        now: DateTime<Utc>,
    ) -> Result<Option<Reservation>, StoreError> {
        let mut tables = self.tables.write().await;

        match tables.rows.get(&id) {
            Some(current) if current.state == expected && !current.is_lock_expired(now) => {}
            _ => return Ok(None),
        }

        let key = (updated.doctor_id, updated.slot_start);
        if !updated.state.is_active() && tables.active_slots.get(&key) == Some(&id) {
            tables.active_slots.remove(&key);
        }
        tables.rows.insert(id, updated.clone());

        Ok(Some(updated.clone()))
    }

    async fn remove_expired_lock(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;

        let expired = tables.rows.get(&id).is_some_and(|row| row.is_lock_expired(now));
        if expired {
            tables.remove(id);
        }
        Ok(expired)
    }

    async fn active_slot_starts(
        &self,
        doctor_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<BTreeSet<DateTime<Utc>>, StoreError> {
        let tables = self.tables.read().await;

        Ok(tables
            .active_slots
            .iter()
            .filter(|((doctor, start), _)| *doctor == doctor_id && *start >= from && *start < to)
            .filter(|(_, id)| tables.rows.get(id).is_some_and(|row| row.holds_slot(now)))
            .map(|((_, start), _)| *start)
            .collect())
    }

    async fn list_for_patient(&self, patient_id: Uuid) -> Result<Vec<Reservation>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .rows
            .values()
            .filter(|row| row.patient_id == patient_id)
            .cloned()
            .collect())
    }

    async fn purge_expired_locks(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut tables = self.tables.write().await;

        let expired = tables.expired_lock_ids(now, None);
        for id in &expired {
            tables.remove(*id);
        }
        Ok(expired.len() as u64)
    }
}
