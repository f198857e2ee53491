//! Runs against a live Redis when `REDIS_TEST_URL` is set; otherwise each test returns early.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use uuid::Uuid;

use reservation_cell::{RedisReservationStore, Reservation, ReservationState, ReservationStore, StoreError};

async fn store() -> Option<RedisReservationStore> {
    let url = std::env::var("REDIS_TEST_URL").ok()?;
    let prefix = format!("test_{}", Uuid::new_v4().simple());
    Some(RedisReservationStore::new(&url, prefix).await.unwrap())
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2030, 1, 6, 8, 0, 0).unwrap()
}

fn lock(doctor_id: Uuid, patient_id: Uuid, minute: i64, at: DateTime<Utc>) -> Reservation {
    let slot = Utc.with_ymd_and_hms(2030, 1, 7, 9, 0, 0).unwrap() + Duration::minutes(minute);
    Reservation::new_lock(doctor_id, patient_id, slot, Duration::minutes(30), Duration::minutes(5), at)
}

#[tokio::test]
async fn redis_enforces_one_active_row_per_slot() {
    let Some(store) = store().await else { return };
    let doctor = Uuid::new_v4();

    let first = lock(doctor, Uuid::new_v4(), 0, now());
    store.insert_lock(&first, now()).await.unwrap();

    let err = store
        .insert_lock(&lock(doctor, Uuid::new_v4(), 0, now()), now())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Conflict));

    assert_eq!(store.get(first.id).await.unwrap(), Some(first));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn redis_concurrent_inserts_have_one_winner() {
    let Some(store) = store().await else { return };
    let store = Arc::new(store);
    let doctor = Uuid::new_v4();

    let attempts: Vec<_> = (0..16)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.insert_lock(&lock(doctor, Uuid::new_v4(), 30, now()), now()).await })
        })
        .collect();

    let winners = futures::future::join_all(attempts)
        .await
        .into_iter()
        .filter(|result| matches!(result, Ok(Ok(()))))
        .count();
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn redis_reclaims_expired_locks_and_tracks_transitions() {
    let Some(store) = store().await else { return };
    let doctor = Uuid::new_v4();
    let patient = Uuid::new_v4();

    let stale = lock(doctor, patient, 0, now());
    store.insert_lock(&stale, now()).await.unwrap();

    let later = now() + Duration::minutes(6);
    let held = store.active_slot_starts(doctor, now(), later + Duration::days(2), later).await.unwrap();
    assert!(held.is_empty());

    let fresh = lock(doctor, Uuid::new_v4(), 0, later);
    store.insert_lock(&fresh, later).await.unwrap();
    assert!(store.get(stale.id).await.unwrap().is_none());
    assert!(store.list_for_patient(patient).await.unwrap().is_empty());

    let booked = fresh.booked(later);
    let first = store.transition(fresh.id, ReservationState::Locked, &booked, later).await;
    assert!(first.unwrap().is_some());
    let second = store.transition(fresh.id, ReservationState::Locked, &booked, later).await;
    assert!(second.unwrap().is_none());

    let held = store.active_slot_starts(doctor, now(), later + Duration::days(2), later).await.unwrap();
    assert_eq!(held.into_iter().collect::<Vec<_>>(), vec![fresh.slot_start]);

    // Booked rows are never swept.
    assert_eq!(store.purge_expired_locks(later + Duration::days(1)).await.unwrap(), 0);

    let cancelled = booked.cancelled(later);
    store
        .transition(fresh.id, ReservationState::Booked, &cancelled, later)
        .await
        .unwrap();
    store
        .insert_lock(&lock(doctor, Uuid::new_v4(), 0, later), later)
        .await
        .unwrap();
}

#[tokio::test]
async fn redis_sweep_and_targeted_removal_skip_live_locks() {
    let Some(store) = store().await else { return };
    let doctor = Uuid::new_v4();

    let old = lock(doctor, Uuid::new_v4(), 0, now());
    let young = lock(doctor, Uuid::new_v4(), 30, now() + Duration::minutes(4));
    store.insert_lock(&old, now()).await.unwrap();
    store.insert_lock(&young, now() + Duration::minutes(4)).await.unwrap();

    let at = now() + Duration::minutes(6);
    assert!(!store.remove_expired_lock(young.id, at).await.unwrap());
    assert_eq!(store.purge_expired_locks(at).await.unwrap(), 1);
    assert!(store.get(old.id).await.unwrap().is_none());
    assert!(store.get(young.id).await.unwrap().is_some());

    let young_booked = young.booked(at + Duration::minutes(8));
    assert!(store
        .transition(young.id, ReservationState::Locked, &young_booked, at + Duration::minutes(8))
        .await
        .unwrap()
        .is_none());

    let much_later = at + Duration::minutes(10);
    assert!(store.remove_expired_lock(young.id, much_later).await.unwrap());
    assert!(store.get(young.id).await.unwrap().is_none());
}
