#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, NaiveTime, TimeZone, Utc, Weekday};
use uuid::Uuid;

use doctor_cell::{AvailabilityWindow, StaticScheduleProvider};
use reservation_cell::{
    InMemoryReservationStore, ManualClock, ReservationPolicy, ReservationService, ReservationStore,
    StaticCodeVerifier,
};

pub const CODE: &str = "123456";

pub fn hm(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

/// 2030-01-07 is a Monday.
pub fn monday_at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2030, 1, 7, h, m, 0).unwrap()
}

/// The Sunday morning before, more than a day ahead of every Monday slot.
pub fn sunday_morning() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2030, 1, 6, 8, 0, 0).unwrap()
}

pub fn test_policy() -> ReservationPolicy {
    ReservationPolicy {
        retry_backoff: std::time::Duration::ZERO,
        ..ReservationPolicy::default()
    }
}

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub store: Arc<dyn ReservationStore>,
    pub schedules: Arc<StaticScheduleProvider>,
    pub service: Arc<ReservationService>,
    pub doctor_id: Uuid,
}

impl Harness {
    /// One doctor, available Mondays 09:00-10:00, backed by an in-memory store.
    pub async fn new() -> Self {
        Self::with_store(Arc::new(InMemoryReservationStore::new())).await
    }

    pub async fn with_store(store: Arc<dyn ReservationStore>) -> Self {
        let clock = Arc::new(ManualClock::new(sunday_morning()));
        let schedules = Arc::new(StaticScheduleProvider::new());
        let doctor_id = Uuid::new_v4();

        schedules
            .set_windows(
                doctor_id,
                vec![AvailabilityWindow::new(Weekday::Mon, hm(9, 0), hm(10, 0))],
            )
            .await;

        let service = Arc::new(ReservationService::new(
            store.clone(),
            schedules.clone(),
            Arc::new(StaticCodeVerifier::new(CODE)),
            clock.clone(),
            test_policy(),
        ));

        Self {
            clock,
            store,
            schedules,
            service,
            doctor_id,
        }
    }

    /// Locks and confirms `slot_start` for a fresh patient; returns (patient, reservation id).
    pub async fn book(&self, slot_start: DateTime<Utc>) -> (Uuid, Uuid) {
        self.book_as(Uuid::new_v4(), slot_start).await
    }

    pub async fn book_as(&self, patient_id: Uuid, slot_start: DateTime<Utc>) -> (Uuid, Uuid) {
        let grant = self
            .service
            .lock_slot(self.doctor_id, patient_id, slot_start)
            .await
            .unwrap();
        self.service
            .confirm_reservation(grant.reservation_id, patient_id, CODE)
            .await
            .unwrap();
        (patient_id, grant.reservation_id)
    }
}
