use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Days, Duration, NaiveDate, TimeZone, Utc};
use doctor_cell::{AvailabilityWindow, DoctorError, ScheduleProvider, WeeklyAvailability};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::error::ReservationError;
use crate::models::ReservationPolicy;
use crate::services::lock_manager::{classify, retry_store};
use crate::store::ReservationStore;

/// Bookable slot starts for one doctor over a horizon of days.
///
/// Holds a snapshot of the schedule and of the slots taken at `now`; every call
/// to [`AvailableSlots::iter`] walks the same finite, ascending sequence.
#[derive(Debug, Clone)]
pub struct AvailableSlots {
    availability: WeeklyAvailability,
    taken: BTreeSet<DateTime<Utc>>,
    now: DateTime<Utc>,
    first_day: NaiveDate,
    horizon_days: u32,
    slot_duration: Duration,
}

impl AvailableSlots {
    pub fn iter(&self) -> SlotIter<'_> {
        SlotIter {
            slots: self,
            day: 0,
            pending: Vec::new().into_iter(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    pub fn to_vec(&self) -> Vec<DateTime<Utc>> {
        self.iter().collect()
    }

    fn free_on(&self, date: NaiveDate) -> Vec<DateTime<Utc>> {
        let mut starts: Vec<_> = self
            .availability
            .windows_on(date)
            .into_iter()
            .flat_map(|window| grid_points(window, date, self.slot_duration))
            .filter(|start| *start >= self.now && !self.taken.contains(start))
            .collect();

        // Overlapping windows may offer the same start twice.
        starts.sort();
        starts.dedup();
        starts
    }
}

impl<'a> IntoIterator for &'a AvailableSlots {
    type Item = DateTime<Utc>;
    type IntoIter = SlotIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Lazily expands one day of the schedule at a time.
pub struct SlotIter<'a> {
    slots: &'a AvailableSlots,
    day: u32,
    pending: std::vec::IntoIter<DateTime<Utc>>,
}

impl Iterator for SlotIter<'_> {
    type Item = DateTime<Utc>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(start) = self.pending.next() {
                return Some(start);
            }
            if self.day >= self.slots.horizon_days {
                return None;
            }
            let date = self.slots.first_day.checked_add_days(Days::new(u64::from(self.day)))?;
            self.day += 1;
            self.pending = self.slots.free_on(date).into_iter();
        }
    }
}

/// Grid-aligned starts inside `window` on `date` whose whole slot fits before the window ends.
fn grid_points(window: &AvailabilityWindow, date: NaiveDate, slot_duration: Duration) -> Vec<DateTime<Utc>> {
    let step = slot_duration.num_seconds();
    if step <= 0 {
        return Vec::new();
    }

    let window_start = Utc.from_utc_datetime(&date.and_time(window.start_time));
    let window_end = Utc.from_utc_datetime(&date.and_time(window.end_time));

    let ts = window_start.timestamp();
    let first = ts + (step - ts.rem_euclid(step)) % step;

    let mut points = Vec::new();
    let mut cursor = Utc.timestamp_opt(first, 0).single();
    while let Some(start) = cursor {
        if start + slot_duration > window_end {
            break;
        }
        if start >= window_start {
            points.push(start);
        }
        cursor = Some(start + slot_duration);
    }
    points
}

/// Whether the weekly schedule offers a slot starting exactly at `slot_start`.
pub fn schedule_offers(
    availability: &WeeklyAvailability,
    slot_start: DateTime<Utc>,
    slot_duration: Duration,
) -> bool {
    let date = slot_start.date_naive();
    availability
        .windows_on(date)
        .into_iter()
        .any(|window| grid_points(window, date, slot_duration).contains(&slot_start))
}

pub(crate) fn schedule_error(doctor_id: Uuid, error: DoctorError) -> ReservationError {
    match error {
        DoctorError::NotFound => {
            debug!("No schedule found for doctor {}", doctor_id);
            ReservationError::DoctorHasNoAvailability
        }
        other => ReservationError::Transient(other.to_string()),
    }
}

/// Combines a doctor's weekly schedule with the slots currently held.
pub struct AvailabilityCalculator {
    schedules: Arc<dyn ScheduleProvider>,
    store: Arc<dyn ReservationStore>,
    policy: ReservationPolicy,
}

impl AvailabilityCalculator {
    pub fn new(
        schedules: Arc<dyn ScheduleProvider>,
        store: Arc<dyn ReservationStore>,
        policy: ReservationPolicy,
    ) -> Self {
        Self {
            schedules,
            store,
            policy,
        }
    }

    pub async fn weekly_availability(&self, doctor_id: Uuid) -> Result<WeeklyAvailability, ReservationError> {
        let availability = self
            .schedules
            .weekly_availability(doctor_id)
            .await
            .map_err(|e| schedule_error(doctor_id, e))?;

        if availability.is_empty() {
            return Err(ReservationError::DoctorHasNoAvailability);
        }
        Ok(availability)
    }

    #[instrument(skip(self))]
    pub async fn list_available_slots(
        &self,
        doctor_id: Uuid,
        now: DateTime<Utc>,
        horizon_days: u32,
    ) -> Result<AvailableSlots, ReservationError> {
        let availability = self.weekly_availability(doctor_id).await?;

        let first_day = now.date_naive();
        let until = first_day
            .checked_add_days(Days::new(u64::from(horizon_days)))
            .and_then(|day| day.and_hms_opt(0, 0, 0))
            .map(|midnight| Utc.from_utc_datetime(&midnight))
            .ok_or_else(|| ReservationError::InvalidSlot(format!("horizon of {} days is out of range", horizon_days)))?;

        let taken = retry_store(&self.policy, "active_slot_starts", || {
            self.store.active_slot_starts(doctor_id, now, until, now)
        })
        .await
        .map_err(classify)?;

        debug!(
            "Doctor {} has {} held slots before {}",
            doctor_id,
            taken.len(),
            until
        );

        Ok(AvailableSlots {
            availability,
            taken,
            now,
            first_day,
            horizon_days,
            slot_duration: self.policy.slot_duration,
        })
    }
}
