// libs/reservation-cell/src/models.rs
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ==============================================================================
// CORE RESERVATION MODELS
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub patient_id: Uuid,
    pub slot_start: DateTime<Utc>,
    pub slot_end: DateTime<Utc>,
    pub state: ReservationState,
    /// Present only while `state` is `Locked`.
    pub lock_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    pub fn new_lock(
        doctor_id: Uuid,
        patient_id: Uuid,
        slot_start: DateTime<Utc>,
        slot_duration: Duration,
        lock_ttl: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            doctor_id,
            patient_id,
            slot_start,
            slot_end: slot_start + slot_duration,
            state: ReservationState::Locked,
            lock_expires_at: Some(now + lock_ttl),
            created_at: now,
            updated_at: now,
        }
    }

    /// A lock whose deadline has passed no longer holds its slot.
    pub fn is_lock_expired(&self, now: DateTime<Utc>) -> bool {
        self.state == ReservationState::Locked
            && self.lock_expires_at.map_or(true, |expires_at| now > expires_at)
    }

    /// Whether this row counts toward the one-active-reservation-per-slot rule at `now`.
    pub fn holds_slot(&self, now: DateTime<Utc>) -> bool {
        match self.state {
            ReservationState::Booked => true,
            ReservationState::Locked => !self.is_lock_expired(now),
            ReservationState::Cancelled | ReservationState::Completed => false,
        }
    }

    pub fn booked(&self, now: DateTime<Utc>) -> Self {
        Self {
            state: ReservationState::Booked,
            lock_expires_at: None,
            updated_at: now,
            ..self.clone()
        }
    }

    pub fn cancelled(&self, now: DateTime<Utc>) -> Self {
        Self {
            state: ReservationState::Cancelled,
            lock_expires_at: None,
            updated_at: now,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationState {
    Locked,
    Booked,
    Cancelled,
    Completed,
}

impl ReservationState {
    /// Locked and Booked rows occupy their slot.
    pub fn is_active(&self) -> bool {
        matches!(self, ReservationState::Locked | ReservationState::Booked)
    }

    pub fn can_transition_to(&self, next: ReservationState) -> bool {
        matches!(
            (self, next),
            (ReservationState::Locked, ReservationState::Booked)
                | (ReservationState::Locked, ReservationState::Cancelled)
                | (ReservationState::Booked, ReservationState::Cancelled)
                | (ReservationState::Booked, ReservationState::Completed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationState::Locked => "locked",
            ReservationState::Booked => "booked",
            ReservationState::Cancelled => "cancelled",
            ReservationState::Completed => "completed",
        }
    }
}

impl fmt::Display for ReservationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReservationState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "locked" => Ok(ReservationState::Locked),
            "booked" => Ok(ReservationState::Booked),
            "cancelled" => Ok(ReservationState::Cancelled),
            "completed" => Ok(ReservationState::Completed),
            other => Err(format!("unknown reservation state: {}", other)),
        }
    }
}

// ==============================================================================
// OPERATION RESULTS
// ==============================================================================

/// Handed back by a successful lock: the caller must confirm before `lock_expires_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockGrant {
    pub reservation_id: Uuid,
    pub lock_expires_at: DateTime<Utc>,
}

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockSlotRequest {
    pub doctor_id: Uuid,
    pub slot_start: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmReservationRequest {
    pub reservation_id: Uuid,
    pub verification_code: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReservationListQuery {
    pub status: Option<String>,
}

impl ReservationListQuery {
    /// Unknown or empty `status` values mean no filter.
    pub fn state_filter(&self) -> Option<ReservationState> {
        let raw = self.status.as_deref()?.trim();
        if raw.is_empty() {
            return None;
        }
        match raw.parse() {
            Ok(state) => Some(state),
            Err(e) => {
                tracing::debug!("Ignoring status filter: {}", e);
                None
            }
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AvailableSlotsQuery {
    pub horizon_days: Option<u32>,
}

// ==============================================================================
// POLICY
// ==============================================================================

#[derive(Debug, Clone)]
pub struct ReservationPolicy {
    pub slot_duration: Duration,
    pub lock_ttl: Duration,
    pub cancellation_window: Duration,
    pub horizon_days: u32,
    pub max_transient_retries: u32,
    pub retry_backoff: std::time::Duration,
}

impl Default for ReservationPolicy {
    fn default() -> Self {
        Self::from(&shared_config::ReservationSettings::default())
    }
}

const MAX_SLOT_MINUTES: i64 = 7 * 24 * 60;
const MAX_LOCK_TTL_MINUTES: i64 = 24 * 60;
const MAX_CANCELLATION_WINDOW_HOURS: i64 = 366 * 24;
const MAX_RETRY_BACKOFF_MILLIS: u64 = 10_000;

// Settings come from the environment; chrono's constructors panic on overflow.
impl From<&shared_config::ReservationSettings> for ReservationPolicy {
    fn from(settings: &shared_config::ReservationSettings) -> Self {
        Self {
            slot_duration: Duration::minutes(
                settings.slot_duration_minutes.clamp(1, MAX_SLOT_MINUTES),
            ),
            lock_ttl: Duration::minutes(settings.lock_ttl_minutes.clamp(1, MAX_LOCK_TTL_MINUTES)),
            cancellation_window: Duration::hours(
                settings
                    .cancellation_window_hours
                    .clamp(0, MAX_CANCELLATION_WINDOW_HOURS),
            ),
            horizon_days: settings.horizon_days,
            max_transient_retries: settings.max_transient_retries,
            retry_backoff: std::time::Duration::from_millis(
                settings.retry_backoff_millis.min(MAX_RETRY_BACKOFF_MILLIS),
            ),
        }
    }
}

impl ReservationPolicy {
    /// Whether `slot_start` sits on the fixed-duration grid.
    pub fn is_aligned(&self, slot_start: DateTime<Utc>) -> bool {
        let step = self.slot_duration.num_seconds();
        step > 0
            && slot_start.timestamp_subsec_nanos() == 0
            && slot_start.timestamp().rem_euclid(step) == 0
    }
}
