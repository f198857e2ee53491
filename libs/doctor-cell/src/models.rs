use chrono::{Datelike, NaiveDate, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// One recurring opening of a doctor's week, in UTC wall-clock time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityWindow {
    pub day_of_week: i32, // 0 = Sunday, 1 = Monday, etc.
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

impl AvailabilityWindow {
    pub fn new(weekday: Weekday, start_time: NaiveTime, end_time: NaiveTime) -> Self {
        Self {
            day_of_week: weekday.num_days_from_sunday() as i32,
            start_time,
            end_time,
        }
    }

    pub fn is_valid(&self) -> bool {
        (0..=6).contains(&self.day_of_week) && self.start_time < self.end_time
    }

    pub fn applies_to(&self, date: NaiveDate) -> bool {
        self.day_of_week == date.weekday().num_days_from_sunday() as i32
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyAvailability {
    pub doctor_id: Uuid,
    pub windows: Vec<AvailabilityWindow>,
}

impl WeeklyAvailability {
    pub fn new(doctor_id: Uuid, windows: Vec<AvailabilityWindow>) -> Self {
        Self { doctor_id, windows }
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Windows open on `date`, ordered by start time.
    pub fn windows_on(&self, date: NaiveDate) -> Vec<&AvailabilityWindow> {
        let mut windows: Vec<_> = self.windows.iter().filter(|w| w.applies_to(date)).collect();
        windows.sort_by_key(|w| (w.start_time, w.end_time));
        windows
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DoctorError {
    #[error("Doctor not found")]
    NotFound,

    #[error("Schedule service unavailable: {0}")]
    Upstream(String),

    #[error("Malformed schedule data: {0}")]
    InvalidSchedule(String),
}
