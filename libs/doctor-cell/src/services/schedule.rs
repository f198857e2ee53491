use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveTime;
use reqwest::Method;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{AvailabilityWindow, DoctorError, WeeklyAvailability};

/// Source of a doctor's recurring weekly schedule.
#[async_trait]
pub trait ScheduleProvider: Send + Sync {
    async fn weekly_availability(&self, doctor_id: Uuid) -> Result<WeeklyAvailability, DoctorError>;
}

/// Schedule held in memory; doctors without an entry have no availability.
#[derive(Default)]
pub struct StaticScheduleProvider {
    schedules: RwLock<HashMap<Uuid, Vec<AvailabilityWindow>>>,
}

impl StaticScheduleProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_windows(&self, doctor_id: Uuid, windows: Vec<AvailabilityWindow>) {
        self.schedules.write().await.insert(doctor_id, windows);
    }
}

#[async_trait]
impl ScheduleProvider for StaticScheduleProvider {
    async fn weekly_availability(&self, doctor_id: Uuid) -> Result<WeeklyAvailability, DoctorError> {
        let windows = self
            .schedules
            .read()
            .await
            .get(&doctor_id)
            .cloned()
            .unwrap_or_default();

        Ok(WeeklyAvailability::new(doctor_id, keep_valid(doctor_id, windows)))
    }
}

#[derive(Debug, Deserialize)]
struct AvailabilityRow {
    day_of_week: i32,
    start_time: NaiveTime,
    end_time: NaiveTime,
}

/// Reads `appointment_availabilities` rows through the REST API.
pub struct SupabaseScheduleProvider {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseScheduleProvider {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
        }
    }
}

#[async_trait]
impl ScheduleProvider for SupabaseScheduleProvider {
    async fn weekly_availability(&self, doctor_id: Uuid) -> Result<WeeklyAvailability, DoctorError> {
        debug!("Fetching weekly availability for doctor: {}", doctor_id);

        let path = format!(
            "/rest/v1/appointment_availabilities?doctor_id=eq.{}&order=day_of_week.asc,start_time.asc",
            doctor_id
        );
        let rows: Vec<AvailabilityRow> = self
            .supabase
            .request(Method::GET, &path, None, None)
            .await
            .map_err(|e| DoctorError::Upstream(e.to_string()))?;

        let windows = rows
            .into_iter()
            .map(|row| AvailabilityWindow {
                day_of_week: row.day_of_week,
                start_time: row.start_time,
                end_time: row.end_time,
            })
            .collect();

        Ok(WeeklyAvailability::new(doctor_id, keep_valid(doctor_id, windows)))
    }
}

fn keep_valid(doctor_id: Uuid, windows: Vec<AvailabilityWindow>) -> Vec<AvailabilityWindow> {
    windows
        .into_iter()
        .filter(|window| {
            let valid = window.is_valid();
            if !valid {
                warn!("Skipping malformed availability window for doctor {}: {:?}", doctor_id, window);
            }
            valid
        })
        .collect()
}
