use std::env;
use std::str::FromStr;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_jwt_secret: String,
    pub redis_url: Option<String>,
    pub store_prefix: String,
    pub port: u16,
    pub reservation: ReservationSettings,
}

/// Tunables of the slot reservation core.
#[derive(Debug, Clone, PartialEq)]
pub struct ReservationSettings {
    pub slot_duration_minutes: i64,
    pub lock_ttl_minutes: i64,
    pub cancellation_window_hours: i64,
    pub horizon_days: u32,
    pub sweep_interval_seconds: u64,
    pub max_transient_retries: u32,
    pub retry_backoff_millis: u64,
    pub verification_code: String,
}

impl Default for ReservationSettings {
    fn default() -> Self {
        Self {
            slot_duration_minutes: 30,
            lock_ttl_minutes: 5,
            cancellation_window_hours: 24,
            horizon_days: 14,
            sweep_interval_seconds: 60,
            max_transient_retries: 3,
            retry_backoff_millis: 50,
            verification_code: "123456".to_string(),
        }
    }
}

impl ReservationSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            slot_duration_minutes: parse_var("RESERVATION_SLOT_MINUTES", defaults.slot_duration_minutes),
            lock_ttl_minutes: parse_var("RESERVATION_LOCK_TTL_MINUTES", defaults.lock_ttl_minutes),
            cancellation_window_hours: parse_var(
                "RESERVATION_CANCELLATION_WINDOW_HOURS",
                defaults.cancellation_window_hours,
            ),
            horizon_days: parse_var("RESERVATION_HORIZON_DAYS", defaults.horizon_days),
            sweep_interval_seconds: parse_var("RESERVATION_SWEEP_INTERVAL_SECS", defaults.sweep_interval_seconds),
            max_transient_retries: parse_var("RESERVATION_MAX_TRANSIENT_RETRIES", defaults.max_transient_retries),
            retry_backoff_millis: parse_var("RESERVATION_RETRY_BACKOFF_MS", defaults.retry_backoff_millis),
            verification_code: env::var("RESERVATION_VERIFICATION_CODE").unwrap_or_else(|_| {
                warn!("RESERVATION_VERIFICATION_CODE not set, using test code");
                defaults.verification_code
            }),
        }
    }
}

fn parse_var<T>(name: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has invalid value {:?}, using default {}", name, raw, default);
            default
        }),
        Err(_) => default,
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            supabase_jwt_secret: env::var("SUPABASE_JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_JWT_SECRET not set, using empty value");
                    String::new()
                }),
            redis_url: env::var("REDIS_URL").ok().filter(|url| !url.is_empty()),
            store_prefix: env::var("RESERVATION_STORE_PREFIX").unwrap_or_else(|_| "rsvp".to_string()),
            port: parse_var("PORT", 3000),
            reservation: ReservationSettings::from_env(),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_anon_key.is_empty()
            && !self.supabase_jwt_secret.is_empty()
    }

    pub fn is_schedule_api_configured(&self) -> bool {
        !self.supabase_url.is_empty() && !self.supabase_anon_key.is_empty()
    }
}
