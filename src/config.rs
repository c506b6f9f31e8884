use std::env;
use std::str::FromStr;

use chrono::{FixedOffset, Offset, Utc};

use crate::error::{AppError, AppResult};

/// Tunables the dispatch core reads on every call.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Seats on a newly created trip.
    pub trip_capacity: i32,
    /// Drivers within this radius are preferred over everyone else.
    pub near_radius_km: f64,
    /// Outer ring reported by the availability check.
    pub extended_radius_km: f64,
    /// Crude ETA multiplier used in offer notifications.
    pub minutes_per_km: f64,
    /// Campus local time, used by the daily jobs and the overnight window.
    pub utc_offset_hours: i32,
    pub nightly_grouping_hour: u32,
    pub morning_promotion_hour: u32,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            trip_capacity: 7,
            near_radius_km: 5.0,
            extended_radius_km: 20.0,
            minutes_per_km: 2.5,
            utc_offset_hours: 7,
            nightly_grouping_hour: 23,
            morning_promotion_hour: 6,
        }
    }
}

impl DispatchSettings {
    pub fn local_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_hours * 3600).unwrap_or(Utc.fix())
    }

    /// The overnight window runs from the grouping hour through midnight to
    /// the promotion hour, so grouping must come later in the day.
    pub fn validate(&self) -> AppResult<()> {
        if self.trip_capacity <= 0 {
            return Err(AppError::Internal("TRIP_CAPACITY must be positive".to_string()));
        }
        if self.nightly_grouping_hour > 23 || self.morning_promotion_hour > 23 {
            return Err(AppError::Internal("job hours must be between 0 and 23".to_string()));
        }
        if self.nightly_grouping_hour <= self.morning_promotion_hour {
            return Err(AppError::Internal(
                "NIGHTLY_GROUPING_HOUR must be later than MORNING_PROMOTION_HOUR".to_string(),
            ));
        }
        if FixedOffset::east_opt(self.utc_offset_hours * 3600).is_none() {
            return Err(AppError::Internal("UTC_OFFSET_HOURS is out of range".to_string()));
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub server_host: String,
    pub server_port: u16,
    pub geocoder_url: Option<String>,
    pub chat_gateway_url: Option<String>,
    pub push_gateway_url: Option<String>,
    pub dispatch: DispatchSettings,
}

impl Config {
    pub fn from_env() -> AppResult<Self> {
        dotenvy::dotenv().ok();

        let defaults = DispatchSettings::default();
        let dispatch = DispatchSettings {
            trip_capacity: parse_or_default("TRIP_CAPACITY", defaults.trip_capacity)?,
            near_radius_km: parse_or_default("NEAR_RADIUS_KM", defaults.near_radius_km)?,
            extended_radius_km: parse_or_default("EXTENDED_RADIUS_KM", defaults.extended_radius_km)?,
            minutes_per_km: parse_or_default("MINUTES_PER_KM", defaults.minutes_per_km)?,
            utc_offset_hours: parse_or_default("UTC_OFFSET_HOURS", defaults.utc_offset_hours)?,
            nightly_grouping_hour: parse_or_default(
                "NIGHTLY_GROUPING_HOUR",
                defaults.nightly_grouping_hour,
            )?,
            morning_promotion_hour: parse_or_default(
                "MORNING_PROMOTION_HOUR",
                defaults.morning_promotion_hour,
            )?,
        };

        dispatch.validate()?;

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            jwt_secret: required("JWT_SECRET")?,
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            server_port: parse_or_default("SERVER_PORT", 3000)?,
            geocoder_url: optional("GEOCODER_URL"),
            chat_gateway_url: optional("CHAT_GATEWAY_URL"),
            push_gateway_url: optional("PUSH_GATEWAY_URL"),
            dispatch,
        })
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}

fn required(key: &str) -> AppResult<String> {
    env::var(key).map_err(|_| AppError::Internal(format!("{key} must be set")))
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_or_default<T>(key: &str, default: T) -> AppResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
