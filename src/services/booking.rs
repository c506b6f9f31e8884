//! Booking intake: rider upsert, pricing, initial status and, for rides
//! wanted now, the first dispatch.

use chrono::{DateTime, FixedOffset, Timelike, Utc};
use sea_orm::sea_query::OnConflict;
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::DispatchSettings;
use crate::entities::booking::{self, BookingStatus};
use crate::entities::user::{self, UserRole};
use crate::error::{AppError, AppResult};
use crate::services::matching::{self, DispatchOutcome};
use crate::services::pricing::format_rupiah;
use crate::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum BookingMode {
    OnTheSpot,
    PreBook { departure: DateTime<FixedOffset> },
}

/// Booking fields as extracted upstream from the rider's conversation.
#[derive(Debug, Clone, Deserialize)]
pub struct NewBooking {
    pub phone: String,
    pub name: Option<String>,
    pub origin: String,
    pub destination: String,
    pub passengers: i32,
    #[serde(flatten)]
    pub mode: BookingMode,
}

#[derive(Debug, Clone, Serialize)]
pub struct BookingReceipt {
    pub booking: booking::Model,
    pub fare: String,
    /// `None` for pre-bookings, or when matching could not run.
    pub dispatch: Option<DispatchOutcome>,
}

/// Whether a booking made at `local_hour` lands in the overnight queue,
/// i.e. after tonight's grouping already ran and before the morning promotion.
pub fn is_overnight(local_hour: u32, settings: &DispatchSettings) -> bool {
    local_hour >= settings.nightly_grouping_hour || local_hour < settings.morning_promotion_hour
}

pub fn initial_status(mode: &BookingMode, now: DateTime<Utc>, settings: &DispatchSettings) -> BookingStatus {
    match mode {
        BookingMode::OnTheSpot => BookingStatus::Pending,
        BookingMode::PreBook { .. } => {
            let local_hour = now.with_timezone(&settings.local_offset()).hour();
            if is_overnight(local_hour, settings) {
                BookingStatus::QueuedOvernight
            } else {
                BookingStatus::Scheduled
            }
        }
    }
}

fn default_name(phone: &str) -> String {
    let digits: Vec<char> = phone.chars().filter(char::is_ascii_digit).collect();
    let tail: String = digits[digits.len().saturating_sub(4)..].iter().collect();
    format!("User {tail}")
}

/// Find the rider by phone handle, creating them on first contact. A supplied
/// name replaces the stored one.
///
/// Two first messages from the same phone may race here; the insert yields to
/// whichever row landed first and both callers read that row back.
pub async fn upsert_rider<C: ConnectionTrait>(
    conn: &C,
    phone: &str,
    name: Option<&str>,
) -> AppResult<user::Model> {
    let name = name.map(str::trim).filter(|n| !n.is_empty());

    let inserted = user::Entity::insert(user::ActiveModel {
        id: Set(Uuid::new_v4()),
        phone: Set(phone.to_string()),
        name: Set(name.map(str::to_string).unwrap_or_else(|| default_name(phone))),
        role: Set(UserRole::Rider),
        created_at: Set(Utc::now().fixed_offset()),
    })
    .on_conflict(OnConflict::column(user::Column::Phone).do_nothing().to_owned())
    .exec_without_returning(conn)
    .await?;

    let rider = user::Entity::find()
        .filter(user::Column::Phone.eq(phone))
        .one(conn)
        .await?
        .ok_or_else(|| AppError::Internal(format!("Rider {phone} vanished after upsert")))?;

    if inserted > 0 {
        tracing::info!(user_id = %rider.id, "new rider registered");
        return Ok(rider);
    }

    match name {
        Some(name) if name != rider.name => {
            let mut active: user::ActiveModel = rider.into();
            active.name = Set(name.to_string());
            Ok(active.update(conn).await?)
        }
        _ => Ok(rider),
    }
}

fn validate(new: &NewBooking, capacity: i32, now: DateTime<Utc>) -> AppResult<()> {
    if new.phone.trim().is_empty() {
        return Err(AppError::BadRequest("Phone is required".to_string()));
    }
    if new.origin.trim().is_empty() || new.destination.trim().is_empty() {
        return Err(AppError::BadRequest(
            "Origin and destination are required".to_string(),
        ));
    }
    if new.passengers < 1 || new.passengers > capacity {
        return Err(AppError::BadRequest(format!(
            "Passengers must be between 1 and {capacity}"
        )));
    }
    if let BookingMode::PreBook { departure } = new.mode {
        if departure <= now {
            return Err(AppError::BadRequest(
                "Departure time must be in the future".to_string(),
            ));
        }
    }
    Ok(())
}

pub async fn create_booking(
    state: &AppState,
    new: NewBooking,
    now: DateTime<Utc>,
) -> AppResult<BookingReceipt> {
    let settings = state.settings();
    validate(&new, settings.trip_capacity, now)?;

    let rider = upsert_rider(&state.db, new.phone.trim(), new.name.as_deref()).await?;
    let origin = new.origin.trim().to_string();
    let destination = new.destination.trim().to_string();
    let price = state.pricing.price(&origin, &destination, new.passengers);
    let status = initial_status(&new.mode, now, settings);
    let scheduled_departure = match new.mode {
        BookingMode::OnTheSpot => None,
        BookingMode::PreBook { departure } => Some(departure.with_timezone(&Utc).fixed_offset()),
    };

    let booking = booking::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(rider.id),
        origin: Set(origin),
        destination: Set(destination),
        passengers: Set(new.passengers),
        price: Set(price),
        scheduled_departure: Set(scheduled_departure),
        is_picked_up: Set(false),
        status: Set(status),
        trip_id: Set(None),
        schedule_id: Set(None),
        created_at: Set(now.fixed_offset()),
    }
    .insert(&state.db)
    .await?;

    tracing::info!(booking_id = %booking.id, status = ?booking.status, price, "booking created");

    let dispatch = if booking.status == BookingStatus::Pending {
        match matching::dispatch(state, &booking).await {
            Ok(outcome) => Some(outcome),
            Err(err) => {
                tracing::warn!(error = %err, booking_id = %booking.id, "dispatch failed, booking left pending");
                None
            }
        }
    } else {
        None
    };

    Ok(BookingReceipt {
        fare: format_rupiah(booking.price),
        booking,
        dispatch,
    })
}
