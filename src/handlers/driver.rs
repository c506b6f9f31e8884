use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::driver_profile::{self, DriverStatus};
use crate::entities::{booking, schedule, trip};
use crate::error::AppResult;
use crate::services::directory;
use crate::services::lifecycle::{self, ActiveTrip, ClaimOutcome};
use crate::services::matching::DispatchOutcome;
use crate::services::pricing::format_rupiah;
use crate::utils::geo::Coordinate;
use crate::utils::jwt::Claims;
use crate::AppState;

async fn current_driver(state: &AppState, claims: &Claims) -> AppResult<driver_profile::Model> {
    directory::find_by_user(&state.db, claims.sub).await
}

#[derive(Debug, Deserialize)]
pub struct RegisterDriverRequest {
    pub user_id: Uuid,
    pub plate_number: String,
    pub vehicle_type: String,
}

/// Onboard an existing user as a driver
pub async fn register_driver(
    State(state): State<AppState>,
    Json(payload): Json<RegisterDriverRequest>,
) -> AppResult<(StatusCode, Json<driver_profile::Model>)> {
    let profile = directory::register_driver(
        &state.db,
        payload.user_id,
        &payload.plate_number,
        &payload.vehicle_type,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(profile)))
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: DriverStatus,
}

/// Go on or off duty
pub async fn update_status(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<StatusRequest>,
) -> AppResult<Json<driver_profile::Model>> {
    let driver = current_driver(&state, &claims).await?;
    directory::update_status(&state.db, driver.id, payload.status).await?;
    Ok(Json(directory::find_driver(&state.db, driver.id).await?))
}

#[derive(Debug, Deserialize)]
pub struct LocationRequest {
    pub lat: f64,
    pub lng: f64,
}

pub async fn update_location(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<LocationRequest>,
) -> AppResult<StatusCode> {
    let driver = current_driver(&state, &claims).await?;
    directory::update_location(&state.db, driver.id, Coordinate::new(payload.lat, payload.lng)).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct PushTokenRequest {
    pub token: String,
}

pub async fn register_push_token(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<PushTokenRequest>,
) -> AppResult<StatusCode> {
    let driver = current_driver(&state, &claims).await?;
    directory::register_push_token(&state.db, driver.id, &payload.token).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct PendingBookingResponse {
    pub id: Uuid,
    pub origin: String,
    pub destination: String,
    pub passengers: i32,
    pub fare: String,
    pub created_at: DateTime<FixedOffset>,
}

impl From<booking::Model> for PendingBookingResponse {
    fn from(b: booking::Model) -> Self {
        Self {
            fare: format_rupiah(b.price),
            id: b.id,
            origin: b.origin,
            destination: b.destination,
            passengers: b.passengers,
            created_at: b.created_at,
        }
    }
}

/// Open ride requests, oldest first
pub async fn pending_bookings(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> AppResult<Json<Vec<PendingBookingResponse>>> {
    current_driver(&state, &claims).await?;
    let bookings = lifecycle::pending_bookings(&state.db).await?;
    Ok(Json(bookings.into_iter().map(Into::into).collect()))
}

pub async fn accept_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<trip::Model>> {
    let driver = current_driver(&state, &claims).await?;
    Ok(Json(lifecycle::accept_booking(&state, driver.id, id).await?))
}

pub async fn reject_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<DispatchOutcome>> {
    let driver = current_driver(&state, &claims).await?;
    Ok(Json(lifecycle::reject_offer(&state, driver.id, id).await?))
}

pub async fn mark_picked_up(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<booking::Model>> {
    let driver = current_driver(&state, &claims).await?;
    Ok(Json(lifecycle::mark_picked_up(&state, driver.id, id).await?))
}

pub async fn available_schedules(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> AppResult<Json<Vec<schedule::Model>>> {
    current_driver(&state, &claims).await?;
    Ok(Json(lifecycle::available_schedules(&state, Utc::now()).await?))
}

pub async fn claim_schedule(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ClaimOutcome>> {
    let driver = current_driver(&state, &claims).await?;
    Ok(Json(lifecycle::claim_schedule(&state, driver.id, id).await?))
}

/// The driver's current trip with pickups, or null when idle
pub async fn active_trip(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> AppResult<Json<Option<ActiveTrip>>> {
    let driver = current_driver(&state, &claims).await?;
    Ok(Json(lifecycle::active_trip(&state, driver.id).await?))
}

pub async fn complete_trip(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<trip::Model>> {
    let driver = current_driver(&state, &claims).await?;
    Ok(Json(lifecycle::complete_trip(&state, driver.id, id).await?))
}
