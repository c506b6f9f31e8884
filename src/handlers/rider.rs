use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::booking;
use crate::error::{AppError, AppResult};
use crate::services::booking::{self as intake, BookingReceipt, NewBooking};
use crate::services::lifecycle;
use crate::services::matching::{self, Availability};
use crate::utils::jwt::Claims;
use crate::AppState;

/// Intake from the conversation layer once it has all booking fields
pub async fn create_booking(
    State(state): State<AppState>,
    Json(payload): Json<NewBooking>,
) -> AppResult<(StatusCode, Json<BookingReceipt>)> {
    let receipt = intake::create_booking(&state, payload, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    pub location: String,
}

#[derive(Debug, Serialize)]
pub struct AvailabilityResponse {
    pub location: String,
    #[serde(flatten)]
    pub availability: Availability,
}

/// How many drivers are around a pickup point, without booking anything
pub async fn check_availability(
    State(state): State<AppState>,
    Query(query): Query<AvailabilityQuery>,
) -> AppResult<Json<AvailabilityResponse>> {
    let availability = matching::check_availability(&state, &query.location)
        .await?
        .ok_or_else(|| AppError::BadRequest(format!("Unknown location: {}", query.location)))?;

    Ok(Json(AvailabilityResponse {
        location: query.location,
        availability,
    }))
}

pub async fn cancel_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<booking::Model>> {
    Ok(Json(lifecycle::cancel_booking(&state, claims.sub, id).await?))
}
