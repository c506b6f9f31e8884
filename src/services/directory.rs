//! Driver directory: who is on duty, where they are, how to reach them.

use chrono::Utc;
use sea_orm::sea_query::{Expr, Query};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter, Set,
    TransactionTrait,
};
use uuid::Uuid;

use crate::entities::driver_profile::{self, DriverStatus};
use crate::entities::trip::{self, TripStatus};
use crate::entities::user::{self, UserRole};
use crate::error::{AppError, AppResult};
use crate::notify::Recipient;
use crate::utils::geo::Coordinate;

/// Turn an existing user into a driver: role switch and profile insert commit
/// together. The profile starts INACTIVE with no position, so the driver is
/// invisible to matching until they go on duty and report a location.
pub async fn register_driver<C: TransactionTrait>(
    db: &C,
    user_id: Uuid,
    plate_number: &str,
    vehicle_type: &str,
) -> AppResult<driver_profile::Model> {
    let plate_number = plate_number.trim();
    let vehicle_type = vehicle_type.trim();
    if plate_number.is_empty() || vehicle_type.is_empty() {
        return Err(AppError::BadRequest(
            "Plate number and vehicle type are required".to_string(),
        ));
    }

    let txn = db.begin().await?;

    let promoted = user::Entity::update_many()
        .col_expr(user::Column::Role, Expr::value(UserRole::Driver))
        .filter(user::Column::Id.eq(user_id))
        .exec(&txn)
        .await?;
    if promoted.rows_affected == 0 {
        return Err(AppError::NotFound("User not found".to_string()));
    }

    let existing = driver_profile::Entity::find()
        .filter(driver_profile::Column::UserId.eq(user_id))
        .count(&txn)
        .await?;
    if existing > 0 {
        return Err(AppError::Conflict("User is already a driver".to_string()));
    }

    let now = Utc::now().fixed_offset();
    let profile = driver_profile::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        plate_number: Set(plate_number.to_string()),
        vehicle_type: Set(vehicle_type.to_string()),
        status: Set(DriverStatus::Inactive),
        latitude: Set(None),
        longitude: Set(None),
        push_token: Set(None),
        updated_at: Set(now),
        created_at: Set(now),
    }
    .insert(&txn)
    .await?;

    txn.commit().await?;

    tracing::info!(driver_id = %profile.id, %user_id, plate = %profile.plate_number, "driver registered");
    Ok(profile)
}

/// ACTIVE drivers that have reported a position at least once.
pub async fn active_drivers<C: ConnectionTrait>(conn: &C) -> AppResult<Vec<driver_profile::Model>> {
    Ok(driver_profile::Entity::find()
        .filter(driver_profile::Column::Status.eq(DriverStatus::Active))
        .filter(driver_profile::Column::Latitude.is_not_null())
        .filter(driver_profile::Column::Longitude.is_not_null())
        .all(conn)
        .await?)
}

/// ACTIVE, located drivers with no ONGOING_PICKUP/CONFIRMED trip, minus `excluded`.
pub async fn idle_drivers<C: ConnectionTrait>(
    conn: &C,
    excluded: &[Uuid],
) -> AppResult<Vec<driver_profile::Model>> {
    let busy = Query::select()
        .column(trip::Column::DriverId)
        .from(trip::Entity)
        .and_where(trip::Column::Status.is_in(TripStatus::IN_PROGRESS))
        .to_owned();

    let mut query = driver_profile::Entity::find()
        .filter(driver_profile::Column::Status.eq(DriverStatus::Active))
        .filter(driver_profile::Column::Latitude.is_not_null())
        .filter(driver_profile::Column::Longitude.is_not_null())
        .filter(driver_profile::Column::Id.not_in_subquery(busy));

    if !excluded.is_empty() {
        query = query.filter(driver_profile::Column::Id.is_not_in(excluded.iter().copied()));
    }

    Ok(query.all(conn).await?)
}

pub async fn has_trip_in_progress<C: ConnectionTrait>(conn: &C, driver_id: Uuid) -> AppResult<bool> {
    let count = trip::Entity::find()
        .filter(trip::Column::DriverId.eq(driver_id))
        .filter(trip::Column::Status.is_in(TripStatus::IN_PROGRESS))
        .count(conn)
        .await?;
    Ok(count > 0)
}

pub async fn find_driver<C: ConnectionTrait>(conn: &C, driver_id: Uuid) -> AppResult<driver_profile::Model> {
    driver_profile::Entity::find_by_id(driver_id)
        .one(conn)
        .await?
        .ok_or_else(|| AppError::NotFound("Driver not found".to_string()))
}

pub async fn find_by_user<C: ConnectionTrait>(conn: &C, user_id: Uuid) -> AppResult<driver_profile::Model> {
    driver_profile::Entity::find()
        .filter(driver_profile::Column::UserId.eq(user_id))
        .one(conn)
        .await?
        .ok_or_else(|| AppError::NotFound("Driver profile not found".to_string()))
}

pub async fn update_status<C: ConnectionTrait>(
    conn: &C,
    driver_id: Uuid,
    status: DriverStatus,
) -> AppResult<()> {
    let result = driver_profile::Entity::update_many()
        .col_expr(driver_profile::Column::Status, Expr::value(status))
        .col_expr(driver_profile::Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
        .filter(driver_profile::Column::Id.eq(driver_id))
        .exec(conn)
        .await?;
    ensure_found(result.rows_affected)?;

    tracing::info!(driver_id = %driver_id, status = ?status, "driver status updated");
    Ok(())
}

pub async fn update_location<C: ConnectionTrait>(
    conn: &C,
    driver_id: Uuid,
    position: Coordinate,
) -> AppResult<()> {
    if !(-90.0..=90.0).contains(&position.lat) || !(-180.0..=180.0).contains(&position.lng) {
        return Err(AppError::BadRequest("Coordinate out of range".to_string()));
    }

    let result = driver_profile::Entity::update_many()
        .col_expr(driver_profile::Column::Latitude, Expr::value(position.lat))
        .col_expr(driver_profile::Column::Longitude, Expr::value(position.lng))
        .col_expr(driver_profile::Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
        .filter(driver_profile::Column::Id.eq(driver_id))
        .exec(conn)
        .await?;
    ensure_found(result.rows_affected)?;

    tracing::debug!(driver_id = %driver_id, lat = position.lat, lng = position.lng, "driver location updated");
    Ok(())
}

pub async fn register_push_token<C: ConnectionTrait>(
    conn: &C,
    driver_id: Uuid,
    token: &str,
) -> AppResult<()> {
    if token.trim().is_empty() {
        return Err(AppError::BadRequest("Push token must not be empty".to_string()));
    }

    let result = driver_profile::Entity::update_many()
        .col_expr(driver_profile::Column::PushToken, Expr::value(token.to_string()))
        .col_expr(driver_profile::Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
        .filter(driver_profile::Column::Id.eq(driver_id))
        .exec(conn)
        .await?;
    ensure_found(result.rows_affected)
}

/// Push when the app registered a token, otherwise the driver's chat handle.
pub async fn driver_recipient<C: ConnectionTrait>(
    conn: &C,
    driver: &driver_profile::Model,
) -> AppResult<Option<Recipient>> {
    if let Some(token) = driver.push_token.as_ref().filter(|t| !t.is_empty()) {
        return Ok(Some(Recipient::Push(token.clone())));
    }

    Ok(user::Entity::find_by_id(driver.user_id)
        .one(conn)
        .await?
        .map(|u| Recipient::Chat(u.phone)))
}

fn ensure_found(rows_affected: u64) -> AppResult<()> {
    if rows_affected == 0 {
        return Err(AppError::NotFound("Driver not found".to_string()));
    }
    Ok(())
}
