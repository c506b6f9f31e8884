//! Booking, trip and schedule transitions driven by drivers and riders.
//!
//! Every transition is a conditional update on the current status, so two
//! callers racing for the same row can never both win. When a conditional
//! update touches nothing, the row is re-read inside the same transaction to
//! tell "gone" from "taken" from "not yours".

use chrono::{DateTime, FixedOffset, Utc};
use sea_orm::sea_query::{Expr, Query};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseTransaction, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::Serialize;
use uuid::Uuid;

use crate::entities::booking::{self, BookingStatus};
use crate::entities::driver_profile::{self, DriverStatus};
use crate::entities::schedule::{self, ScheduleStatus};
use crate::entities::trip::{self, TripStatus};
use crate::entities::user;
use crate::error::{AppError, AppResult};
use crate::notify::{self, Notification, Recipient};
use crate::services::consolidator::operating_day_window;
use crate::services::directory;
use crate::services::matching::{self, DispatchOutcome};
use crate::AppState;

#[derive(Debug, Clone, Serialize)]
pub struct ClaimOutcome {
    pub schedule: schedule::Model,
    pub trip: trip::Model,
    pub confirmed_bookings: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PickupTask {
    pub booking_id: Uuid,
    pub rider_name: String,
    pub rider_phone: String,
    pub origin: String,
    pub passengers: i32,
    pub is_picked_up: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActiveTrip {
    pub trip_id: Uuid,
    pub status: TripStatus,
    pub destination: String,
    pub departure_time: DateTime<FixedOffset>,
    pub capacity: i32,
    pub remaining_seats: i32,
    pub pickups: Vec<PickupTask>,
}

/// Serializes assignment work for one driver.
///
/// The touch takes the driver row's write lock for the rest of the
/// transaction, so a concurrent accept or claim by the same driver waits here
/// and then sees the trip this one created.
async fn lock_driver(txn: &DatabaseTransaction, driver_id: Uuid) -> AppResult<()> {
    let touched = driver_profile::Entity::update_many()
        .col_expr(
            driver_profile::Column::UpdatedAt,
            Expr::value(Utc::now().fixed_offset()),
        )
        .filter(driver_profile::Column::Id.eq(driver_id))
        .exec(txn)
        .await?;

    if touched.rows_affected == 0 {
        return Err(AppError::NotFound("Driver not found".to_string()));
    }

    if directory::has_trip_in_progress(txn, driver_id).await? {
        return Err(AppError::Conflict(
            "Driver already has a trip in progress".to_string(),
        ));
    }

    Ok(())
}

/// Driver takes a PENDING booking directly: a new ONGOING_PICKUP trip is
/// created for it and the booking confirmed, all or nothing.
pub async fn accept_booking(
    state: &AppState,
    driver_id: Uuid,
    booking_id: Uuid,
) -> AppResult<trip::Model> {
    let capacity = state.settings().trip_capacity;
    let txn = state.db.begin().await?;

    lock_driver(&txn, driver_id).await?;

    let booking = booking::Entity::find_by_id(booking_id)
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::NotFound("Booking not found".to_string()))?;

    if booking.status != BookingStatus::Pending {
        return Err(AppError::Conflict("Booking was already taken".to_string()));
    }
    if booking.passengers > capacity {
        return Err(AppError::Conflict(format!(
            "Booking needs {} seats, vehicle holds {}",
            booking.passengers, capacity
        )));
    }

    let now = Utc::now().fixed_offset();
    let trip = trip::ActiveModel {
        id: Set(Uuid::new_v4()),
        driver_id: Set(driver_id),
        status: Set(TripStatus::OngoingPickup),
        destination: Set(booking.destination.clone()),
        departure_time: Set(now),
        capacity: Set(capacity),
        seats_taken: Set(booking.passengers),
        created_at: Set(now),
    }
    .insert(&txn)
    .await?;

    let confirmed = booking::Entity::update_many()
        .col_expr(booking::Column::Status, Expr::value(BookingStatus::Confirmed))
        .col_expr(booking::Column::TripId, Expr::value(trip.id))
        .filter(booking::Column::Id.eq(booking_id))
        .filter(booking::Column::Status.eq(BookingStatus::Pending))
        .exec(&txn)
        .await?;

    if confirmed.rows_affected == 0 {
        return Err(AppError::Conflict("Booking was already taken".to_string()));
    }

    txn.commit().await?;

    tracing::info!(%booking_id, %driver_id, trip_id = %trip.id, "booking accepted");
    notify_trip_riders(state, &trip, "Driver found!").await;

    Ok(trip)
}

/// Driver turns down an offer; the booking goes back through matching
/// without that driver.
pub async fn reject_offer(
    state: &AppState,
    driver_id: Uuid,
    booking_id: Uuid,
) -> AppResult<DispatchOutcome> {
    let booking = booking::Entity::find_by_id(booking_id)
        .one(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Booking not found".to_string()))?;

    tracing::info!(%booking_id, %driver_id, "offer rejected, re-dispatching");
    matching::dispatch_excluding(state, &booking, &[driver_id]).await
}

/// Claim an AVAILABLE schedule for `driver_id`.
///
/// Exactly one concurrent caller wins the AVAILABLE -> CLAIMED flip; the rest
/// get `Conflict`. The trip, the schedule link and every member booking's
/// confirmation commit together.
pub async fn claim_schedule(
    state: &AppState,
    driver_id: Uuid,
    schedule_id: Uuid,
) -> AppResult<ClaimOutcome> {
    let capacity = state.settings().trip_capacity;
    let now = Utc::now().fixed_offset();
    let txn = state.db.begin().await?;

    lock_driver(&txn, driver_id).await?;

    let claimed = schedule::Entity::update_many()
        .col_expr(schedule::Column::Status, Expr::value(ScheduleStatus::Claimed))
        .filter(schedule::Column::Id.eq(schedule_id))
        .filter(schedule::Column::Status.eq(ScheduleStatus::Available))
        .filter(schedule::Column::DepartureTime.gt(now))
        .exec(&txn)
        .await?;

    if claimed.rows_affected == 0 {
        return match schedule::Entity::find_by_id(schedule_id).one(&txn).await? {
            None => Err(AppError::NotFound("Schedule not found".to_string())),
            Some(s) if !s.status.can_transition_to(ScheduleStatus::Claimed) => Err(AppError::Conflict(
                "Schedule is no longer available".to_string(),
            )),
            Some(_) => Err(AppError::Conflict("Schedule has already departed".to_string())),
        };
    }

    let schedule = schedule::Entity::find_by_id(schedule_id)
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::NotFound("Schedule not found".to_string()))?;

    if schedule.total_passengers > capacity {
        return Err(AppError::Conflict(format!(
            "Schedule carries {} passengers, vehicle holds {}",
            schedule.total_passengers, capacity
        )));
    }

    let trip = trip::ActiveModel {
        id: Set(Uuid::new_v4()),
        driver_id: Set(driver_id),
        status: Set(TripStatus::Confirmed),
        destination: Set(schedule.destination.clone()),
        departure_time: Set(schedule.departure_time),
        capacity: Set(capacity),
        seats_taken: Set(schedule.total_passengers),
        created_at: Set(now),
    }
    .insert(&txn)
    .await?;

    schedule::Entity::update_many()
        .col_expr(schedule::Column::TripId, Expr::value(trip.id))
        .filter(schedule::Column::Id.eq(schedule_id))
        .exec(&txn)
        .await?;

    let confirmed = booking::Entity::update_many()
        .col_expr(booking::Column::Status, Expr::value(BookingStatus::Confirmed))
        .col_expr(booking::Column::TripId, Expr::value(trip.id))
        .filter(booking::Column::ScheduleId.eq(schedule_id))
        .filter(booking::Column::Status.is_in(BookingStatus::sources_of(BookingStatus::Confirmed)))
        .exec(&txn)
        .await?;

    txn.commit().await?;

    tracing::info!(
        %schedule_id,
        %driver_id,
        trip_id = %trip.id,
        bookings = confirmed.rows_affected,
        "schedule claimed"
    );
    notify_trip_riders(state, &trip, "Your scheduled ride has a driver!").await;

    let schedule = schedule::Model {
        status: ScheduleStatus::Claimed,
        trip_id: Some(trip.id),
        ..schedule
    };

    Ok(ClaimOutcome {
        schedule,
        trip,
        confirmed_bookings: confirmed.rows_affected,
    })
}

/// Flag a rider as picked up. Only the driver of the booking's trip may.
pub async fn mark_picked_up(
    state: &AppState,
    driver_id: Uuid,
    booking_id: Uuid,
) -> AppResult<booking::Model> {
    let booking = booking::Entity::find_by_id(booking_id)
        .one(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Booking not found".to_string()))?;

    let Some(trip_id) = booking.trip_id else {
        return Err(AppError::Forbidden(
            "Booking is not assigned to your trip".to_string(),
        ));
    };

    // Assignment may have changed since the driver loaded their trip view
    let trip = trip::Entity::find_by_id(trip_id)
        .one(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Trip not found".to_string()))?;

    if trip.driver_id != driver_id {
        return Err(AppError::Forbidden(
            "Booking is not assigned to your trip".to_string(),
        ));
    }
    if !trip.status.is_in_progress() {
        return Err(AppError::Conflict("Trip is no longer in progress".to_string()));
    }
    if booking.status != BookingStatus::Confirmed {
        return Err(AppError::Conflict("Booking is not confirmed".to_string()));
    }

    let running_trip = Query::select()
        .column(trip::Column::Id)
        .from(trip::Entity)
        .and_where(trip::Column::Id.eq(trip_id))
        .and_where(trip::Column::Status.is_in(TripStatus::IN_PROGRESS))
        .to_owned();

    let updated = booking::Entity::update_many()
        .col_expr(booking::Column::IsPickedUp, Expr::value(true))
        .filter(booking::Column::Id.eq(booking_id))
        .filter(booking::Column::TripId.in_subquery(running_trip))
        .filter(booking::Column::Status.eq(BookingStatus::Confirmed))
        .exec(&state.db)
        .await?;

    if updated.rows_affected == 0 {
        return Err(AppError::Conflict("Booking changed, reload the trip".to_string()));
    }

    tracing::info!(%booking_id, %trip_id, "rider picked up");
    Ok(booking::Model {
        is_picked_up: true,
        ..booking
    })
}

/// Finish a trip and put its driver back on duty.
pub async fn complete_trip(
    state: &AppState,
    driver_id: Uuid,
    trip_id: Uuid,
) -> AppResult<trip::Model> {
    let txn = state.db.begin().await?;

    let completed = trip::Entity::update_many()
        .col_expr(trip::Column::Status, Expr::value(TripStatus::Completed))
        .filter(trip::Column::Id.eq(trip_id))
        .filter(trip::Column::DriverId.eq(driver_id))
        .filter(trip::Column::Status.is_in(TripStatus::IN_PROGRESS))
        .exec(&txn)
        .await?;

    if completed.rows_affected == 0 {
        return match trip::Entity::find_by_id(trip_id).one(&txn).await? {
            None => Err(AppError::NotFound("Trip not found".to_string())),
            Some(t) if t.driver_id != driver_id => {
                Err(AppError::Forbidden("Trip belongs to another driver".to_string()))
            }
            Some(t) if !t.status.can_transition_to(TripStatus::Completed) => {
                Err(AppError::Conflict("Trip is already completed".to_string()))
            }
            Some(_) => Err(AppError::Conflict("Trip changed, try again".to_string())),
        };
    }

    directory::update_status(&txn, driver_id, DriverStatus::Active).await?;

    let trip = trip::Entity::find_by_id(trip_id)
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::NotFound("Trip not found".to_string()))?;

    txn.commit().await?;

    tracing::info!(%trip_id, %driver_id, "trip completed");
    Ok(trip)
}

/// Rider withdraws a request that no driver has taken yet.
pub async fn cancel_booking(
    state: &AppState,
    user_id: Uuid,
    booking_id: Uuid,
) -> AppResult<booking::Model> {
    let cancelled = booking::Entity::update_many()
        .col_expr(booking::Column::Status, Expr::value(BookingStatus::Cancelled))
        .filter(booking::Column::Id.eq(booking_id))
        .filter(booking::Column::UserId.eq(user_id))
        .filter(booking::Column::Status.eq(BookingStatus::Pending))
        .exec(&state.db)
        .await?;

    let booking = booking::Entity::find_by_id(booking_id)
        .one(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Booking not found".to_string()))?;

    if cancelled.rows_affected == 0 {
        if booking.user_id != user_id {
            return Err(AppError::Forbidden("Booking belongs to another rider".to_string()));
        }
        if booking.status.is_terminal() {
            return Err(AppError::Conflict("Booking is already closed".to_string()));
        }
        return Err(AppError::Conflict(
            "Only pending bookings can be cancelled".to_string(),
        ));
    }

    tracing::info!(%booking_id, "booking cancelled by rider");
    Ok(booking)
}

/// Open requests for the driver app, oldest first.
pub async fn pending_bookings<C: ConnectionTrait>(conn: &C) -> AppResult<Vec<booking::Model>> {
    Ok(booking::Entity::find()
        .filter(booking::Column::Status.eq(BookingStatus::Pending))
        .order_by_asc(booking::Column::CreatedAt)
        .all(conn)
        .await?)
}

/// Claimable schedules: AVAILABLE, not yet departed, and leaving no later
/// than the end of the next operating day. Earliest first.
pub async fn available_schedules(
    state: &AppState,
    now: DateTime<Utc>,
) -> AppResult<Vec<schedule::Model>> {
    let (_, end) = operating_day_window(now, state.settings().local_offset());
    Ok(schedule::Entity::find()
        .filter(schedule::Column::Status.eq(ScheduleStatus::Available))
        .filter(schedule::Column::DepartureTime.gt(now.fixed_offset()))
        .filter(schedule::Column::DepartureTime.lt(end))
        .order_by_asc(schedule::Column::DepartureTime)
        .all(&state.db)
        .await?)
}

/// The driver's in-progress trip with its pickup list, if any.
pub async fn active_trip(state: &AppState, driver_id: Uuid) -> AppResult<Option<ActiveTrip>> {
    let Some(trip) = trip::Entity::find()
        .filter(trip::Column::DriverId.eq(driver_id))
        .filter(trip::Column::Status.is_in(TripStatus::IN_PROGRESS))
        .order_by_desc(trip::Column::CreatedAt)
        .one(&state.db)
        .await?
    else {
        return Ok(None);
    };

    let pickups = booking::Entity::find()
        .filter(booking::Column::TripId.eq(trip.id))
        .order_by_asc(booking::Column::CreatedAt)
        .find_also_related(user::Entity)
        .all(&state.db)
        .await?
        .into_iter()
        .map(|(booking, rider)| {
            let (rider_name, rider_phone) = rider
                .map(|r| (r.name, r.phone))
                .unwrap_or_default();
            PickupTask {
                booking_id: booking.id,
                rider_name,
                rider_phone,
                origin: booking.origin,
                passengers: booking.passengers,
                is_picked_up: booking.is_picked_up,
            }
        })
        .collect();

    Ok(Some(ActiveTrip {
        trip_id: trip.id,
        status: trip.status,
        remaining_seats: trip.remaining_seats(),
        destination: trip.destination,
        departure_time: trip.departure_time,
        capacity: trip.capacity,
        pickups,
    }))
}

/// Chat every rider on `trip`. Runs after commit; failures are logged only.
async fn notify_trip_riders(state: &AppState, trip: &trip::Model, headline: &str) {
    let plate = match directory::find_driver(&state.db, trip.driver_id).await {
        Ok(driver) => driver.plate_number,
        Err(err) => {
            tracing::warn!(error = %err, trip_id = %trip.id, "could not load trip driver");
            return;
        }
    };

    let riders = match booking::Entity::find()
        .filter(booking::Column::TripId.eq(trip.id))
        .find_also_related(user::Entity)
        .all(&state.db)
        .await
    {
        Ok(rows) => rows,
        Err(err) => {
            tracing::warn!(error = %err, trip_id = %trip.id, "could not load trip riders");
            return;
        }
    };

    let message = Notification::text(format!(
        "{headline} Vehicle {plate} will take you to {} at {}.",
        trip.destination,
        trip.departure_time
            .with_timezone(&state.settings().local_offset())
            .format("%H:%M")
    ));

    for rider in riders.into_iter().filter_map(|(_, rider)| rider) {
        notify::deliver(state.notifier.as_ref(), &Recipient::Chat(rider.phone), &message).await;
    }
}
