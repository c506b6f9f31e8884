//! Matching engine: pool a request into a running trip, or offer it to the
//! nearest idle driver.

use std::collections::HashMap;

use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder, TransactionTrait};
use serde::Serialize;
use uuid::Uuid;

use crate::entities::booking::{self, BookingStatus};
use crate::entities::driver_profile;
use crate::entities::trip::{self, TripStatus};
use crate::entities::user;
use crate::error::{AppError, AppResult};
use crate::notify::{self, Notification, Recipient};
use crate::services::directory;
use crate::services::pricing::format_rupiah;
use crate::utils::geo::{distance_km, is_within_radius, Coordinate};
use crate::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoDriverReason {
    /// The origin text could not be turned into a coordinate.
    UnresolvedLocation,
    NoActiveDriver,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum DispatchOutcome {
    PooledInto(Uuid),
    OfferedTo(Uuid),
    NoDriverAvailable(NoDriverReason),
}

#[derive(Debug, Clone)]
pub struct DriverMatch {
    pub driver: driver_profile::Model,
    pub distance_km: f64,
    pub within_near_radius: bool,
}

/// A running trip that could absorb the booking, with its driver's last
/// known position for distance-based tie-breaks.
#[derive(Debug, Clone)]
pub struct PoolCandidate {
    pub trip: trip::Model,
    pub driver_position: Option<Coordinate>,
}

/// Decides which running trips a booking may join and in what order they
/// are tried.
pub trait PoolingPolicy: Send + Sync {
    fn order(&self, pickup: Coordinate, candidates: &mut [PoolCandidate]);

    /// Route-efficiency gate, applied after zone and capacity filtering.
    fn accepts(&self, pickup: Coordinate, candidate: &PoolCandidate, booking: &booking::Model) -> bool;
}

/// Oldest trip first; every zone- and capacity-compatible trip is accepted.
#[derive(Debug, Default)]
pub struct OldestTripFirst;

impl PoolingPolicy for OldestTripFirst {
    fn order(&self, _pickup: Coordinate, candidates: &mut [PoolCandidate]) {
        candidates.sort_by(|a, b| {
            a.trip
                .created_at
                .cmp(&b.trip.created_at)
                .then_with(|| a.trip.id.cmp(&b.trip.id))
        });
    }

    fn accepts(&self, _pickup: Coordinate, _candidate: &PoolCandidate, _booking: &booking::Model) -> bool {
        true
    }
}

/// Trip whose driver is currently closest to the pickup first. Drivers
/// without a position sort last and never pass a detour limit.
#[derive(Debug, Default)]
pub struct NearestDriverFirst {
    pub max_detour_km: Option<f64>,
}

impl NearestDriverFirst {
    pub fn within(max_detour_km: f64) -> Self {
        Self {
            max_detour_km: Some(max_detour_km),
        }
    }

    fn detour(candidate: &PoolCandidate, pickup: Coordinate) -> f64 {
        candidate
            .driver_position
            .map(|p| distance_km(p, pickup))
            .unwrap_or(f64::INFINITY)
    }
}

impl PoolingPolicy for NearestDriverFirst {
    fn order(&self, pickup: Coordinate, candidates: &mut [PoolCandidate]) {
        candidates.sort_by(|a, b| {
            Self::detour(a, pickup)
                .total_cmp(&Self::detour(b, pickup))
                .then_with(|| a.trip.created_at.cmp(&b.trip.created_at))
        });
    }

    fn accepts(&self, pickup: Coordinate, candidate: &PoolCandidate, _booking: &booking::Model) -> bool {
        self.max_detour_km.is_none_or(|limit| {
            candidate
                .driver_position
                .is_some_and(|position| is_within_radius(position, pickup, limit))
        })
    }
}

/// Nearest located driver to `origin`.
///
/// The nearest driver overall is also the nearest inside the near radius
/// whenever anyone is inside it, so one pass covers both the preferred tier
/// and the fallback. Ties break on driver id.
pub fn select_driver(
    origin: Coordinate,
    drivers: Vec<driver_profile::Model>,
    near_radius_km: f64,
) -> Option<DriverMatch> {
    drivers
        .into_iter()
        .filter_map(|driver| {
            let position = driver.coordinate()?;
            Some((distance_km(origin, position), driver))
        })
        .min_by(|(da, a), (db, b)| da.total_cmp(db).then_with(|| a.id.cmp(&b.id)))
        .map(|(distance_km, driver)| DriverMatch {
            driver,
            distance_km,
            within_near_radius: distance_km <= near_radius_km,
        })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Availability {
    #[serde(rename = "within5km")]
    pub within_near_radius: usize,
    #[serde(rename = "outside5km")]
    pub outside_near_radius: usize,
    #[serde(rename = "nearestOutsideDistanceKm")]
    pub nearest_outside_km: Option<i64>,
}

/// Counts drivers in the near ring; only when it is empty, counts the
/// extended ring and reports the nearest of those, rounded to whole km.
pub fn summarize_availability(
    origin: Coordinate,
    drivers: &[driver_profile::Model],
    near_radius_km: f64,
    extended_radius_km: f64,
) -> Availability {
    let mut distances: Vec<f64> = drivers
        .iter()
        .filter_map(|d| d.coordinate())
        .map(|position| distance_km(origin, position))
        .collect();
    distances.sort_by(f64::total_cmp);

    let within = distances.iter().filter(|d| **d <= near_radius_km).count();
    if within > 0 {
        return Availability {
            within_near_radius: within,
            outside_near_radius: 0,
            nearest_outside_km: None,
        };
    }

    let outside: Vec<f64> = distances
        .into_iter()
        .filter(|d| *d <= extended_radius_km)
        .collect();

    Availability {
        within_near_radius: 0,
        outside_near_radius: outside.len(),
        nearest_outside_km: outside.first().map(|d| d.round() as i64),
    }
}

/// Read-only availability check around a resolved coordinate.
pub async fn availability_at(state: &AppState, origin: Coordinate) -> AppResult<Availability> {
    let drivers = directory::active_drivers(&state.db).await?;
    let settings = state.settings();
    Ok(summarize_availability(
        origin,
        &drivers,
        settings.near_radius_km,
        settings.extended_radius_km,
    ))
}

/// Availability around free-text location; `None` when it cannot be resolved.
pub async fn check_availability(state: &AppState, location: &str) -> AppResult<Option<Availability>> {
    match state.geocoder.resolve(location).await? {
        Some(origin) => Ok(Some(availability_at(state, origin).await?)),
        None => Ok(None),
    }
}

pub async fn dispatch(state: &AppState, booking: &booking::Model) -> AppResult<DispatchOutcome> {
    dispatch_excluding(state, booking, &[]).await
}

/// Match a PENDING booking. Drivers in `excluded` (e.g. ones who already
/// turned this booking down) are never offered it again.
pub async fn dispatch_excluding(
    state: &AppState,
    booking: &booking::Model,
    excluded: &[Uuid],
) -> AppResult<DispatchOutcome> {
    if booking.status != BookingStatus::Pending {
        return Err(AppError::Conflict(format!(
            "Booking {} is no longer pending",
            booking.id
        )));
    }

    let Some(pickup) = state.geocoder.resolve(&booking.origin).await? else {
        tracing::info!(booking_id = %booking.id, origin = %booking.origin, "origin unresolved, matching stopped");
        return Ok(DispatchOutcome::NoDriverAvailable(NoDriverReason::UnresolvedLocation));
    };

    if let Some(trip) = try_pool(state, booking, pickup).await? {
        tracing::info!(booking_id = %booking.id, trip_id = %trip.id, "booking pooled into running trip");
        notify_pooled(state, booking, &trip, pickup).await;
        return Ok(DispatchOutcome::PooledInto(trip.id));
    }

    let idle = directory::idle_drivers(&state.db, excluded).await?;
    if idle.is_empty() {
        tracing::info!(booking_id = %booking.id, "no idle driver is active");
        return Ok(DispatchOutcome::NoDriverAvailable(NoDriverReason::NoActiveDriver));
    }

    let near_radius_km = state.settings().near_radius_km;
    let candidates = idle.len();
    let Some(selected) = select_driver(pickup, idle, near_radius_km) else {
        return Ok(DispatchOutcome::NoDriverAvailable(NoDriverReason::NoActiveDriver));
    };

    if selected.within_near_radius {
        tracing::info!(
            booking_id = %booking.id,
            driver_id = %selected.driver.id,
            distance_km = selected.distance_km,
            candidates,
            "offering to nearest driver in radius"
        );
    } else {
        tracing::info!(
            booking_id = %booking.id,
            driver_id = %selected.driver.id,
            distance_km = selected.distance_km,
            radius_km = near_radius_km,
            "no driver in radius, falling back to nearest active driver"
        );
    }

    send_offer(state, booking, &selected).await;
    Ok(DispatchOutcome::OfferedTo(selected.driver.id))
}

/// Running trips in the booking's destination zone with room for it.
pub async fn pool_candidates(
    state: &AppState,
    booking: &booking::Model,
) -> AppResult<Vec<PoolCandidate>> {
    let zone = state.zones.classify(&booking.destination);

    let trips: Vec<trip::Model> = trip::Entity::find()
        .filter(trip::Column::Status.is_in(TripStatus::IN_PROGRESS))
        .filter(
            Expr::col(trip::Column::SeatsTaken)
                .lte(Expr::col(trip::Column::Capacity).sub(booking.passengers)),
        )
        .order_by_asc(trip::Column::CreatedAt)
        .all(&state.db)
        .await?
        .into_iter()
        .filter(|t| state.zones.classify(&t.destination) == zone)
        .collect();

    if trips.is_empty() {
        return Ok(Vec::new());
    }

    let positions: HashMap<Uuid, Option<Coordinate>> = driver_profile::Entity::find()
        .filter(driver_profile::Column::Id.is_in(trips.iter().map(|t| t.driver_id)))
        .all(&state.db)
        .await?
        .into_iter()
        .map(|d| (d.id, d.coordinate()))
        .collect();

    Ok(trips
        .into_iter()
        .map(|trip| PoolCandidate {
            driver_position: positions.get(&trip.driver_id).copied().flatten(),
            trip,
        })
        .collect())
}

async fn try_pool(
    state: &AppState,
    booking: &booking::Model,
    pickup: Coordinate,
) -> AppResult<Option<trip::Model>> {
    let mut candidates = pool_candidates(state, booking).await?;
    state.pooling.order(pickup, &mut candidates);

    for candidate in candidates {
        if !state.pooling.accepts(pickup, &candidate, booking) {
            continue;
        }
        match join_trip(state, candidate.trip.id, booking).await {
            Ok(trip) => return Ok(Some(trip)),
            Err(AppError::Conflict(reason)) => {
                tracing::debug!(trip_id = %candidate.trip.id, %reason, "pooling candidate lost");
            }
            Err(err) => return Err(err),
        }
    }

    Ok(None)
}

/// Seat a PENDING booking on a running trip.
///
/// Capacity is re-checked by the same statement that takes the seats, so
/// concurrent joins can never overfill the trip.
pub async fn join_trip(
    state: &AppState,
    trip_id: Uuid,
    booking: &booking::Model,
) -> AppResult<trip::Model> {
    if booking.passengers <= 0 {
        return Err(AppError::BadRequest("Passenger count must be positive".to_string()));
    }

    let txn = state.db.begin().await?;

    let seated = trip::Entity::update_many()
        .col_expr(
            trip::Column::SeatsTaken,
            Expr::col(trip::Column::SeatsTaken).add(booking.passengers),
        )
        .filter(trip::Column::Id.eq(trip_id))
        .filter(trip::Column::Status.is_in(TripStatus::IN_PROGRESS))
        .filter(
            Expr::col(trip::Column::SeatsTaken)
                .lte(Expr::col(trip::Column::Capacity).sub(booking.passengers)),
        )
        .exec(&txn)
        .await?;

    if seated.rows_affected == 0 {
        return match trip::Entity::find_by_id(trip_id).one(&txn).await? {
            None => Err(AppError::NotFound("Trip not found".to_string())),
            Some(_) => Err(AppError::Conflict("Trip is full or no longer running".to_string())),
        };
    }

    let confirmed = booking::Entity::update_many()
        .col_expr(booking::Column::Status, Expr::value(BookingStatus::Confirmed))
        .col_expr(booking::Column::TripId, Expr::value(trip_id))
        .filter(booking::Column::Id.eq(booking.id))
        .filter(booking::Column::Status.eq(BookingStatus::Pending))
        .exec(&txn)
        .await?;

    if confirmed.rows_affected == 0 {
        // Dropping the transaction gives the seats back
        return Err(AppError::Conflict("Booking is no longer pending".to_string()));
    }

    let trip = trip::Entity::find_by_id(trip_id)
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::NotFound("Trip not found".to_string()))?;

    txn.commit().await?;
    Ok(trip)
}

fn eta_minutes(distance_km: f64, minutes_per_km: f64) -> i64 {
    (distance_km * minutes_per_km).round() as i64
}

async fn send_offer(state: &AppState, booking: &booking::Model, selected: &DriverMatch) {
    let recipient = match directory::driver_recipient(&state.db, &selected.driver).await {
        Ok(Some(recipient)) => recipient,
        Ok(None) => {
            tracing::warn!(driver_id = %selected.driver.id, "driver has no reachable address");
            return;
        }
        Err(err) => {
            tracing::warn!(error = %err, driver_id = %selected.driver.id, "could not look up driver address");
            return;
        }
    };

    let fare = format_rupiah(booking.price);
    let eta = eta_minutes(selected.distance_km, state.settings().minutes_per_km);
    let message = Notification::text(format!(
        "Pick up at {} (~{:.1} km, ~{} min). Fare: {}",
        booking.origin, selected.distance_km, eta, fare
    ))
    .with_title("New pickup offer")
    .with_data("type", "NEW_TRIP_OFFER")
    .with_data("bookingId", booking.id.to_string())
    .with_data("route", format!("{} -> {}", booking.origin, booking.destination))
    .with_data("fare", booking.price.to_string())
    .with_data("distance", format!("{:.1} km", selected.distance_km))
    .with_data("eta", format!("{eta} min"));

    notify::deliver(state.notifier.as_ref(), &recipient, &message).await;
}

async fn notify_pooled(state: &AppState, booking: &booking::Model, trip: &trip::Model, pickup: Coordinate) {
    let driver = match directory::find_driver(&state.db, trip.driver_id).await {
        Ok(driver) => driver,
        Err(err) => {
            tracing::warn!(error = %err, trip_id = %trip.id, "could not load pooled trip driver");
            return;
        }
    };

    match directory::driver_recipient(&state.db, &driver).await {
        Ok(Some(recipient)) => {
            let fare = format_rupiah(booking.price);
            let message = match driver.coordinate().map(|p| distance_km(p, pickup)) {
                Some(distance) => {
                    let eta = eta_minutes(distance, state.settings().minutes_per_km);
                    Notification::text(format!(
                        "Extra pickup at {} ({} passenger(s), ~{:.1} km, ~{} min). Fare: {}",
                        booking.origin, booking.passengers, distance, eta, fare
                    ))
                    .with_data("distance", format!("{distance:.1} km"))
                    .with_data("eta", format!("{eta} min"))
                }
                None => Notification::text(format!(
                    "Extra pickup at {} ({} passenger(s)). Fare: {}",
                    booking.origin, booking.passengers, fare
                )),
            }
            .with_title("Passenger added to your trip")
            .with_data("type", "POOLED_PICKUP")
            .with_data("bookingId", booking.id.to_string())
            .with_data("tripId", trip.id.to_string())
            .with_data("route", format!("{} -> {}", booking.origin, booking.destination))
            .with_data("fare", booking.price.to_string());
            notify::deliver(state.notifier.as_ref(), &recipient, &message).await;
        }
        Ok(None) => {
            tracing::warn!(driver_id = %driver.id, "pooled trip driver has no reachable address");
        }
        Err(err) => {
            tracing::warn!(error = %err, driver_id = %driver.id, "could not look up driver address");
        }
    }

    match user::Entity::find_by_id(booking.user_id).one(&state.db).await {
        Ok(Some(rider)) => {
            let message = Notification::text(format!(
                "Driver found! You have joined a shared ride to {} with plate {}.",
                trip.destination, driver.plate_number
            ));
            notify::deliver(state.notifier.as_ref(), &Recipient::Chat(rider.phone), &message).await;
        }
        Ok(None) => {}
        Err(err) => tracing::warn!(error = %err, booking_id = %booking.id, "could not load rider"),
    }
}
