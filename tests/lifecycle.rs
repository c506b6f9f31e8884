//! Accept, claim, pickup, completion and cancellation transitions.

mod common;

use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};

use common::{
    seed_booking, seed_driver, seed_schedule, seed_user, test_state, BookingSeed, FailingGateway,
    NEAR_DRIVER,
};
use shuttle_dispatch::entities::booking::{self, BookingStatus};
use shuttle_dispatch::entities::driver_profile::DriverStatus;
use shuttle_dispatch::entities::schedule::{self, ScheduleStatus};
use shuttle_dispatch::entities::trip::{self, TripStatus};
use shuttle_dispatch::entities::user::{self, UserRole};
use shuttle_dispatch::services::{directory, lifecycle};
use shuttle_dispatch::{AppError, AppState};

async fn scheduled_members(state: &AppState, passengers: &[i32]) -> Vec<booking::Model> {
    let departure = Utc::now() + TimeDelta::days(1);
    let mut members = Vec::new();
    for (i, p) in passengers.iter().enumerate() {
        let rider = seed_user(&state.db, &format!("08520000000{i}"), UserRole::Rider).await;
        members.push(
            seed_booking(
                &state.db,
                &rider,
                BookingSeed {
                    passengers: *p,
                    status: BookingStatus::Scheduled,
                    departure: Some(departure),
                    ..Default::default()
                },
            )
            .await,
        );
    }
    members
}

/// Claims are issued from parallel tasks; on the single test connection the
/// transactions serialize, so this pins the re-check each loser performs.
#[tokio::test]
async fn exactly_one_concurrent_claim_wins() {
    let (state, _) = test_state().await;
    let members = scheduled_members(&state, &[2, 3, 1]).await;
    let schedule = seed_schedule(&state.db, Utc::now() + TimeDelta::days(1), &members).await;

    let mut drivers = Vec::new();
    for i in 0..5 {
        drivers.push(seed_driver(&state.db, &format!("08110000000{i}"), Some(NEAR_DRIVER)).await);
    }

    let schedule_id = schedule.id;
    let state = Arc::new(state);
    let handles: Vec<_> = drivers
        .iter()
        .map(|driver| {
            let state = state.clone();
            let driver_id = driver.id;
            tokio::spawn(async move { lifecycle::claim_schedule(&state, driver_id, schedule_id).await })
        })
        .collect();

    let mut winners = Vec::new();
    let mut losers = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(outcome) => winners.push(outcome),
            Err(AppError::Conflict(_)) => losers += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(winners.len(), 1);
    assert_eq!(losers, 4);

    let outcome = &winners[0];
    assert_eq!(outcome.trip.seats_taken, 6);
    assert_eq!(outcome.trip.status, TripStatus::Confirmed);
    assert_eq!(outcome.confirmed_bookings, 3);

    let stored = schedule::Entity::find_by_id(schedule_id).one(&state.db).await.unwrap().unwrap();
    assert_eq!(stored.status, ScheduleStatus::Claimed);
    assert_eq!(stored.trip_id, Some(outcome.trip.id));

    let trips = trip::Entity::find().all(&state.db).await.unwrap();
    assert_eq!(trips.len(), 1);

    for member in members {
        let b = booking::Entity::find_by_id(member.id).one(&state.db).await.unwrap().unwrap();
        assert_eq!(b.status, BookingStatus::Confirmed);
        assert_eq!(b.trip_id, Some(outcome.trip.id));
    }
}

#[tokio::test]
async fn claim_then_complete_returns_driver_to_duty() {
    let (state, recorder) = test_state().await;
    let members = scheduled_members(&state, &[2, 3, 1]).await;
    let schedule = seed_schedule(&state.db, Utc::now() + TimeDelta::days(1), &members).await;
    let driver = seed_driver(&state.db, "081100000001", Some(NEAR_DRIVER)).await;

    let claimed = lifecycle::claim_schedule(&state, driver.id, schedule.id).await.unwrap();
    // Every rider hears who is coming
    assert_eq!(recorder.sent().len(), 3);

    directory::update_status(&state.db, driver.id, DriverStatus::Inactive).await.unwrap();
    let completed = lifecycle::complete_trip(&state, driver.id, claimed.trip.id).await.unwrap();
    assert_eq!(completed.status, TripStatus::Completed);

    let profile = directory::find_driver(&state.db, driver.id).await.unwrap();
    assert_eq!(profile.status, DriverStatus::Active);

    let statuses: Vec<BookingStatus> = booking::Entity::find()
        .filter(booking::Column::TripId.eq(claimed.trip.id))
        .all(&state.db)
        .await
        .unwrap()
        .into_iter()
        .map(|b| b.status)
        .collect();
    assert_eq!(statuses, vec![BookingStatus::Confirmed; 3]);

    // Driver is idle again and can take the next job
    assert!(!directory::has_trip_in_progress(&state.db, driver.id).await.unwrap());
}

#[tokio::test]
async fn claim_distinguishes_missing_taken_and_departed() {
    let (state, _) = test_state().await;
    let driver = seed_driver(&state.db, "081100000001", Some(NEAR_DRIVER)).await;

    assert!(matches!(
        lifecycle::claim_schedule(&state, driver.id, uuid::Uuid::new_v4()).await,
        Err(AppError::NotFound(_))
    ));

    let members = scheduled_members(&state, &[1]).await;
    let departed = seed_schedule(&state.db, Utc::now() - TimeDelta::hours(1), &members).await;
    assert!(matches!(
        lifecycle::claim_schedule(&state, driver.id, departed.id).await,
        Err(AppError::Conflict(_))
    ));
    let untouched = schedule::Entity::find_by_id(departed.id).one(&state.db).await.unwrap().unwrap();
    assert_eq!(untouched.status, ScheduleStatus::Available);
}

#[tokio::test]
async fn busy_driver_cannot_take_second_job() {
    let (state, _) = test_state().await;
    let driver = seed_driver(&state.db, "081100000001", Some(NEAR_DRIVER)).await;
    let rider = seed_user(&state.db, "085200000009", UserRole::Rider).await;
    let first = seed_booking(&state.db, &rider, BookingSeed::default()).await;
    lifecycle::accept_booking(&state, driver.id, first.id).await.unwrap();

    let members = scheduled_members(&state, &[2]).await;
    let schedule = seed_schedule(&state.db, Utc::now() + TimeDelta::days(1), &members).await;
    assert!(matches!(
        lifecycle::claim_schedule(&state, driver.id, schedule.id).await,
        Err(AppError::Conflict(_))
    ));

    // Rolled back: the schedule is still up for grabs
    let stored = schedule::Entity::find_by_id(schedule.id).one(&state.db).await.unwrap().unwrap();
    assert_eq!(stored.status, ScheduleStatus::Available);
    assert_eq!(stored.trip_id, None);
}

#[tokio::test]
async fn second_accept_of_same_booking_conflicts() {
    let (state, _) = test_state().await;
    let first = seed_driver(&state.db, "081100000001", Some(NEAR_DRIVER)).await;
    let second = seed_driver(&state.db, "081100000002", Some(NEAR_DRIVER)).await;
    let rider = seed_user(&state.db, "085200000001", UserRole::Rider).await;
    let booking = seed_booking(&state.db, &rider, BookingSeed::default()).await;

    let trip = lifecycle::accept_booking(&state, first.id, booking.id).await.unwrap();
    assert_eq!(trip.status, TripStatus::OngoingPickup);
    assert_eq!(trip.seats_taken, 1);

    assert!(matches!(
        lifecycle::accept_booking(&state, second.id, booking.id).await,
        Err(AppError::Conflict(_))
    ));
    assert!(!directory::has_trip_in_progress(&state.db, second.id).await.unwrap());

    let stored = booking::Entity::find_by_id(booking.id).one(&state.db).await.unwrap().unwrap();
    assert_eq!(stored.status, BookingStatus::Confirmed);
    assert_eq!(stored.trip_id, Some(trip.id));
}

#[tokio::test]
async fn only_assigned_driver_marks_pickup() {
    let (state, _) = test_state().await;
    let assigned = seed_driver(&state.db, "081100000001", Some(NEAR_DRIVER)).await;
    let stranger = seed_driver(&state.db, "081100000002", Some(NEAR_DRIVER)).await;
    let rider = seed_user(&state.db, "085200000001", UserRole::Rider).await;
    let booking = seed_booking(&state.db, &rider, BookingSeed::default()).await;

    // Not on any trip yet
    assert!(matches!(
        lifecycle::mark_picked_up(&state, assigned.id, booking.id).await,
        Err(AppError::Forbidden(_))
    ));

    lifecycle::accept_booking(&state, assigned.id, booking.id).await.unwrap();

    assert!(matches!(
        lifecycle::mark_picked_up(&state, stranger.id, booking.id).await,
        Err(AppError::Forbidden(_))
    ));

    let picked = lifecycle::mark_picked_up(&state, assigned.id, booking.id).await.unwrap();
    assert!(picked.is_picked_up);

    let view = lifecycle::active_trip(&state, assigned.id).await.unwrap().unwrap();
    assert_eq!(view.pickups.len(), 1);
    assert!(view.pickups[0].is_picked_up);
    assert_eq!(view.pickups[0].rider_phone, "085200000001");
    assert_eq!(view.remaining_seats, 6);
}

#[tokio::test]
async fn pickup_is_refused_once_the_trip_is_completed() {
    let (state, _) = test_state().await;
    let driver = seed_driver(&state.db, "081100000001", Some(NEAR_DRIVER)).await;
    let rider = seed_user(&state.db, "085200000001", UserRole::Rider).await;
    let booking = seed_booking(&state.db, &rider, BookingSeed::default()).await;

    let trip = lifecycle::accept_booking(&state, driver.id, booking.id).await.unwrap();
    lifecycle::complete_trip(&state, driver.id, trip.id).await.unwrap();

    assert!(matches!(
        lifecycle::mark_picked_up(&state, driver.id, booking.id).await,
        Err(AppError::Conflict(_))
    ));
    let stored = booking::Entity::find_by_id(booking.id).one(&state.db).await.unwrap().unwrap();
    assert!(!stored.is_picked_up);
}

#[tokio::test]
async fn completion_checks_owner_and_state() {
    let (state, _) = test_state().await;
    let owner = seed_driver(&state.db, "081100000001", Some(NEAR_DRIVER)).await;
    let other = seed_driver(&state.db, "081100000002", Some(NEAR_DRIVER)).await;
    let rider = seed_user(&state.db, "085200000001", UserRole::Rider).await;
    let booking = seed_booking(&state.db, &rider, BookingSeed::default()).await;
    let trip = lifecycle::accept_booking(&state, owner.id, booking.id).await.unwrap();

    assert!(matches!(
        lifecycle::complete_trip(&state, other.id, trip.id).await,
        Err(AppError::Forbidden(_))
    ));
    lifecycle::complete_trip(&state, owner.id, trip.id).await.unwrap();
    assert!(matches!(
        lifecycle::complete_trip(&state, owner.id, trip.id).await,
        Err(AppError::Conflict(_))
    ));
    assert!(lifecycle::active_trip(&state, owner.id).await.unwrap().is_none());
}

#[tokio::test]
async fn failed_notifications_do_not_undo_transitions() {
    let (state, _) = test_state().await;
    let state = state.with_notifier(Arc::new(FailingGateway));
    let driver = seed_driver(&state.db, "081100000001", Some(NEAR_DRIVER)).await;
    let members = scheduled_members(&state, &[2, 1]).await;
    let schedule = seed_schedule(&state.db, Utc::now() + TimeDelta::days(1), &members).await;

    let outcome = lifecycle::claim_schedule(&state, driver.id, schedule.id).await.unwrap();
    assert_eq!(outcome.schedule.status, ScheduleStatus::Claimed);

    let stored = schedule::Entity::find_by_id(schedule.id).one(&state.db).await.unwrap().unwrap();
    assert_eq!(stored.status, ScheduleStatus::Claimed);
}

#[tokio::test]
async fn riders_cancel_only_their_own_pending_bookings() {
    let (state, _) = test_state().await;
    let owner = seed_user(&state.db, "085200000001", UserRole::Rider).await;
    let other = seed_user(&state.db, "085200000002", UserRole::Rider).await;
    let booking = seed_booking(&state.db, &owner, BookingSeed::default()).await;

    assert!(matches!(
        lifecycle::cancel_booking(&state, other.id, booking.id).await,
        Err(AppError::Forbidden(_))
    ));

    let cancelled = lifecycle::cancel_booking(&state, owner.id, booking.id).await.unwrap();
    assert_eq!(cancelled.status, BookingStatus::Cancelled);

    assert!(matches!(
        lifecycle::cancel_booking(&state, owner.id, booking.id).await,
        Err(AppError::Conflict(_))
    ));

    let driver = seed_driver(&state.db, "081100000001", Some(NEAR_DRIVER)).await;
    let confirmed = seed_booking(&state.db, &owner, BookingSeed::default()).await;
    lifecycle::accept_booking(&state, driver.id, confirmed.id).await.unwrap();
    assert!(matches!(
        lifecycle::cancel_booking(&state, owner.id, confirmed.id).await,
        Err(AppError::Conflict(_))
    ));

    assert!(user::Entity::find_by_id(owner.id).one(&state.db).await.unwrap().is_some());
}

#[tokio::test]
async fn listings_show_open_work() {
    let (state, _) = test_state().await;
    let rider = seed_user(&state.db, "085200000001", UserRole::Rider).await;
    let first = seed_booking(&state.db, &rider, BookingSeed::default()).await;
    let second = seed_booking(&state.db, &rider, BookingSeed::default()).await;

    let pending = lifecycle::pending_bookings(&state.db).await.unwrap();
    let ids: Vec<_> = pending.iter().map(|b| b.id).collect();
    assert_eq!(ids, vec![first.id, second.id]);

    let members = scheduled_members(&state, &[1]).await;
    let soon = seed_schedule(&state.db, Utc::now() + TimeDelta::hours(2), &members).await;
    let past = seed_schedule(&state.db, Utc::now() - TimeDelta::hours(2), &[]).await;
    let far_future = seed_schedule(&state.db, Utc::now() + TimeDelta::days(5), &[]).await;

    let listed: Vec<_> = lifecycle::available_schedules(&state, Utc::now())
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.id)
        .collect();
    assert!(listed.contains(&soon.id));
    assert!(!listed.contains(&past.id));
    assert!(!listed.contains(&far_future.id));
}
