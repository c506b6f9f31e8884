#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, DatabaseConnection, Set};
use uuid::Uuid;

use shuttle_dispatch::config::{Config, DispatchSettings};
use shuttle_dispatch::db;
use shuttle_dispatch::entities::booking::{self, BookingStatus};
use shuttle_dispatch::entities::driver_profile::{self, DriverStatus};
use shuttle_dispatch::entities::schedule::{self, ScheduleStatus};
use shuttle_dispatch::entities::trip::{self, TripStatus};
use shuttle_dispatch::entities::user::{self, UserRole};
use shuttle_dispatch::geocoder::StaticGeocoder;
use shuttle_dispatch::notify::{Notification, NotificationGateway, NotifyError, Recipient};
use shuttle_dispatch::utils::geo::Coordinate;
use shuttle_dispatch::AppState;

pub const JWT_SECRET: &str = "test-secret";

/// Pickup ~0.25 km from `NEAR_DRIVER`.
pub const PICKUP: Coordinate = Coordinate::new(-2.981, 104.752);
pub const NEAR_DRIVER: Coordinate = Coordinate::new(-2.98, 104.75);
/// ~12 km south of `PICKUP`.
pub const FAR_DRIVER: Coordinate = Coordinate::new(-3.089, 104.752);

/// Fresh in-memory database with the real migrations applied.
///
/// One connection only: every pooled connection to `sqlite::memory:` would
/// otherwise get its own empty database. Tasks that race on the same row
/// therefore queue for the connection and their transactions run one after
/// another. Those tests check that every loser observes the winner's commit
/// and backs off. They do not exercise row locking, which needs Postgres.
pub async fn setup_db() -> DatabaseConnection {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options.max_connections(1).min_connections(1).sqlx_logging(false);
    let conn = Database::connect(options).await.unwrap();
    db::migrate(&conn).await.unwrap();
    conn
}

pub fn test_config() -> Config {
    Config {
        database_url: "sqlite::memory:".to_string(),
        jwt_secret: JWT_SECRET.to_string(),
        server_host: "127.0.0.1".to_string(),
        server_port: 0,
        geocoder_url: None,
        chat_gateway_url: None,
        push_gateway_url: None,
        dispatch: DispatchSettings::default(),
    }
}

pub fn test_geocoder() -> StaticGeocoder {
    StaticGeocoder::new([
        ("kos mawar", PICKUP),
        ("simpang polda", Coordinate::new(-2.9815, 104.7525)),
        ("indralaya", Coordinate::new(-3.2167, 104.65)),
    ])
}

pub async fn test_state() -> (AppState, Arc<RecordingGateway>) {
    let recorder = Arc::new(RecordingGateway::default());
    let state = AppState::new(setup_db().await, test_config())
        .unwrap()
        .with_geocoder(test_geocoder())
        .with_notifier(recorder.clone());
    (state, recorder)
}

/// Remembers every message instead of sending it.
#[derive(Default)]
pub struct RecordingGateway {
    sent: Mutex<Vec<(Recipient, Notification)>>,
}

impl RecordingGateway {
    pub fn sent(&self) -> Vec<(Recipient, Notification)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationGateway for RecordingGateway {
    async fn send(&self, to: &Recipient, message: &Notification) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push((to.clone(), message.clone()));
        Ok(())
    }
}

/// Every delivery fails.
pub struct FailingGateway;

#[async_trait]
impl NotificationGateway for FailingGateway {
    async fn send(&self, _to: &Recipient, _message: &Notification) -> Result<(), NotifyError> {
        Err(NotifyError::Transport("connection refused".to_string()))
    }
}

pub async fn seed_user(db: &DatabaseConnection, phone: &str, role: UserRole) -> user::Model {
    user::ActiveModel {
        id: Set(Uuid::new_v4()),
        phone: Set(phone.to_string()),
        name: Set(format!("User {phone}")),
        role: Set(role),
        created_at: Set(Utc::now().fixed_offset()),
    }
    .insert(db)
    .await
    .unwrap()
}

pub async fn seed_driver(
    db: &DatabaseConnection,
    phone: &str,
    position: Option<Coordinate>,
) -> driver_profile::Model {
    let user = seed_user(db, phone, UserRole::Driver).await;
    let now = Utc::now().fixed_offset();
    driver_profile::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user.id),
        plate_number: Set(format!("BG {} XY", &phone[phone.len() - 4..])),
        vehicle_type: Set("Avanza".to_string()),
        status: Set(DriverStatus::Active),
        latitude: Set(position.map(|p| p.lat)),
        longitude: Set(position.map(|p| p.lng)),
        push_token: Set(None),
        updated_at: Set(now),
        created_at: Set(now),
    }
    .insert(db)
    .await
    .unwrap()
}

pub struct BookingSeed<'a> {
    pub origin: &'a str,
    pub destination: &'a str,
    pub passengers: i32,
    pub status: BookingStatus,
    pub departure: Option<DateTime<Utc>>,
}

impl Default for BookingSeed<'_> {
    fn default() -> Self {
        Self {
            origin: "Kos Mawar",
            destination: "Kampus Indralaya",
            passengers: 1,
            status: BookingStatus::Pending,
            departure: None,
        }
    }
}

pub async fn seed_booking(db: &DatabaseConnection, rider: &user::Model, seed: BookingSeed<'_>) -> booking::Model {
    booking::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(rider.id),
        origin: Set(seed.origin.to_string()),
        destination: Set(seed.destination.to_string()),
        passengers: Set(seed.passengers),
        price: Set(25_000 * i64::from(seed.passengers)),
        scheduled_departure: Set(seed.departure.map(|d| d.fixed_offset())),
        is_picked_up: Set(false),
        status: Set(seed.status),
        trip_id: Set(None),
        schedule_id: Set(None),
        created_at: Set(Utc::now().fixed_offset()),
    }
    .insert(db)
    .await
    .unwrap()
}

pub async fn seed_trip(
    db: &DatabaseConnection,
    driver: &driver_profile::Model,
    destination: &str,
    capacity: i32,
    seats_taken: i32,
) -> trip::Model {
    let now = Utc::now().fixed_offset();
    trip::ActiveModel {
        id: Set(Uuid::new_v4()),
        driver_id: Set(driver.id),
        status: Set(TripStatus::OngoingPickup),
        destination: Set(destination.to_string()),
        departure_time: Set(now),
        capacity: Set(capacity),
        seats_taken: Set(seats_taken),
        created_at: Set(now),
    }
    .insert(db)
    .await
    .unwrap()
}

/// AVAILABLE schedule with `members` linked to it as SCHEDULED bookings.
pub async fn seed_schedule(
    db: &DatabaseConnection,
    departure: DateTime<Utc>,
    members: &[booking::Model],
) -> schedule::Model {
    let schedule = schedule::ActiveModel {
        id: Set(Uuid::new_v4()),
        departure_time: Set(departure.fixed_offset()),
        destination: Set("Indralaya".to_string()),
        origin_area: Set(format!("Pickup group ({} locations)", members.len())),
        total_passengers: Set(members.iter().map(|b| b.passengers).sum()),
        status: Set(ScheduleStatus::Available),
        trip_id: Set(None),
        created_at: Set(Utc::now().fixed_offset()),
    }
    .insert(db)
    .await
    .unwrap();

    for member in members {
        let mut active: booking::ActiveModel = member.clone().into();
        active.schedule_id = Set(Some(schedule.id));
        active.status = Set(BookingStatus::Scheduled);
        active.update(db).await.unwrap();
    }

    schedule
}
