//! HTTP surface: routing, auth and JSON shapes.

mod common;

use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use sea_orm::EntityTrait;
use serde_json::{json, Value};
use tower::ServiceExt;

use common::{seed_driver, seed_user, test_state, JWT_SECRET, NEAR_DRIVER};
use shuttle_dispatch::entities::user::{self, UserRole};
use shuttle_dispatch::routes::create_router;
use shuttle_dispatch::utils::jwt::create_token;

fn token_for(user: &user::Model) -> String {
    create_token(user.id, &user.phone, user.role.clone(), JWT_SECRET, 1).unwrap()
}

/// Builds a request as the server would see it, peer address included, since
/// the IP rate limiter keys on it.
fn request(method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let body = match body {
        Some(json) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let mut request = builder.body(body).unwrap();
    request
        .extensions_mut()
        .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 40000))));
    request
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

#[tokio::test]
async fn booking_intake_offers_to_nearby_driver() {
    let (state, _) = test_state().await;
    let driver = seed_driver(&state.db, "081100000001", Some(NEAR_DRIVER)).await;
    let app = create_router(state);

    let (status, body) = send(
        &app,
        request(
            Method::POST,
            "/api/bookings",
            None,
            Some(json!({
                "phone": "081234567890",
                "origin": "Kos Mawar",
                "destination": "Kampus Indralaya",
                "passengers": 2,
                "mode": "on_the_spot"
            })),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["fare"], "Rp50.000");
    assert_eq!(body["booking"]["status"], "PENDING");
    assert_eq!(body["dispatch"]["outcome"], "offered_to");
    assert_eq!(body["dispatch"]["detail"], driver.id.to_string());
}

#[tokio::test]
async fn availability_check_reports_counts() {
    let (state, _) = test_state().await;
    seed_driver(&state.db, "081100000001", Some(NEAR_DRIVER)).await;
    let app = create_router(state);

    let (status, body) = send(
        &app,
        request(Method::GET, "/api/availability?location=Kos%20Mawar", None, None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["within5km"], 1);
    assert_eq!(body["outside5km"], 0);
    assert_eq!(body["nearestOutsideDistanceKm"], Value::Null);

    let (status, body) = send(
        &app,
        request(Method::GET, "/api/availability?location=Atlantis", None, None),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("Atlantis"));
}

#[tokio::test]
async fn driver_routes_require_a_driver_token() {
    let (state, _) = test_state().await;
    let rider = seed_user(&state.db, "085200000001", UserRole::Rider).await;
    let app = create_router(state);

    let (status, body) = send(&app, request(Method::GET, "/api/driver/bookings", None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Missing bearer token");

    let (status, _) = send(
        &app,
        request(Method::GET, "/api/driver/bookings", Some("not-a-jwt"), None),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let token = token_for(&rider);
    let (status, body) = send(
        &app,
        request(Method::GET, "/api/driver/bookings", Some(&token), None),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Driver access required");
}

#[tokio::test]
async fn driver_takes_a_booking_end_to_end() {
    let (state, _) = test_state().await;
    let driver = seed_driver(&state.db, "081100000001", None).await;
    let driver_user = user::Entity::find_by_id(driver.user_id)
        .one(&state.db)
        .await
        .unwrap()
        .unwrap();
    let token = token_for(&driver_user);
    let app = create_router(state);

    let (status, _) = send(
        &app,
        request(
            Method::PUT,
            "/api/driver/location",
            Some(&token),
            Some(json!({ "lat": -2.98, "lng": 104.75 })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, receipt) = send(
        &app,
        request(
            Method::POST,
            "/api/bookings",
            None,
            Some(json!({
                "phone": "085200000001",
                "origin": "Simpang Polda",
                "destination": "Indralaya",
                "passengers": 1,
                "mode": "on_the_spot"
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let booking_id = receipt["booking"]["id"].as_str().unwrap().to_string();

    let (status, pending) = send(
        &app,
        request(Method::GET, "/api/driver/bookings", Some(&token), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(pending[0]["id"], booking_id);
    assert_eq!(pending[0]["fare"], "Rp25.000");

    let (status, trip) = send(
        &app,
        request(
            Method::POST,
            &format!("/api/driver/bookings/{booking_id}/accept"),
            Some(&token),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(trip["status"], "ONGOING_PICKUP");
    let trip_id = trip["id"].as_str().unwrap().to_string();

    let (status, _) = send(
        &app,
        request(
            Method::POST,
            &format!("/api/driver/bookings/{booking_id}/pickup"),
            Some(&token),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, active) = send(&app, request(Method::GET, "/api/driver/trip", Some(&token), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(active["trip_id"], trip_id);
    assert_eq!(active["pickups"][0]["is_picked_up"], true);

    let (status, done) = send(
        &app,
        request(
            Method::POST,
            &format!("/api/driver/trips/{trip_id}/complete"),
            Some(&token),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(done["status"], "COMPLETED");

    let (_, active) = send(&app, request(Method::GET, "/api/driver/trip", Some(&token), None)).await;
    assert_eq!(active, Value::Null);
}

#[tokio::test]
async fn rider_cancels_with_own_token() {
    let (state, _) = test_state().await;
    let app = create_router(state.clone());

    let (_, receipt) = send(
        &app,
        request(
            Method::POST,
            "/api/bookings",
            None,
            Some(json!({
                "phone": "085200000001",
                "origin": "Kos Mawar",
                "destination": "Indralaya",
                "passengers": 1,
                "mode": "on_the_spot"
            })),
        ),
    )
    .await;
    let booking_id = receipt["booking"]["id"].as_str().unwrap().to_string();
    let rider_id: uuid::Uuid = receipt["booking"]["user_id"].as_str().unwrap().parse().unwrap();
    let rider = user::Entity::find_by_id(rider_id).one(&state.db).await.unwrap().unwrap();

    let (status, body) = send(
        &app,
        request(
            Method::POST,
            &format!("/api/bookings/{booking_id}/cancel"),
            Some(&token_for(&rider)),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "CANCELLED");
}

#[tokio::test]
async fn onboarded_driver_can_go_on_duty() {
    let (state, _) = test_state().await;
    let candidate = seed_user(&state.db, "081100000001", UserRole::Rider).await;
    let app = create_router(state.clone());

    let (status, profile) = send(
        &app,
        request(
            Method::POST,
            "/api/drivers",
            None,
            Some(json!({
                "user_id": candidate.id,
                "plate_number": "BG 1234 XY",
                "vehicle_type": "Avanza"
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(profile["plate_number"], "BG 1234 XY");
    assert_eq!(profile["status"], "INACTIVE");

    let (status, body) = send(
        &app,
        request(
            Method::POST,
            "/api/drivers",
            None,
            Some(json!({
                "user_id": candidate.id,
                "plate_number": "BG 1234 XY",
                "vehicle_type": "Avanza"
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "User is already a driver");

    let driver_user = user::Entity::find_by_id(candidate.id)
        .one(&state.db)
        .await
        .unwrap()
        .unwrap();
    let (status, body) = send(
        &app,
        request(
            Method::PUT,
            "/api/driver/status",
            Some(&token_for(&driver_user)),
            Some(json!({ "status": "ACTIVE" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ACTIVE");
}
