use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};

use crate::handlers::{driver, rider};
use crate::middleware::auth::{auth_middleware, require_driver, require_rider};
use crate::middleware::rate_limit::{create_driver_governor, create_public_governor};
use crate::AppState;

pub fn create_router(state: AppState) -> Router {
    let driver_governor = create_driver_governor();
    // IP-based governor for unauthenticated intake, availability and driver onboarding
    let public_governor = create_public_governor();

    let public_routes = Router::new()
        .route("/bookings", post(rider::create_booking))
        .route("/availability", get(rider::check_availability))
        .route("/drivers", post(driver::register_driver))
        .layer(public_governor.clone());

    // Rider routes (requires auth + rider role)
    let rider_routes = Router::new()
        .route("/bookings/{id}/cancel", post(rider::cancel_booking))
        .layer(public_governor)
        .layer(middleware::from_fn(require_rider))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    // Driver routes (requires auth + driver role)
    // Rate limit: 500 requests per minute per driver
    let driver_routes = Router::new()
        .route("/status", put(driver::update_status))
        .route("/location", put(driver::update_location))
        .route("/push-token", put(driver::register_push_token))
        .route("/bookings", get(driver::pending_bookings))
        .route("/bookings/{id}/accept", post(driver::accept_booking))
        .route("/bookings/{id}/reject", post(driver::reject_booking))
        .route("/bookings/{id}/pickup", post(driver::mark_picked_up))
        .route("/schedules", get(driver::available_schedules))
        .route("/schedules/{id}/claim", post(driver::claim_schedule))
        .route("/trip", get(driver::active_trip))
        .route("/trips/{id}/complete", post(driver::complete_trip))
        .layer(driver_governor)
        .layer(middleware::from_fn(require_driver))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .nest("/api", public_routes.merge(rider_routes))
        .nest("/api/driver", driver_routes)
        .with_state(state)
}
