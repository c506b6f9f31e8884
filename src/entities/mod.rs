pub mod booking;
pub mod driver_profile;
pub mod schedule;
pub mod trip;
pub mod user;
