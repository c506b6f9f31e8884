pub mod driver;
pub mod rider;
