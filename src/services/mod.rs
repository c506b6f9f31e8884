pub mod booking;
pub mod consolidator;
pub mod directory;
pub mod lifecycle;
pub mod matching;
pub mod pricing;
pub mod zones;
