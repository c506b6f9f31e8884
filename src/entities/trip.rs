use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(24))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TripStatus {
    #[sea_orm(string_value = "ongoing_pickup")]
    OngoingPickup,
    #[sea_orm(string_value = "confirmed")]
    Confirmed,
    #[sea_orm(string_value = "completed")]
    Completed,
}

impl TripStatus {
    /// Statuses that make a trip occupy its driver.
    pub const IN_PROGRESS: [TripStatus; 2] = [TripStatus::OngoingPickup, TripStatus::Confirmed];

    pub fn is_in_progress(self) -> bool {
        Self::IN_PROGRESS.contains(&self)
    }

    pub fn can_transition_to(self, next: TripStatus) -> bool {
        self.is_in_progress() && next == TripStatus::Completed
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "trip")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub driver_id: Uuid,
    pub status: TripStatus,
    pub destination: String,
    pub departure_time: DateTimeWithTimeZone,
    pub capacity: i32,
    pub seats_taken: i32,
    pub created_at: DateTimeWithTimeZone,
}

impl Model {
    pub fn remaining_seats(&self) -> i32 {
        self.capacity - self.seats_taken
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::driver_profile::Entity",
        from = "Column::DriverId",
        to = "super::driver_profile::Column::Id"
    )]
    Driver,
    #[sea_orm(has_many = "super::booking::Entity")]
    Bookings,
}

impl Related<super::driver_profile::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Driver.def()
    }
}

impl Related<super::booking::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Bookings.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
