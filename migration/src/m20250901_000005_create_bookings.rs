use sea_orm_migration::{prelude::*, schema::*};

use super::m20250901_000001_create_users::User;
use super::m20250901_000003_create_trips::Trip;
use super::m20250901_000004_create_schedules::Schedule;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Booking::Table)
                    .if_not_exists()
                    .col(uuid(Booking::Id).primary_key())
                    .col(uuid(Booking::UserId).not_null())
                    .col(string_len(Booking::Origin, 255).not_null())
                    .col(string_len(Booking::Destination, 255).not_null())
                    .col(integer(Booking::Passengers).not_null())
                    .col(big_integer(Booking::Price).not_null())
                    .col(timestamp_with_time_zone_null(Booking::ScheduledDeparture))
                    .col(boolean(Booking::IsPickedUp).not_null().default(false))
                    .col(string_len(Booking::Status, 24).not_null())
                    .col(uuid_null(Booking::TripId))
                    .col(uuid_null(Booking::ScheduleId))
                    .col(
                        timestamp_with_time_zone(Booking::CreatedAt)
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_booking_user")
                            .from(Booking::Table, Booking::UserId)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_booking_trip")
                            .from(Booking::Table, Booking::TripId)
                            .to(Trip::Table, Trip::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_booking_schedule")
                            .from(Booking::Table, Booking::ScheduleId)
                            .to(Schedule::Table, Schedule::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        // The nightly grouping scans by status; the claim updates by schedule
        manager
            .create_index(
                Index::create()
                    .name("idx_booking_status")
                    .table(Booking::Table)
                    .col(Booking::Status)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_booking_schedule")
                    .table(Booking::Table)
                    .col(Booking::ScheduleId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Booking::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Booking {
    Table,
    Id,
    UserId,
    Origin,
    Destination,
    Passengers,
    Price,
    ScheduledDeparture,
    IsPickedUp,
    Status,
    TripId,
    ScheduleId,
    CreatedAt,
}
