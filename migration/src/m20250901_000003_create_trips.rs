use sea_orm_migration::{prelude::*, schema::*};

use super::m20250901_000002_create_driver_profiles::DriverProfile;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Trip::Table)
                    .if_not_exists()
                    .col(uuid(Trip::Id).primary_key())
                    .col(uuid(Trip::DriverId).not_null())
                    .col(string_len(Trip::Status, 24).not_null())
                    .col(string_len(Trip::Destination, 255).not_null())
                    .col(timestamp_with_time_zone(Trip::DepartureTime).not_null())
                    .col(integer(Trip::Capacity).not_null())
                    .col(integer(Trip::SeatsTaken).not_null().default(0))
                    .col(
                        timestamp_with_time_zone(Trip::CreatedAt)
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_trip_driver")
                            .from(Trip::Table, Trip::DriverId)
                            .to(DriverProfile::Table, DriverProfile::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_trip_driver_status")
                    .table(Trip::Table)
                    .col(Trip::DriverId)
                    .col(Trip::Status)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Trip::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Trip {
    Table,
    Id,
    DriverId,
    Status,
    Destination,
    DepartureTime,
    Capacity,
    SeatsTaken,
    CreatedAt,
}
