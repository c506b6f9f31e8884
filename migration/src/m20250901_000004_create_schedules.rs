use sea_orm_migration::{prelude::*, schema::*};

use super::m20250901_000003_create_trips::Trip;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Schedule::Table)
                    .if_not_exists()
                    .col(uuid(Schedule::Id).primary_key())
                    .col(timestamp_with_time_zone(Schedule::DepartureTime).not_null())
                    .col(string_len(Schedule::Destination, 255).not_null())
                    .col(string_len(Schedule::OriginArea, 255).not_null())
                    .col(integer(Schedule::TotalPassengers).not_null())
                    .col(string_len(Schedule::Status, 16).not_null())
                    .col(uuid_null(Schedule::TripId))
                    .col(
                        timestamp_with_time_zone(Schedule::CreatedAt)
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_schedule_trip")
                            .from(Schedule::Table, Schedule::TripId)
                            .to(Trip::Table, Trip::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_schedule_status_departure")
                    .table(Schedule::Table)
                    .col(Schedule::Status)
                    .col(Schedule::DepartureTime)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Schedule::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Schedule {
    Table,
    Id,
    DepartureTime,
    Destination,
    OriginArea,
    TotalPassengers,
    Status,
    TripId,
    CreatedAt,
}
