use sea_orm_migration::{prelude::*, schema::*};

use super::m20250901_000001_create_users::User;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(DriverProfile::Table)
                    .if_not_exists()
                    .col(uuid(DriverProfile::Id).primary_key())
                    .col(uuid(DriverProfile::UserId).not_null().unique_key())
                    .col(string_len(DriverProfile::PlateNumber, 20).not_null())
                    .col(string_len(DriverProfile::VehicleType, 50).not_null())
                    .col(string_len(DriverProfile::Status, 16).not_null())
                    .col(double_null(DriverProfile::Latitude))
                    .col(double_null(DriverProfile::Longitude))
                    .col(string_len_null(DriverProfile::PushToken, 255))
                    .col(
                        timestamp_with_time_zone(DriverProfile::UpdatedAt)
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        timestamp_with_time_zone(DriverProfile::CreatedAt)
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_driver_profile_user")
                            .from(DriverProfile::Table, DriverProfile::UserId)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_driver_profile_status")
                    .table(DriverProfile::Table)
                    .col(DriverProfile::Status)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(DriverProfile::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum DriverProfile {
    Table,
    Id,
    UserId,
    PlateNumber,
    VehicleType,
    Status,
    Latitude,
    Longitude,
    PushToken,
    UpdatedAt,
    CreatedAt,
}
