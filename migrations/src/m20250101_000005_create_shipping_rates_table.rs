use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ShippingRates::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ShippingRates::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ShippingRates::OriginCity).string().not_null())
                    .col(
                        ColumnDef::new(ShippingRates::DestinationCity)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ShippingRates::Cost)
                            .decimal_len(15, 2)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ShippingRates::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_shipping_rates_route")
                    .table(ShippingRates::Table)
                    .col(ShippingRates::OriginCity)
                    .col(ShippingRates::DestinationCity)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ShippingRates::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ShippingRates {
    Table,
    Id,
    OriginCity,
    DestinationCity,
    Cost,
    CreatedAt,
}
