use sea_orm_migration::prelude::*;

use super::m20250101_000001_create_catalog_tables::Items;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(FlashSales::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(FlashSales::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(ColumnDef::new(FlashSales::Name).string().not_null())
                    .col(ColumnDef::new(FlashSales::Description).text().not_null())
                    .col(
                        ColumnDef::new(FlashSales::WindowStart)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(FlashSales::WindowEnd)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(FlashSales::Status)
                            .string_len(20)
                            .not_null()
                            .default("scheduled"),
                    )
                    .col(
                        ColumnDef::new(FlashSales::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(FlashSales::UpdatedAt)
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
                    .name("idx_flash_sales_status")
                    .table(FlashSales::Table)
                    .col(FlashSales::Status)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(FlashSaleItems::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(FlashSaleItems::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(ColumnDef::new(FlashSaleItems::FlashSaleId).uuid().not_null())
                    .col(ColumnDef::new(FlashSaleItems::ItemId).uuid().not_null())
                    .col(
                        ColumnDef::new(FlashSaleItems::DiscountPrice)
                            .decimal_len(15, 2)
                            .not_null(),
                    )
                    .col(ColumnDef::new(FlashSaleItems::Quota).integer().not_null())
                    .col(
                        ColumnDef::new(FlashSaleItems::Sold)
                            .integer()
                            .not_null()
                            .default(0)
                            .check(Expr::col(FlashSaleItems::Sold).gte(0)),
                    )
                    .col(
                        ColumnDef::new(FlashSaleItems::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(FlashSaleItems::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_flash_sale_items_flash_sale_id")
                            .from(FlashSaleItems::Table, FlashSaleItems::FlashSaleId)
                            .to(FlashSales::Table, FlashSales::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_flash_sale_items_item_id")
                            .from(FlashSaleItems::Table, FlashSaleItems::ItemId)
                            .to(Items::Table, Items::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_flash_sale_items_sale_item")
                    .table(FlashSaleItems::Table)
                    .col(FlashSaleItems::FlashSaleId)
                    .col(FlashSaleItems::ItemId)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(FlashSaleItems::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(FlashSales::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum FlashSales {
    Table,
    Id,
    Name,
    Description,
    WindowStart,
    WindowEnd,
    Status,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
pub enum FlashSaleItems {
    Table,
    Id,
    FlashSaleId,
    ItemId,
    DiscountPrice,
    Quota,
    Sold,
    CreatedAt,
    UpdatedAt,
}
