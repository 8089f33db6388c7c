use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Items::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Items::Id).uuid().primary_key().not_null())
                    .col(ColumnDef::new(Items::Name).string().not_null())
                    .col(ColumnDef::new(Items::Description).text().null())
                    .col(ColumnDef::new(Items::Price).decimal_len(15, 2).not_null())
                    .col(
                        ColumnDef::new(Items::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Items::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // stock >= 0 holds at the schema level too
        manager
            .create_table(
                Table::create()
                    .table(ItemVariants::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ItemVariants::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ItemVariants::ItemId).uuid().not_null())
                    .col(ColumnDef::new(ItemVariants::Size).string().not_null())
                    .col(ColumnDef::new(ItemVariants::Color).string().not_null())
                    .col(
                        ColumnDef::new(ItemVariants::Stock)
                            .integer()
                            .not_null()
                            .default(0)
                            .check(Expr::col(ItemVariants::Stock).gte(0)),
                    )
                    .col(
                        ColumnDef::new(ItemVariants::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ItemVariants::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_item_variants_item_id")
                            .from(ItemVariants::Table, ItemVariants::ItemId)
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
                    .name("idx_item_variants_item_color_size")
                    .table(ItemVariants::Table)
                    .col(ItemVariants::ItemId)
                    .col(ItemVariants::Color)
                    .col(ItemVariants::Size)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ItemVariants::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Items::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Items {
    Table,
    Id,
    Name,
    Description,
    Price,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
pub enum ItemVariants {
    Table,
    Id,
    ItemId,
    Size,
    Color,
    Stock,
    CreatedAt,
    UpdatedAt,
}
