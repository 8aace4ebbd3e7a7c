use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Images::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Images::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Images::UserId).integer().not_null())
                    .col(ColumnDef::new(Images::Name).string_len(524).not_null())
                    .col(ColumnDef::new(Images::File).string().not_null().unique_key())
                    .col(ColumnDef::new(Images::UploadDate).timestamp().not_null())
                    .col(ColumnDef::new(Images::LastModified).timestamp().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_images_user_id")
                            .from(Images::Table, Images::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_images_user_upload_date")
                    .table(Images::Table)
                    .col(Images::UserId)
                    .col(Images::UploadDate)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Images::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Images {
    Table,
    Id,
    UserId,
    Name,
    File,
    UploadDate,
    LastModified,
}

#[derive(DeriveIden)]
enum Users {
    Table,
    Id,
}
