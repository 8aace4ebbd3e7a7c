use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(DetectionResults::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DetectionResults::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(DetectionResults::ImageId).integer().not_null())
                    .col(ColumnDef::new(DetectionResults::AnnotatedCoordinates).json().not_null())
                    .col(ColumnDef::new(DetectionResults::UploadDate).timestamp().not_null())
                    .col(ColumnDef::new(DetectionResults::LastModified).timestamp().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_detection_results_image_id")
                            .from(DetectionResults::Table, DetectionResults::ImageId)
                            .to(Images::Table, Images::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(DetectionResults::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum DetectionResults {
    Table,
    Id,
    ImageId,
    AnnotatedCoordinates,
    UploadDate,
    LastModified,
}

#[derive(DeriveIden)]
enum Images {
    Table,
    Id,
}
