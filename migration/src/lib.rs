pub use sea_orm_migration::prelude::*;

mod m20240101_000001_create_users_table;
mod m20241201_000002_create_sessions_table;
mod m20241204_000003_create_images_table;
mod m20241204_000004_create_detection_results_table;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240101_000001_create_users_table::Migration),
            Box::new(m20241201_000002_create_sessions_table::Migration),
            Box::new(m20241204_000003_create_images_table::Migration),
            Box::new(m20241204_000004_create_detection_results_table::Migration),
        ]
    }
}
