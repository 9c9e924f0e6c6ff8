pub use sea_orm_migration::prelude::*;

mod m20250301_090000_create_spi_access_token;
mod m20250301_091500_create_spi_access_token_data;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250301_090000_create_spi_access_token::Migration),
            Box::new(m20250301_091500_create_spi_access_token_data::Migration),
        ]
    }
}
