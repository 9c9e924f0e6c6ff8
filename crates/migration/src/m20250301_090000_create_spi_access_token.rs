use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SpiAccessToken::Table)
                    .if_not_exists()
                    .col(string(SpiAccessToken::Namespace).not_null())
                    .col(string(SpiAccessToken::Name).not_null())
                    .col(string(SpiAccessToken::ServiceProviderUrl).not_null())
                    .col(json_null(SpiAccessToken::TokenMetadata))
                    .col(big_integer(SpiAccessToken::DataVersion).default(0))
                    .col(timestamp_with_time_zone_null(SpiAccessToken::DataUpdatedAt))
                    .col(big_integer(SpiAccessToken::ResourceVersion).default(1))
                    .primary_key(
                        Index::create()
                            .col(SpiAccessToken::Namespace)
                            .col(SpiAccessToken::Name),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SpiAccessToken::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum SpiAccessToken {
    Table,
    Namespace,
    Name,
    ServiceProviderUrl,
    TokenMetadata,
    DataVersion,
    DataUpdatedAt,
    ResourceVersion,
}
