use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SpiAccessTokenData::Table)
                    .if_not_exists()
                    .col(string(SpiAccessTokenData::Namespace).not_null())
                    .col(string(SpiAccessTokenData::Name).not_null())
                    .col(text(SpiAccessTokenData::AccessToken).not_null())
                    .col(string(SpiAccessTokenData::TokenType).not_null())
                    .col(text_null(SpiAccessTokenData::RefreshToken))
                    .col(big_integer(SpiAccessTokenData::Expiry).default(0))
                    .col(timestamp_with_time_zone(SpiAccessTokenData::UpdatedAt))
                    .primary_key(
                        Index::create()
                            .col(SpiAccessTokenData::Namespace)
                            .col(SpiAccessTokenData::Name),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SpiAccessTokenData::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum SpiAccessTokenData {
    Table,
    Namespace,
    Name,
    AccessToken,
    TokenType,
    RefreshToken,
    Expiry,
    UpdatedAt,
}
