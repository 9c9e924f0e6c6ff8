//! Owner record of a token: the cluster-side access token object.

use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "spi_access_token")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub namespace: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub name: String,
    pub service_provider_url: String,
    pub token_metadata: Option<Json>,
    /// Bumped after every successful write of the token data.
    pub data_version: i64,
    pub data_updated_at: Option<OffsetDateTime>,
    /// Optimistic concurrency token, incremented on every update.
    pub resource_version: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
