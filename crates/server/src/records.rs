//! Owner records: the cluster objects tokens are stored for.
//!
//! Records are created and reconciled outside this service. The broker only reads
//! them, attaches token metadata to their status and bumps their data version when
//! new token data lands. Updates are compare-and-set on `resource_version`, so a
//! concurrent writer makes the update fail with [`RecordError::Conflict`] instead of
//! being silently overwritten.

use crate::entity::spi_access_token;
use crate::error::RecordError;
use crate::tokenstorage::TokenMetadata;
use async_trait::async_trait;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use std::fmt;
use std::sync::Arc;
use time::OffsetDateTime;

/// How often an update is re-attempted after losing a race with another writer.
pub const MAX_CONFLICT_RETRIES: usize = 5;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SpiAccessToken {
    pub key: ObjectKey,
    pub service_provider_url: String,
    pub token_metadata: Option<TokenMetadata>,
    pub data_version: i64,
    pub data_updated_at: Option<OffsetDateTime>,
    pub resource_version: i64,
}

impl TryFrom<spi_access_token::Model> for SpiAccessToken {
    type Error = RecordError;

    fn try_from(model: spi_access_token::Model) -> Result<Self, Self::Error> {
        let token_metadata = model
            .token_metadata
            .map(serde_json::from_value)
            .transpose()?;
        Ok(Self {
            key: ObjectKey::new(model.namespace, model.name),
            service_provider_url: model.service_provider_url,
            token_metadata,
            data_version: model.data_version,
            data_updated_at: model.data_updated_at,
            resource_version: model.resource_version,
        })
    }
}

#[async_trait]
pub trait AccessTokenRecords: Send + Sync {
    async fn get(&self, key: &ObjectKey) -> Result<Option<SpiAccessToken>, RecordError>;

    /// Write `record` if its `resource_version` is still current. Returns the stored record.
    async fn update(&self, record: &SpiAccessToken) -> Result<SpiAccessToken, RecordError>;
}

/// Re-read, mutate and write a record until the write wins or the retries run out.
pub async fn update_with_retry<F>(
    records: &dyn AccessTokenRecords,
    key: &ObjectKey,
    mut mutate: F,
) -> Result<SpiAccessToken, RecordError>
where
    F: FnMut(&mut SpiAccessToken) + Send,
{
    let mut attempt = 0;
    loop {
        let mut record = records
            .get(key)
            .await?
            .ok_or_else(|| RecordError::NotFound {
                namespace: key.namespace.clone(),
                name: key.name.clone(),
            })?;
        mutate(&mut record);
        match records.update(&record).await {
            Err(RecordError::Conflict { .. }) if attempt + 1 < MAX_CONFLICT_RETRIES => {
                attempt += 1;
                tracing::debug!(owner = %key, attempt, "conflict updating access token record, retrying");
            }
            other => return other,
        }
    }
}

/// Records kept in the `spi_access_token` table.
#[derive(Clone)]
pub struct DbAccessTokenRecords {
    db: Arc<DatabaseConnection>,
}

impl DbAccessTokenRecords {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AccessTokenRecords for DbAccessTokenRecords {
    async fn get(&self, key: &ObjectKey) -> Result<Option<SpiAccessToken>, RecordError> {
        spi_access_token::Entity::find_by_id((key.namespace.clone(), key.name.clone()))
            .one(self.db.as_ref())
            .await?
            .map(SpiAccessToken::try_from)
            .transpose()
    }

    async fn update(&self, record: &SpiAccessToken) -> Result<SpiAccessToken, RecordError> {
        use spi_access_token::Column;

        let metadata = record
            .token_metadata
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;
        let next_version = record.resource_version + 1;

        let result = spi_access_token::Entity::update_many()
            .col_expr(
                Column::ServiceProviderUrl,
                Expr::value(record.service_provider_url.clone()),
            )
            .col_expr(Column::TokenMetadata, Expr::value(metadata))
            .col_expr(Column::DataVersion, Expr::value(record.data_version))
            .col_expr(Column::DataUpdatedAt, Expr::value(record.data_updated_at))
            .col_expr(Column::ResourceVersion, Expr::value(next_version))
            .filter(Column::Namespace.eq(record.key.namespace.clone()))
            .filter(Column::Name.eq(record.key.name.clone()))
            .filter(Column::ResourceVersion.eq(record.resource_version))
            .exec(self.db.as_ref())
            .await?;

        if result.rows_affected == 0 {
            return Err(match self.get(&record.key).await? {
                Some(_) => RecordError::Conflict {
                    namespace: record.key.namespace.clone(),
                    name: record.key.name.clone(),
                },
                None => RecordError::NotFound {
                    namespace: record.key.namespace.clone(),
                    name: record.key.name.clone(),
                },
            });
        }

        Ok(SpiAccessToken {
            resource_version: next_version,
            ..record.clone()
        })
    }
}
