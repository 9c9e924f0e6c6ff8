//! Token data persistence.
//!
//! [`TokenStorage`] is the opaque secret store keyed by owner record.
//! [`NotifyingTokenStorage`] wraps any storage and, after every successful write,
//! bumps the owner record's data version so whoever reconciles the record learns
//! that new token data is available.

use crate::entity::spi_access_token_data;
use crate::error::StorageError;
use crate::records::{AccessTokenRecords, ObjectKey, update_with_retry};
use async_trait::async_trait;
use dashmap::DashMap;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ActiveValue::Set, DatabaseConnection, EntityTrait};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use utoipa::ToSchema;

/// Token data as stored and as accepted by the upload endpoint.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Token {
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Unix seconds. 0 when the provider did not say.
    #[serde(default)]
    pub expiry: u64,
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("expiry", &self.expiry)
            .finish()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TokenMetadata {
    pub user_id: String,
    pub username: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

#[async_trait]
pub trait TokenStorage: Send + Sync {
    async fn store(&self, owner: &ObjectKey, token: &Token) -> Result<(), StorageError>;
    async fn get(&self, owner: &ObjectKey) -> Result<Option<Token>, StorageError>;
    async fn delete(&self, owner: &ObjectKey) -> Result<(), StorageError>;
}

/// Token data kept in the `spi_access_token_data` table.
#[derive(Clone)]
pub struct DbTokenStorage {
    db: Arc<DatabaseConnection>,
}

impl DbTokenStorage {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TokenStorage for DbTokenStorage {
    async fn store(&self, owner: &ObjectKey, token: &Token) -> Result<(), StorageError> {
        use spi_access_token_data::Column;

        let model = spi_access_token_data::ActiveModel {
            namespace: Set(owner.namespace.clone()),
            name: Set(owner.name.clone()),
            access_token: Set(token.access_token.clone()),
            token_type: Set(token.token_type.clone()),
            refresh_token: Set(token.refresh_token.clone()),
            expiry: Set(i64::try_from(token.expiry).unwrap_or(i64::MAX)),
            updated_at: Set(OffsetDateTime::now_utc()),
        };

        spi_access_token_data::Entity::insert(model)
            .on_conflict(
                OnConflict::columns([Column::Namespace, Column::Name])
                    .update_columns([
                        Column::AccessToken,
                        Column::TokenType,
                        Column::RefreshToken,
                        Column::Expiry,
                        Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(self.db.as_ref())
            .await?;
        Ok(())
    }

    async fn get(&self, owner: &ObjectKey) -> Result<Option<Token>, StorageError> {
        let row = spi_access_token_data::Entity::find_by_id((
            owner.namespace.clone(),
            owner.name.clone(),
        ))
        .one(self.db.as_ref())
        .await?;

        Ok(row.map(|r| Token {
            access_token: r.access_token,
            token_type: r.token_type,
            refresh_token: r.refresh_token,
            expiry: u64::try_from(r.expiry).unwrap_or_default(),
        }))
    }

    async fn delete(&self, owner: &ObjectKey) -> Result<(), StorageError> {
        spi_access_token_data::Entity::delete_by_id((owner.namespace.clone(), owner.name.clone()))
            .exec(self.db.as_ref())
            .await?;
        Ok(())
    }
}

/// Storage decorator that notifies the owner record after each change of its token data.
///
/// Changes to the same owner are serialized, so the notifications arrive in write
/// order. Different owners do not contend.
#[derive(Clone)]
pub struct NotifyingTokenStorage {
    records: Arc<dyn AccessTokenRecords>,
    storage: Arc<dyn TokenStorage>,
    locks: Arc<DashMap<ObjectKey, Arc<Mutex<()>>>>,
}

impl NotifyingTokenStorage {
    pub fn new(records: Arc<dyn AccessTokenRecords>, storage: Arc<dyn TokenStorage>) -> Self {
        Self {
            records,
            storage,
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Number of owners with a change in progress or queued.
    pub fn active_owners(&self) -> usize {
        self.locks.len()
    }

    /// Run `change` while holding the lock of `owner`.
    ///
    /// The lock entry is dropped again once no other change of that owner is queued.
    async fn serialized<F>(&self, owner: &ObjectKey, change: F) -> Result<(), StorageError>
    where
        F: Future<Output = Result<(), StorageError>>,
    {
        let lock = self.locks.entry(owner.clone()).or_default().clone();
        let result = {
            let _guard = lock.lock().await;
            change.await
        };
        // One reference is held by the map, one by this call.
        self.locks
            .remove_if(owner, |_, l| Arc::ptr_eq(l, &lock) && Arc::strong_count(l) == 2);
        result
    }

    async fn notify(&self, owner: &ObjectKey) -> Result<(), StorageError> {
        let now = OffsetDateTime::now_utc();
        let record = update_with_retry(self.records.as_ref(), owner, |record| {
            record.data_version += 1;
            record.data_updated_at = Some(now);
        })
        .await?;
        tracing::debug!(owner = %owner, data_version = record.data_version, "notified access token record");
        Ok(())
    }
}

#[async_trait]
impl TokenStorage for NotifyingTokenStorage {
    async fn store(&self, owner: &ObjectKey, token: &Token) -> Result<(), StorageError> {
        self.serialized(owner, async {
            self.storage.store(owner, token).await?;
            self.notify(owner).await
        })
        .await
    }

    async fn get(&self, owner: &ObjectKey) -> Result<Option<Token>, StorageError> {
        self.storage.get(owner).await
    }

    async fn delete(&self, owner: &ObjectKey) -> Result<(), StorageError> {
        self.serialized(owner, async {
            self.storage.delete(owner).await?;
            self.notify(owner).await
        })
        .await
    }
}
