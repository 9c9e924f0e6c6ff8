//! Direct token upload, bypassing the OAuth flow.

use crate::error::{AuthenticationError, UploadError};
use crate::identity::Authenticator;
use crate::records::{AccessTokenRecords, ObjectKey};
use crate::tokenstorage::{NotifyingTokenStorage, Token, TokenStorage};
use std::sync::Arc;

/// Access the uploader must hold on the target record.
const UPLOAD_VERB: &str = "update";

#[derive(Clone)]
pub struct TokenUploader {
    authenticator: Arc<dyn Authenticator>,
    records: Arc<dyn AccessTokenRecords>,
    storage: NotifyingTokenStorage,
}

impl TokenUploader {
    pub fn new(
        authenticator: Arc<dyn Authenticator>,
        records: Arc<dyn AccessTokenRecords>,
        storage: NotifyingTokenStorage,
    ) -> Self {
        Self {
            authenticator,
            records,
            storage,
        }
    }

    /// Store `body` as the token data of the record `namespace/name`.
    ///
    /// The cluster decides whether the caller may update that record.
    pub async fn handle(
        &self,
        credential: Option<&str>,
        namespace: &str,
        name: &str,
        body: &[u8],
    ) -> Result<(), UploadError> {
        let credential = credential.ok_or(AuthenticationError::MissingCredential)?;
        let identity = self.authenticator.authenticate(credential).await?;

        let owner = ObjectKey::new(namespace, name);
        if !self
            .authenticator
            .authorize(&identity, UPLOAD_VERB, &owner)
            .await?
        {
            return Err(UploadError::Forbidden {
                user: identity.username,
                namespace: owner.namespace,
                name: owner.name,
            });
        }
        if self.records.get(&owner).await?.is_none() {
            return Err(UploadError::RecordNotFound {
                namespace: owner.namespace,
                name: owner.name,
            });
        }

        let token: Token = serde_json::from_slice(body)?;
        self.storage.store(&owner, &token).await?;

        tracing::info!(owner = %owner, user = %identity.username, "stored uploaded token");
        Ok(())
    }
}
