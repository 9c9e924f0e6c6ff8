//! OAuth broker for cluster-managed service provider access tokens.
//!
//! Users are sent through the OAuth flow of a service provider (GitHub, Quay) and
//! the resulting token is stored for an access token record in the cluster. Tokens
//! can also be uploaded directly.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{ConfigError, ServiceProviderConfiguration};
use crate::controller::{FlowDependencies, OAuthController};
use crate::error::FlowError;
use crate::providers::ServiceProviderType;
use crate::upload::TokenUploader;

pub mod api;
pub mod config;
pub mod controller;
pub mod entity;
pub mod error;
pub mod identity;
pub mod oauthstate;
pub mod providers;
pub mod records;
pub mod tokenstorage;
pub mod upload;

/// Shared state of the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub controllers: Arc<HashMap<ServiceProviderType, Arc<OAuthController>>>,
    pub uploader: TokenUploader,
}

impl AppState {
    /// One controller per configured provider, all sharing `deps`.
    pub fn new(
        service_providers: &[ServiceProviderConfiguration],
        deps: FlowDependencies,
    ) -> Result<Self, ConfigError> {
        let mut controllers = HashMap::new();
        for sp in service_providers {
            let controller = OAuthController::new(sp.clone(), deps.clone())?;
            controllers.insert(sp.service_provider_type, Arc::new(controller));
        }
        let uploader = TokenUploader::new(deps.authenticator, deps.records, deps.storage);
        Ok(Self {
            controllers: Arc::new(controllers),
            uploader,
        })
    }

    /// The controller serving the `{provider}` path segment.
    pub fn controller(&self, provider: &str) -> Result<&OAuthController, FlowError> {
        provider
            .parse::<ServiceProviderType>()
            .ok()
            .and_then(|t| self.controllers.get(&t))
            .map(Arc::as_ref)
            .ok_or_else(|| FlowError::UnsupportedProvider(provider.to_string()))
    }
}
