//! Built-in service providers.
//!
//! Each provider is pure data plus one metadata function. Adding a provider means
//! adding a [`ServiceProviderType`] variant and one [`ProviderCapability`] entry.

use crate::error::ProviderError;
use crate::tokenstorage::{Token, TokenMetadata};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceProviderType {
    GitHub,
    Quay,
}

impl ServiceProviderType {
    pub const ALL: [ServiceProviderType; 2] = [ServiceProviderType::GitHub, ServiceProviderType::Quay];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceProviderType::GitHub => "GitHub",
            ServiceProviderType::Quay => "Quay",
        }
    }

    /// Path segment under which the provider's endpoints are served.
    pub fn path_segment(&self) -> String {
        self.as_str().to_lowercase()
    }
}

impl fmt::Display for ServiceProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceProviderType {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ProviderError::UnsupportedProvider(s.to_string()))
    }
}

/// Resolved endpoints of one provider instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderEndpoint {
    pub auth_url: String,
    pub token_url: String,
    /// Base of the REST API used for user metadata.
    pub api_url: String,
}

pub type RetrieveUserMetadata = for<'a> fn(
    &'a reqwest::Client,
    &'a ProviderEndpoint,
    &'a Token,
) -> BoxFuture<'a, Result<TokenMetadata, ProviderError>>;

pub struct ProviderCapability {
    pub provider_type: ServiceProviderType,
    default_base_url: &'static str,
    default_api_url: &'static str,
    authorize_path: &'static str,
    token_path: &'static str,
    /// API location relative to a self-hosted base URL.
    self_hosted_api_path: &'static str,
    pub retrieve_user_metadata: RetrieveUserMetadata,
}

impl ProviderCapability {
    /// Endpoints of the public instance, or of a self-hosted one at `base_url`.
    pub fn endpoint(&self, base_url: Option<&str>) -> ProviderEndpoint {
        match base_url.map(|b| b.trim_end_matches('/')) {
            Some(base) if !base.is_empty() => ProviderEndpoint {
                auth_url: format!("{base}{}", self.authorize_path),
                token_url: format!("{base}{}", self.token_path),
                api_url: format!("{base}{}", self.self_hosted_api_path),
            },
            _ => ProviderEndpoint {
                auth_url: format!("{}{}", self.default_base_url, self.authorize_path),
                token_url: format!("{}{}", self.default_base_url, self.token_path),
                api_url: self.default_api_url.to_string(),
            },
        }
    }
}

static GITHUB: ProviderCapability = ProviderCapability {
    provider_type: ServiceProviderType::GitHub,
    default_base_url: "https://github.com",
    default_api_url: "https://api.github.com",
    authorize_path: "/login/oauth/authorize",
    token_path: "/login/oauth/access_token",
    self_hosted_api_path: "/api/v3",
    retrieve_user_metadata: github_user_metadata,
};

static QUAY: ProviderCapability = ProviderCapability {
    provider_type: ServiceProviderType::Quay,
    default_base_url: "https://quay.io",
    default_api_url: "https://quay.io/api/v1",
    authorize_path: "/oauth/authorize",
    token_path: "/oauth/token",
    self_hosted_api_path: "/api/v1",
    retrieve_user_metadata: quay_user_metadata,
};

pub fn capability(provider_type: ServiceProviderType) -> &'static ProviderCapability {
    match provider_type {
        ServiceProviderType::GitHub => &GITHUB,
        ServiceProviderType::Quay => &QUAY,
    }
}

/// Look a provider up by its type identifier, as found in flow states and URLs.
pub fn lookup(provider_type: &str) -> Result<&'static ProviderCapability, ProviderError> {
    provider_type.parse().map(capability)
}

async fn get_user_json(
    client: &reqwest::Client,
    url: String,
    token: &Token,
) -> Result<serde_json::Value, ProviderError> {
    let response = client
        .get(url)
        .bearer_auth(&token.access_token)
        .header(reqwest::header::ACCEPT, "application/json")
        .header(reqwest::header::USER_AGENT, concat!("spi-oauth/", env!("CARGO_PKG_VERSION")))
        .send()
        .await?;
    let status = response.status();
    if !status.is_success() {
        let context = response.text().await.unwrap_or_default();
        return Err(ProviderError::Status { status, context });
    }
    Ok(response.json().await?)
}

fn github_user_metadata<'a>(
    client: &'a reqwest::Client,
    endpoint: &'a ProviderEndpoint,
    token: &'a Token,
) -> BoxFuture<'a, Result<TokenMetadata, ProviderError>> {
    Box::pin(async move {
        let user = get_user_json(client, format!("{}/user", endpoint.api_url), token).await?;
        let username = user["login"]
            .as_str()
            .ok_or_else(|| ProviderError::InvalidResponse("GitHub user has no login".into()))?;
        let user_id = match &user["id"] {
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::String(s) => s.clone(),
            _ => return Err(ProviderError::InvalidResponse("GitHub user has no id".into())),
        };
        Ok(TokenMetadata {
            user_id,
            username: username.to_string(),
            scopes: Vec::new(),
        })
    })
}

fn quay_user_metadata<'a>(
    client: &'a reqwest::Client,
    endpoint: &'a ProviderEndpoint,
    token: &'a Token,
) -> BoxFuture<'a, Result<TokenMetadata, ProviderError>> {
    Box::pin(async move {
        let user = get_user_json(client, format!("{}/user", endpoint.api_url), token).await?;
        let username = user["username"]
            .as_str()
            .ok_or_else(|| ProviderError::InvalidResponse("Quay user has no username".into()))?;
        // Quay does not expose a numeric id for users; the username is unique.
        Ok(TokenMetadata {
            user_id: username.to_string(),
            username: username.to_string(),
            scopes: Vec::new(),
        })
    })
}
