//! The OAuth flow of a single service provider.
//!
//! Authenticate binds an anonymous flow state to the caller's cluster identity and
//! sends the browser to the provider. Callback verifies the state (and, in strict
//! mode, the identity again), exchanges the authorization code and persists the
//! token for the owner record named in the state.

use crate::config::{ConfigError, ServiceProviderConfiguration};
use crate::error::{AuthenticationError, FlowError, StateError};
use crate::identity::{Authenticator, extract_bearer};
use crate::oauthstate::{AuthenticatedFlowState, StateCodec};
use crate::providers::{ProviderCapability, ProviderEndpoint, ServiceProviderType, capability};
use crate::records::{AccessTokenRecords, ObjectKey, update_with_retry};
use crate::tokenstorage::{NotifyingTokenStorage, Token, TokenMetadata, TokenStorage};
use serde::Deserialize;
use std::sync::Arc;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use url::Url;
use utoipa::IntoParams;

/// Everything the controllers of all providers share.
#[derive(Clone)]
pub struct FlowDependencies {
    pub codec: StateCodec,
    pub http: reqwest::Client,
    pub authenticator: Arc<dyn Authenticator>,
    pub records: Arc<dyn AccessTokenRecords>,
    pub storage: NotifyingTokenStorage,
    /// Externally reachable URL of this service.
    pub base_url: String,
    pub strict_identity_check: bool,
}

#[derive(Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AuthenticateParams {
    /// Anonymous flow state issued by the cluster.
    #[serde(default)]
    pub state: String,
    /// Cluster credential, for clients that cannot set the Authorization header.
    #[serde(default)]
    pub k8s_token: Option<String>,
}

#[derive(Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CallbackParams {
    /// Authenticated flow state issued by Authenticate.
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub code: Option<String>,
    /// Passed through to the token exchange. Some providers want it there.
    #[serde(default)]
    pub scope: Option<String>,
    /// Where to send the browser after a successful flow.
    #[serde(default)]
    pub redirect_after_login: Option<String>,
    #[serde(default)]
    pub k8s_token: Option<String>,
    /// Set by the provider when the user denied consent.
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

pub struct OAuthController {
    config: ServiceProviderConfiguration,
    capability: &'static ProviderCapability,
    endpoint: ProviderEndpoint,
    auth_url: Url,
    deps: FlowDependencies,
}

impl OAuthController {
    pub fn new(
        config: ServiceProviderConfiguration,
        deps: FlowDependencies,
    ) -> Result<Self, ConfigError> {
        let capability = capability(config.service_provider_type);
        let endpoint = capability.endpoint(config.base_url.as_deref());
        let auth_url = Url::parse(&endpoint.auth_url).map_err(|e| {
            ConfigError::Validation(format!(
                "invalid authorization URL {} for {}: {e}",
                endpoint.auth_url, config.service_provider_type
            ))
        })?;
        Ok(Self {
            config,
            capability,
            endpoint,
            auth_url,
            deps,
        })
    }

    pub fn provider_type(&self) -> ServiceProviderType {
        self.config.service_provider_type
    }

    pub fn endpoint(&self) -> &ProviderEndpoint {
        &self.endpoint
    }

    /// The callback URL registered with the provider.
    pub fn redirect_url(&self) -> String {
        format!(
            "{}/{}/callback",
            self.deps.base_url.trim_end_matches('/'),
            self.provider_type().path_segment()
        )
    }

    /// Start the flow. Returns the provider authorization URL to redirect to.
    pub async fn authenticate(
        &self,
        params: &AuthenticateParams,
        authorization: Option<&str>,
    ) -> Result<String, FlowError> {
        let state = self
            .deps
            .codec
            .decode_anonymous(&params.state)
            .map_err(FlowError::InvalidState)?;
        self.check_provider(&state.service_provider_type)?;

        let credential = request_credential(authorization, params.k8s_token.as_deref())
            .ok_or(AuthenticationError::MissingCredential)?;
        let identity = self.deps.authenticator.authenticate(credential).await?;

        let authed = AuthenticatedFlowState {
            anonymous: state,
            caller_identity: identity,
            authorization_header: credential.to_string(),
        };
        let encoded = self
            .deps
            .codec
            .encode_authenticated(&authed)
            .map_err(FlowError::Encoding)?;

        tracing::debug!(
            provider = %self.provider_type(),
            owner = %owner_of(&authed),
            user = %authed.caller_identity.username,
            "redirecting to service provider"
        );
        Ok(self.authorization_url(&authed.anonymous.scopes, &encoded))
    }

    /// Finish the flow. Returns where to send the browser afterwards.
    pub async fn callback(
        &self,
        params: &CallbackParams,
        authorization: Option<&str>,
    ) -> Result<String, FlowError> {
        let state = self
            .deps
            .codec
            .decode_authenticated(&params.state)
            .map_err(FlowError::InvalidState)?;
        self.check_provider(&state.anonymous.service_provider_type)?;
        let owner = owner_of(&state);

        if self.deps.strict_identity_check {
            let credential = request_credential(authorization, params.k8s_token.as_deref())
                .unwrap_or(&state.authorization_header);
            self.revalidate_identity(&state, credential).await?;
        }

        if let Some(error) = &params.error {
            let description = params.error_description.as_deref().unwrap_or_default();
            return Err(FlowError::ExchangeFailed(
                format!("{error} {description}").trim_end().to_string(),
            ));
        }
        let code = params
            .code
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| FlowError::ExchangeFailed("missing authorization code".into()))?;

        let token = self.exchange(code, params.scope.as_deref()).await?;

        let mut metadata =
            (self.capability.retrieve_user_metadata)(&self.deps.http, &self.endpoint, &token)
                .await
                .map_err(FlowError::MetadataFailed)?;
        metadata.scopes = state.anonymous.scopes.clone();

        self.sync_token_data(&owner, &token, metadata).await?;
        tracing::info!(
            provider = %self.provider_type(),
            owner = %owner,
            "stored token obtained by OAuth flow"
        );

        Ok(match params.redirect_after_login.as_deref() {
            Some(location) if !location.is_empty() => location.to_string(),
            _ => format!(
                "{}/callback_success",
                self.deps.base_url.trim_end_matches('/')
            ),
        })
    }

    /// A state may only be redeemed at the endpoints of the provider it names.
    fn check_provider(&self, provider: &str) -> Result<(), FlowError> {
        match provider.parse::<ServiceProviderType>() {
            Ok(t) if t == self.provider_type() => Ok(()),
            _ => Err(FlowError::InvalidState(StateError::ProviderMismatch {
                expected: self.provider_type().to_string(),
                found: provider.to_string(),
            })),
        }
    }

    fn authorization_url(&self, scopes: &[String], state: &str) -> String {
        let mut url = self.auth_url.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &self.config.client_id)
                .append_pair("redirect_uri", &self.redirect_url());
            if !scopes.is_empty() {
                query.append_pair("scope", &scopes.join(" "));
            }
            query.append_pair("state", state);
        }
        url.into()
    }

    async fn revalidate_identity(
        &self,
        state: &AuthenticatedFlowState,
        credential: &str,
    ) -> Result<(), FlowError> {
        let current = self
            .deps
            .authenticator
            .authenticate(credential)
            .await
            .map_err(|e| {
                tracing::warn!(provider = %self.provider_type(), error = %e, "re-authentication at callback failed");
                FlowError::IdentityMismatch
            })?;
        if !state.caller_identity.matches(&current) {
            tracing::warn!(
                provider = %self.provider_type(),
                expected = %state.caller_identity.username,
                actual = %current.username,
                "caller identity changed during the OAuth flow"
            );
            return Err(FlowError::IdentityMismatch);
        }
        Ok(())
    }

    async fn exchange(&self, code: &str, scope: Option<&str>) -> Result<Token, FlowError> {
        let redirect_uri = self.redirect_url();
        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri.as_str()),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];
        if let Some(scope) = scope.filter(|s| !s.is_empty()) {
            form.push(("scope", scope));
        }

        let response = self
            .deps
            .http
            .post(&self.endpoint.token_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&form)
            .send()
            .await
            .map_err(|e| FlowError::ExchangeFailed(e.to_string()))?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response
            .text()
            .await
            .map_err(|e| FlowError::ExchangeFailed(e.to_string()))?;

        if !status.is_success() {
            return Err(FlowError::ExchangeFailed(format!(
                "token endpoint returned HTTP {status}: {body}"
            )));
        }
        parse_token_response(&content_type, &body, OffsetDateTime::now_utc().unix_timestamp())
    }

    async fn sync_token_data(
        &self,
        owner: &ObjectKey,
        token: &Token,
        metadata: TokenMetadata,
    ) -> Result<(), FlowError> {
        let records = self.deps.records.as_ref();
        match records.get(owner).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                return Err(FlowError::RecordNotFound {
                    namespace: owner.namespace.clone(),
                    name: owner.name.clone(),
                });
            }
            Err(e) => return Err(FlowError::PersistFailed(e.to_string())),
        }

        self.deps
            .storage
            .store(owner, token)
            .await
            .map_err(|e| FlowError::PersistFailed(e.to_string()))?;

        update_with_retry(records, owner, |record| {
            record.token_metadata = Some(metadata.clone());
        })
        .await
        .map_err(|e| FlowError::PersistFailed(e.to_string()))?;
        Ok(())
    }
}

fn owner_of(state: &AuthenticatedFlowState) -> ObjectKey {
    ObjectKey::new(
        state.anonymous.token_namespace.clone(),
        state.anonymous.token_name.clone(),
    )
}

/// The bearer credential of the request: the Authorization header, else the `k8s_token` field.
pub fn request_credential<'a>(
    authorization: Option<&'a str>,
    k8s_token: Option<&'a str>,
) -> Option<&'a str> {
    extract_bearer(authorization).or_else(|| k8s_token.map(str::trim).filter(|t| !t.is_empty()))
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<serde_json::Value>,
    /// Absolute expiry, unix seconds or RFC 3339. Some providers send this instead of `expires_in`.
    #[serde(default)]
    expiry: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// Parse a token endpoint response body, JSON or form-encoded.
fn parse_token_response(content_type: &str, body: &str, now: i64) -> Result<Token, FlowError> {
    let is_form = content_type.starts_with("application/x-www-form-urlencoded")
        || content_type.starts_with("text/plain");
    let parsed = if is_form {
        let fields: serde_json::Map<String, serde_json::Value> =
            url::form_urlencoded::parse(body.as_bytes())
                .map(|(k, v)| (k.into_owned(), serde_json::Value::String(v.into_owned())))
                .collect();
        serde_json::from_value::<TokenResponse>(serde_json::Value::Object(fields))
    } else {
        serde_json::from_str::<TokenResponse>(body)
    };
    let response = parsed.map_err(invalid_body)?;

    if let Some(error) = response.error.filter(|e| !e.is_empty()) {
        let description = response.error_description.unwrap_or_default();
        return Err(FlowError::ExchangeFailed(
            format!("{error} {description}").trim_end().to_string(),
        ));
    }
    let access_token = response
        .access_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| FlowError::ExchangeFailed("server response missing access_token".into()))?;

    let expiry = match seconds(response.expires_in.as_ref()) {
        Some(expires_in) if expires_in > 0 => now.saturating_add(expires_in),
        _ => match response.expiry {
            Some(serde_json::Value::String(s)) => OffsetDateTime::parse(&s, &Rfc3339)
                .map(OffsetDateTime::unix_timestamp)
                .or_else(|_| s.parse())
                .unwrap_or_default(),
            other => seconds(other.as_ref()).unwrap_or_default(),
        },
    };
    let expiry = u64::try_from(expiry).unwrap_or_default();

    Ok(Token {
        access_token,
        token_type: response.token_type.unwrap_or_default(),
        refresh_token: response.refresh_token.filter(|t| !t.is_empty()),
        expiry,
    })
}

fn seconds(value: Option<&serde_json::Value>) -> Option<i64> {
    match value? {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn invalid_body(e: serde_json::Error) -> FlowError {
    FlowError::ExchangeFailed(format!("malformed token response: {e}"))
}
