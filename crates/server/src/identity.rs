//! Caller identity and its resolution against the cluster.
//!
//! Deciding who a credential belongs to is delegated to the cluster's own
//! authentication subsystem through the [`Authenticator`] trait. The broker only
//! captures the raw credential and the resulting identity facts so the Callback leg
//! can compare them with the Authenticate leg.

use crate::config::{ConfigError, KubernetesConfig};
use crate::error::AuthenticationError;
use crate::records::ObjectKey;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};

/// Identity facts of whoever presented a credential.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    pub username: String,
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub extra: BTreeMap<String, Vec<String>>,
}

impl CallerIdentity {
    /// Compare two identities ignoring the order of groups and of extra attribute values.
    pub fn matches(&self, other: &CallerIdentity) -> bool {
        if self.username != other.username || self.uid != other.uid {
            return false;
        }
        if as_set(&self.groups) != as_set(&other.groups) {
            return false;
        }
        if !self.extra.keys().eq(other.extra.keys()) {
            return false;
        }
        self.extra
            .iter()
            .zip(other.extra.values())
            .all(|((_, a), b)| as_set(a) == as_set(b))
    }
}

fn as_set(values: &[String]) -> BTreeSet<&str> {
    values.iter().map(String::as_str).collect()
}

/// Strip the `Bearer` scheme, matched case-insensitively, from an `Authorization` header value.
pub fn extract_bearer(header: Option<&str>) -> Option<&str> {
    let (scheme, credential) = header?.trim_start().split_once(' ')?;
    let credential = credential.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !credential.is_empty()).then_some(credential)
}

/// Resolves a raw bearer credential to the identity the cluster associates with it,
/// and asks the cluster what that identity may do with access token records.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, credential: &str) -> Result<CallerIdentity, AuthenticationError>;

    /// Whether `identity` may perform `verb` on the access token record `owner`.
    async fn authorize(
        &self,
        identity: &CallerIdentity,
        verb: &str,
        owner: &ObjectKey,
    ) -> Result<bool, AuthenticationError>;
}

/// Authenticator backed by the Kubernetes `TokenReview` and `SubjectAccessReview` APIs.
pub struct TokenReviewAuthenticator {
    client: reqwest::Client,
    api_server: String,
    bearer: Option<String>,
    audiences: Vec<String>,
}

const TOKEN_REVIEW_PATH: &str = "/apis/authentication.k8s.io/v1/tokenreviews";
const ACCESS_REVIEW_PATH: &str = "/apis/authorization.k8s.io/v1/subjectaccessreviews";
const ACCESS_TOKEN_GROUP: &str = "appstudio.redhat.com";
const ACCESS_TOKEN_RESOURCE: &str = "spiaccesstokens";

#[derive(Deserialize)]
struct TokenReview {
    #[serde(default)]
    status: TokenReviewStatus,
}

#[derive(Default, Deserialize)]
struct TokenReviewStatus {
    #[serde(default)]
    authenticated: bool,
    #[serde(default)]
    user: Option<CallerIdentity>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct AccessReview {
    #[serde(default)]
    status: AccessReviewStatus,
}

#[derive(Default, Deserialize)]
struct AccessReviewStatus {
    #[serde(default)]
    allowed: bool,
    #[serde(default)]
    reason: Option<String>,
}

impl TokenReviewAuthenticator {
    pub fn new(
        client: reqwest::Client,
        api_server: impl Into<String>,
        bearer: Option<String>,
        audiences: Vec<String>,
    ) -> Self {
        Self {
            client,
            api_server: api_server.into(),
            bearer,
            audiences,
        }
    }

    pub fn from_config(config: &KubernetesConfig) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(|e| ConfigError::Validation(format!("kubernetes client: {e}")))?;
        Ok(Self::new(
            client,
            config.api_server.clone(),
            config.bearer_token()?,
            config.audiences.clone(),
        ))
    }

    /// POST a review object to the API server and decode the answered review.
    async fn review<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, AuthenticationError> {
        let url = format!("{}{path}", self.api_server.trim_end_matches('/'));
        let mut request = self.client.post(url).json(body);
        if let Some(bearer) = &self.bearer {
            request = request.bearer_auth(bearer);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AuthenticationError::Backend(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(AuthenticationError::Backend(format!(
                "{path} returned HTTP {status}"
            )));
        }
        response
            .json()
            .await
            .map_err(|e| AuthenticationError::Backend(e.to_string()))
    }
}

#[async_trait]
impl Authenticator for TokenReviewAuthenticator {
    async fn authenticate(&self, credential: &str) -> Result<CallerIdentity, AuthenticationError> {
        let mut spec = json!({ "token": credential });
        if !self.audiences.is_empty() {
            spec["audiences"] = json!(self.audiences);
        }
        let body = json!({
            "apiVersion": "authentication.k8s.io/v1",
            "kind": "TokenReview",
            "spec": spec,
        });

        let review: TokenReview = self.review(TOKEN_REVIEW_PATH, &body).await?;
        match review.status {
            TokenReviewStatus {
                authenticated: true,
                user: Some(user),
                ..
            } => Ok(user),
            TokenReviewStatus { error, .. } => {
                tracing::debug!(error = ?error, "token review did not authenticate the credential");
                Err(AuthenticationError::Rejected)
            }
        }
    }

    async fn authorize(
        &self,
        identity: &CallerIdentity,
        verb: &str,
        owner: &ObjectKey,
    ) -> Result<bool, AuthenticationError> {
        let body = json!({
            "apiVersion": "authorization.k8s.io/v1",
            "kind": "SubjectAccessReview",
            "spec": {
                "user": identity.username,
                "uid": identity.uid,
                "groups": identity.groups,
                "extra": identity.extra,
                "resourceAttributes": {
                    "namespace": owner.namespace,
                    "name": owner.name,
                    "verb": verb,
                    "group": ACCESS_TOKEN_GROUP,
                    "resource": ACCESS_TOKEN_RESOURCE,
                },
            },
        });

        let review: AccessReview = self.review(ACCESS_REVIEW_PATH, &body).await?;
        if !review.status.allowed {
            tracing::debug!(
                user = %identity.username,
                owner = %owner,
                verb,
                reason = ?review.status.reason,
                "access review denied"
            );
        }
        Ok(review.status.allowed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(groups: &[&str], extra: &[(&str, &[&str])]) -> CallerIdentity {
        CallerIdentity {
            username: "system:serviceaccount:ns:default".into(),
            uid: "1234".into(),
            groups: groups.iter().map(|g| g.to_string()).collect(),
            extra: extra
                .iter()
                .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
                .collect(),
        }
    }

    #[test]
    fn group_and_extra_order_is_ignored() {
        let a = identity(&["a", "b"], &[("scopes", &["x", "y"])]);
        let b = identity(&["b", "a"], &[("scopes", &["y", "x"])]);
        assert!(a.matches(&b));
    }

    #[test]
    fn differing_uid_does_not_match() {
        let a = identity(&["a"], &[]);
        let mut b = a.clone();
        b.uid = "other".into();
        assert!(!a.matches(&b));
    }

    #[test]
    fn extra_key_on_one_side_does_not_match() {
        let a = identity(&["a"], &[]);
        let b = identity(&["a"], &[("scopes", &["x"])]);
        assert!(!a.matches(&b));
        assert!(!b.matches(&a));
    }

    #[test]
    fn bearer_extraction() {
        assert_eq!(extract_bearer(Some("Bearer abc")), Some("abc"));
        assert_eq!(extract_bearer(Some("Basic abc")), None);
        assert_eq!(extract_bearer(Some("Bearer ")), None);
        assert_eq!(extract_bearer(Some("bearer abc")), Some("abc"));
        assert_eq!(extract_bearer(Some("BEARER  abc ")), Some("abc"));
        assert_eq!(extract_bearer(Some("Bearerabc")), None);
        assert_eq!(extract_bearer(None), None);
    }
}
