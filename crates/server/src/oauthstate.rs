//! Signed OAuth flow state.
//!
//! The `state` parameter of the OAuth flow carries everything the broker needs to
//! finish the flow, so the broker stays stateless between the Authenticate and the
//! Callback legs. Both variants travel inside an HS256 JWT whose claims are
//! `{kind, iat, exp, state}`. `kind` makes the two variants distinguishable, so a
//! state of the wrong kind is rejected instead of being misparsed.

use crate::error::StateError;
use crate::identity::CallerIdentity;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use time::OffsetDateTime;

/// State created before the flow is bound to a caller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnonymousFlowState {
    pub token_name: String,
    pub token_namespace: String,
    /// Unix seconds.
    pub issued_at: i64,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub service_provider_type: String,
    pub service_provider_url: String,
}

/// [`AnonymousFlowState`] bound to the identity that initiated the flow.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatedFlowState {
    #[serde(flatten)]
    pub anonymous: AnonymousFlowState,
    pub caller_identity: CallerIdentity,
    /// The raw credential presented to Authenticate. Only used for re-validation.
    pub authorization_header: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum StateKind {
    Anonymous,
    Authenticated,
}

impl StateKind {
    fn as_str(self) -> &'static str {
        match self {
            StateKind::Anonymous => "anonymous",
            StateKind::Authenticated => "authenticated",
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    kind: StateKind,
    iat: i64,
    exp: i64,
    state: T,
}

/// Signs and verifies flow states with the process-wide shared secret.
#[derive(Clone)]
pub struct StateCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    max_flow_age: Duration,
}

impl std::fmt::Debug for StateCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateCodec")
            .field("max_flow_age", &self.max_flow_age)
            .finish_non_exhaustive()
    }
}

impl StateCodec {
    pub fn new(secret: &[u8], max_flow_age: Duration) -> Result<Self, StateError> {
        if secret.is_empty() {
            return Err(StateError::Encoding("signing secret is empty".into()));
        }
        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            max_flow_age,
        })
    }

    pub fn encode_anonymous(&self, state: &AnonymousFlowState) -> Result<String, StateError> {
        self.encode(StateKind::Anonymous, state.issued_at, state)
    }

    pub fn decode_anonymous(&self, token: &str) -> Result<AnonymousFlowState, StateError> {
        let state: AnonymousFlowState = self.decode(StateKind::Anonymous, token)?;
        self.check_age(state.issued_at)?;
        Ok(state)
    }

    pub fn encode_authenticated(
        &self,
        state: &AuthenticatedFlowState,
    ) -> Result<String, StateError> {
        self.encode(StateKind::Authenticated, state.anonymous.issued_at, state)
    }

    pub fn decode_authenticated(&self, token: &str) -> Result<AuthenticatedFlowState, StateError> {
        let state: AuthenticatedFlowState = self.decode(StateKind::Authenticated, token)?;
        self.check_age(state.anonymous.issued_at)?;
        Ok(state)
    }

    fn encode<T: Serialize>(
        &self,
        kind: StateKind,
        issued_at: i64,
        state: &T,
    ) -> Result<String, StateError> {
        let envelope = Envelope {
            kind,
            iat: issued_at,
            exp: issued_at.saturating_add(self.max_age_secs()),
            state,
        };
        encode(&Header::new(Algorithm::HS256), &envelope, &self.encoding_key)
            .map_err(|e| StateError::Encoding(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, expected: StateKind, token: &str) -> Result<T, StateError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.required_spec_claims = HashSet::from(["exp".to_string()]);

        let data = decode::<Envelope<serde_json::Value>>(token, &self.decoding_key, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature => StateError::InvalidSignature,
                ErrorKind::ExpiredSignature => StateError::StateExpired,
                _ => StateError::Malformed(e.to_string()),
            })?;

        let envelope = data.claims;
        if envelope.kind != expected {
            return Err(StateError::VariantMismatch {
                expected: expected.as_str(),
                found: envelope.kind.as_str(),
            });
        }
        serde_json::from_value(envelope.state).map_err(|e| StateError::Malformed(e.to_string()))
    }

    fn check_age(&self, issued_at: i64) -> Result<(), StateError> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        if now.saturating_sub(issued_at) > self.max_age_secs() {
            return Err(StateError::StateExpired);
        }
        Ok(())
    }

    fn max_age_secs(&self) -> i64 {
        i64::try_from(self.max_flow_age.as_secs()).unwrap_or(i64::MAX)
    }
}
