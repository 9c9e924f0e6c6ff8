use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Failures of the signed OAuth state codec.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("OAuth state signature is invalid")]
    InvalidSignature,
    #[error("OAuth state is malformed: {0}")]
    Malformed(String),
    #[error("OAuth state is of kind {found}, expected {expected}")]
    VariantMismatch {
        expected: &'static str,
        found: &'static str,
    },
    #[error("OAuth state expired")]
    StateExpired,
    #[error("OAuth state targets service provider {found}, expected {expected}")]
    ProviderMismatch { expected: String, found: String },
    #[error("Failed to encode OAuth state: {0}")]
    Encoding(String),
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Unsupported service provider type: {0}")]
    UnsupportedProvider(String),
    #[error("HTTP request to service provider failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Service provider responded with HTTP {status}: {context}")]
    Status { status: StatusCode, context: String },
    #[error("Invalid response from service provider: {0}")]
    InvalidResponse(String),
}

/// Failures of the owner record API. Mirrors the status semantics of the cluster API.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("Access token record {namespace}/{name} not found")]
    NotFound { namespace: String, name: String },
    #[error("Access token record {namespace}/{name} was modified concurrently")]
    Conflict { namespace: String, name: String },
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),
    #[error("Failed to (de)serialize record data: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RecordError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            RecordError::NotFound { .. } => StatusCode::NOT_FOUND,
            RecordError::Conflict { .. } => StatusCode::CONFLICT,
            RecordError::Database(_) | RecordError::Serialization(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Token storage backend failed: {0}")]
    Backend(#[from] sea_orm::DbErr),
    #[error("Failed to notify the access token record: {0}")]
    Record(#[from] RecordError),
}

#[derive(Debug, Error)]
pub enum AuthenticationError {
    #[error("No credential found in the Authorization header or the k8s_token parameter")]
    MissingCredential,
    #[error("Credential was rejected by the cluster")]
    Rejected,
    #[error("Token review failed: {0}")]
    Backend(String),
}

/// Terminal failures of the Authenticate and Callback legs of an OAuth flow.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("failed to decode the OAuth state: {0}")]
    InvalidState(StateError),
    #[error("failed to authenticate the request in Kubernetes: {0}")]
    UnauthenticatedCaller(#[from] AuthenticationError),
    #[error("Kubernetes identity doesn't match after completing the OAuth flow")]
    IdentityMismatch,
    #[error("error in Service Provider token exchange: {0}")]
    ExchangeFailed(String),
    #[error("failed to get Service Provider user: {0}")]
    MetadataFailed(#[source] ProviderError),
    #[error("access token record {namespace}/{name} does not exist")]
    RecordNotFound { namespace: String, name: String },
    #[error("failed to store token data to cluster: {0}")]
    PersistFailed(String),
    #[error("unsupported service provider: {0}")]
    UnsupportedProvider(String),
    #[error("failed to encode OAuth state: {0}")]
    Encoding(StateError),
}

impl FlowError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            FlowError::InvalidState(_) | FlowError::ExchangeFailed(_) => StatusCode::BAD_REQUEST,
            FlowError::UnauthenticatedCaller(_) | FlowError::IdentityMismatch => {
                StatusCode::UNAUTHORIZED
            }
            FlowError::UnsupportedProvider(_) => StatusCode::NOT_FOUND,
            FlowError::MetadataFailed(_)
            | FlowError::RecordNotFound { .. }
            | FlowError::PersistFailed(_)
            | FlowError::Encoding(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("failed to authenticate the upload request: {0}")]
    Unauthenticated(#[from] AuthenticationError),
    #[error("{user} may not update access token record {namespace}/{name}")]
    Forbidden {
        user: String,
        namespace: String,
        name: String,
    },
    #[error("access token record {namespace}/{name} not found")]
    RecordNotFound { namespace: String, name: String },
    #[error("malformed token data: {0}")]
    MalformedBody(#[from] serde_json::Error),
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl UploadError {
    /// Status to report to the uploader, preferring the one embedded in record-layer failures.
    pub fn status_code(&self) -> StatusCode {
        match self {
            UploadError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            UploadError::Forbidden { .. } => StatusCode::FORBIDDEN,
            UploadError::RecordNotFound { .. } => StatusCode::NOT_FOUND,
            UploadError::MalformedBody(_) => StatusCode::BAD_REQUEST,
            UploadError::Record(e) => e.status_code(),
            UploadError::Storage(StorageError::Record(e)) => e.status_code(),
            UploadError::Storage(StorageError::Backend(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Log a terminal request failure and render it as `<short message>: <error>` plain text.
fn failure_response(status: StatusCode, message: String) -> Response {
    if status.is_server_error() {
        tracing::error!(%status, error = %message, "request failed");
    } else {
        tracing::warn!(%status, error = %message, "request rejected");
    }
    (status, message).into_response()
}

impl IntoResponse for FlowError {
    fn into_response(self) -> Response {
        failure_response(self.status_code(), self.to_string())
    }
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        failure_response(self.status_code(), self.to_string())
    }
}
