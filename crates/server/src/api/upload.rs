//! Direct token upload endpoint.

use crate::AppState;
use crate::identity::extract_bearer;
use crate::tokenstorage::Token;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use utoipa_axum::{router::OpenApiRouter, routes};

/// Tag for OpenAPI documentation.
pub const TOKEN_TAG: &str = "Token Upload";

pub fn router(state: AppState) -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(upload_token))
        .with_state(state)
}

#[tracing::instrument(skip_all, fields(namespace = %namespace, name = %name))]
#[utoipa::path(
    post,
    path = "/token/{namespace}/{name}",
    params(
        ("namespace" = String, Path, description = "Namespace of the access token record"),
        ("name" = String, Path, description = "Name of the access token record")
    ),
    request_body(content = Token, content_type = "application/json"),
    tag = TOKEN_TAG,
    operation_id = "Upload Token",
    summary = "Store a token without an OAuth flow",
    security(("Authorization" = [])),
    responses(
        (status = 204, description = "Token stored"),
        (status = 400, description = "Malformed token data", body = str, content_type = "text/plain"),
        (status = 401, description = "Missing or rejected credential", body = str, content_type = "text/plain"),
        (status = 403, description = "Caller may not update the access token record", body = str, content_type = "text/plain"),
        (status = 404, description = "Access token record not found", body = str, content_type = "text/plain"),
        (status = 409, description = "Access token record modified concurrently", body = str, content_type = "text/plain"),
        (status = 500, description = "Internal server error", body = str, content_type = "text/plain")
    )
)]
async fn upload_token(
    Path((namespace, name)): Path<(String, String)>,
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let credential = extract_bearer(
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok()),
    );
    match state
        .uploader
        .handle(credential, &namespace, &name, &body)
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response(),
    }
}
