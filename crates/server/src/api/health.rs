//! Probe endpoints and the plain landing pages of the OAuth flow.

/// Tag for OpenAPI documentation.
pub const MISC_TAG: &str = "Miscellaneous";

/// Liveness probe.
#[tracing::instrument()]
#[utoipa::path(
    method(get, head),
    path = "/health",
    tag = MISC_TAG,
    operation_id = "Health Check",
    summary = "Service health check",
    responses(
        (status = 200, description = "Service is running", body = str, content_type = "text/plain", example = "ok")
    )
)]
pub async fn health() -> &'static str {
    "ok"
}

/// Readiness probe.
#[tracing::instrument()]
#[utoipa::path(
    method(get, head),
    path = "/ready",
    tag = MISC_TAG,
    operation_id = "Readiness Check",
    summary = "Service readiness check",
    responses(
        (status = 200, description = "Service accepts requests", body = str, content_type = "text/plain", example = "ok")
    )
)]
pub async fn ready() -> &'static str {
    "ok"
}

#[utoipa::path(
    get,
    path = "/callback_success",
    tag = MISC_TAG,
    operation_id = "Callback Success",
    summary = "Landing page after a successful OAuth flow",
    responses(
        (status = 200, description = "Flow finished", body = str, content_type = "text/plain")
    )
)]
pub async fn callback_success() -> &'static str {
    "The token was stored. You can close this window."
}

#[utoipa::path(
    get,
    path = "/callback_error",
    tag = MISC_TAG,
    operation_id = "Callback Error",
    summary = "Landing page after a failed OAuth flow",
    responses(
        (status = 200, description = "Flow failed", body = str, content_type = "text/plain")
    )
)]
pub async fn callback_error() -> &'static str {
    "The OAuth flow failed. Please try again."
}
