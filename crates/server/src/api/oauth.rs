//! OAuth flow endpoints, one pair per configured service provider.
//!
//! - `/{provider}/authenticate` - start the flow (GET or form POST)
//! - `/{provider}/callback` - redirect target of the provider

use crate::AppState;
use crate::controller::{AuthenticateParams, CallbackParams};
use axum::{
    body::Bytes,
    extract::{FromRequest, Path, Request, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use utoipa_axum::{router::OpenApiRouter, routes};

/// Tag for OpenAPI documentation.
pub const OAUTH_TAG: &str = "OAuth Flow";

pub fn router(state: AppState) -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(authenticate))
        .routes(routes!(callback))
        .with_state(state)
}

/// Request parameters read from the query string and, for form posts, the body.
///
/// A body value wins over a query value of the same name. Only the first value of
/// a repeated name is used.
pub struct FormParams<T>(pub T);

impl<S, T> FromRequest<S> for FormParams<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Send,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let query = req.uri().query().unwrap_or_default().to_string();
        let is_form = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));
        let body = if is_form {
            Bytes::from_request(req, state)
                .await
                .map_err(IntoResponse::into_response)?
        } else {
            Bytes::new()
        };

        let mut fields = Map::new();
        for (name, value) in url::form_urlencoded::parse(&body)
            .chain(url::form_urlencoded::parse(query.as_bytes()))
        {
            fields
                .entry(name.into_owned())
                .or_insert_with(|| Value::String(value.into_owned()));
        }

        serde_json::from_value(Value::Object(fields))
            .map(FormParams)
            .map_err(|e| {
                (StatusCode::BAD_REQUEST, format!("invalid request parameters: {e}")).into_response()
            })
    }
}

fn authorization(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
}

fn found(location: String) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
}

#[tracing::instrument(skip_all, fields(provider = %provider))]
#[utoipa::path(
    method(get, post),
    path = "/{provider}/authenticate",
    params(
        ("provider" = String, Path, description = "Service provider type, e.g. `github` or `quay`"),
        AuthenticateParams
    ),
    tag = OAUTH_TAG,
    operation_id = "Authenticate",
    summary = "Start an OAuth flow",
    description = "Binds the anonymous flow state to the calling cluster identity and redirects \
                   to the authorization page of the service provider.\n\n\
                   The cluster credential is read from the `Authorization: Bearer` header or, \
                   for browsers, from the `k8s_token` parameter.",
    security(("Authorization" = [])),
    responses(
        (status = 302, description = "Redirect to the service provider"),
        (status = 400, description = "The state is invalid or expired", body = str, content_type = "text/plain"),
        (status = 401, description = "The caller could not be authenticated", body = str, content_type = "text/plain"),
        (status = 404, description = "The service provider is not configured", body = str, content_type = "text/plain"),
        (status = 500, description = "Internal server error", body = str, content_type = "text/plain")
    )
)]
async fn authenticate(
    Path(provider): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    FormParams(params): FormParams<AuthenticateParams>,
) -> Response {
    let controller = match state.controller(&provider) {
        Ok(c) => c,
        Err(e) => return e.into_response(),
    };
    match controller
        .authenticate(&params, authorization(&headers))
        .await
    {
        Ok(location) => found(location),
        Err(e) => e.into_response(),
    }
}

#[tracing::instrument(skip_all, fields(provider = %provider))]
#[utoipa::path(
    get,
    path = "/{provider}/callback",
    params(
        ("provider" = String, Path, description = "Service provider type, e.g. `github` or `quay`"),
        CallbackParams
    ),
    tag = OAUTH_TAG,
    operation_id = "Callback",
    summary = "Finish an OAuth flow",
    description = "Exchanges the authorization code for a token, stores it for the access token \
                   record named in the state and redirects to `redirect_after_login`, or to \
                   `/callback_success` when none was given.",
    responses(
        (status = 302, description = "Flow finished, redirect to the landing page"),
        (status = 400, description = "Invalid state or failed code exchange", body = str, content_type = "text/plain"),
        (status = 401, description = "The caller identity changed during the flow", body = str, content_type = "text/plain"),
        (status = 404, description = "The service provider is not configured", body = str, content_type = "text/plain"),
        (status = 500, description = "Token could not be stored", body = str, content_type = "text/plain")
    )
)]
async fn callback(
    Path(provider): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    FormParams(params): FormParams<CallbackParams>,
) -> Response {
    let controller = match state.controller(&provider) {
        Ok(c) => c,
        Err(e) => return e.into_response(),
    };
    match controller.callback(&params, authorization(&headers)).await {
        Ok(location) => found(location),
        Err(e) => e.into_response(),
    }
}
