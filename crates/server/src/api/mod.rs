//! HTTP endpoints of the OAuth service.
//!
//! - `oauth` - OAuth flow endpoints (/{provider}/authenticate, /{provider}/callback)
//! - `upload` - Direct token upload (/token/{namespace}/{name})
//! - `health` - Probes and landing pages (/health, /ready, /callback_*)
//! - `openapi` - OpenAPI/Utoipa configuration

pub mod health;
pub mod oauth;
pub mod openapi;
pub mod upload;

pub use health::MISC_TAG;
pub use oauth::OAUTH_TAG;
pub use upload::TOKEN_TAG;

use crate::AppState;
use axum::http::{HeaderValue, Method, header};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_axum::{router::OpenApiRouter, routes};
use utoipa_redoc::{Redoc, Servable};

/// CORS policy admitting only the configured origins. No origins means same-origin only.
fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(%origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
}

/// Builds the application router with all routes, middleware and the API docs.
pub fn router(state: AppState, allowed_origins: &[String]) -> axum::Router {
    let (router, api) = OpenApiRouter::with_openapi(openapi::ApiDoc::openapi())
        .merge(oauth::router(state.clone()))
        .merge(upload::router(state))
        .routes(routes!(health::health))
        .routes(routes!(health::ready))
        .routes(routes!(health::callback_success))
        .routes(routes!(health::callback_error))
        .layer(cors_layer(allowed_origins))
        .layer(TraceLayer::new_for_http())
        .split_for_parts();

    router.merge(Redoc::with_url("/api-docs", api))
}

/// Starts the web server with all configured routes.
#[tracing::instrument(skip(state, allowed_origins))]
pub async fn start_webserver(
    state: AppState,
    bind_address: &str,
    allowed_origins: &[String],
) -> color_eyre::Result<()> {
    let router = router(state, allowed_origins);

    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    tracing::info!(addr = %bind_address, "Server running");
    axum::serve(listener, router)
        .await
        .map_err(|e| color_eyre::Report::msg(format!("Failed to start server: {e}")))?;

    Ok(())
}
