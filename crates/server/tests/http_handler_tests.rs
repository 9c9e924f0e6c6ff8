//! Tests for the probe, landing page and documentation endpoints.

mod common;

use common::test_env;
use wiremock::MockServer;

#[tokio::test]
async fn test_health_and_ready() {
    let provider = MockServer::start().await;
    let env = test_env(&provider.uri(), true).await;

    for path in ["/health", "/ready"] {
        let response = env.server.get(path).await;
        response.assert_status_ok();
        response.assert_text("ok");
    }
}

#[tokio::test]
async fn test_landing_pages() {
    let provider = MockServer::start().await;
    let env = test_env(&provider.uri(), true).await;

    env.server.get("/callback_success").await.assert_status_ok();
    env.server.get("/callback_error").await.assert_status_ok();
}

#[tokio::test]
async fn test_api_docs_are_served() {
    let provider = MockServer::start().await;
    let env = test_env(&provider.uri(), true).await;

    let response = env.server.get("/api-docs").await;
    response.assert_status_ok();
    assert!(response.text().contains("SPI OAuth Service"));
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let provider = MockServer::start().await;
    let env = test_env(&provider.uri(), true).await;

    env.server.get("/nonexistent/route/here/x").await.assert_status_not_found();
}
