//! Tests for the authenticator backed by the TokenReview and SubjectAccessReview APIs.

use serde_json::json;
use spi_oauth::error::AuthenticationError;
use spi_oauth::identity::{Authenticator, CallerIdentity, TokenReviewAuthenticator};
use spi_oauth::records::ObjectKey;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const REVIEW_PATH: &str = "/apis/authentication.k8s.io/v1/tokenreviews";
const ACCESS_REVIEW_PATH: &str = "/apis/authorization.k8s.io/v1/subjectaccessreviews";

fn mallory() -> CallerIdentity {
    CallerIdentity {
        username: "mallory".into(),
        uid: "u-2".into(),
        groups: vec!["system:authenticated".into()],
        extra: Default::default(),
    }
}

fn authenticator(server: &MockServer, audiences: Vec<String>) -> TokenReviewAuthenticator {
    TokenReviewAuthenticator::new(
        reqwest::Client::new(),
        server.uri(),
        Some("sa-token".into()),
        audiences,
    )
}

#[tokio::test]
async fn test_authenticated_review_yields_identity() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(REVIEW_PATH))
        .and(header("authorization", "Bearer sa-token"))
        .and(body_partial_json(json!({
            "kind": "TokenReview",
            "spec": { "token": "user-token", "audiences": ["spi"] }
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "status": {
                "authenticated": true,
                "user": {
                    "username": "alice",
                    "uid": "u-1",
                    "groups": ["system:authenticated"],
                    "extra": { "scopes": ["a", "b"] }
                }
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let identity = authenticator(&server, vec!["spi".into()])
        .authenticate("user-token")
        .await
        .unwrap();

    assert_eq!(identity.username, "alice");
    assert_eq!(identity.uid, "u-1");
    assert_eq!(identity.groups, vec!["system:authenticated".to_string()]);
    assert_eq!(identity.extra["scopes"], vec!["a".to_string(), "b".to_string()]);
}

#[tokio::test]
async fn test_unauthenticated_review_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(REVIEW_PATH))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "status": { "authenticated": false, "error": "token expired" }
        })))
        .mount(&server)
        .await;

    let result = authenticator(&server, Vec::new()).authenticate("stale").await;

    assert!(matches!(result, Err(AuthenticationError::Rejected)));
}

#[tokio::test]
async fn test_review_endpoint_failure_is_backend_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(REVIEW_PATH))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let result = authenticator(&server, Vec::new()).authenticate("user-token").await;

    assert!(matches!(result, Err(AuthenticationError::Backend(_))));
}

#[tokio::test]
async fn test_access_review_asks_about_the_record() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(ACCESS_REVIEW_PATH))
        .and(header("authorization", "Bearer sa-token"))
        .and(body_partial_json(json!({
            "kind": "SubjectAccessReview",
            "spec": {
                "user": "mallory",
                "uid": "u-2",
                "groups": ["system:authenticated"],
                "resourceAttributes": {
                    "namespace": "alice-ns",
                    "name": "t",
                    "verb": "update",
                    "group": "appstudio.redhat.com",
                    "resource": "spiaccesstokens"
                }
            }
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "status": { "allowed": false, "reason": "no RBAC policy matched" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let allowed = authenticator(&server, Vec::new())
        .authorize(&mallory(), "update", &ObjectKey::new("alice-ns", "t"))
        .await
        .unwrap();

    assert!(!allowed);
}

#[tokio::test]
async fn test_allowed_access_review() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(ACCESS_REVIEW_PATH))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "status": { "allowed": true }
        })))
        .mount(&server)
        .await;

    let allowed = authenticator(&server, Vec::new())
        .authorize(&mallory(), "update", &ObjectKey::new("mallory-ns", "t"))
        .await
        .unwrap();

    assert!(allowed);
}
