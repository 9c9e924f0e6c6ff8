//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use axum_test::TestServer;
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, DbBackend, Statement};
use spi_oauth::AppState;
use spi_oauth::config::ServiceProviderConfiguration;
use spi_oauth::controller::FlowDependencies;
use spi_oauth::error::{AuthenticationError, StorageError};
use spi_oauth::identity::{Authenticator, CallerIdentity};
use spi_oauth::oauthstate::{AnonymousFlowState, AuthenticatedFlowState, StateCodec};
use spi_oauth::providers::ServiceProviderType;
use spi_oauth::records::{AccessTokenRecords, DbAccessTokenRecords, ObjectKey};
use spi_oauth::tokenstorage::{DbTokenStorage, NotifyingTokenStorage, Token, TokenStorage};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use time::OffsetDateTime;

pub const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";
pub const BASE_URL: &str = "https://spi.example.com";
pub const ALICE_TOKEN: &str = "alice-k8s-token";
pub const MALLORY_TOKEN: &str = "mallory-k8s-token";

/// Create a test database with the access token tables
pub async fn create_test_db() -> Arc<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await.expect("connect");

    db.execute(Statement::from_string(
        DbBackend::Sqlite,
        r#"CREATE TABLE spi_access_token (
            namespace TEXT NOT NULL,
            name TEXT NOT NULL,
            service_provider_url TEXT NOT NULL,
            token_metadata TEXT NULL,
            data_version INTEGER NOT NULL DEFAULT 0,
            data_updated_at TEXT NULL,
            resource_version INTEGER NOT NULL DEFAULT 1,
            PRIMARY KEY (namespace, name)
        );"#,
    ))
    .await
    .expect("create spi_access_token table");

    db.execute(Statement::from_string(
        DbBackend::Sqlite,
        r#"CREATE TABLE spi_access_token_data (
            namespace TEXT NOT NULL,
            name TEXT NOT NULL,
            access_token TEXT NOT NULL,
            token_type TEXT NOT NULL,
            refresh_token TEXT NULL,
            expiry INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (namespace, name)
        );"#,
    ))
    .await
    .expect("create spi_access_token_data table");

    Arc::new(db)
}

pub async fn insert_record(db: &DatabaseConnection, namespace: &str, name: &str) {
    db.execute(Statement::from_sql_and_values(
        DbBackend::Sqlite,
        r#"INSERT INTO spi_access_token (namespace, name, service_provider_url)
           VALUES (?, ?, 'https://github.com');"#,
        [namespace.into(), name.into()],
    ))
    .await
    .expect("insert access token record");
}

pub fn identity(username: &str, uid: &str) -> CallerIdentity {
    CallerIdentity {
        username: username.into(),
        uid: uid.into(),
        groups: vec!["system:authenticated".into(), "developers".into()],
        extra: BTreeMap::new(),
    }
}

/// Authenticator with a fixed credential table and per-user namespace grants.
pub struct StaticAuthenticator {
    identities: HashMap<String, CallerIdentity>,
    grants: HashMap<String, Vec<String>>,
}

impl StaticAuthenticator {
    pub fn new(identities: impl IntoIterator<Item = (&'static str, CallerIdentity)>) -> Self {
        Self {
            identities: identities
                .into_iter()
                .map(|(token, id)| (token.to_string(), id))
                .collect(),
            grants: HashMap::new(),
        }
    }

    /// Allow `username` to update records in `namespaces`.
    pub fn grant(mut self, username: &str, namespaces: &[&str]) -> Self {
        self.grants.insert(
            username.to_string(),
            namespaces.iter().map(|ns| ns.to_string()).collect(),
        );
        self
    }

    /// Alice may update records in `ns` and `alice-ns`, mallory only in `mallory-ns`.
    pub fn alice_and_mallory() -> Self {
        Self::new([
            (ALICE_TOKEN, identity("alice", "uid-alice")),
            (MALLORY_TOKEN, identity("mallory", "uid-mallory")),
        ])
        .grant("alice", &["ns", "alice-ns"])
        .grant("mallory", &["mallory-ns"])
    }
}

#[async_trait]
impl Authenticator for StaticAuthenticator {
    async fn authenticate(&self, credential: &str) -> Result<CallerIdentity, AuthenticationError> {
        self.identities
            .get(credential)
            .cloned()
            .ok_or(AuthenticationError::Rejected)
    }

    async fn authorize(
        &self,
        identity: &CallerIdentity,
        verb: &str,
        owner: &ObjectKey,
    ) -> Result<bool, AuthenticationError> {
        Ok(verb == "update"
            && self
                .grants
                .get(&identity.username)
                .is_some_and(|namespaces| namespaces.contains(&owner.namespace)))
    }
}

/// Storage wrapper remembering every successful write.
pub struct RecordingStorage {
    inner: Arc<dyn TokenStorage>,
    writes: Mutex<Vec<(ObjectKey, Token)>>,
}

impl RecordingStorage {
    pub fn new(inner: Arc<dyn TokenStorage>) -> Self {
        Self {
            inner,
            writes: Mutex::new(Vec::new()),
        }
    }

    pub fn writes(&self) -> Vec<(ObjectKey, Token)> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl TokenStorage for RecordingStorage {
    async fn store(&self, owner: &ObjectKey, token: &Token) -> Result<(), StorageError> {
        self.inner.store(owner, token).await?;
        self.writes
            .lock()
            .unwrap()
            .push((owner.clone(), token.clone()));
        Ok(())
    }

    async fn get(&self, owner: &ObjectKey) -> Result<Option<Token>, StorageError> {
        self.inner.get(owner).await
    }

    async fn delete(&self, owner: &ObjectKey) -> Result<(), StorageError> {
        self.inner.delete(owner).await
    }
}

pub struct TestEnv {
    pub db: Arc<DatabaseConnection>,
    pub records: Arc<DbAccessTokenRecords>,
    pub storage: Arc<RecordingStorage>,
    pub codec: StateCodec,
    pub server: TestServer,
}

pub fn flow_state(provider: &str, namespace: &str, name: &str, scopes: &[&str]) -> AnonymousFlowState {
    AnonymousFlowState {
        token_name: name.into(),
        token_namespace: namespace.into(),
        issued_at: OffsetDateTime::now_utc().unix_timestamp(),
        scopes: scopes.iter().map(|s| s.to_string()).collect(),
        service_provider_type: provider.into(),
        service_provider_url: "https://github.com".into(),
    }
}

impl TestEnv {
    /// Encode an anonymous GitHub state for the record `namespace/name`.
    pub fn anonymous_state(&self, namespace: &str, name: &str, scopes: &[&str]) -> String {
        self.codec
            .encode_anonymous(&flow_state("GitHub", namespace, name, scopes))
            .expect("encode anonymous state")
    }

    /// Encode alice's authenticated state targeting `provider`, as if issued by its Authenticate.
    pub fn authenticated_state_for(&self, provider: &str, namespace: &str, name: &str) -> String {
        self.codec
            .encode_authenticated(&AuthenticatedFlowState {
                anonymous: flow_state(provider, namespace, name, &[]),
                caller_identity: identity("alice", "uid-alice"),
                authorization_header: ALICE_TOKEN.into(),
            })
            .expect("encode authenticated state")
    }

    /// Run Authenticate as alice and return the authenticated state from the redirect.
    pub async fn authenticated_state(&self, namespace: &str, name: &str, scopes: &[&str]) -> String {
        let response = self
            .server
            .get("/github/authenticate")
            .add_query_param("state", self.anonymous_state(namespace, name, scopes))
            .authorization_bearer(ALICE_TOKEN)
            .await;
        response.assert_status(axum::http::StatusCode::FOUND);
        let location = url::Url::parse(response.header("location").to_str().unwrap()).unwrap();
        location
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .expect("state in authorization URL")
    }

    pub async fn record(&self, namespace: &str, name: &str) -> spi_oauth::records::SpiAccessToken {
        self.records
            .get(&ObjectKey::new(namespace, name))
            .await
            .unwrap()
            .expect("record exists")
    }
}

/// Server with a GitHub provider whose endpoints live at `provider_base_url`.
pub async fn test_env(provider_base_url: &str, strict_identity_check: bool) -> TestEnv {
    let db = create_test_db().await;
    let records = Arc::new(DbAccessTokenRecords::new(db.clone()));
    let storage = Arc::new(RecordingStorage::new(Arc::new(DbTokenStorage::new(db.clone()))));
    let codec = StateCodec::new(SECRET, Duration::from_secs(600)).unwrap();

    let deps = FlowDependencies {
        codec: codec.clone(),
        http: reqwest::Client::new(),
        authenticator: Arc::new(StaticAuthenticator::alice_and_mallory()),
        records: records.clone(),
        storage: NotifyingTokenStorage::new(records.clone(), storage.clone()),
        base_url: BASE_URL.into(),
        strict_identity_check,
    };
    let providers = [ServiceProviderConfiguration {
        service_provider_type: ServiceProviderType::GitHub,
        client_id: "client-id".into(),
        client_secret: "client-secret".into(),
        base_url: Some(provider_base_url.into()),
    }];
    let state = AppState::new(&providers, deps).expect("app state");
    let server = TestServer::new(spi_oauth::api::router(state, &[])).expect("create test server");

    TestEnv {
        db,
        records,
        storage,
        codec,
        server,
    }
}
