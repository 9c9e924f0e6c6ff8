use sea_orm::Database;
use spi_oauth::AppState;
use spi_oauth::api::start_webserver;
use spi_oauth::config::load_config;
use spi_oauth::controller::FlowDependencies;
use spi_oauth::identity::TokenReviewAuthenticator;
use spi_oauth::oauthstate::StateCodec;
use spi_oauth::records::DbAccessTokenRecords;
use spi_oauth::tokenstorage::{DbTokenStorage, NotifyingTokenStorage};
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

fn initialize_tracing() {
    let default_directives = "spi_oauth=info,tower_http=info,sea_orm=warn";
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true).with_level(true))
        .init();
}

#[tokio::main]
async fn main() -> color_eyre::eyre::Result<()> {
    color_eyre::install()?;
    initialize_tracing();

    let config = load_config()?;
    tracing::info!(
        base_url = %config.base_url,
        providers = ?config
            .service_providers
            .iter()
            .map(|sp| sp.service_provider_type)
            .collect::<Vec<_>>(),
        strict_identity_check = config.strict_identity_check,
        "configuration loaded"
    );
    if !config.strict_identity_check {
        tracing::warn!("caller identity is not re-validated when the provider redirects back");
    }

    let db = Arc::new(Database::connect(&config.database_url).await?);
    let records = Arc::new(DbAccessTokenRecords::new(db.clone()));
    let storage = NotifyingTokenStorage::new(records.clone(), Arc::new(DbTokenStorage::new(db)));

    let deps = FlowDependencies {
        codec: StateCodec::new(&config.signing_secret()?, config.max_flow_age())?,
        http: reqwest::Client::builder()
            .user_agent(concat!("spi-oauth/", env!("CARGO_PKG_VERSION")))
            .build()?,
        authenticator: Arc::new(TokenReviewAuthenticator::from_config(&config.kubernetes)?),
        records,
        storage,
        base_url: config.base_url.clone(),
        strict_identity_check: config.strict_identity_check,
    };

    let state = AppState::new(&config.service_providers, deps)?;
    start_webserver(state, &config.bind_address, &config.allowed_origins).await?;
    Ok(())
}
