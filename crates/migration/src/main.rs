use config::Config;
use sea_orm_migration::prelude::*;
use std::env;

/// `database_url` as the service would see it: config.yaml plus `__`-separated env overrides.
fn database_url_from_service_config() -> Option<String> {
    Config::builder()
        .add_source(config::File::with_name("config.yaml").required(false))
        .add_source(config::Environment::default().separator("__"))
        .build()
        .ok()?
        .get_string("database_url")
        .ok()
}

#[tokio::main]
async fn main() {
    if env::var("DATABASE_URL").is_err() {
        match database_url_from_service_config() {
            Some(url) => env::set_var("DATABASE_URL", url),
            None => eprintln!("DATABASE_URL is not set and no database_url is configured"),
        }
    }
    cli::run_cli(migration::Migrator).await;
}
