use crate::providers::ServiceProviderType;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration build error: {0}")]
    Build(#[from] config::ConfigError),
    #[error("Invalid configuration: {0}")]
    Validation(String),
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// OAuth application registration of a single service provider.
#[derive(Clone, Debug, Deserialize)]
pub struct ServiceProviderConfiguration {
    #[serde(rename = "type")]
    pub service_provider_type: ServiceProviderType,
    pub client_id: String,
    pub client_secret: String,
    /// Base URL of a self-hosted instance. Built-in endpoints are used when absent.
    #[serde(default)]
    pub base_url: Option<String>,
}

/// Where to review caller credentials.
#[derive(Clone, Debug, Deserialize)]
pub struct KubernetesConfig {
    pub api_server: String,
    /// Service account token used to call the TokenReview API.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub token_file: Option<PathBuf>,
    #[serde(default)]
    pub audiences: Vec<String>,
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

impl KubernetesConfig {
    pub fn bearer_token(&self) -> Result<Option<String>, ConfigError> {
        if let Some(token) = &self.token {
            return Ok(Some(token.clone()));
        }
        match &self.token_file {
            Some(path) => std::fs::read_to_string(path)
                .map(|t| Some(t.trim().to_string()))
                .map_err(|source| ConfigError::Io {
                    path: path.clone(),
                    source,
                }),
            None => Ok(None),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    /// Externally reachable URL of this service, used to compute `redirect_uri`.
    pub base_url: String,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    pub database_url: String,
    #[serde(default)]
    pub shared_secret: Option<String>,
    #[serde(default)]
    pub shared_secret_file: Option<PathBuf>,
    #[serde(default = "default_max_flow_age_seconds")]
    pub max_flow_age_seconds: u64,
    /// Re-validate the caller identity when the provider redirects back.
    #[serde(default = "default_true")]
    pub strict_identity_check: bool,
    /// CORS origins allowed to call the service. Empty means same-origin only.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    pub kubernetes: KubernetesConfig,
    #[serde(default)]
    pub service_providers: Vec<ServiceProviderConfiguration>,
}

fn default_bind_address() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_max_flow_age_seconds() -> u64 {
    600
}

fn default_true() -> bool {
    true
}

impl AppConfig {
    pub fn max_flow_age(&self) -> Duration {
        Duration::from_secs(self.max_flow_age_seconds)
    }

    /// The secret used to sign OAuth states. The inline value wins over the file.
    pub fn signing_secret(&self) -> Result<Vec<u8>, ConfigError> {
        if let Some(secret) = &self.shared_secret {
            return Ok(secret.as_bytes().to_vec());
        }
        match &self.shared_secret_file {
            Some(path) => std::fs::read(path).map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            }),
            None => Err(ConfigError::Validation(
                "one of shared_secret or shared_secret_file must be set".into(),
            )),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::Validation("base_url must not be empty".into()));
        }
        if self.signing_secret()?.len() < 32 {
            return Err(ConfigError::Validation(
                "shared secret must be at least 32 bytes".into(),
            ));
        }
        if self.max_flow_age_seconds == 0 {
            return Err(ConfigError::Validation(
                "max_flow_age_seconds must be > 0".into(),
            ));
        }
        let mut seen = HashSet::new();
        for sp in &self.service_providers {
            if !seen.insert(sp.service_provider_type) {
                return Err(ConfigError::Validation(format!(
                    "service provider {} configured more than once",
                    sp.service_provider_type
                )));
            }
        }
        Ok(())
    }
}

/// Load application configuration from `config.yaml` + environment overrides.
///
/// Any environment variable matching the key path separated by double underscores
/// (e.g. `KUBERNETES__API_SERVER`) overrides the file value. A `.env` file in the
/// working directory is honoured.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    use config::{Config, Environment, File};
    let _ = dotenvy::dotenv();
    let cfg = Config::builder()
        .add_source(File::with_name("config.yaml"))
        .add_source(Environment::default().separator("__"))
        .build()?;

    let app: AppConfig = cfg.try_deserialize()?;
    app.validate()?;
    Ok(app)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_secret(secret: &str) -> AppConfig {
        AppConfig {
            base_url: "https://spi.example.com".into(),
            bind_address: default_bind_address(),
            database_url: "sqlite::memory:".into(),
            shared_secret: Some(secret.into()),
            shared_secret_file: None,
            max_flow_age_seconds: 600,
            strict_identity_check: true,
            allowed_origins: vec![],
            kubernetes: KubernetesConfig {
                api_server: "https://kubernetes.default.svc".into(),
                token: None,
                token_file: None,
                audiences: vec![],
                accept_invalid_certs: false,
            },
            service_providers: vec![],
        }
    }

    #[test]
    fn short_secret_is_rejected() {
        let cfg = config_with_secret("too-short");
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn duplicate_providers_are_rejected() {
        let mut cfg = config_with_secret("0123456789abcdef0123456789abcdef");
        let sp = ServiceProviderConfiguration {
            service_provider_type: ServiceProviderType::GitHub,
            client_id: "id".into(),
            client_secret: "secret".into(),
            base_url: None,
        };
        cfg.service_providers = vec![sp.clone(), sp];
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn missing_secret_is_reported() {
        let mut cfg = config_with_secret("x");
        cfg.shared_secret = None;
        assert!(cfg.signing_secret().is_err());
    }
}
