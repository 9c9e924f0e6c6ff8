//! OpenAPI/Utoipa configuration.

use crate::api::{health::MISC_TAG, oauth::OAUTH_TAG, upload::TOKEN_TAG};
use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};

/// Security addon for OpenAPI documentation.
pub struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        let bearer = HttpBuilder::new()
            .scheme(HttpAuthScheme::Bearer)
            .description(Some(
                "A Kubernetes bearer token. It is reviewed by the cluster to identify the caller.",
            ))
            .build();
        components.add_security_scheme("Authorization", SecurityScheme::Http(bearer));
    }
}

/// OpenAPI documentation configuration.
#[derive(OpenApi)]
#[openapi(
    modifiers(&SecurityAddon),
    info(
        title = "SPI OAuth Service",
        version = "1.0.0",
        description = "Brokers OAuth flows with service providers and stores the obtained tokens \
                       for access token records in the cluster."
    ),
    tags(
        (name = MISC_TAG, description = "Probes and landing pages"),
        (name = OAUTH_TAG, description = "OAuth flow endpoints"),
        (name = TOKEN_TAG, description = "Direct token upload")
    )
)]
pub struct ApiDoc;
