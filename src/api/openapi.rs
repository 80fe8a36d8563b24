//! OpenAPI specification definition.
//!
//! Covers the public surface: auth, health and the error body.

use utoipa::{Modify, OpenApi};

#[derive(OpenApi)]
#[openapi(
    paths(
        // Authentication
        crate::routes::auth::sign_up,
        crate::routes::auth::sign_in,
        crate::routes::auth::refresh_token,
        crate::routes::auth::sign_out,
        crate::routes::auth::oauth_url,
        crate::routes::auth::oauth_callback,
        // Health
        crate::routes::health_check,
        // OpenAPI
        crate::routes::openapi::serve_openapi_json,
    ),
    components(schemas(
        crate::routes::auth::SignUpRequest,
        crate::routes::auth::SignInRequest,
        crate::routes::auth::SessionTokenRequest,
        crate::routes::auth::OAuthUrlRequest,
        crate::routes::auth::AuthResponse,
        crate::routes::auth::AccessTokenResponse,
        crate::routes::auth::OAuthUrlResponse,
        crate::services::auth_service::AuthUser,
        crate::routes::HealthResponse,
        crate::routes::error::ApiError,
        crate::routes::error::ErrorCode,
        crate::routes::error::ErrorDetails,
    )),
    modifiers(&SecurityAddon),
    tags(
        (name = "Auth", description = "Sign-up, sign-in, token refresh and OAuth"),
        (name = "Health", description = "Liveness"),
        (name = "OpenAPI", description = "OpenAPI specification"),
    ),
    info(
        title = "Workbench API",
        description = "Delta-layered HTTP requests, flow runs and reactive workspace sync",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8081/api/v1", description = "Local development server")
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        openapi.info.version = env!("CARGO_PKG_VERSION").to_string();

        use utoipa::openapi::security::{Http, HttpAuthScheme, SecurityScheme};
        openapi
            .components
            .get_or_insert_with(utoipa::openapi::Components::new)
            .add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
            );
    }
}
