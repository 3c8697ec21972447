//! Warden API - session token lifecycle over HTTP
//!
//! Issues signed bearer credentials on login, resolves them on every
//! protected request, and revokes them on logout and password changes.

pub mod audit;
pub mod auth;
pub mod delivery;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

use axum::{
    http::{header, HeaderValue, Method},
    routing::get,
    Router,
};
use state::AppState;
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health::health_check,
        handlers::health::readiness_check,
        handlers::auth::signup_handler,
        handlers::auth::login_handler,
        handlers::auth::logout_handler,
        handlers::auth::profile_handler,
        handlers::auth::update_profile_handler,
        handlers::auth::change_password_handler,
        handlers::auth::request_email_verification_handler,
        handlers::auth::verify_email_handler,
        handlers::auth::forgot_password_handler,
        handlers::auth::reset_password_handler,
    ),
    components(schemas(
        auth::SignupRequest,
        auth::LoginRequest,
        auth::LoginResponse,
        auth::UpdateProfileRequest,
        auth::ChangePasswordRequest,
        auth::VerifyEmailRequest,
        auth::ForgotPasswordRequest,
        auth::ResetPasswordRequest,
        auth::MessageResponse,
        auth::SessionToken,
        error::ApiError,
        handlers::health::HealthResponse,
        handlers::health::ReadinessResponse,
        handlers::health::ReadinessChecks,
        warden_core::UserProfile,
        warden_core::UserRole,
        warden_core::UserStatus,
    )),
    modifiers(&SecurityAddon),
    tags(
        (name = "users", description = "Accounts and session tokens"),
        (name = "health", description = "Liveness and readiness probes"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PATCH])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    if origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match o.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    layer.allow_origin(AllowOrigin::list(origins))
}

/// Build the full application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.server.cors_origins);

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check))
        .nest("/api/v1/users", routes::user_routes(state.clone()))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Router and handles over an in-memory deployment, for tests
#[cfg(any(test, feature = "test-utils"))]
pub mod testing {
    use super::*;
    use crate::auth::PasswordConfig;
    use crate::delivery::CapturingDelivery;
    use warden_core::{AppConfig, ManualClock};
    use warden_store::MemoryCredentialStore;

    pub const TEST_SECRET: &str = "test-signing-secret";

    pub struct TestApp {
        pub router: Router,
        pub state: Arc<AppState>,
        pub store: Arc<MemoryCredentialStore>,
        pub clock: Arc<ManualClock>,
        pub delivery: Arc<CapturingDelivery>,
    }

    pub fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.auth.jwt_secret = Some(TEST_SECRET.to_string());
        config
    }

    pub fn test_app() -> TestApp {
        let store = Arc::new(MemoryCredentialStore::new());
        let clock = Arc::new(ManualClock::starting_now());
        let delivery = Arc::new(CapturingDelivery::new());

        let state = AppState::new(test_config(), store.clone(), delivery.clone(), clock.clone())
            .map(|state| {
                state.with_password_config(PasswordConfig {
                    memory_cost: 8192,
                    time_cost: 1,
                    parallelism: 1,
                })
            })
            .unwrap_or_else(|e| panic!("test configuration is invalid: {e}"));
        let state = Arc::new(state);

        TestApp {
            router: create_router(state.clone()),
            state,
            store,
            clock,
            delivery,
        }
    }
}

/// Router over a fresh in-memory deployment
#[cfg(any(test, feature = "test-utils"))]
pub fn create_router_for_testing() -> Router {
    testing::test_app().router
}
