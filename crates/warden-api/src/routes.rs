//! API route definitions

use crate::auth::gate::auth_gate;
use crate::handlers::auth;
use crate::state::AppState;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Account routes, mounted under `/api/v1/users`
pub fn user_routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    // Public routes (no authentication required)
    let public_routes = Router::new()
        .route("/signup", post(auth::signup_handler))
        .route("/login", post(auth::login_handler))
        .route("/verify-email", post(auth::verify_email_handler))
        .route("/forgot-password", post(auth::forgot_password_handler))
        .route("/reset-password", post(auth::reset_password_handler));

    // Protected routes (bearer credential required)
    let protected_routes = Router::new()
        .route("/logout", post(auth::logout_handler))
        .route(
            "/profile",
            get(auth::profile_handler).patch(auth::update_profile_handler),
        )
        .route("/change-password", post(auth::change_password_handler))
        .route(
            "/verify-email/request",
            post(auth::request_email_verification_handler),
        )
        .route_layer(middleware::from_fn_with_state(state, auth_gate));

    Router::new().merge(public_routes).merge(protected_routes)
}
