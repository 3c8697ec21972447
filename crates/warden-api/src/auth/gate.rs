//! Authentication gate for protected routes
//!
//! Extracts the bearer credential, resolves it through the token lifecycle
//! and attaches the [`ResolvedIdentity`] to request extensions. Handlers
//! read it with `Extension<ResolvedIdentity>`.
//!
//! Every refusal produces the same 401 body; the cause only reaches the
//! audit log. A store outage is the one exception and yields 503.
//!
//! ```ignore
//! use axum::{middleware, routing::get, Router};
//!
//! let protected = Router::new()
//!     .route("/profile", get(profile_handler))
//!     .layer(middleware::from_fn_with_state(state.clone(), auth_gate));
//! ```

use super::lifecycle::{FailureCause, LifecycleError};
use crate::audit::{audit_log, extract_ip_address, extract_user_agent, AuditEvent};
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

/// Pull the credential out of `Authorization: Bearer <credential>`
pub fn bearer_credential(headers: &HeaderMap) -> Result<&str, FailureCause> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or(FailureCause::MissingHeader)?
        .to_str()
        .map_err(|_| FailureCause::MalformedHeader)?;

    let (scheme, credential) = value
        .split_once(' ')
        .ok_or(FailureCause::MalformedHeader)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(FailureCause::MalformedHeader);
    }

    let credential = credential.trim();
    if credential.is_empty() {
        return Err(FailureCause::MalformedHeader);
    }

    Ok(credential)
}

/// Middleware requiring a live credential
pub async fn auth_gate(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let refuse = |headers: &HeaderMap, cause: FailureCause| {
        audit_log(&AuditEvent::InvalidToken {
            cause,
            ip_address: extract_ip_address(headers),
            user_agent: extract_user_agent(headers),
        });
        AppError::Unauthorized
    };

    let credential = match bearer_credential(request.headers()) {
        Ok(credential) => credential.to_string(),
        Err(cause) => return Err(refuse(request.headers(), cause)),
    };

    match state.lifecycle.resolve(&credential).await {
        Ok(identity) => {
            request.extensions_mut().insert(identity);
            Ok(next.run(request).await)
        }
        Err(LifecycleError::StoreUnavailable(source)) => {
            tracing::warn!(error = %source, "Credential store unavailable during authentication");
            Err(AppError::ServiceUnavailable)
        }
        Err(LifecycleError::Unauthenticated { cause }) => Err(refuse(request.headers(), cause)),
        Err(other) => {
            tracing::error!(error = %other, "Credential resolution failed");
            Err(refuse(request.headers(), FailureCause::NoActiveRecord))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, value.parse().unwrap());
        headers
    }

    #[test]
    fn test_bearer_credential() {
        assert_eq!(bearer_credential(&headers("Bearer abc.def.ghi")), Ok("abc.def.ghi"));
        assert_eq!(bearer_credential(&headers("bearer abc")), Ok("abc"));
    }

    #[test]
    fn test_missing_header() {
        assert_eq!(
            bearer_credential(&HeaderMap::new()),
            Err(FailureCause::MissingHeader)
        );
    }

    #[test]
    fn test_malformed_headers() {
        for value in ["Bearer", "Bearer ", "Bearer    ", "Basic dXNlcjpwYXNz", "abc.def.ghi"] {
            assert_eq!(
                bearer_credential(&headers(value)),
                Err(FailureCause::MalformedHeader),
                "{value:?}"
            );
        }
    }

    #[test]
    fn test_non_utf8_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            axum::http::HeaderValue::from_bytes(b"Bearer \xff\xfe").unwrap(),
        );
        assert_eq!(bearer_credential(&headers), Err(FailureCause::MalformedHeader));
    }
}
