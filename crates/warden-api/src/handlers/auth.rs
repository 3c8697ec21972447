//! Account API handlers
//!
//! Thin flows around the token lifecycle: signup, login and logout,
//! profile, password change, email verification, password reset.

use crate::audit::{audit_log, extract_ip_address, extract_user_agent, AuditEvent};
use crate::auth::{
    hash_password_with_config, verify_password, ChangePasswordRequest, ForgotPasswordRequest,
    LoginRequest, LoginResponse, MessageResponse, ResetPasswordRequest, ResolvedIdentity,
    SignupRequest, UpdateProfileRequest, VerifyEmailRequest,
};
use crate::error::AppError;
use crate::state::AppState;
use axum::{extract::State, http::HeaderMap, http::StatusCode, response::IntoResponse, Extension, Json};
use chrono::Utc;
use std::sync::Arc;
use validator::Validate;
use warden_core::{
    NewUser, ProfileUpdate, TokenPurpose, User, UserProfile, UserRole, WardenError,
};

/// Argon2 runs on the blocking pool, off the async workers
async fn hash(state: &AppState, password: String) -> Result<String, AppError> {
    let config = state.password_config.clone();
    tokio::task::spawn_blocking(move || hash_password_with_config(&password, &config))
        .await
        .map_err(|e| AppError::Internal(format!("hashing task failed: {e}")))?
        .map_err(AppError::from)
}

async fn verify(password: String, hash: String) -> Result<bool, AppError> {
    tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .map_err(|e| AppError::Internal(format!("verification task failed: {e}")))?
        .map_err(AppError::from)
}

/// Hash checked against when the email is unknown, so a miss costs the
/// same Argon2 run as a wrong password
async fn login_decoy(state: &AppState) -> Result<String, AppError> {
    state
        .login_decoy
        .get_or_try_init(|| hash(state, "decoy-password-0".to_string()))
        .await
        .cloned()
}

/// Load the caller's account; a vanished or deactivated account is a 401
async fn current_user(state: &AppState, identity: &ResolvedIdentity) -> Result<User, AppError> {
    state
        .store
        .find_user_by_id(&identity.user_id)
        .await?
        .ok_or(AppError::Unauthorized)
}

/// Create a new account
#[utoipa::path(
    post,
    path = "/api/v1/users/signup",
    tag = "users",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "Account created", body = UserProfile),
        (status = 400, description = "Invalid input", body = crate::error::ApiError),
        (status = 409, description = "Email already registered", body = crate::error::ApiError),
    )
)]
pub async fn signup_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<SignupRequest>,
) -> Result<impl IntoResponse, AppError> {
    request.validate()?;
    let ip_address = extract_ip_address(&headers);

    let password_hash = hash(&state, request.password).await?;
    let user = User::new(
        NewUser {
            name: request.name,
            email: request.email,
            password_hash,
            role: UserRole::User,
        },
        Utc::now(),
    );
    let email = user.email.clone();

    let user = match state.store.create_user(user).await {
        Ok(user) => user,
        Err(WardenError::Conflict(_)) => {
            audit_log(&AuditEvent::RegistrationFailure {
                email,
                reason: "email already registered".to_string(),
                ip_address,
            });
            return Err(AppError::Conflict("Email already registered".to_string()));
        }
        Err(e) => return Err(e.into()),
    };

    audit_log(&AuditEvent::RegistrationSuccess {
        user_id: user.id.clone(),
        email: user.email.clone(),
        role: user.role.to_string(),
        ip_address,
        user_agent: extract_user_agent(&headers),
    });

    Ok((StatusCode::CREATED, Json(user.to_profile())))
}

/// Login with email and password
///
/// A successful login replaces any session the account already had.
#[utoipa::path(
    post,
    path = "/api/v1/users/login",
    tag = "users",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = LoginResponse),
        (status = 401, description = "Invalid credentials", body = crate::error::ApiError),
        (status = 503, description = "Credential store unavailable", body = crate::error::ApiError),
    )
)]
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    request.validate()?;
    let ip_address = extract_ip_address(&headers);
    let user_agent = extract_user_agent(&headers);

    let fail = |email: &str, reason: &str| {
        audit_log(&AuditEvent::LoginFailure {
            email: email.to_string(),
            reason: reason.to_string(),
            ip_address: ip_address.clone(),
            user_agent: user_agent.clone(),
        });
        AppError::InvalidCredentials
    };

    let user = state.store.find_user_by_email(&request.email).await?;
    let password_hash = match &user {
        Some(user) => user.password_hash.clone(),
        None => login_decoy(&state).await?,
    };
    let password_ok = verify(request.password, password_hash).await?;

    let Some(user) = user else {
        return Err(fail(&request.email, "unknown email"));
    };
    if !password_ok {
        return Err(fail(&user.email, "wrong password"));
    }
    if !user.is_active() {
        return Err(fail(&user.email, "account not active"));
    }

    let session = state.lifecycle.issue_auth_session(&user.id).await?;

    audit_log(&AuditEvent::LoginSuccess {
        user_id: user.id.clone(),
        email: user.email.clone(),
        ip_address,
        user_agent,
    });

    Ok(Json(LoginResponse {
        user: user.to_profile(),
        token: session.token,
        expires: session.expires,
    }))
}

/// Revoke every token of the caller
#[utoipa::path(
    post,
    path = "/api/v1/users/logout",
    tag = "users",
    responses(
        (status = 200, description = "Logged out", body = MessageResponse),
        (status = 401, description = "Not authenticated", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Extension(identity): Extension<ResolvedIdentity>,
) -> Result<Json<MessageResponse>, AppError> {
    state.lifecycle.revoke_all(&identity.user_id).await?;

    audit_log(&AuditEvent::Logout {
        user_id: identity.user_id,
        ip_address: extract_ip_address(&headers),
    });

    Ok(Json(MessageResponse::new("Logged out")))
}

/// Current user's profile
#[utoipa::path(
    get,
    path = "/api/v1/users/profile",
    tag = "users",
    responses(
        (status = 200, description = "Profile", body = UserProfile),
        (status = 401, description = "Not authenticated", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn profile_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<ResolvedIdentity>,
) -> Result<Json<UserProfile>, AppError> {
    let user = current_user(&state, &identity).await?;
    Ok(Json(user.to_profile()))
}

/// Update the current user's display name
#[utoipa::path(
    patch,
    path = "/api/v1/users/profile",
    tag = "users",
    request_body = UpdateProfileRequest,
    responses(
        (status = 200, description = "Updated profile", body = UserProfile),
        (status = 400, description = "Invalid input", body = crate::error::ApiError),
        (status = 401, description = "Not authenticated", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn update_profile_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<ResolvedIdentity>,
    Json(request): Json<UpdateProfileRequest>,
) -> Result<Json<UserProfile>, AppError> {
    request.validate()?;

    let user = state
        .store
        .update_profile(&identity.user_id, ProfileUpdate { name: request.name })
        .await?
        .ok_or(AppError::Unauthorized)?;

    Ok(Json(user.to_profile()))
}

/// Change password; every existing token is revoked
#[utoipa::path(
    post,
    path = "/api/v1/users/change-password",
    tag = "users",
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password changed", body = MessageResponse),
        (status = 400, description = "Invalid input", body = crate::error::ApiError),
        (status = 401, description = "Not authenticated or wrong password", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn change_password_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Extension(identity): Extension<ResolvedIdentity>,
    Json(request): Json<ChangePasswordRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    request.validate()?;

    let user = current_user(&state, &identity).await?;
    if !verify(request.old_password, user.password_hash.clone()).await? {
        return Err(AppError::InvalidCredentials);
    }

    let password_hash = hash(&state, request.new_password).await?;
    state.store.update_password(&user.id, &password_hash).await?;
    state.lifecycle.revoke_all(&user.id).await?;

    audit_log(&AuditEvent::PasswordChange {
        user_id: user.id,
        ip_address: extract_ip_address(&headers),
        user_agent: extract_user_agent(&headers),
    });

    Ok(Json(MessageResponse::new("Password updated; please log in again")))
}

/// Send an email verification credential to the caller
#[utoipa::path(
    post,
    path = "/api/v1/users/verify-email/request",
    tag = "users",
    responses(
        (status = 202, description = "Verification sent", body = MessageResponse),
        (status = 400, description = "Email already verified", body = crate::error::ApiError),
        (status = 401, description = "Not authenticated", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn request_email_verification_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<ResolvedIdentity>,
) -> Result<impl IntoResponse, AppError> {
    let user = current_user(&state, &identity).await?;
    if user.email_verified {
        return Err(AppError::BadRequest("Email already verified".to_string()));
    }

    let credential = state.lifecycle.issue_email_verification(&user.id).await?;
    state
        .delivery
        .deliver(&user.to_profile(), TokenPurpose::VerifyEmail, &credential)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(MessageResponse::new("Verification email sent")),
    ))
}

/// Confirm email ownership with a verification credential
#[utoipa::path(
    post,
    path = "/api/v1/users/verify-email",
    tag = "users",
    request_body = VerifyEmailRequest,
    responses(
        (status = 200, description = "Email verified", body = MessageResponse),
        (status = 401, description = "Invalid or expired token", body = crate::error::ApiError),
    )
)]
pub async fn verify_email_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<VerifyEmailRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    request.validate()?;

    let identity = state
        .lifecycle
        .consume(&request.token, TokenPurpose::VerifyEmail)
        .await?;
    if !state.store.mark_email_verified(&identity.user_id).await? {
        return Err(AppError::Unauthorized);
    }

    audit_log(&AuditEvent::EmailVerified {
        user_id: identity.user_id,
        ip_address: extract_ip_address(&headers),
    });

    Ok(Json(MessageResponse::new("Email verified")))
}

/// Start a password reset
///
/// Always answers 202 so the response does not reveal whether the
/// address belongs to an account.
#[utoipa::path(
    post,
    path = "/api/v1/users/forgot-password",
    tag = "users",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 202, description = "Reset instructions sent if the account exists", body = MessageResponse),
        (status = 400, description = "Invalid input", body = crate::error::ApiError),
    )
)]
pub async fn forgot_password_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<ForgotPasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    request.validate()?;

    let user = state
        .store
        .find_user_by_email(&request.email)
        .await?
        .filter(|u| u.is_active());

    audit_log(&AuditEvent::PasswordResetRequested {
        email: request.email.clone(),
        account_found: user.is_some(),
        ip_address: extract_ip_address(&headers),
    });

    if let Some(user) = user {
        let credential = state.lifecycle.issue_password_reset(&user.id).await?;
        state
            .delivery
            .deliver(&user.to_profile(), TokenPurpose::ResetPassword, &credential)
            .await?;
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(MessageResponse::new(
            "If the account exists, reset instructions have been sent",
        )),
    ))
}

/// Set a new password with a reset credential; every token is revoked
#[utoipa::path(
    post,
    path = "/api/v1/users/reset-password",
    tag = "users",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password reset", body = MessageResponse),
        (status = 400, description = "Invalid input", body = crate::error::ApiError),
        (status = 401, description = "Invalid or expired token", body = crate::error::ApiError),
    )
)]
pub async fn reset_password_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    request.validate()?;

    let identity = state
        .lifecycle
        .consume(&request.token, TokenPurpose::ResetPassword)
        .await?;

    let password_hash = hash(&state, request.new_password).await?;
    if !state
        .store
        .update_password(&identity.user_id, &password_hash)
        .await?
    {
        return Err(AppError::Unauthorized);
    }
    state.lifecycle.revoke_all(&identity.user_id).await?;

    audit_log(&AuditEvent::PasswordReset {
        user_id: identity.user_id,
        ip_address: extract_ip_address(&headers),
    });

    Ok(Json(MessageResponse::new("Password has been reset")))
}
