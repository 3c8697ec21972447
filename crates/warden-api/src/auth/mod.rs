//! Authentication and session token lifecycle
//!
//! - Credential signing and verification (`codec`)
//! - Token issue, resolution and revocation (`lifecycle`)
//! - Per-user write serialization (`locks`)
//! - Bearer middleware for protected routes (`gate`)
//! - Password hashing with Argon2 (`password`)
//! - Request and response bodies (`models`)

pub mod codec;
pub mod gate;
pub mod lifecycle;
pub mod locks;
pub mod models;
pub mod password;

pub use codec::{Claims, CodecError, TokenCodec};
pub use gate::{auth_gate, bearer_credential};
pub use lifecycle::{
    FailureCause, LifecycleError, ResolvedIdentity, SessionToken, TokenLifecycle,
};
pub use locks::UserLocks;
pub use models::{
    ChangePasswordRequest, ForgotPasswordRequest, LoginRequest, LoginResponse, MessageResponse,
    ResetPasswordRequest, SignupRequest, UpdateProfileRequest, VerifyEmailRequest,
};
pub use password::{
    hash_password, hash_password_with_config, validate_password_strength, verify_password,
    PasswordConfig, PasswordError,
};
