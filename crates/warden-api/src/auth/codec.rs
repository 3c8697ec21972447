//! Signed credential encoding and verification
//!
//! Credentials are HS256 JWTs. The purpose travels in the `aud` claim and a
//! random `jti` keeps two credentials minted in the same second distinct.
//! Verification is pure: it never consults the credential store, and the
//! expiry comparison uses the caller's `now` so boundaries are exact.

use chrono::{DateTime, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use warden_core::TokenPurpose;

/// Claims carried by every credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Token issuer
    pub iss: String,
    /// Subject - user ID
    pub sub: String,
    /// Purpose the credential was minted for
    #[serde(rename = "aud")]
    pub purpose: TokenPurpose,
    /// Unique credential identifier
    pub jti: String,
    /// Issued at (Unix seconds)
    pub iat: i64,
    /// Expiration (Unix seconds)
    pub exp: i64,
}

impl Claims {
    pub fn issued_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.iat, 0).unwrap_or_default()
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or_default()
    }
}

/// Credential encoding and verification errors
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Failed to encode credential: {0}")]
    Encoding(#[from] jsonwebtoken::errors::Error),

    #[error("Invalid credential signature")]
    InvalidSignature,

    #[error("Credential has expired")]
    Expired,

    #[error("Malformed credential")]
    Malformed,
}

/// Mints and verifies signed credentials with one secret and issuer
#[derive(Clone)]
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: String,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("issuer", &self.issuer)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    pub fn new(secret: &str, issuer: impl Into<String>) -> Self {
        let issuer = issuer.into();

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&issuer]);
        validation.set_audience(&TokenPurpose::ALL.map(|p| p.as_str()));
        validation.set_required_spec_claims(&["exp", "sub", "iss", "aud"]);
        // Expiry is compared against the caller's clock in `verify_signature`
        validation.validate_exp = false;

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            issuer,
        }
    }

    /// Produce a signed credential for `subject`
    pub fn mint(
        &self,
        subject: &str,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        purpose: TokenPurpose,
    ) -> Result<String, CodecError> {
        let claims = Claims {
            iss: self.issuer.clone(),
            sub: subject.to_string(),
            purpose,
            jti: Uuid::new_v4().to_string(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
        };

        Ok(encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &self.encoding_key,
        )?)
    }

    /// Check signature, issuer and audience, then require `now < exp`
    pub fn verify_signature(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, CodecError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::InvalidSignature => CodecError::InvalidSignature,
                _ => CodecError::Malformed,
            }
        })?;

        if now.timestamp() >= data.claims.exp {
            return Err(CodecError::Expired);
        }

        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use chrono::Duration;
    use proptest::prelude::*;

    fn codec() -> TokenCodec {
        TokenCodec::new("test-secret", "warden")
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn test_mint_and_verify() {
        let codec = codec();
        let iat = at(1_700_000_000);
        let exp = iat + Duration::days(30);

        let token = codec.mint("u1", iat, exp, TokenPurpose::Refresh).unwrap();
        assert_eq!(token.split('.').count(), 3);

        let claims = codec.verify_signature(&token, iat).unwrap();
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.purpose, TokenPurpose::Refresh);
        assert_eq!(claims.iss, "warden");
        assert_eq!(claims.issued_at(), iat);
        assert_eq!(claims.expires_at(), exp);
    }

    #[test]
    fn test_same_second_credentials_differ() {
        let codec = codec();
        let iat = at(1_700_000_000);
        let exp = iat + Duration::minutes(10);

        let a = codec.mint("u1", iat, exp, TokenPurpose::Refresh).unwrap();
        let b = codec.mint("u1", iat, exp, TokenPurpose::Refresh).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_expiry_boundary() {
        let codec = codec();
        let iat = at(1_700_000_000);
        let exp = iat + Duration::minutes(10);
        let token = codec.mint("u1", iat, exp, TokenPurpose::VerifyEmail).unwrap();

        assert!(codec.verify_signature(&token, exp - Duration::seconds(1)).is_ok());
        assert!(matches!(
            codec.verify_signature(&token, exp),
            Err(CodecError::Expired)
        ));
        assert!(matches!(
            codec.verify_signature(&token, exp + Duration::seconds(1)),
            Err(CodecError::Expired)
        ));
    }

    #[test]
    fn test_wrong_secret() {
        let other = TokenCodec::new("another-secret", "warden");
        let now = at(1_700_000_000);
        let token = other
            .mint("u1", now, now + Duration::hours(1), TokenPurpose::Refresh)
            .unwrap();

        assert!(matches!(
            codec().verify_signature(&token, now),
            Err(CodecError::InvalidSignature)
        ));
    }

    #[test]
    fn test_wrong_issuer_is_malformed() {
        let foreign = TokenCodec::new("test-secret", "someone-else");
        let now = at(1_700_000_000);
        let token = foreign
            .mint("u1", now, now + Duration::hours(1), TokenPurpose::Refresh)
            .unwrap();

        assert!(matches!(
            codec().verify_signature(&token, now),
            Err(CodecError::Malformed)
        ));
    }

    #[test]
    fn test_garbage_is_malformed() {
        let now = at(1_700_000_000);
        for input in ["", "invalid.token.here", "a.b", "Bearer x"] {
            assert!(matches!(
                codec().verify_signature(input, now),
                Err(CodecError::Malformed)
            ));
        }
    }

    #[test]
    fn test_tampered_payload_fails_signature() {
        let codec = codec();
        let now = at(1_700_000_000);
        let token = codec
            .mint("u1", now, now + Duration::hours(1), TokenPurpose::Refresh)
            .unwrap();

        let parts: Vec<&str> = token.split('.').collect();
        let payload = URL_SAFE_NO_PAD.decode(parts[1]).unwrap();
        let mut claims: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        claims["sub"] = serde_json::json!("u2");
        let forged_payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap());
        let forged = format!("{}.{}.{}", parts[0], forged_payload, parts[2]);

        assert!(matches!(
            codec.verify_signature(&forged, now),
            Err(CodecError::InvalidSignature)
        ));
    }

    proptest! {
        #[test]
        fn prop_subject_and_purpose_survive(
            subject in "[a-zA-Z0-9-]{1,40}",
            purpose_idx in 0usize..3,
            ttl in 1i64..100_000,
        ) {
            let codec = codec();
            let purpose = TokenPurpose::ALL[purpose_idx];
            let iat = at(1_700_000_000);
            let token = codec.mint(&subject, iat, iat + Duration::seconds(ttl), purpose).unwrap();

            let claims = codec.verify_signature(&token, iat).unwrap();
            prop_assert_eq!(claims.sub, subject);
            prop_assert_eq!(claims.purpose, purpose);
            prop_assert_eq!(claims.exp - claims.iat, ttl);
        }

        #[test]
        fn prop_altered_signature_is_rejected(position in 0usize..42, replacement in "[A-Za-z0-9_-]") {
            let codec = codec();
            let now = at(1_700_000_000);
            let token = codec.mint("u1", now, now + Duration::hours(1), TokenPurpose::Refresh).unwrap();

            let (head, signature) = token.rsplit_once('.').unwrap();
            let mut chars: Vec<char> = signature.chars().collect();
            let new_char = replacement.chars().next().unwrap();
            prop_assume!(chars[position] != new_char);
            chars[position] = new_char;
            let tampered = format!("{head}.{}", chars.into_iter().collect::<String>());

            prop_assert!(codec.verify_signature(&tampered, now).is_err());
        }
    }
}
