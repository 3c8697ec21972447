//! Hand-off of verification and reset credentials to the account owner
//!
//! Mail transport lives outside this service. The shipped channel records
//! the hand-off on the `delivery` log target, without the credential.

use async_trait::async_trait;
use warden_core::{TokenPurpose, UserProfile};

#[async_trait]
pub trait TokenDelivery: Send + Sync {
    async fn deliver(
        &self,
        recipient: &UserProfile,
        purpose: TokenPurpose,
        credential: &str,
    ) -> anyhow::Result<()>;
}

/// Delivery channel that only logs
#[derive(Debug, Clone, Copy, Default)]
pub struct LogDelivery;

#[async_trait]
impl TokenDelivery for LogDelivery {
    async fn deliver(
        &self,
        recipient: &UserProfile,
        purpose: TokenPurpose,
        _credential: &str,
    ) -> anyhow::Result<()> {
        tracing::info!(
            target: "delivery",
            user_id = %recipient.id,
            email = %recipient.email,
            purpose = %purpose,
            "Credential ready for delivery"
        );
        Ok(())
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub use capture::CapturingDelivery;

#[cfg(any(test, feature = "test-utils"))]
mod capture {
    use super::*;
    use std::sync::Mutex;

    /// Keeps every delivered credential for later inspection
    #[derive(Debug, Default)]
    pub struct CapturingDelivery {
        sent: Mutex<Vec<(String, TokenPurpose, String)>>,
    }

    impl CapturingDelivery {
        pub fn new() -> Self {
            Self::default()
        }

        /// Most recent credential sent to `email` for `purpose`
        pub fn last_for(&self, email: &str, purpose: TokenPurpose) -> Option<String> {
            self.sent
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .iter()
                .rev()
                .find(|(to, p, _)| to == email && *p == purpose)
                .map(|(_, _, credential)| credential.clone())
        }

        pub fn count(&self) -> usize {
            self.sent.lock().unwrap_or_else(|e| e.into_inner()).len()
        }
    }

    #[async_trait]
    impl TokenDelivery for CapturingDelivery {
        async fn deliver(
            &self,
            recipient: &UserProfile,
            purpose: TokenPurpose,
            credential: &str,
        ) -> anyhow::Result<()> {
            self.sent.lock().unwrap_or_else(|e| e.into_inner()).push((
                recipient.email.clone(),
                purpose,
                credential.to_string(),
            ));
            Ok(())
        }
    }
}
