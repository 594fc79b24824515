use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Identity provider unavailable: {0}")]
    Unavailable(String),

    #[error("Identity provider rejected the request: {0}")]
    Rejected(String),
}

/// Source of live identity tokens from a third-party identity provider.
///
/// `id_token` returns `Ok(None)` when nobody is signed in with the provider
/// (anonymous or signed-out state). Errors mean the provider could not
/// produce a token right now.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn id_token(&self) -> Result<Option<String>, IdentityError>;

    async fn sign_out(&self) -> Result<(), IdentityError>;
}

/// Provider for deployments that only use backend-issued tokens.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoIdentity;

#[async_trait]
impl IdentityProvider for NoIdentity {
    async fn id_token(&self) -> Result<Option<String>, IdentityError> {
        Ok(None)
    }

    async fn sign_out(&self) -> Result<(), IdentityError> {
        Ok(())
    }
}

/// Provider holding a token obtained out of band (CLI flag, environment,
/// or a host application that owns the real provider SDK).
#[derive(Debug, Default)]
pub struct StaticIdentity {
    token: RwLock<Option<String>>,
}

impl StaticIdentity {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: RwLock::new(token),
        }
    }

    pub fn set_token(&self, token: impl Into<String>) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = Some(token.into());
    }

    pub fn is_signed_in(&self) -> bool {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn id_token(&self) -> Result<Option<String>, IdentityError> {
        Ok(self
            .token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    async fn sign_out(&self) -> Result<(), IdentityError> {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_identity_sign_out() {
        let identity = StaticIdentity::new(Some("id-1".into()));
        assert_eq!(identity.id_token().await.unwrap().as_deref(), Some("id-1"));

        identity.sign_out().await.unwrap();
        assert!(!identity.is_signed_in());
        assert_eq!(identity.id_token().await.unwrap(), None);

        identity.set_token("id-2");
        assert_eq!(identity.id_token().await.unwrap().as_deref(), Some("id-2"));
    }
}
