//! Pluggable credential resolution. The core consumes credentials through
//! this trait; it never touches disk or any particular secret store
//! itself.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Error;

/// `{username?, password?, refreshToken?, accessToken?}`; empty when every
/// field is empty. `access_token`, when set, is used directly as the Bearer
/// token against a `Bearer` challenge, skipping the token-endpoint round trip
/// entirely — it takes priority over `refresh_token` and `username`/`password`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credential {
    pub username: Option<String>,
    pub password: Option<String>,
    pub refresh_token: Option<String>,
    pub access_token: Option<String>,
}

impl Credential {
    pub fn user_pass(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
            refresh_token: None,
            access_token: None,
        }
    }

    pub fn refresh_token(token: impl Into<String>) -> Self {
        Self {
            refresh_token: Some(token.into()),
            ..Default::default()
        }
    }

    pub fn access_token(token: impl Into<String>) -> Self {
        Self {
            access_token: Some(token.into()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.username.is_none()
            && self.password.is_none()
            && self.refresh_token.is_none()
            && self.access_token.is_none()
    }
}

/// Resolves a [`Credential`] for a registry host. Implementations may read
/// from environment variables, a keychain, a config file already loaded in
/// memory, or anything else — this crate never persists credentials.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn credential(&self, registry: &str) -> Result<Credential, Error>;
}

/// A provider that always returns the same credential, regardless of host.
pub struct StaticCredentialProvider(Credential);

impl StaticCredentialProvider {
    pub fn new(credential: Credential) -> Self {
        Self(credential)
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn credential(&self, _registry: &str) -> Result<Credential, Error> {
        Ok(self.0.clone())
    }
}

/// A provider keyed by registry host, falling back to an empty credential
/// for hosts it has no entry for (anonymous pull).
#[derive(Default)]
pub struct MultiCredentialProvider(HashMap<String, Credential>);

impl MultiCredentialProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, registry: impl Into<String>, credential: Credential) -> &mut Self {
        self.0.insert(registry.into(), credential);
        self
    }
}

#[async_trait]
impl CredentialProvider for MultiCredentialProvider {
    async fn credential(&self, registry: &str) -> Result<Credential, Error> {
        Ok(self.0.get(registry).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl CredentialProvider for () {
    async fn credential(&self, _registry: &str) -> Result<Credential, Error> {
        Ok(Credential::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_provider_always_returns_same_credential() {
        let provider = StaticCredentialProvider::new(Credential::user_pass("u", "p"));
        let c1 = provider.credential("registry-a").await.unwrap();
        let c2 = provider.credential("registry-b").await.unwrap();
        assert_eq!(c1, c2);
        assert_eq!(c1.username.as_deref(), Some("u"));
    }

    #[tokio::test]
    async fn multi_provider_resolves_per_host_and_falls_back_empty() {
        let mut provider = MultiCredentialProvider::new();
        provider.insert("registry-a", Credential::user_pass("u", "p"));
        let a = provider.credential("registry-a").await.unwrap();
        let b = provider.credential("registry-b").await.unwrap();
        assert!(!a.is_empty());
        assert!(b.is_empty());
    }
}
