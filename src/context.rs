//! Shared per-repository plumbing that `BlobStore`, `ManifestStore`, and
//! `Referrers` all build requests through.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::auth::{Action, AuthClient, Scope};

#[derive(Clone)]
pub(crate) struct Context {
    pub(crate) auth: Arc<AuthClient>,
    pub(crate) registry: String,
    pub(crate) repository: String,
    pub(crate) cancel: CancellationToken,
}

impl Context {
    pub(crate) fn new(
        auth: Arc<AuthClient>,
        registry: impl Into<String>,
        repository: impl Into<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            auth,
            registry: registry.into(),
            repository: repository.into(),
            cancel,
        }
    }

    pub(crate) fn url(&self, path: &str) -> String {
        self.auth.url(&self.registry, path)
    }

    pub(crate) fn scope(&self, actions: impl IntoIterator<Item = Action>) -> Scope {
        Scope::new("repository", self.repository.clone(), actions)
    }
}
