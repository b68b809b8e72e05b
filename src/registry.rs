//! `Registry`: factory for `Repository` instances against one registry
//! host, plus the catalog listing and connectivity ping.

use std::sync::Arc;

use reqwest::Method;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::auth::client::{AuthClient, ClientConfig, PreparedRequest};
use crate::auth::credential::CredentialProvider;
use crate::auth::scope::Scope;
use crate::error::{Error, ResponseException};
use crate::http_util;
use crate::repository::{Page, Repository};
use crate::uri::UriFactory;

pub struct Registry {
    auth: Arc<AuthClient>,
    host: String,
    cancel: CancellationToken,
}

impl Registry {
    pub fn new(
        host: impl Into<String>,
        credentials: Arc<dyn CredentialProvider>,
        config: ClientConfig,
    ) -> Result<Self, Error> {
        Ok(Self {
            auth: Arc::new(AuthClient::new(credentials, config)?),
            host: host.into(),
            cancel: CancellationToken::new(),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// A clone of the token cancelling every request issued by this
    /// registry and the repositories it produces.
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn repository(&self, repository: impl Into<String>) -> Repository {
        Repository::new(self.auth.clone(), self.host.clone(), repository, self.cancel.clone())
    }

    /// `GET /v2/` — bare connectivity/auth check.
    pub async fn ping(&self) -> Result<(), Error> {
        let path = UriFactory::ping();
        let request = PreparedRequest::new(Method::GET, self.auth.url(&self.host, &path));
        let response = self
            .auth
            .execute(&self.host, Scope::new("registry", "catalog", []), request, &self.cancel)
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(ResponseException::from_response(Method::GET, path, response)
                .await
                .into())
        }
    }

    /// Pages `/v2/_catalog`, following `Link` until exhausted.
    pub async fn repositories(&self, last: Option<&str>) -> Result<Page<String>, Error> {
        let page_size = self.auth.config().tag_list_page_size;
        let path = match last {
            Some(last) => format!("{}&last={last}", UriFactory::catalog(Some(page_size))),
            None => UriFactory::catalog(Some(page_size)),
        };
        let request = PreparedRequest::new(Method::GET, self.auth.url(&self.host, &path));
        let response = self
            .auth
            .execute(&self.host, Scope::new("registry", "catalog", []), request, &self.cancel)
            .await?;

        if !response.status().is_success() {
            return Err(ResponseException::from_response(Method::GET, path, response)
                .await
                .into());
        }

        let next = http_util::parse_next_link(response.headers());
        #[derive(Deserialize)]
        struct Catalog {
            #[serde(default)]
            repositories: Vec<String>,
        }
        let body: Catalog = response.json().await?;
        Ok(Page { items: body.repositories, next })
    }
}
