//! The HTTP-level authentication state machine: injects cached
//! credentials, and on a single 401 resolves a Basic or Bearer challenge,
//! caches the result, and retries exactly once.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use base64::Engine;
use log::{debug, trace, warn};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Response, StatusCode};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::auth::cache::Cache;
use crate::auth::challenge::{self, Scheme};
use crate::auth::credential::{Credential, CredentialProvider};
use crate::auth::scope::{Scope, ScopeManager};
use crate::error::{Error, ResponseException};
use crate::http_util::Payload;

const DEFAULT_CLIENT_ID: &str = "oras-rs";

/// Per-client custom header overrides, replaced atomically.
#[derive(Default)]
pub struct CustomHeaders(ArcSwap<HashMap<String, Vec<String>>>);

impl CustomHeaders {
    pub fn new() -> Self {
        Self(ArcSwap::from_pointee(HashMap::new()))
    }

    pub fn set(&self, headers: HashMap<String, Vec<String>>) {
        self.0.store(Arc::new(headers));
    }

    fn apply(&self, map: &mut HeaderMap) {
        for (name, values) in self.0.load().iter() {
            let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
                continue;
            };
            map.remove(&name);
            for value in values {
                if let Ok(value) = HeaderValue::from_str(value) {
                    map.append(name.clone(), value);
                }
            }
        }
    }
}

const DEFAULT_TAG_LIST_PAGE_SIZE: usize = 1000;
const DEFAULT_MAX_METADATA_BYTES: u64 = 4 * 1024 * 1024;

pub struct ClientConfig {
    pub plain_http: bool,
    pub client_id: String,
    pub user_agent: String,
    /// `n=` query parameter on `/tags/list` and `/referrers/` pagination.
    pub tag_list_page_size: usize,
    /// Cap on bytes read back when pulling a referrers/tag-schema index or
    /// pre-reading a manifest ahead of a delete.
    pub max_metadata_bytes: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            plain_http: false,
            client_id: DEFAULT_CLIENT_ID.to_string(),
            user_agent: DEFAULT_CLIENT_ID.to_string(),
            tag_list_page_size: DEFAULT_TAG_LIST_PAGE_SIZE,
            max_metadata_bytes: DEFAULT_MAX_METADATA_BYTES,
        }
    }
}

/// One fully-specified outbound call, rebuilt fresh for the initial attempt
/// and (if needed) the single auth retry.
pub struct PreparedRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(HeaderName, HeaderValue)>,
    pub body: Payload,
}

impl PreparedRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: Payload::Empty,
        }
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.push((name, value));
        self
    }

    pub fn body(mut self, body: Payload) -> Self {
        self.body = body;
        self
    }
}

pub struct AuthClient {
    http: reqwest::Client,
    cache: Cache,
    scopes: ScopeManager,
    credentials: Arc<dyn CredentialProvider>,
    custom_headers: CustomHeaders,
    config: ClientConfig,
}

impl AuthClient {
    pub fn new(credentials: Arc<dyn CredentialProvider>, config: ClientConfig) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self {
            http,
            cache: Cache::new(),
            scopes: ScopeManager::new(),
            credentials,
            custom_headers: CustomHeaders::new(),
            config,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn custom_headers(&self) -> &CustomHeaders {
        &self.custom_headers
    }

    pub fn url(&self, host: &str, path: &str) -> String {
        let scheme = if self.config.plain_http { "http" } else { "https" };
        format!("{scheme}://{host}{path}")
    }

    /// Execute `request` against `host`, authenticating with `scope` and
    /// retrying once on a 401 per spec.md §4.6. Returns whatever the final
    /// response is, success or failure — callers interpret the status code.
    pub async fn execute(
        &self,
        host: &str,
        scope: Scope,
        request: PreparedRequest,
        cancel: &CancellationToken,
    ) -> Result<Response, Error> {
        self.scopes.add(host, scope).await;

        let response = self.send_once(host, &request, cancel).await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let challenges = challenge::parse_all(
            response
                .headers()
                .get_all(reqwest::header::WWW_AUTHENTICATE)
                .iter()
                .filter_map(|v| v.to_str().ok()),
        );

        let bearer = challenges
            .iter()
            .find(|c| c.scheme == Scheme::Bearer);
        let basic = challenges.iter().find(|c| c.scheme == Scheme::Basic);

        let authorization = if let Some(bearer) = bearer {
            self.resolve_bearer(host, bearer, cancel).await?
        } else if let Some(basic) = basic {
            self.resolve_basic(host).await?
        } else {
            return Err(Error::Authentication(
                "401 response carried no parsable WWW-Authenticate challenge".into(),
            ));
        };

        let retry = self.send_with_auth(host, &request, Some(authorization)).await?;
        Ok(retry)
    }

    async fn send_once(
        &self,
        host: &str,
        request: &PreparedRequest,
        _cancel: &CancellationToken,
    ) -> Result<Response, Error> {
        let authorization = self.cached_authorization(host).await;
        self.send_with_auth(host, request, authorization).await
    }

    async fn cached_authorization(&self, host: &str) -> Option<HeaderValue> {
        match self.cache.scheme_for(host).await {
            Some(Scheme::Bearer) => {
                let scope_key = self.scopes.scope_string(host).await;
                let token = self.cache.try_get_token(host, Scheme::Bearer, &scope_key).await?;
                HeaderValue::from_str(&format!("Bearer {token}")).ok()
            }
            Some(Scheme::Basic) => {
                let token = self.cache.try_get_token(host, Scheme::Basic, "").await?;
                HeaderValue::from_str(&format!("Basic {token}")).ok()
            }
            _ => None,
        }
    }

    async fn send_with_auth(
        &self,
        host: &str,
        request: &PreparedRequest,
        authorization: Option<HeaderValue>,
    ) -> Result<Response, Error> {
        let mut headers = HeaderMap::new();
        for (name, value) in &request.headers {
            headers.append(name, value.clone());
        }
        if let Some(authorization) = authorization {
            headers.insert(reqwest::header::AUTHORIZATION, authorization);
        }
        self.custom_headers.apply(&mut headers);

        let body = request.body.body()?;
        trace!("{} {}", request.method, request.url);
        let response = self
            .http
            .request(request.method.clone(), &request.url)
            .headers(headers)
            .body(body)
            .send()
            .await?;
        let _ = host;
        Ok(response)
    }

    async fn resolve_bearer(
        &self,
        host: &str,
        challenge: &challenge::Challenge,
        cancel: &CancellationToken,
    ) -> Result<HeaderValue, Error> {
        let realm = challenge.realm().ok_or_else(|| {
            Error::Authentication("Bearer challenge missing realm".into())
        })?;
        let service = challenge.service().unwrap_or_default();

        if let Some(scope) = challenge.scope() {
            self.scopes.add_from_str(host, scope).await;
        }
        let required_scope = self.scopes.scope_string(host).await;

        let credential = self.credentials.credential(host).await?;

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let token = if let Some(access_token) = &credential.access_token {
            access_token.clone()
        } else if credential.refresh_token.is_some() {
            self.fetch_token_oauth2(realm, service, &required_scope, &credential)
                .await?
        } else {
            match (&credential.username, &credential.password) {
                (Some(_), Some(_)) => {
                    self.fetch_token_oauth2(realm, service, &required_scope, &credential)
                        .await?
                }
                (None, None) => {
                    self.fetch_token_distribution(realm, service, &required_scope, &credential)
                        .await?
                }
                _ => {
                    return Err(Error::Authentication(
                        "grant_type=password requires both username and password".into(),
                    ));
                }
            }
        };

        self.cache
            .set_token(host, Scheme::Bearer, &required_scope, token.clone())
            .await;

        HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| Error::Authentication("token contains invalid header characters".into()))
    }

    async fn fetch_token_oauth2(
        &self,
        realm: &str,
        service: &str,
        scope: &str,
        credential: &Credential,
    ) -> Result<String, Error> {
        #[derive(Deserialize)]
        struct TokenResponse {
            #[serde(default)]
            access_token: String,
        }

        let mut form = vec![
            ("service", service.to_string()),
            ("client_id", self.config.client_id.clone()),
            ("scope", scope.to_string()),
        ];
        if let Some(refresh_token) = &credential.refresh_token {
            form.insert(0, ("refresh_token", refresh_token.clone()));
            form.insert(0, ("grant_type", "refresh_token".to_string()));
        } else {
            form.insert(0, ("password", credential.password.clone().unwrap_or_default()));
            form.insert(0, ("username", credential.username.clone().unwrap_or_default()));
            form.insert(0, ("grant_type", "password".to_string()));
        }

        let response = self.http.post(realm).form(&form).send().await?;
        if !response.status().is_success() {
            return Err(
                ResponseException::from_response(Method::POST, realm.to_string(), response)
                    .await
                    .into(),
            );
        }

        let parsed: TokenResponse = response.json().await?;
        if parsed.access_token.is_empty() {
            return Err(Error::Authentication(
                "token endpoint returned an empty access_token".into(),
            ));
        }
        Ok(parsed.access_token)
    }

    async fn fetch_token_distribution(
        &self,
        realm: &str,
        service: &str,
        scope: &str,
        credential: &Credential,
    ) -> Result<String, Error> {
        #[derive(Deserialize)]
        struct TokenResponse {
            #[serde(default)]
            access_token: Option<String>,
            #[serde(default)]
            token: Option<String>,
        }

        let mut builder = self
            .http
            .get(realm)
            .query(&[("service", service), ("scope", scope)]);
        if let (Some(username), Some(password)) = (&credential.username, &credential.password) {
            builder = builder.basic_auth(username, Some(password));
        }

        let response = builder.send().await?;
        if !response.status().is_success() {
            return Err(
                ResponseException::from_response(Method::GET, realm.to_string(), response)
                    .await
                    .into(),
            );
        }

        let parsed: TokenResponse = response.json().await?;
        parsed
            .access_token
            .or(parsed.token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                Error::Authentication(
                    "token endpoint response carried neither access_token nor token".into(),
                )
            })
    }

    async fn resolve_basic(&self, host: &str) -> Result<HeaderValue, Error> {
        let credential = self.credentials.credential(host).await?;
        let (username, password) = match (credential.username, credential.password) {
            (Some(u), Some(p)) => (u, p),
            _ => {
                return Err(Error::Authentication(
                    "Basic challenge requires a username and password".into(),
                ));
            }
        };

        let token = base64::engine::general_purpose::STANDARD
            .encode(format!("{username}:{password}"));
        self.cache.set_token(host, Scheme::Basic, "", token.clone()).await;
        debug!("resolved Basic auth for {host}");
        warn_if_plain_http(self.config.plain_http, host);

        HeaderValue::from_str(&format!("Basic {token}"))
            .map_err(|_| Error::Authentication("token contains invalid header characters".into()))
    }
}

fn warn_if_plain_http(plain_http: bool, host: &str) {
    if plain_http {
        warn!("sending Basic credentials to {host} over plain HTTP");
    }
}
