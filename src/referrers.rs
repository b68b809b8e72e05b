//! The referrers subsystem: native `/referrers/` API when the registry
//! supports it, a tag-schema (`sha256-<hex>` index) fallback otherwise.
//! State is resolved once per repository and never reconsidered.

use log::debug;
use reqwest::{Method, StatusCode, header};
use tokio::sync::Mutex;

use crate::auth::client::PreparedRequest;
use crate::auth::scope::Action;
use crate::context::Context;
use crate::descriptor::Descriptor;
use crate::digest;
use crate::error::{Error, ResponseException};
use crate::http_util;
use crate::manifest::Index;
use crate::mediatype::OCI_IMAGE_INDEX_V1;
use crate::uri::UriFactory;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferrersState {
    Unknown,
    Supported,
    NotSupported,
}

/// Per-repository referrers policy: resolves `ReferrersState`, reconciles
/// the tag-schema index on push/delete, and serves listings.
pub struct Referrers {
    ctx: Context,
    state: Mutex<ReferrersState>,
}

impl Referrers {
    pub(crate) fn new(ctx: Context) -> Self {
        Self {
            ctx,
            state: Mutex::new(ReferrersState::Unknown),
        }
    }

    pub async fn state(&self) -> ReferrersState {
        *self.state.lock().await
    }

    async fn transition(&self, value: ReferrersState) -> Result<(), Error> {
        let mut guard = self.state.lock().await;
        match *guard {
            ReferrersState::Unknown => {
                debug!("referrers state for {} resolved to {value:?}", self.ctx.repository);
                *guard = value;
                Ok(())
            }
            current if current == value => Ok(()),
            _ => Err(Error::ReferrersStateAlreadySet),
        }
    }

    /// `GET /v2/{repo}/referrers/<zeroDigest>` — pre-resolves the state
    /// without requiring a push first.
    pub async fn ping(&self) -> Result<ReferrersState, Error> {
        let zero_digest = format!("sha256:{}", "0".repeat(64));
        let path = UriFactory::referrers(&self.ctx.repository, &zero_digest, None);
        let request = PreparedRequest::new(Method::GET, self.ctx.url(&path))
            .header(header::ACCEPT, OCI_IMAGE_INDEX_V1.parse().unwrap());
        let response = self
            .ctx
            .auth
            .execute(&self.ctx.registry, self.ctx.scope([Action::Pull]), request, &self.ctx.cancel)
            .await?;

        let state = match response.status() {
            StatusCode::OK => {
                let is_index = response
                    .headers()
                    .get(header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(|v| v.starts_with(OCI_IMAGE_INDEX_V1))
                    .unwrap_or(false);
                if is_index {
                    ReferrersState::Supported
                } else {
                    ReferrersState::NotSupported
                }
            }
            StatusCode::NOT_FOUND => ReferrersState::NotSupported,
            _ => {
                return Err(ResponseException::from_response(Method::GET, path, response)
                    .await
                    .into());
            }
        };

        self.transition(state).await?;
        Ok(state)
    }

    /// Called after a manifest carrying `subject` has been pushed.
    pub(crate) async fn on_push(
        &self,
        subject: &Descriptor,
        pushed: &Descriptor,
        push_response_headers: &reqwest::header::HeaderMap,
    ) -> Result<(), Error> {
        let resolved = match self.state().await {
            ReferrersState::Unknown => {
                let supported = http_util::has_oci_subject(push_response_headers);
                let state = if supported {
                    ReferrersState::Supported
                } else {
                    ReferrersState::NotSupported
                };
                self.transition(state).await?;
                state
            }
            other => other,
        };

        match resolved {
            ReferrersState::Supported => Ok(()),
            ReferrersState::NotSupported => self.tag_schema_add(subject, pushed).await,
            ReferrersState::Unknown => unreachable!("resolved above"),
        }
    }

    /// Called ahead of deleting a manifest that carries `subject`.
    pub(crate) async fn on_delete(&self, subject: &Descriptor, deleted: &Descriptor) -> Result<(), Error> {
        let resolved = match self.state().await {
            ReferrersState::Unknown => self.ping().await?,
            other => other,
        };

        match resolved {
            ReferrersState::Supported => Ok(()),
            ReferrersState::NotSupported => self.tag_schema_remove(subject, deleted).await,
            ReferrersState::Unknown => unreachable!("ping always resolves"),
        }
    }

    /// List the referrers of `subject`, optionally filtered by `artifact_type`.
    pub async fn list(&self, subject: &Descriptor, artifact_type: Option<&str>) -> Result<Vec<Descriptor>, Error> {
        let resolved = match self.state().await {
            ReferrersState::Unknown => self.ping().await?,
            other => other,
        };

        match resolved {
            ReferrersState::Supported => self.list_native(subject, artifact_type).await,
            ReferrersState::NotSupported => self.list_tag_schema(subject, artifact_type).await,
            ReferrersState::Unknown => unreachable!("ping always resolves"),
        }
    }

    async fn list_native(&self, subject: &Descriptor, artifact_type: Option<&str>) -> Result<Vec<Descriptor>, Error> {
        let mut path = Some(UriFactory::referrers(&self.ctx.repository, &subject.digest, artifact_type));
        let mut out = Vec::new();

        while let Some(current) = path.take() {
            let request = PreparedRequest::new(Method::GET, self.ctx.url(&current))
                .header(header::ACCEPT, OCI_IMAGE_INDEX_V1.parse().unwrap());
            let response = self
                .ctx
                .auth
                .execute(&self.ctx.registry, self.ctx.scope([Action::Pull]), request, &self.ctx.cancel)
                .await?;

            if response.status() == StatusCode::NOT_FOUND {
                break;
            }
            if !response.status().is_success() {
                return Err(ResponseException::from_response(Method::GET, current, response)
                    .await
                    .into());
            }

            let server_filtered = artifact_type
                .map(|_| http_util::filters_applied(response.headers()).iter().any(|f| f == "artifactType"))
                .unwrap_or(true);
            let next = http_util::parse_next_link(response.headers());

            let body = http_util::read_bounded(response, self.ctx.auth.config().max_metadata_bytes).await?;
            let index: Index = serde_json::from_slice(&body)?;

            let manifests = index.manifests.into_iter().filter(|m| {
                server_filtered || artifact_type.map_or(true, |want| m.artifact_type.as_deref() == Some(want))
            });
            out.extend(manifests);

            path = next;
        }

        Ok(out)
    }

    async fn list_tag_schema(&self, subject: &Descriptor, artifact_type: Option<&str>) -> Result<Vec<Descriptor>, Error> {
        let (manifests, _) = self.fetch_tag_schema_index(&referrers_tag(&subject.digest)?).await?;
        Ok(manifests
            .into_iter()
            .filter(|m| artifact_type.map_or(true, |want| m.artifact_type.as_deref() == Some(want)))
            .collect())
    }

    async fn tag_schema_add(&self, subject: &Descriptor, descriptor: &Descriptor) -> Result<(), Error> {
        let tag = referrers_tag(&subject.digest)?;
        let (existing, old_digest) = self.fetch_tag_schema_index(&tag).await?;

        if existing.iter().any(|d| digest::eq(&d.digest, &descriptor.digest)) {
            return Ok(());
        }

        let mut manifests = existing;
        manifests.push(descriptor.clone());
        self.put_tag_schema_index(&tag, manifests, old_digest).await
    }

    async fn tag_schema_remove(&self, subject: &Descriptor, descriptor: &Descriptor) -> Result<(), Error> {
        let tag = referrers_tag(&subject.digest)?;
        let (existing, old_digest) = self.fetch_tag_schema_index(&tag).await?;

        if !existing.iter().any(|d| digest::eq(&d.digest, &descriptor.digest)) {
            return Ok(());
        }

        let manifests: Vec<Descriptor> = existing
            .into_iter()
            .filter(|d| !digest::eq(&d.digest, &descriptor.digest))
            .collect();
        self.put_tag_schema_index(&tag, manifests, old_digest).await
    }

    /// Returns the deduped, non-empty manifest list and the digest of the
    /// currently-stored index (`None` if there was none to begin with).
    async fn fetch_tag_schema_index(&self, tag: &str) -> Result<(Vec<Descriptor>, Option<String>), Error> {
        let path = UriFactory::manifest(&self.ctx.repository, tag);
        let request = PreparedRequest::new(Method::GET, self.ctx.url(&path))
            .header(header::ACCEPT, OCI_IMAGE_INDEX_V1.parse().unwrap());
        let response = self
            .ctx
            .auth
            .execute(&self.ctx.registry, self.ctx.scope([Action::Pull]), request, &self.ctx.cancel)
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok((Vec::new(), None));
        }
        if !response.status().is_success() {
            return Err(ResponseException::from_response(Method::GET, path, response)
                .await
                .into());
        }

        let old_digest = http_util::docker_content_digest(response.headers())?;
        let body = http_util::read_bounded(response, self.ctx.auth.config().max_metadata_bytes).await?;
        let index: Index = serde_json::from_slice(&body)?;

        let mut seen = std::collections::BTreeSet::new();
        let manifests = index
            .manifests
            .into_iter()
            .filter(|d| !d.is_empty())
            .filter(|d| seen.insert(d.digest.clone()))
            .collect();

        Ok((manifests, old_digest))
    }

    async fn put_tag_schema_index(
        &self,
        tag: &str,
        manifests: Vec<Descriptor>,
        old_digest: Option<String>,
    ) -> Result<(), Error> {
        let index = Index {
            schema_version: 2,
            media_type: OCI_IMAGE_INDEX_V1.to_string(),
            manifests,
            subject: None,
            artifact_type: None,
            annotations: None,
        };
        let body = index.to_canonical_json()?;
        let new_digest = digest::compute_sha256(&body);

        let path = UriFactory::manifest(&self.ctx.repository, tag);
        let request = PreparedRequest::new(Method::PUT, self.ctx.url(&path))
            .header(header::CONTENT_TYPE, OCI_IMAGE_INDEX_V1.parse().unwrap())
            .body(crate::http_util::Payload::Bytes(body.into()));
        let response = self
            .ctx
            .auth
            .execute(
                &self.ctx.registry,
                self.ctx.scope([Action::Push, Action::Pull]),
                request,
                &self.ctx.cancel,
            )
            .await?;

        if response.status() != StatusCode::CREATED {
            return Err(ResponseException::from_response(Method::PUT, path, response)
                .await
                .into());
        }

        if let Some(old_digest) = old_digest {
            if !digest::eq(&old_digest, &new_digest) {
                self.delete_manifest_by_digest(&old_digest).await?;
            }
        }

        Ok(())
    }

    async fn delete_manifest_by_digest(&self, digest: &str) -> Result<(), Error> {
        let path = UriFactory::manifest(&self.ctx.repository, digest);
        let request = PreparedRequest::new(Method::DELETE, self.ctx.url(&path));
        let response = self
            .ctx
            .auth
            .execute(&self.ctx.registry, self.ctx.scope([Action::Delete]), request, &self.ctx.cancel)
            .await?;

        match response.status() {
            StatusCode::ACCEPTED | StatusCode::OK | StatusCode::NOT_FOUND => Ok(()),
            _ => Err(ResponseException::from_response(Method::DELETE, path, response)
                .await
                .into()),
        }
    }
}

fn referrers_tag(digest: &str) -> Result<String, Error> {
    let (algorithm, hex) = digest.split_once(':').ok_or_else(|| Error::InvalidDigest {
        digest: digest.to_string(),
        reason: "missing ':' separating algorithm from hex".into(),
    })?;
    Ok(format!("{algorithm}-{hex}"))
}
