//! Manifest operations: these mirror `BlobStore` against
//! `/v2/{repo}/manifests/{reference}`, with the accept/content-type
//! negotiation and referrers reconciliation manifests need and blobs don't.

use bytes::Bytes;
use log::trace;
use reqwest::{Method, StatusCode, header};
use serde::Deserialize;

use crate::auth::client::PreparedRequest;
use crate::auth::scope::Action;
use crate::blob::descriptor_from_headers;
use crate::context::Context;
use crate::descriptor::Descriptor;
use crate::digest;
use crate::error::{Error, ResponseException};
use crate::http_util;
use crate::manifest::{Index, Manifest};
use crate::mediatype::ACCEPT_MANIFEST_OR_INDEX;
use crate::reference::Reference;
use crate::referrers::Referrers;
use crate::uri::UriFactory;

/// Just enough of the manifest/index shape to read a `subject`, without
/// committing to either document type.
#[derive(Deserialize)]
struct SubjectProbe {
    #[serde(default)]
    subject: Option<Descriptor>,
}

fn extract_subject(bytes: &[u8]) -> Option<Descriptor> {
    serde_json::from_slice::<SubjectProbe>(bytes).ok().and_then(|p| p.subject)
}

pub struct ManifestStore {
    ctx: Context,
    pub referrers: Referrers,
}

impl ManifestStore {
    pub(crate) fn new(ctx: Context) -> Self {
        let referrers = Referrers::new(ctx.clone());
        Self { ctx, referrers }
    }

    pub async fn exists(&self, reference: &Reference) -> Result<bool, Error> {
        let content_reference = reference.content_reference()?;
        let path = UriFactory::manifest(&self.ctx.repository, content_reference);
        let request = PreparedRequest::new(Method::HEAD, self.ctx.url(&path))
            .header(header::ACCEPT, ACCEPT_MANIFEST_OR_INDEX.parse().unwrap());
        let response = self
            .ctx
            .auth
            .execute(&self.ctx.registry, self.ctx.scope([Action::Pull]), request, &self.ctx.cancel)
            .await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(ResponseException::from_response(Method::HEAD, path, response)
                .await
                .into()),
        }
    }

    pub async fn resolve(&self, reference: &Reference) -> Result<Descriptor, Error> {
        let content_reference = reference.content_reference()?;
        let path = UriFactory::manifest(&self.ctx.repository, content_reference);
        let request = PreparedRequest::new(Method::HEAD, self.ctx.url(&path))
            .header(header::ACCEPT, ACCEPT_MANIFEST_OR_INDEX.parse().unwrap());
        let response = self
            .ctx
            .auth
            .execute(&self.ctx.registry, self.ctx.scope([Action::Pull]), request, &self.ctx.cancel)
            .await?;

        if !response.status().is_success() {
            return Err(ResponseException::from_response(Method::HEAD, path, response)
                .await
                .into());
        }

        let media_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        descriptor_from_headers(reference, response.headers(), &media_type)
    }

    /// Fetch the raw bytes and resolved descriptor for `reference`.
    pub async fn fetch(&self, reference: &Reference) -> Result<(Descriptor, Bytes), Error> {
        let content_reference = reference.content_reference()?;
        let path = UriFactory::manifest(&self.ctx.repository, content_reference);
        let request = PreparedRequest::new(Method::GET, self.ctx.url(&path))
            .header(header::ACCEPT, ACCEPT_MANIFEST_OR_INDEX.parse().unwrap());
        let response = self
            .ctx
            .auth
            .execute(&self.ctx.registry, self.ctx.scope([Action::Pull]), request, &self.ctx.cancel)
            .await?;

        if !response.status().is_success() {
            return Err(ResponseException::from_response(Method::GET, path, response)
                .await
                .into());
        }

        let media_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let descriptor = descriptor_from_headers(reference, response.headers(), &media_type)?;

        let body = http_util::read_bounded(response, self.ctx.auth.config().max_metadata_bytes).await?;
        if body.len() as u64 != descriptor.size {
            return Err(Error::LengthMismatch {
                expected: descriptor.size,
                actual: body.len() as u64,
            });
        }
        let computed = digest::compute_sha256(&body);
        if !digest::eq(&descriptor.digest, &computed) {
            return Err(Error::DigestMismatch {
                expected: descriptor.digest.clone(),
                actual: computed,
            });
        }

        Ok((descriptor, body))
    }

    pub async fn fetch_manifest(&self, reference: &Reference) -> Result<(Descriptor, Manifest), Error> {
        let (descriptor, body) = self.fetch(reference).await?;
        Ok((descriptor, serde_json::from_slice(&body)?))
    }

    pub async fn fetch_index(&self, reference: &Reference) -> Result<(Descriptor, Index), Error> {
        let (descriptor, body) = self.fetch(reference).await?;
        Ok((descriptor, serde_json::from_slice(&body)?))
    }

    /// `PUT` `bytes` (already-serialized canonical JSON) to `reference`
    /// (tag or digest). If the document carries a `subject`, triggers
    /// referrers reconciliation per the resolved `ReferrersState`.
    pub async fn push(&self, reference: &Reference, media_type: &str, bytes: Bytes) -> Result<Descriptor, Error> {
        let content_reference = reference.content_reference()?;
        let path = UriFactory::manifest(&self.ctx.repository, content_reference);
        let digest = digest::compute_sha256(&bytes);
        let size = bytes.len() as u64;
        trace!("PUT {path} ({size} bytes, {media_type})");

        let content_type = media_type.parse().map_err(|_| Error::InvalidHeaderValue {
            name: "Content-Type",
            value: media_type.to_string(),
        })?;
        let request = PreparedRequest::new(Method::PUT, self.ctx.url(&path))
            .header(header::CONTENT_TYPE, content_type)
            .body(http_util::Payload::Bytes(bytes.clone()));
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

        if response.status() == StatusCode::CONFLICT {
            return Err(Error::AlreadyExists);
        }
        if response.status() != StatusCode::CREATED {
            return Err(ResponseException::from_response(Method::PUT, path, response)
                .await
                .into());
        }

        if let Some(server_digest) = http_util::docker_content_digest(response.headers())? {
            if !digest::eq(&digest, &server_digest) {
                return Err(Error::DigestMismatch {
                    expected: digest,
                    actual: server_digest,
                });
            }
        }

        let descriptor = Descriptor::new(media_type, digest, size);

        if let Some(subject) = extract_subject(&bytes) {
            self.referrers.on_push(&subject, &descriptor, response.headers()).await?;
        }

        Ok(descriptor)
    }

    /// Tag existing content: fetches the manifest at `source` and pushes
    /// the identical bytes under `tag`, without requiring the caller to
    /// already hold the manifest body.
    pub async fn tag(&self, source: &Reference, tag: impl Into<String>) -> Result<Descriptor, Error> {
        let (descriptor, bytes) = self.fetch(source).await?;
        let tag_reference = source.with_tag(tag)?;
        self.push(&tag_reference, &descriptor.media_type, bytes).await
    }

    /// Pre-reads the manifest to learn its subject (bounded by
    /// `maxMetadataBytes`), deletes it, then reconciles referrers.
    pub async fn delete(&self, reference: &Reference) -> Result<(), Error> {
        trace!("DELETE {reference}");
        let pre_read = self.fetch(reference).await;
        let (descriptor, subject) = match pre_read {
            Ok((descriptor, bytes)) => (Some(descriptor), extract_subject(&bytes)),
            Err(Error::Response(e)) if e.status == StatusCode::NOT_FOUND => {
                return Err(Error::NotFound);
            }
            Err(e) => return Err(e),
        };

        let content_reference = reference.content_reference()?;
        let path = UriFactory::manifest(&self.ctx.repository, content_reference);
        let request = PreparedRequest::new(Method::DELETE, self.ctx.url(&path));
        let response = self
            .ctx
            .auth
            .execute(&self.ctx.registry, self.ctx.scope([Action::Delete]), request, &self.ctx.cancel)
            .await?;

        match response.status() {
            StatusCode::ACCEPTED | StatusCode::OK => {}
            StatusCode::NOT_FOUND => return Err(Error::NotFound),
            _ => {
                return Err(ResponseException::from_response(Method::DELETE, path, response)
                    .await
                    .into());
            }
        }

        if let (Some(subject), Some(descriptor)) = (subject, descriptor) {
            self.referrers.on_delete(&subject, &descriptor).await?;
        }

        Ok(())
    }
}
