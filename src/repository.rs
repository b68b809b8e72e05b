//! `Repository`: owns one registry/repository pair and dispatches by
//! mediaType to `BlobStore` or `ManifestStore`; also exposes tag listing
//! and blob mounting.

use std::sync::Arc;

use bytes::Bytes;
use log::debug;
use reqwest::{Method, StatusCode};
use tokio_util::sync::CancellationToken;

use crate::auth::client::{AuthClient, PreparedRequest};
use crate::auth::scope::Action;
use crate::blob::{BlobReader, BlobStore, BufferedReader};
use crate::context::Context;
use crate::descriptor::Descriptor;
use crate::error::{Error, ResponseException};
use crate::http_util;
use crate::manifest_store::ManifestStore;
use crate::mediatype;
use crate::reference::Reference;
use crate::uri::UriFactory;

/// A lazily-paged, forward-only listing, as returned by [`Repository::tags`]
/// and the referrers/catalog listings.
pub struct Page<T> {
    pub items: Vec<T>,
    pub next: Option<String>,
}

pub struct Repository {
    ctx: Context,
    pub blobs: BlobStore,
    pub manifests: ManifestStore,
}

impl Repository {
    pub(crate) fn new(
        auth: Arc<AuthClient>,
        registry: impl Into<String>,
        repository: impl Into<String>,
        cancel: CancellationToken,
    ) -> Self {
        let ctx = Context::new(auth, registry, repository, cancel);
        Self {
            blobs: BlobStore::new(ctx.clone()),
            manifests: ManifestStore::new(ctx.clone()),
            ctx,
        }
    }

    pub fn repository(&self) -> &str {
        &self.ctx.repository
    }

    /// A clone of the cancellation token driving every request this
    /// repository issues; cancelling it aborts in-flight operations.
    pub fn cancel_handle(&self) -> CancellationToken {
        self.ctx.cancel.clone()
    }

    /// Dispatches to `ManifestStore` for index/manifest media types,
    /// `BlobStore` for everything else.
    pub async fn fetch(&self, descriptor: &Descriptor) -> Result<Box<dyn BlobReader>, Error> {
        if mediatype::is_manifest(&descriptor.media_type) || mediatype::is_index(&descriptor.media_type) {
            let reference = self.digest_reference(&descriptor.digest)?;
            let (_, bytes) = self.manifests.fetch(&reference).await?;
            Ok(Box::new(BufferedReader::new(bytes)))
        } else {
            self.blobs.fetch(descriptor).await
        }
    }

    pub async fn exists(&self, descriptor: &Descriptor) -> Result<bool, Error> {
        if mediatype::is_manifest(&descriptor.media_type) || mediatype::is_index(&descriptor.media_type) {
            let reference = self.digest_reference(&descriptor.digest)?;
            self.manifests.exists(&reference).await
        } else {
            self.blobs.exists(descriptor).await
        }
    }

    pub async fn push(&self, descriptor: &Descriptor, bytes: Bytes) -> Result<(), Error> {
        if mediatype::is_manifest(&descriptor.media_type) || mediatype::is_index(&descriptor.media_type) {
            let reference = self.digest_reference(&descriptor.digest)?;
            self.manifests.push(&reference, &descriptor.media_type, bytes).await?;
            Ok(())
        } else {
            self.blobs.push_bytes(descriptor, bytes).await
        }
    }

    fn digest_reference(&self, digest: &str) -> Result<Reference, Error> {
        format!("{}/{}@{}", self.ctx.registry, self.ctx.repository, digest).parse()
    }

    /// Pages `/v2/{repo}/tags/list`, following `Link` until exhausted.
    pub async fn tags(&self, last: Option<&str>) -> Result<Page<String>, Error> {
        let path = match last {
            Some(last) => format!(
                "{}&last={last}",
                UriFactory::tags_list(&self.ctx.repository, Some(self.ctx.auth.config().tag_list_page_size))
            ),
            None => UriFactory::tags_list(&self.ctx.repository, Some(self.ctx.auth.config().tag_list_page_size)),
        };
        let request = PreparedRequest::new(Method::GET, self.ctx.url(&path));
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

        let next = http_util::parse_next_link(response.headers());
        #[derive(serde::Deserialize)]
        struct TagsList {
            #[serde(default)]
            tags: Vec<String>,
        }
        let body: TagsList = response.json().await?;
        Ok(Page { items: body.tags, next })
    }

    /// `POST /v2/{repo}/blobs/uploads/?mount=<digest>&from=<fromRepo>`. On a
    /// 202 (mount ignored), falls back to pulling from `from_repository` and
    /// re-pushing, or to `fallback` if supplied.
    pub async fn mount(
        &self,
        descriptor: &Descriptor,
        from_repository: &str,
        fallback: Option<Bytes>,
    ) -> Result<(), Error> {
        let path = UriFactory::blob_mount(&self.ctx.repository, &descriptor.digest, from_repository);
        let request = PreparedRequest::new(Method::POST, self.ctx.url(&path));
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

        match response.status() {
            StatusCode::CREATED => {
                if let Some(server_digest) = http_util::docker_content_digest(response.headers())? {
                    if !crate::digest::eq(&descriptor.digest, &server_digest) {
                        return Err(Error::MountFailed(format!(
                            "server confirmed mount with mismatched digest {server_digest}"
                        )));
                    }
                }
                Ok(())
            }
            StatusCode::ACCEPTED => {
                debug!(
                    "registry ignored mount of {} from {from_repository}, falling back to pull+push",
                    descriptor.digest
                );
                let bytes = match fallback {
                    Some(bytes) => bytes,
                    None => {
                        let source = Repository::new(
                            self.ctx.auth.clone(),
                            self.ctx.registry.clone(),
                            from_repository.to_string(),
                            self.ctx.cancel.clone(),
                        );
                        let mut reader = source.blobs.fetch(descriptor).await?;
                        let mut buf = Vec::with_capacity(descriptor.size as usize);
                        while let Some(chunk) = reader.read_chunk().await? {
                            buf.extend_from_slice(&chunk);
                        }
                        Bytes::from(buf)
                    }
                };
                self.blobs.push_bytes(descriptor, bytes).await
            }
            _ => Err(ResponseException::from_response(Method::POST, path, response)
                .await
                .into()),
        }
    }
}
