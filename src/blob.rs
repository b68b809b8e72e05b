//! Blob operations: existence check, fetch (optionally range-seekable),
//! two-step chunked push, delete, and reference-based resolve/fetch.

use async_trait::async_trait;
use bytes::Bytes;
use log::trace;
use reqwest::{Method, StatusCode, header};
use sha2::{Digest as _, Sha256};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::auth::client::PreparedRequest;
use crate::auth::scope::Action;
use crate::context::Context;
use crate::descriptor::Descriptor;
use crate::digest;
use crate::error::{Error, ResponseException};
use crate::http_util::{self, Payload};
use crate::mediatype::OCTET_STREAM;
use crate::reference::Reference;
use crate::uri::UriFactory;

/// A readable handle to fetched blob content.
///
/// `seek` re-requests from byte `position` using `Range: bytes=start-`;
/// only readers backed by a server that advertised `Accept-Ranges: bytes`
/// support it.
#[async_trait]
pub trait BlobReader: Send {
    async fn read_chunk(&mut self) -> Result<Option<Bytes>, Error>;
    async fn seek(&mut self, position: u64) -> Result<(), Error>;
    fn is_seekable(&self) -> bool;
    fn size(&self) -> u64;

    /// Drain the reader into `writer`, verifying the running digest and
    /// total length against `descriptor` once fully consumed.
    async fn copy_to(
        &mut self,
        descriptor: &Descriptor,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64, Error> {
        let mut hasher = Sha256::new();
        let mut len: u64 = 0;
        while let Some(chunk) = self.read_chunk().await? {
            hasher.update(&chunk);
            len += chunk.len() as u64;
            writer.write_all(&chunk).await?;
        }
        writer.flush().await?;
        if len != descriptor.size {
            return Err(Error::LengthMismatch {
                expected: descriptor.size,
                actual: len,
            });
        }
        let computed = format!("sha256:{}", hex::encode(hasher.finalize()));
        if !digest::eq(&descriptor.digest, &computed) {
            return Err(Error::DigestMismatch {
                expected: descriptor.digest.clone(),
                actual: computed,
            });
        }
        Ok(len)
    }
}

pub(crate) struct RangedBlobReader {
    ctx: Context,
    repository: String,
    digest: String,
    size: u64,
    position: u64,
    current: Option<reqwest::Response>,
}

#[async_trait]
impl BlobReader for RangedBlobReader {
    async fn read_chunk(&mut self) -> Result<Option<Bytes>, Error> {
        if self.current.is_none() {
            self.request_from(self.position).await?;
        }
        let response = self.current.as_mut().unwrap();
        match response.chunk().await? {
            Some(chunk) => {
                self.position += chunk.len() as u64;
                Ok(Some(chunk))
            }
            None => {
                self.current = None;
                Ok(None)
            }
        }
    }

    async fn seek(&mut self, position: u64) -> Result<(), Error> {
        self.position = position;
        self.current = None;
        Ok(())
    }

    fn is_seekable(&self) -> bool {
        true
    }

    fn size(&self) -> u64 {
        self.size
    }
}

impl RangedBlobReader {
    async fn request_from(&mut self, start: u64) -> Result<(), Error> {
        let path = UriFactory::blob(&self.repository, &self.digest);
        let mut request = PreparedRequest::new(Method::GET, self.ctx.url(&path))
            .header(header::ACCEPT, OCTET_STREAM.parse().unwrap());
        if start > 0 {
            request = request.header(
                header::RANGE,
                format!("bytes={start}-").parse().map_err(|_| Error::Authentication("bad range".into()))?,
            );
        }
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
        self.current = Some(response);
        Ok(())
    }
}

pub(crate) struct PlainBlobReader {
    response: Option<reqwest::Response>,
    size: u64,
}

#[async_trait]
impl BlobReader for PlainBlobReader {
    async fn read_chunk(&mut self) -> Result<Option<Bytes>, Error> {
        let Some(response) = self.response.as_mut() else {
            return Ok(None);
        };
        match response.chunk().await? {
            Some(chunk) => Ok(Some(chunk)),
            None => {
                self.response = None;
                Ok(None)
            }
        }
    }

    async fn seek(&mut self, _position: u64) -> Result<(), Error> {
        Err(Error::NotSeekable)
    }

    fn is_seekable(&self) -> bool {
        false
    }

    fn size(&self) -> u64 {
        self.size
    }
}

/// Wraps an already-fully-read buffer (e.g. a manifest fetched as a single
/// JSON body) behind the same `BlobReader` interface streamed blobs use.
pub(crate) struct BufferedReader {
    remaining: Option<Bytes>,
    size: u64,
}

impl BufferedReader {
    pub(crate) fn new(bytes: Bytes) -> Self {
        let size = bytes.len() as u64;
        Self {
            remaining: Some(bytes),
            size,
        }
    }
}

#[async_trait]
impl BlobReader for BufferedReader {
    async fn read_chunk(&mut self) -> Result<Option<Bytes>, Error> {
        Ok(self.remaining.take())
    }

    async fn seek(&mut self, _position: u64) -> Result<(), Error> {
        Err(Error::NotSeekable)
    }

    fn is_seekable(&self) -> bool {
        false
    }

    fn size(&self) -> u64 {
        self.size
    }
}

pub struct BlobStore {
    pub(crate) ctx: Context,
}

impl BlobStore {
    pub(crate) fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    pub async fn exists(&self, descriptor: &Descriptor) -> Result<bool, Error> {
        let path = UriFactory::blob(&self.ctx.repository, &descriptor.digest);
        let request = PreparedRequest::new(Method::HEAD, self.ctx.url(&path));
        let response = self
            .ctx
            .auth
            .execute(&self.ctx.registry, self.ctx.scope([Action::Pull]), request, &self.ctx.cancel)
            .await?;

        match response.status() {
            StatusCode::OK => {
                if let Some(server_digest) = http_util::docker_content_digest(response.headers())? {
                    if !digest::eq(&descriptor.digest, &server_digest) {
                        return Err(Error::DigestMismatch {
                            expected: descriptor.digest.clone(),
                            actual: server_digest,
                        });
                    }
                }
                Ok(true)
            }
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(ResponseException::from_response(Method::HEAD, path, response)
                .await
                .into()),
        }
    }

    pub async fn fetch(&self, descriptor: &Descriptor) -> Result<Box<dyn BlobReader>, Error> {
        let path = UriFactory::blob(&self.ctx.repository, &descriptor.digest);
        // The initial request never carries a Range header, so a zero-sized
        // blob is fetched with a plain GET rather than an empty range.
        trace!("fetching blob {} ({} bytes)", descriptor.digest, descriptor.size);
        let request = PreparedRequest::new(Method::GET, self.ctx.url(&path))
            .header(header::ACCEPT, OCTET_STREAM.parse().unwrap());

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

        if let Some(server_digest) = http_util::docker_content_digest(response.headers())? {
            if !digest::eq(&descriptor.digest, &server_digest) {
                return Err(Error::DigestMismatch {
                    expected: descriptor.digest.clone(),
                    actual: server_digest,
                });
            }
        }

        Ok(self.reader_from_response(&descriptor.digest, descriptor.size, response))
    }

    fn reader_from_response(&self, digest: &str, size: u64, response: reqwest::Response) -> Box<dyn BlobReader> {
        let seekable = response
            .headers()
            .get(header::ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.eq_ignore_ascii_case("bytes"))
            .unwrap_or(false);

        if seekable {
            Box::new(RangedBlobReader {
                ctx: self.ctx.clone(),
                repository: self.ctx.repository.clone(),
                digest: digest.to_string(),
                size,
                position: 0,
                current: Some(response),
            })
        } else {
            Box::new(PlainBlobReader {
                response: Some(response),
                size,
            })
        }
    }

    pub async fn fetch_to_writer(
        &self,
        descriptor: &Descriptor,
        writer: &mut (impl AsyncWrite + Send + Unpin),
    ) -> Result<u64, Error> {
        let mut reader = self.fetch(descriptor).await?;
        reader.copy_to(descriptor, writer).await
    }

    /// Two-step push: `POST` to obtain an upload location, then `PUT` the
    /// content with `?digest=` appended.
    pub async fn push(&self, descriptor: &Descriptor, body: Payload) -> Result<(), Error> {
        let post_path = UriFactory::blob_uploads(&self.ctx.repository);
        let post_request = PreparedRequest::new(Method::POST, self.ctx.url(&post_path));
        let post_response = self
            .ctx
            .auth
            .execute(
                &self.ctx.registry,
                self.ctx.scope([Action::Push, Action::Pull]),
                post_request,
                &self.ctx.cancel,
            )
            .await?;

        if post_response.status() != StatusCode::ACCEPTED {
            return Err(ResponseException::from_response(Method::POST, post_path, post_response)
                .await
                .into());
        }

        let location = post_response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(Error::MissingHeader("Location"))?
            .to_string();

        let put_url = UriFactory::with_digest_query(&location, &descriptor.digest);
        let put_url = absolute(&put_url, &self.ctx.registry, self.ctx.auth.config().plain_http);

        let put_request = PreparedRequest::new(Method::PUT, put_url.clone())
            .header(header::CONTENT_TYPE, OCTET_STREAM.parse().unwrap())
            .body(body);
        let put_response = self
            .ctx
            .auth
            .execute(
                &self.ctx.registry,
                self.ctx.scope([Action::Push, Action::Pull]),
                put_request,
                &self.ctx.cancel,
            )
            .await?;

        if put_response.status() == StatusCode::CONFLICT {
            return Err(Error::AlreadyExists);
        }
        if put_response.status() != StatusCode::CREATED {
            return Err(ResponseException::from_response(Method::PUT, put_url, put_response)
                .await
                .into());
        }

        if let Some(server_digest) = http_util::docker_content_digest(put_response.headers())? {
            if !digest::eq(&descriptor.digest, &server_digest) {
                return Err(Error::DigestMismatch {
                    expected: descriptor.digest.clone(),
                    actual: server_digest,
                });
            }
        }

        Ok(())
    }

    pub async fn push_bytes(&self, descriptor: &Descriptor, bytes: Bytes) -> Result<(), Error> {
        self.push(descriptor, Payload::Bytes(bytes)).await
    }

    pub async fn delete(&self, descriptor: &Descriptor) -> Result<(), Error> {
        let path = UriFactory::blob(&self.ctx.repository, &descriptor.digest);
        let request = PreparedRequest::new(Method::DELETE, self.ctx.url(&path));
        let response = self
            .ctx
            .auth
            .execute(&self.ctx.registry, self.ctx.scope([Action::Delete]), request, &self.ctx.cancel)
            .await?;

        match response.status() {
            StatusCode::ACCEPTED | StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => Err(Error::NotFound),
            _ => Err(ResponseException::from_response(Method::DELETE, path, response)
                .await
                .into()),
        }
    }

    pub async fn resolve(&self, reference: &Reference) -> Result<Descriptor, Error> {
        let content_reference = reference.content_reference()?;
        let path = UriFactory::blob(&self.ctx.repository, content_reference);
        let request = PreparedRequest::new(Method::HEAD, self.ctx.url(&path));
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

        descriptor_from_headers(reference, response.headers(), OCTET_STREAM)
    }

    /// Fetch by tag or digest in a single request: the descriptor is derived
    /// from this response's headers rather than a separate HEAD, so a tag
    /// can't move between resolving it and reading it.
    pub async fn fetch_by_reference(
        &self,
        reference: &Reference,
    ) -> Result<(Descriptor, Box<dyn BlobReader>), Error> {
        let content_reference = reference.content_reference()?;
        let path = UriFactory::blob(&self.ctx.repository, content_reference);
        trace!("fetching blob {reference} by reference");
        let request = PreparedRequest::new(Method::GET, self.ctx.url(&path))
            .header(header::ACCEPT, OCTET_STREAM.parse().unwrap());

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

        let descriptor = descriptor_from_headers(reference, response.headers(), OCTET_STREAM)?;
        let reader = self.reader_from_response(&descriptor.digest, descriptor.size, response);
        Ok((descriptor, reader))
    }
}

/// Construct a descriptor from response headers for a HEAD/GET against a
/// reference (tag or digest): `Content-Length` must be present, and any
/// `Docker-Content-Digest` is reconciled with what the caller asked for.
pub(crate) fn descriptor_from_headers(
    reference: &Reference,
    headers: &reqwest::header::HeaderMap,
    media_type: &str,
) -> Result<Descriptor, Error> {
    let size: u64 = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .ok_or(Error::MissingHeader("Content-Length"))?;

    let server_digest = http_util::docker_content_digest(headers)?;
    let digest = match (reference.digest().ok(), server_digest) {
        (Some(requested), Some(server)) => {
            if !digest::eq(requested, &server) {
                return Err(Error::DigestMismatch {
                    expected: requested.to_string(),
                    actual: server,
                });
            }
            requested.to_string()
        }
        (Some(requested), None) => requested.to_string(),
        (None, Some(server)) => server,
        (None, None) => return Err(Error::MissingHeader("Docker-Content-Digest")),
    };

    Ok(Descriptor::new(media_type, digest, size))
}

fn absolute(location: &str, registry: &str, plain_http: bool) -> String {
    if location.starts_with("http://") || location.starts_with("https://") {
        location.to_string()
    } else {
        let scheme = if plain_http { "http" } else { "https" };
        if let Some(rest) = location.strip_prefix('/') {
            format!("{scheme}://{registry}/{rest}")
        } else {
            format!("{scheme}://{registry}/{location}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_passes_through_full_urls() {
        assert_eq!(
            absolute("https://example.com/x", "registry.example.com", false),
            "https://example.com/x"
        );
    }

    #[test]
    fn absolute_resolves_relative_locations() {
        assert_eq!(
            absolute("/v2/test/blobs/uploads/abc", "registry.example.com", false),
            "https://registry.example.com/v2/test/blobs/uploads/abc"
        );
    }
}
