//! Request body rewind support, RFC 5988 `Link` header pagination, and the
//! small header-reading helpers every store operation needs.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use reqwest::header::HeaderMap;

use crate::error::Error;

pub const DOCKER_CONTENT_DIGEST: &str = "docker-content-digest";
pub const OCI_SUBJECT: &str = "oci-subject";
pub const OCI_FILTERS_APPLIED: &str = "oci-filters-applied";

/// A request body that the auth client can resend after a 401.
///
/// `Bytes` and `Factory` can be turned into a fresh [`reqwest::Body`] as
/// many times as needed (true rewind). `Once` models a caller-supplied
/// single-use stream: the first call succeeds, every subsequent call fails
/// with [`Error::NotSeekable`], which is exactly the "non-seekable body
/// after a 401" failure the auth retry documents.
#[derive(Clone)]
pub enum Payload {
    Empty,
    Bytes(Bytes),
    Factory(Arc<dyn Fn() -> reqwest::Body + Send + Sync>),
    Once(Arc<Mutex<Option<reqwest::Body>>>),
}

impl Payload {
    pub fn once(body: reqwest::Body) -> Self {
        Payload::Once(Arc::new(Mutex::new(Some(body))))
    }

    pub fn body(&self) -> Result<reqwest::Body, Error> {
        match self {
            Payload::Empty => Ok(reqwest::Body::from(Vec::new())),
            Payload::Bytes(b) => Ok(reqwest::Body::from(b.clone())),
            Payload::Factory(f) => Ok(f()),
            Payload::Once(slot) => slot
                .lock()
                .unwrap()
                .take()
                .ok_or(Error::NotSeekable),
        }
    }
}

impl std::fmt::Debug for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Payload::Empty => write!(f, "Payload::Empty"),
            Payload::Bytes(b) => write!(f, "Payload::Bytes({} bytes)", b.len()),
            Payload::Factory(_) => write!(f, "Payload::Factory"),
            Payload::Once(_) => write!(f, "Payload::Once"),
        }
    }
}

/// Extract and verify the `Docker-Content-Digest` response header, if
/// present.
pub fn docker_content_digest(headers: &HeaderMap) -> Result<Option<String>, Error> {
    headers
        .get(DOCKER_CONTENT_DIGEST)
        .map(|v| {
            v.to_str()
                .map_err(|_| Error::InvalidDigest {
                    digest: format!("{v:?}"),
                    reason: "Docker-Content-Digest header is not valid UTF-8".into(),
                })
                .map(str::to_string)
        })
        .transpose()
}

/// `true` when the server advertised `OCI-Subject` on a push response,
/// meaning the native referrers API is supported.
pub fn has_oci_subject(headers: &HeaderMap) -> bool {
    headers.contains_key(OCI_SUBJECT)
}

/// The comma-separated set of filters the server applied server-side, from
/// `OCI-Filters-Applied`.
pub fn filters_applied(headers: &HeaderMap) -> Vec<String> {
    headers
        .get(OCI_FILTERS_APPLIED)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.split(',').map(|f| f.trim().to_string()).collect())
        .unwrap_or_default()
}

/// Read a response body, rejecting it if either the advertised
/// `Content-Length` or the actual byte count exceeds `limit`. Used
/// everywhere `maxMetadataBytes` applies: referrers/tag-schema index pulls
/// and the manifest pre-read ahead of a DELETE.
pub async fn read_bounded(response: reqwest::Response, limit: u64) -> Result<Bytes, Error> {
    if let Some(len) = response.content_length() {
        if len > limit {
            return Err(Error::SizeLimitExceeded { actual: len, limit });
        }
    }
    let body = response.bytes().await?;
    if body.len() as u64 > limit {
        return Err(Error::SizeLimitExceeded {
            actual: body.len() as u64,
            limit,
        });
    }
    Ok(body)
}

/// Parse the `rel="next"` URL out of an RFC 5988 `Link` header value, e.g.
/// `</v2/test/tags/list?n=50&last=x>; rel="next"`.
pub fn parse_next_link(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(reqwest::header::LINK)?.to_str().ok()?;
    parse_link_header(value)
}

fn parse_link_header(value: &str) -> Option<String> {
    for part in value.split(',') {
        let part = part.trim();
        let (url_part, rest) = part.split_once(';')?;
        let url_part = url_part.trim();
        if !url_part.starts_with('<') || !url_part.ends_with('>') {
            continue;
        }
        let is_next = rest
            .split(';')
            .map(str::trim)
            .any(|attr| attr == r#"rel="next""# || attr == "rel=next");
        if is_next {
            return Some(url_part[1..url_part.len() - 1].to_string());
        }
    }
    None
}
