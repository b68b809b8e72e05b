use reqwest::{Method, StatusCode};
use serde::Deserialize;

/// One entry of a registry's structured error response.
///
/// <https://distribution.github.io/distribution/spec/api/#errors>
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ResponseError {
    pub code: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub detail: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub(crate) struct ResponseErrorBody {
    #[serde(default)]
    pub errors: Vec<ResponseError>,
}

/// A non-2xx HTTP response from the registry, carrying whatever structured
/// error body it returned (or an empty one if the body wasn't JSON).
#[derive(Debug, Clone)]
pub struct ResponseException {
    pub status: StatusCode,
    pub method: Method,
    pub uri: String,
    pub errors: Vec<ResponseError>,
}

impl std::fmt::Display for ResponseException {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}: server responded {}", self.method, self.uri, self.status)?;
        if !self.errors.is_empty() {
            let joined = self
                .errors
                .iter()
                .map(|e| format!("{}: {}", e.code, e.message))
                .collect::<Vec<_>>()
                .join("; ");
            write!(f, " ({joined})")?;
        }
        Ok(())
    }
}

impl std::error::Error for ResponseException {}

impl ResponseException {
    pub async fn from_response(method: Method, uri: String, response: reqwest::Response) -> Self {
        let status = response.status();
        let errors = match response.bytes().await {
            Ok(body) => serde_json::from_slice::<ResponseErrorBody>(&body)
                .map(|b| b.errors)
                .unwrap_or_default(),
            Err(_) => Vec::new(),
        };
        Self {
            status,
            method,
            uri,
            errors,
        }
    }
}

/// Every error surfaced by this crate to a caller.
///
/// Client-side validation errors (`InvalidReference`, `InvalidDigest`,
/// `InvalidChallenge`) never touch the network. `Response` wraps any non-2xx
/// the registry returned after the one documented auth retry. The remaining
/// variants are protocol-contract failures: bad or missing headers, digest
/// mismatches, size overruns, and the referrers state machine's single
/// illegal transition.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid reference {reference:?}: {reason}")]
    InvalidReference { reference: String, reason: String },

    #[error("invalid digest {digest:?}: {reason}")]
    InvalidDigest { digest: String, reason: String },

    #[error("invalid WWW-Authenticate challenge {header:?}: {reason}")]
    InvalidChallenge { header: String, reason: String },

    #[error("not found")]
    NotFound,

    #[error("already exists")]
    AlreadyExists,

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error(transparent)]
    Response(#[from] ResponseException),

    #[error("size limit exceeded: {actual} bytes > {limit} byte limit")]
    SizeLimitExceeded { actual: u64, limit: u64 },

    #[error("content length mismatch: descriptor says {expected} bytes, received {actual}")]
    LengthMismatch { expected: u64, actual: u64 },

    #[error("referrers state for this repository is already set and cannot change")]
    ReferrersStateAlreadySet,

    #[error("digest mismatch: expected {expected}, computed {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("mount failed: {0}")]
    MountFailed(String),

    #[error("missing required header {0:?} in registry response")]
    MissingHeader(&'static str),

    #[error("{name} is not a valid header value: {value:?}")]
    InvalidHeaderValue { name: &'static str, value: String },

    #[error("request body is not seekable, cannot rewind for auth retry")]
    NotSeekable,

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;
