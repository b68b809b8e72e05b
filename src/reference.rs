//! Parsing and formatting of `registry/repository[:tag][@digest]` reference
//! strings, per the grammar used by the distribution ecosystem.

use std::fmt;
use std::str::FromStr;

use crate::digest;
use crate::error::Error;

/// `docker.io` resolves to the real upstream host when talking to the wire;
/// the parsed `registry` field itself keeps whatever the caller wrote.
const DOCKER_IO: &str = "docker.io";
const DOCKER_IO_RESOLVED: &str = "registry-1.docker.io";

const MAX_TAG_LEN: usize = 128;

/// A parsed `registry/repository[:tag][@digest]` reference.
///
/// `registry` and `repository` are always non-empty and grammar-checked.
/// `content_reference` captures whichever of tag/digest/both were present.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    registry: String,
    repository: String,
    content_reference: Option<ContentReference>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ContentReference {
    Tag(String),
    Digest(String),
    TagAndDigest(String, String),
}

impl Reference {
    /// Registry host (and optional port), exactly as parsed.
    pub fn registry(&self) -> &str {
        &self.registry
    }

    /// Repository path within the registry.
    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// The registry host to actually dial: `docker.io` aliases to
    /// `registry-1.docker.io`, everything else is passed through unchanged.
    pub fn resolve_registry(&self) -> &str {
        if self.registry.eq_ignore_ascii_case(DOCKER_IO) {
            DOCKER_IO_RESOLVED
        } else {
            &self.registry
        }
    }

    /// The tag, if this reference carries one. Fails if the content
    /// reference is digest-only.
    pub fn tag(&self) -> Result<&str, Error> {
        match &self.content_reference {
            Some(ContentReference::Tag(t)) | Some(ContentReference::TagAndDigest(t, _)) => Ok(t),
            _ => Err(Error::InvalidReference {
                reference: self.to_string(),
                reason: "reference has no tag".into(),
            }),
        }
    }

    /// The digest, if this reference carries one. Fails if the content
    /// reference is tag-only.
    pub fn digest(&self) -> Result<&str, Error> {
        match &self.content_reference {
            Some(ContentReference::Digest(d)) | Some(ContentReference::TagAndDigest(_, d)) => {
                Ok(d)
            }
            _ => Err(Error::InvalidReference {
                reference: self.to_string(),
                reason: "reference has no digest".into(),
            }),
        }
    }

    /// Whichever of tag or digest is the right thing to ask the registry for
    /// on a manifest/blob path segment: prefer the digest when both are
    /// present, since a server can only be asked for one.
    pub fn content_reference(&self) -> Result<&str, Error> {
        match &self.content_reference {
            Some(ContentReference::Tag(t)) => Ok(t),
            Some(ContentReference::Digest(d)) | Some(ContentReference::TagAndDigest(_, d)) => {
                Ok(d)
            }
            None => Err(Error::InvalidReference {
                reference: self.to_string(),
                reason: "reference has neither tag nor digest".into(),
            }),
        }
    }

    /// Build a new reference to the same registry/repository with a given
    /// tag, dropping any digest.
    pub fn with_tag(&self, tag: impl Into<String>) -> Result<Reference, Error> {
        let tag = tag.into();
        validate_tag(&tag)?;
        Ok(Reference {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            content_reference: Some(ContentReference::Tag(tag)),
        })
    }

    /// Build a new reference to the same registry/repository with a given
    /// digest, dropping any tag.
    pub fn with_digest(&self, digest: impl Into<String>) -> Result<Reference, Error> {
        let digest = digest.into();
        digest::validate(&digest)?;
        Ok(Reference {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            content_reference: Some(ContentReference::Digest(digest)),
        })
    }
}

impl FromStr for Reference {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self, Error> {
        parse(input)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.registry, self.repository)?;
        match &self.content_reference {
            None => Ok(()),
            Some(ContentReference::Tag(t)) => write!(f, ":{t}"),
            Some(ContentReference::Digest(d)) => write!(f, "@{d}"),
            Some(ContentReference::TagAndDigest(t, d)) => write!(f, ":{t}@{d}"),
        }
    }
}

fn parse(input: &str) -> Result<Reference, Error> {
    let invalid = |reason: &str| Error::InvalidReference {
        reference: input.to_string(),
        reason: reason.to_string(),
    };

    // Tolerate a leading scheme such as "https://" even though the grammar
    // proper has none; every other caller-facing surface in this ecosystem
    // accepts it.
    let rest = input
        .find("://")
        .map(|idx| &input[idx + 3..])
        .unwrap_or(input);

    let (registry, rest) = rest.split_once('/').ok_or_else(|| {
        invalid("missing '/' separating registry from repository")
    })?;

    if registry.is_empty() {
        return Err(invalid("registry is empty"));
    }
    validate_registry(registry).map_err(|_| invalid("registry contains invalid characters"))?;

    // Split off an optional "@digest" suffix first, since a digest's own
    // ':' would otherwise be mistaken for the tag separator.
    let (repo_and_tag, digest_part) = match rest.split_once('@') {
        Some((l, r)) => (l, Some(r)),
        None => (rest, None),
    };

    let (repository, tag_part) = match repo_and_tag.split_once(':') {
        Some((l, r)) => (l, Some(r)),
        None => (repo_and_tag, None),
    };

    if repository.is_empty() {
        return Err(invalid("repository is empty"));
    }
    validate_repository(repository).map_err(|_| invalid("repository contains invalid characters"))?;

    let tag = tag_part.map(validate_tag).transpose().map_err(|_| {
        invalid("tag does not match [a-zA-Z0-9_][a-zA-Z0-9._-]{0,127}")
    })?;
    let digest_str = digest_part
        .map(|d| digest::validate(d).map(|_| d.to_string()))
        .transpose()
        .map_err(|_| invalid("digest is not a well-formed algo:hex digest"))?;

    let content_reference = match (tag, digest_str) {
        (Some(t), Some(d)) => Some(ContentReference::TagAndDigest(t.to_string(), d)),
        (Some(t), None) => Some(ContentReference::Tag(t.to_string())),
        (None, Some(d)) => Some(ContentReference::Digest(d)),
        (None, None) => None,
    };

    Ok(Reference {
        registry: registry.to_string(),
        repository: repository.to_string(),
        content_reference,
    })
}

fn validate_registry(registry: &str) -> Result<(), ()> {
    // host[:port], where host is a DNS name or IP literal. We accept the
    // common, permissive shape: alnum, '.', '-', ':' (port), and nothing
    // that would let a reference smuggle a path segment into the registry.
    if registry.contains('/') || registry.contains('@') {
        return Err(());
    }
    if registry
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':' | '_'))
    {
        Ok(())
    } else {
        Err(())
    }
}

fn validate_repository(repository: &str) -> Result<(), ()> {
    // path-component ('/' path-component)*
    // path-component := alnum+ (separator alnum+)*
    // separator := '.' | '_' | '__' | '-'+
    fn valid_component(component: &str) -> bool {
        if component.is_empty() {
            return false;
        }
        let bytes = component.as_bytes();
        let is_alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
        let mut i = 0;
        if !is_alnum(bytes[0]) {
            return false;
        }
        i += 1;
        while i < bytes.len() {
            if is_alnum(bytes[i]) {
                i += 1;
                continue;
            }
            // consume a run of separator characters, then require alnum again
            let start = i;
            while i < bytes.len() && matches!(bytes[i], b'.' | b'_' | b'-') {
                i += 1;
            }
            if i == start || i >= bytes.len() || !is_alnum(bytes[i]) {
                return false;
            }
        }
        true
    }

    if repository.is_empty() || repository.starts_with('/') || repository.ends_with('/') {
        return Err(());
    }
    if repository.split('/').all(valid_component) {
        Ok(())
    } else {
        Err(())
    }
}

fn validate_tag(tag: &str) -> Result<&str, ()> {
    if tag.is_empty() || tag.len() > MAX_TAG_LEN {
        return Err(());
    }
    let mut chars = tag.chars();
    let first = chars.next().ok_or(())?;
    if !(first.is_ascii_alphanumeric() || first == '_') {
        return Err(());
    }
    if chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')) {
        Ok(tag)
    } else {
        Err(())
    }
}
