//! A client library for the OCI Distribution Specification v1.1: push,
//! pull, resolve, tag, delete, mount, and enumerate blobs and manifests in
//! a remote registry, plus a content-addressed copy engine for moving a
//! tagged artifact graph between repositories.
//!
//! Entry points are [`Registry`] (factory for a host) and [`Repository`]
//! (one registry/repository pair, dispatching to [`blob::BlobStore`] or
//! [`manifest_store::ManifestStore`] by media type).

pub mod auth;
pub mod blob;
pub mod copy;
mod context;
pub mod descriptor;
pub mod digest;
pub mod error;
pub mod http_util;
pub mod manifest;
pub mod manifest_store;
pub mod mediatype;
pub mod reference;
pub mod referrers;
pub mod registry;
pub mod repository;
pub mod uri;

pub use auth::{ClientConfig, Credential, CredentialProvider, StaticCredentialProvider};
pub use blob::{BlobReader, BlobStore};
pub use copy::{copy, copy_with_progress, CopyStats, ProgressCallback};
pub use descriptor::Descriptor;
pub use error::{Error, Result};
pub use manifest::{Index, Manifest};
pub use manifest_store::ManifestStore;
pub use reference::Reference;
pub use referrers::{Referrers, ReferrersState};
pub use registry::Registry;
pub use repository::{Page, Repository};
