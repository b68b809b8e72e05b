//! Well-known content types used across manifest/index/blob operations.

pub const OCI_IMAGE_MANIFEST_V1: &str = "application/vnd.oci.image.manifest.v1+json";
pub const OCI_IMAGE_INDEX_V1: &str = "application/vnd.oci.image.index.v1+json";
pub const OCI_IMAGE_CONFIG_V1: &str = "application/vnd.oci.image.config.v1+json";
pub const DOCKER_MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const DOCKER_MANIFEST_LIST_V2: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Accept header sent when requesting something that might be either a
/// manifest or an index (used when the caller hasn't committed to either).
pub const ACCEPT_MANIFEST_OR_INDEX: &str = "application/vnd.oci.image.manifest.v1+json, application/vnd.oci.image.index.v1+json, application/vnd.docker.distribution.manifest.v2+json, application/vnd.docker.distribution.manifest.list.v2+json";

pub fn is_manifest(media_type: &str) -> bool {
    media_type == OCI_IMAGE_MANIFEST_V1 || media_type == DOCKER_MANIFEST_V2
}

pub fn is_index(media_type: &str) -> bool {
    media_type == OCI_IMAGE_INDEX_V1 || media_type == DOCKER_MANIFEST_LIST_V2
}
