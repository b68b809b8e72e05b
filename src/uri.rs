//! Builds the handful of `/v2/...` endpoint paths the protocol defines.

pub struct UriFactory;

impl UriFactory {
    pub fn ping() -> String {
        "/v2/".to_string()
    }

    pub fn blob(repository: &str, digest: &str) -> String {
        format!("/v2/{repository}/blobs/{digest}")
    }

    pub fn blob_uploads(repository: &str) -> String {
        format!("/v2/{repository}/blobs/uploads/")
    }

    pub fn blob_mount(repository: &str, digest: &str, from_repository: &str) -> String {
        format!("/v2/{repository}/blobs/uploads/?mount={digest}&from={from_repository}")
    }

    pub fn manifest(repository: &str, reference: &str) -> String {
        format!("/v2/{repository}/manifests/{reference}")
    }

    pub fn tags_list(repository: &str, page_size: Option<usize>) -> String {
        match page_size {
            Some(n) => format!("/v2/{repository}/tags/list?n={n}"),
            None => format!("/v2/{repository}/tags/list"),
        }
    }

    pub fn referrers(repository: &str, digest: &str, artifact_type: Option<&str>) -> String {
        match artifact_type {
            Some(artifact_type) => {
                format!("/v2/{repository}/referrers/{digest}?artifactType={artifact_type}")
            }
            None => format!("/v2/{repository}/referrers/{digest}"),
        }
    }

    pub fn catalog(page_size: Option<usize>) -> String {
        match page_size {
            Some(n) => format!("/v2/_catalog?n={n}"),
            None => "/v2/_catalog".to_string(),
        }
    }

    /// Append `?digest=<digest>` to an upload `Location`, preserving any
    /// existing query parameters the server already attached.
    pub fn with_digest_query(location: &str, digest: &str) -> String {
        let separator = if location.contains('?') { '&' } else { '?' };
        format!("{location}{separator}digest={digest}")
    }
}
