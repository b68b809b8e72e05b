//! End-to-end tests against a mocked registry: every request this crate
//! would send is matched explicitly, so an unexpected extra request (a
//! referrers probe that shouldn't have fired, a second token fetch) fails
//! the test instead of silently passing.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use oci_distribution::auth::{Credential, CredentialProvider, StaticCredentialProvider};
use oci_distribution::{ClientConfig, Descriptor, Index, Manifest, Reference, Registry, ReferrersState};

const HELLO_DIGEST: &str = "sha256:b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

async fn repository_against(server: &MockServer, name: &str) -> oci_distribution::Repository {
    repository_against_with(server, name, Credential::default()).await
}

async fn repository_against_with(server: &MockServer, name: &str, credential: Credential) -> oci_distribution::Repository {
    repository_against_with_config(
        server,
        name,
        credential,
        ClientConfig {
            plain_http: true,
            ..ClientConfig::default()
        },
    )
    .await
}

async fn repository_against_with_config(
    server: &MockServer,
    name: &str,
    credential: Credential,
    config: ClientConfig,
) -> oci_distribution::Repository {
    let credentials: Arc<dyn CredentialProvider> = Arc::new(StaticCredentialProvider::new(credential));
    let registry = Registry::new(server.address().to_string(), credentials, config).unwrap();
    registry.repository(name)
}

#[tokio::test]
async fn fetches_blob_by_digest() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(format!("/v2/test/blobs/{HELLO_DIGEST}")))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("docker-content-digest", HELLO_DIGEST)
                .set_body_bytes(b"hello world".to_vec()),
        )
        .expect(1)
        .mount(&server)
        .await;

    let repository = repository_against(&server, "test").await;
    let descriptor = Descriptor::new("application/octet-stream", HELLO_DIGEST, 11);

    let mut reader = repository.blobs.fetch(&descriptor).await.unwrap();
    assert!(!reader.is_seekable());

    let mut buf = Vec::new();
    while let Some(chunk) = reader.read_chunk().await.unwrap() {
        buf.extend_from_slice(&chunk);
    }
    assert_eq!(buf, b"hello world");
}

#[tokio::test]
async fn fetch_by_reference_issues_a_single_request() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(format!("/v2/test/blobs/{HELLO_DIGEST}")))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-length", "11")
                .insert_header("docker-content-digest", HELLO_DIGEST)
                .set_body_bytes(b"hello world".to_vec()),
        )
        .expect(1)
        .mount(&server)
        .await;

    let repository = repository_against(&server, "test").await;
    let reference: Reference = format!("irrelevant/test@{HELLO_DIGEST}").parse().unwrap();

    let (descriptor, mut reader) = repository.blobs.fetch_by_reference(&reference).await.unwrap();
    assert_eq!(descriptor.digest, HELLO_DIGEST);
    assert_eq!(descriptor.size, 11);

    let mut buf = Vec::new();
    while let Some(chunk) = reader.read_chunk().await.unwrap() {
        buf.extend_from_slice(&chunk);
    }
    assert_eq!(buf, b"hello world");
}

#[tokio::test]
async fn rejects_blob_with_wrong_digest_header() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(format!("/v2/test/blobs/{HELLO_DIGEST}")))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("docker-content-digest", "sha256:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa")
                .set_body_bytes(b"hello world".to_vec()),
        )
        .mount(&server)
        .await;

    let repository = repository_against(&server, "test").await;
    let descriptor = Descriptor::new("application/octet-stream", HELLO_DIGEST, 11);
    let err = repository.blobs.fetch(&descriptor).await.unwrap_err();
    assert!(matches!(err, oci_distribution::Error::DigestMismatch { .. }));
}

#[tokio::test]
async fn blob_push_conflict_surfaces_as_already_exists() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v2/test/blobs/uploads/"))
        .respond_with(ResponseTemplate::new(202).insert_header("location", "/v2/test/blobs/uploads/abc"))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/v2/test/blobs/uploads/abc"))
        .and(query_param("digest", HELLO_DIGEST))
        .respond_with(ResponseTemplate::new(409))
        .expect(1)
        .mount(&server)
        .await;

    let repository = repository_against(&server, "test").await;
    let descriptor = Descriptor::new("application/octet-stream", HELLO_DIGEST, 11);
    let err = repository
        .blobs
        .push_bytes(&descriptor, Bytes::from_static(b"hello world"))
        .await
        .unwrap_err();
    assert!(matches!(err, oci_distribution::Error::AlreadyExists));
}

#[tokio::test]
async fn pushes_blob_then_tags_manifest_by_digest_and_tag() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v2/test/blobs/uploads/"))
        .respond_with(ResponseTemplate::new(202).insert_header("location", "/v2/test/blobs/uploads/abc"))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/v2/test/blobs/uploads/abc"))
        .and(query_param("digest", HELLO_DIGEST))
        .respond_with(ResponseTemplate::new(201).insert_header("docker-content-digest", HELLO_DIGEST))
        .expect(1)
        .mount(&server)
        .await;

    let repository = repository_against(&server, "test").await;
    let blob_descriptor = Descriptor::new("application/octet-stream", HELLO_DIGEST, 11);
    repository
        .blobs
        .push_bytes(&blob_descriptor, Bytes::from_static(b"hello world"))
        .await
        .unwrap();

    let config = Descriptor::new("application/vnd.oci.image.config.v1+json", "sha256:aa", 2);
    let layer = Descriptor::new("application/octet-stream", HELLO_DIGEST, 11);
    let manifest = Manifest::new(config, vec![layer]);
    let body = Bytes::from(manifest.to_canonical_json().unwrap());
    let manifest_digest = oci_distribution::digest::compute_sha256(&body);

    Mock::given(method("PUT"))
        .and(path(format!("/v2/test/manifests/{manifest_digest}")))
        .respond_with(ResponseTemplate::new(201).insert_header("docker-content-digest", manifest_digest.clone()))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/v2/test/manifests/foobar"))
        .respond_with(ResponseTemplate::new(201).insert_header("docker-content-digest", manifest_digest.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let digest_reference: Reference = format!("irrelevant/test@{manifest_digest}").parse().unwrap();
    repository
        .manifests
        .push(&digest_reference, &manifest.media_type, body.clone())
        .await
        .unwrap();

    let tag_reference: Reference = "irrelevant/test:foobar".parse().unwrap();
    repository.manifests.push(&tag_reference, &manifest.media_type, body).await.unwrap();
}

#[tokio::test]
async fn bearer_challenge_triggers_token_refresh_and_is_cached_on_reuse() {
    let server = MockServer::start().await;
    let realm = format!("{}/token", server.uri());

    Mock::given(method("GET"))
        .and(path(format!("/v2/test/blobs/{HELLO_DIGEST}")))
        .respond_with(ResponseTemplate::new(401).insert_header(
            "www-authenticate",
            format!(r#"Bearer realm="{realm}",service="svc",scope="repository:test:pull""#),
        ))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("/v2/test/blobs/{HELLO_DIGEST}")))
        .and(header("authorization", "Bearer at"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("docker-content-digest", HELLO_DIGEST)
                .set_body_bytes(b"hello world".to_vec()),
        )
        .expect(2)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=rt"))
        .and(body_string_contains("client_id=oras-rs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "access_token": "at" })))
        .expect(1)
        .mount(&server)
        .await;

    let repository = repository_against_with(&server, "test", Credential::refresh_token("rt")).await;
    let descriptor = Descriptor::new("application/octet-stream", HELLO_DIGEST, 11);

    repository.blobs.fetch(&descriptor).await.unwrap();
    // second fetch reuses the cached token: no second 401, no second token request
    repository.blobs.fetch(&descriptor).await.unwrap();
}

#[tokio::test]
async fn bearer_challenge_with_access_token_skips_token_endpoint() {
    let server = MockServer::start().await;
    let realm = format!("{}/token", server.uri());

    Mock::given(method("GET"))
        .and(path(format!("/v2/test/blobs/{HELLO_DIGEST}")))
        .respond_with(ResponseTemplate::new(401).insert_header(
            "www-authenticate",
            format!(r#"Bearer realm="{realm}",service="svc",scope="repository:test:pull""#),
        ))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("/v2/test/blobs/{HELLO_DIGEST}")))
        .and(header("authorization", "Bearer preset"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("docker-content-digest", HELLO_DIGEST)
                .set_body_bytes(b"hello world".to_vec()),
        )
        .expect(1)
        .mount(&server)
        .await;

    // no token-endpoint mock is registered at all: a pre-fetched access
    // token must be used directly, never exchanged.
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "access_token": "at" })))
        .expect(0)
        .mount(&server)
        .await;

    let repository = repository_against_with(&server, "test", Credential::access_token("preset")).await;
    let descriptor = Descriptor::new("application/octet-stream", HELLO_DIGEST, 11);

    repository.blobs.fetch(&descriptor).await.unwrap();
}

#[tokio::test]
async fn bearer_challenge_with_password_but_no_username_fails_fast() {
    let server = MockServer::start().await;
    let realm = format!("{}/token", server.uri());

    Mock::given(method("GET"))
        .and(path(format!("/v2/test/blobs/{HELLO_DIGEST}")))
        .respond_with(ResponseTemplate::new(401).insert_header(
            "www-authenticate",
            format!(r#"Bearer realm="{realm}",service="svc",scope="repository:test:pull""#),
        ))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "access_token": "at" })))
        .expect(0)
        .mount(&server)
        .await;

    let credential = Credential {
        password: Some("p".to_string()),
        ..Credential::default()
    };
    let repository = repository_against_with(&server, "test", credential).await;
    let descriptor = Descriptor::new("application/octet-stream", HELLO_DIGEST, 11);

    let err = repository.blobs.fetch(&descriptor).await.unwrap_err();
    assert!(matches!(err, oci_distribution::Error::Authentication(_)));
}

#[tokio::test]
async fn referrers_falls_back_to_tag_schema_when_subject_header_absent() {
    let server = MockServer::start().await;
    let subject = Descriptor::new("application/vnd.oci.image.manifest.v1+json", format!("sha256:{}", "a".repeat(64)), 100);

    let config = Descriptor::new("application/vnd.oci.image.config.v1+json", "sha256:aa", 2);
    let manifest = Manifest::new(config, vec![]).with_subject(subject.clone());
    let body = Bytes::from(manifest.to_canonical_json().unwrap());
    let manifest_digest = oci_distribution::digest::compute_sha256(&body);
    let tag = format!("sha256-{}", "a".repeat(64));

    Mock::given(method("PUT"))
        .and(path(format!("/v2/test/manifests/{manifest_digest}")))
        .respond_with(ResponseTemplate::new(201).insert_header("docker-content-digest", manifest_digest.clone()))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("/v2/test/manifests/{tag}")))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path(format!("/v2/test/manifests/{tag}")))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let repository = repository_against(&server, "test").await;
    let reference: Reference = format!("irrelevant/test@{manifest_digest}").parse().unwrap();
    repository.manifests.push(&reference, &manifest.media_type, body).await.unwrap();

    assert_eq!(repository.manifests.referrers.state().await, ReferrersState::NotSupported);
}

#[tokio::test]
async fn referrers_uses_native_api_when_oci_subject_header_present() {
    let server = MockServer::start().await;
    let subject = Descriptor::new("application/vnd.oci.image.manifest.v1+json", format!("sha256:{}", "b".repeat(64)), 100);

    let config = Descriptor::new("application/vnd.oci.image.config.v1+json", "sha256:aa", 2);
    let manifest = Manifest::new(config, vec![]).with_subject(subject);
    let body = Bytes::from(manifest.to_canonical_json().unwrap());
    let manifest_digest = oci_distribution::digest::compute_sha256(&body);

    // no tag-schema GET/PUT mounted: the referrers tag endpoint must never
    // be hit once the server proves native support via OCI-Subject
    Mock::given(method("PUT"))
        .and(path(format!("/v2/test/manifests/{manifest_digest}")))
        .respond_with(
            ResponseTemplate::new(201)
                .insert_header("docker-content-digest", manifest_digest.clone())
                .insert_header("oci-subject", "present"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let repository = repository_against(&server, "test").await;
    let reference: Reference = format!("irrelevant/test@{manifest_digest}").parse().unwrap();
    repository.manifests.push(&reference, &manifest.media_type, body).await.unwrap();

    assert_eq!(repository.manifests.referrers.state().await, ReferrersState::Supported);
}

#[tokio::test]
async fn mount_falls_back_to_pull_and_push_when_server_ignores_mount() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v2/test2/blobs/uploads/"))
        .and(query_param("mount", HELLO_DIGEST))
        .and(query_param("from", "test"))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("/v2/test/blobs/{HELLO_DIGEST}")))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("docker-content-digest", HELLO_DIGEST)
                .set_body_bytes(b"hello world".to_vec()),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v2/test2/blobs/uploads/"))
        .respond_with(ResponseTemplate::new(202).insert_header("location", "/v2/test2/blobs/uploads/abc"))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/v2/test2/blobs/uploads/abc"))
        .and(query_param("digest", HELLO_DIGEST))
        .respond_with(ResponseTemplate::new(201).insert_header("docker-content-digest", HELLO_DIGEST))
        .expect(1)
        .mount(&server)
        .await;

    let destination = repository_against(&server, "test2").await;
    let descriptor = Descriptor::new("application/octet-stream", HELLO_DIGEST, 11);
    destination.mount(&descriptor, "test", None).await.unwrap();
}

#[tokio::test]
async fn mount_skips_pull_when_fallback_bytes_supplied() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v2/test2/blobs/uploads/"))
        .and(query_param("mount", HELLO_DIGEST))
        .and(query_param("from", "test"))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v2/test2/blobs/uploads/"))
        .respond_with(ResponseTemplate::new(202).insert_header("location", "/v2/test2/blobs/uploads/abc"))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/v2/test2/blobs/uploads/abc"))
        .and(query_param("digest", HELLO_DIGEST))
        .respond_with(ResponseTemplate::new(201).insert_header("docker-content-digest", HELLO_DIGEST))
        .expect(1)
        .mount(&server)
        .await;

    let destination = repository_against(&server, "test2").await;
    let descriptor = Descriptor::new("application/octet-stream", HELLO_DIGEST, 11);
    destination
        .mount(&descriptor, "test", Some(Bytes::from_static(b"hello world")))
        .await
        .unwrap();
}

#[tokio::test]
async fn resolves_tag_to_digest_via_head_and_fetches_index() {
    let server = MockServer::start().await;
    let index = Index::empty();
    let body = index.to_canonical_json().unwrap();
    let digest = oci_distribution::digest::compute_sha256(&body);

    Mock::given(method("HEAD"))
        .and(path("/v2/test/manifests/latest"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", index.media_type.clone())
                .insert_header("content-length", body.len().to_string())
                .insert_header("docker-content-digest", digest.clone()),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("/v2/test/manifests/{digest}")))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", index.media_type.clone())
                .insert_header("content-length", body.len().to_string())
                .set_body_bytes(body),
        )
        .expect(1)
        .mount(&server)
        .await;

    let repository = repository_against(&server, "test").await;
    let tag_reference: Reference = "irrelevant/test:latest".parse().unwrap();
    let resolved = repository.manifests.resolve(&tag_reference).await.unwrap();
    assert_eq!(resolved.digest, digest);

    let digest_reference = tag_reference.with_digest(resolved.digest).unwrap();
    let (_, fetched) = repository.manifests.fetch_index(&digest_reference).await.unwrap();
    assert!(fetched.manifests.is_empty());
}

#[tokio::test]
async fn tag_fetches_by_digest_and_pushes_under_new_tag() {
    let server = MockServer::start().await;
    let index = Index::empty();
    let body = index.to_canonical_json().unwrap();
    let digest = oci_distribution::digest::compute_sha256(&body);

    Mock::given(method("GET"))
        .and(path(format!("/v2/test/manifests/{digest}")))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", index.media_type.clone())
                .insert_header("content-length", body.len().to_string())
                .set_body_bytes(body),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/v2/test/manifests/retagged"))
        .respond_with(ResponseTemplate::new(201).insert_header("docker-content-digest", digest.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let repository = repository_against(&server, "test").await;
    let digest_reference: Reference = format!("irrelevant/test@{digest}").parse().unwrap();
    let tagged = repository.manifests.tag(&digest_reference, "retagged").await.unwrap();
    assert_eq!(tagged.digest, digest);
}

#[tokio::test]
async fn copy_transfers_config_and_layer_then_tags_destination() {
    let server = MockServer::start().await;

    let config_bytes = Bytes::from_static(b"{}");
    let config_digest = oci_distribution::digest::compute_sha256(&config_bytes);
    let config = Descriptor::new("application/vnd.oci.image.config.v1+json", config_digest.clone(), config_bytes.len() as u64);
    let layer = Descriptor::new("application/octet-stream", HELLO_DIGEST, 11);

    let manifest = Manifest::new(config.clone(), vec![layer.clone()]);
    let body = Bytes::from(manifest.to_canonical_json().unwrap());
    let manifest_digest = oci_distribution::digest::compute_sha256(&body);

    // source: resolve the tag, then serve the manifest and both children.
    Mock::given(method("HEAD"))
        .and(path("/v2/src/manifests/latest"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", manifest.media_type.clone())
                .insert_header("content-length", body.len().to_string())
                .insert_header("docker-content-digest", manifest_digest.clone()),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("/v2/src/manifests/{manifest_digest}")))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", manifest.media_type.clone())
                .insert_header("content-length", body.len().to_string())
                .set_body_bytes(body.to_vec()),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("/v2/src/blobs/{config_digest}")))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("docker-content-digest", config_digest.clone())
                .set_body_bytes(config_bytes.to_vec()),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("/v2/src/blobs/{HELLO_DIGEST}")))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("docker-content-digest", HELLO_DIGEST)
                .set_body_bytes(b"hello world".to_vec()),
        )
        .expect(1)
        .mount(&server)
        .await;

    // destination: neither child nor the manifest exists yet.
    Mock::given(method("HEAD"))
        .and(path(format!("/v2/dst/blobs/{config_digest}")))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path(format!("/v2/dst/blobs/{HELLO_DIGEST}")))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path(format!("/v2/dst/manifests/{manifest_digest}")))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    for digest in [&config_digest, &HELLO_DIGEST.to_string()] {
        Mock::given(method("POST"))
            .and(path("/v2/dst/blobs/uploads/"))
            .respond_with(ResponseTemplate::new(202).insert_header("location", format!("/v2/dst/blobs/uploads/{digest}")))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path(format!("/v2/dst/blobs/uploads/{digest}")))
            .and(query_param("digest", digest.as_str()))
            .respond_with(ResponseTemplate::new(201).insert_header("docker-content-digest", digest.as_str()))
            .expect(1)
            .mount(&server)
            .await;
    }

    Mock::given(method("PUT"))
        .and(path(format!("/v2/dst/manifests/{manifest_digest}")))
        .respond_with(ResponseTemplate::new(201).insert_header("docker-content-digest", manifest_digest.clone()))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("/v2/dst/manifests/{manifest_digest}")))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", manifest.media_type.clone())
                .insert_header("content-length", body.len().to_string())
                .set_body_bytes(body.to_vec()),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/v2/dst/manifests/copied"))
        .respond_with(ResponseTemplate::new(201).insert_header("docker-content-digest", manifest_digest.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let src_repo = repository_against(&server, "src").await;
    let dst_repo = repository_against(&server, "dst").await;
    let src_reference: Reference = "irrelevant/src:latest".parse().unwrap();
    let dst_reference: Reference = "irrelevant/dst:copied".parse().unwrap();

    let progressed = AtomicUsize::new(0);
    let stats = oci_distribution::copy_with_progress(
        &src_repo,
        &src_reference,
        &dst_repo,
        &dst_reference,
        &|_descriptor, _cache_hit| {
            progressed.fetch_add(1, Ordering::SeqCst);
        },
    )
    .await
    .unwrap();

    assert_eq!(stats.blobs_copied, 2);
    assert_eq!(stats.manifests_copied, 1);
    assert_eq!(stats.skipped_existing, 0);
    assert_eq!(progressed.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn manifest_resolve_without_content_length_fails() {
    let server = MockServer::start().await;

    Mock::given(method("HEAD"))
        .and(path("/v2/test/manifests/latest"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/vnd.oci.image.manifest.v1+json")
                .insert_header("docker-content-digest", HELLO_DIGEST),
        )
        .expect(1)
        .mount(&server)
        .await;

    let repository = repository_against(&server, "test").await;
    let tag_reference: Reference = "irrelevant/test:latest".parse().unwrap();
    let err = repository.manifests.resolve(&tag_reference).await.unwrap_err();
    assert!(matches!(err, oci_distribution::Error::MissingHeader("Content-Length")));
}

#[tokio::test]
async fn tags_pagination_follows_link_header_across_pages() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v2/test/tags/list"))
        .and(query_param("n", "2"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("link", r#"</v2/test/tags/list?n=2&last=b>; rel="next""#)
                .set_body_json(serde_json::json!({ "tags": ["a", "b"] })),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v2/test/tags/list"))
        .and(query_param("n", "2"))
        .and(query_param("last", "b"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "tags": ["c"] })))
        .expect(1)
        .mount(&server)
        .await;

    let repository = repository_against_with_config(
        &server,
        "test",
        Credential::default(),
        ClientConfig {
            plain_http: true,
            tag_list_page_size: 2,
            ..ClientConfig::default()
        },
    )
    .await;

    let first = repository.tags(None).await.unwrap();
    assert_eq!(first.items, vec!["a", "b"]);
    let next = first.next.unwrap();
    let last = next.rsplit("last=").next().unwrap();

    let second = repository.tags(Some(last)).await.unwrap();
    assert_eq!(second.items, vec!["c"]);
    assert!(second.next.is_none());
}

#[tokio::test]
async fn referrers_tag_schema_pull_over_size_limit_fails() {
    let server = MockServer::start().await;
    let subject = Descriptor::new("application/vnd.oci.image.manifest.v1+json", format!("sha256:{}", "c".repeat(64)), 100);
    let tag = format!("sha256-{}", "c".repeat(64));

    // a big index: well over the 16-byte cap configured below
    let big_index = Index::new(vec![Descriptor::new(
        "application/vnd.oci.image.manifest.v1+json",
        format!("sha256:{}", "d".repeat(64)),
        1,
    )]);
    let big_body = big_index.to_canonical_json().unwrap();
    assert!(big_body.len() as u64 > 16);

    let zero_digest = format!("sha256:{}", "0".repeat(64));
    Mock::given(method("GET"))
        .and(path(format!("/v2/test/referrers/{zero_digest}")))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("/v2/test/manifests/{tag}")))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-length", big_body.len().to_string())
                .set_body_bytes(big_body),
        )
        .expect(1)
        .mount(&server)
        .await;

    let repository = repository_against_with_config(
        &server,
        "test",
        Credential::default(),
        ClientConfig {
            plain_http: true,
            max_metadata_bytes: 16,
            ..ClientConfig::default()
        },
    )
    .await;

    let err = repository.manifests.referrers.list(&subject, None).await.unwrap_err();
    assert!(matches!(err, oci_distribution::Error::SizeLimitExceeded { .. }));
}
