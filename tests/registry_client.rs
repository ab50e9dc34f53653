use image_courier::digest::DigestUtils;
use image_courier::registry::manifest::{DOCKER_MANIFEST_LIST_V2, DOCKER_MANIFEST_V2, OCI_INDEX_V1};
use image_courier::registry::{RegistryClient, UploadOutcome};
use image_courier::RegistryError;
use serde_json::json;
use wiremock::matchers::{body_bytes, header, method, path, query_param};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

fn client_for(server: &MockServer) -> RegistryClient {
    RegistryClient::builder(server.uri()).build().unwrap()
}

fn image_manifest(config_data: &[u8], layer_data: &[u8]) -> serde_json::Value {
    json!({
        "schemaVersion": 2,
        "mediaType": DOCKER_MANIFEST_V2,
        "config": {
            "mediaType": "application/vnd.docker.container.image.v1+json",
            "size": config_data.len(),
            "digest": DigestUtils::compute_docker_digest(config_data)
        },
        "layers": [{
            "mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip",
            "size": layer_data.len(),
            "digest": DigestUtils::compute_docker_digest(layer_data)
        }]
    })
}

fn list_entry(arch: &str, digest: &str) -> serde_json::Value {
    json!({
        "mediaType": DOCKER_MANIFEST_V2,
        "digest": digest,
        "size": 528,
        "platform": {"architecture": arch, "os": "linux"}
    })
}

fn requests_to(requests: &[Request], wanted: &str) -> Vec<Request> {
    requests.iter().filter(|r| r.url.path() == wanted).cloned().collect()
}

fn bearer_challenge(server: &MockServer) -> String {
    format!(
        r#"Bearer realm="{}/token",service="test-registry",scope="repository:app:pull,push""#,
        server.uri()
    )
}

#[tokio::test]
async fn bearer_challenge_is_answered_with_one_retry() {
    let server = MockServer::start().await;
    let manifest = image_manifest(b"{}", b"layer");

    Mock::given(method("GET"))
        .and(path("/v2/app/manifests/latest"))
        .and(header("authorization", "Bearer tok-1"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(manifest.to_string(), DOCKER_MANIFEST_V2))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/app/manifests/latest"))
        .respond_with(ResponseTemplate::new(401).insert_header("WWW-Authenticate", bearer_challenge(&server).as_str()))
        .with_priority(5)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/token"))
        .and(query_param("service", "test-registry"))
        .and(query_param("scope", "repository:app:pull,push"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "tok-1", "expires_in": 300})))
        .expect(1)
        .mount(&server)
        .await;

    let mut client = client_for(&server);
    let resolved = client.get_manifest("app", "latest").await.unwrap();
    assert_eq!(resolved.layers.len(), 1);
    assert_eq!(client.auth().bearer_token(), Some("tok-1"));

    let requests = server.received_requests().await.unwrap();
    let manifest_requests = requests_to(&requests, "/v2/app/manifests/latest");
    assert_eq!(manifest_requests.len(), 2);
    assert!(manifest_requests[0].headers.get("authorization").is_none());
    assert_eq!(
        manifest_requests[1].headers.get("authorization").unwrap().to_str().unwrap(),
        "Bearer tok-1"
    );
    assert_eq!(
        manifest_requests[1]
            .headers
            .get("docker-distribution-api-version")
            .unwrap()
            .to_str()
            .unwrap(),
        "registry/2.0"
    );
}

#[tokio::test]
async fn second_unauthorized_response_is_terminal() {
    let server = MockServer::start().await;
    let challenge = bearer_challenge(&server);

    Mock::given(method("GET"))
        .and(path("/v2/app/manifests/latest"))
        .respond_with(ResponseTemplate::new(401).insert_header("WWW-Authenticate", challenge.as_str()))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "useless"})))
        .expect(1)
        .mount(&server)
        .await;

    let mut client = client_for(&server);
    let err = client.get_manifest("app", "latest").await.unwrap_err();
    assert!(matches!(err, RegistryError::Authentication(_)));
    assert!(err.to_string().contains("realm="));
}

#[tokio::test]
async fn failed_token_fetch_is_an_authentication_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v2/app/manifests/latest"))
        .respond_with(ResponseTemplate::new(401).insert_header("WWW-Authenticate", bearer_challenge(&server).as_str()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"expires_in": 60})))
        .mount(&server)
        .await;

    let mut client = client_for(&server);
    let err = client.get_manifest("app", "latest").await.unwrap_err();
    assert!(matches!(err, RegistryError::Authentication(_)));
    assert!(err.to_string().contains("No token"));
}

#[tokio::test]
async fn basic_challenge_retries_with_credentials() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v2/"))
        .and(header("authorization", "Basic dXNlcjpwYXNz"))
        .respond_with(ResponseTemplate::new(200))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/"))
        .respond_with(ResponseTemplate::new(401).insert_header("WWW-Authenticate", r#"Basic realm="Registry""#))
        .with_priority(5)
        .mount(&server)
        .await;

    let mut client = RegistryClient::builder(server.uri())
        .with_credentials(Some("user".into()), Some("pass".into()))
        .build()
        .unwrap();
    client.verify_credentials().await.unwrap();

    let mut anonymous = client_for(&server);
    let err = anonymous.verify_credentials().await.unwrap_err();
    assert!(err.to_string().contains("check your username and password"));
}

async fn mount_list(server: &MockServer, entries: Vec<serde_json::Value>, content_type: &str) {
    let list = json!({"schemaVersion": 2, "manifests": entries});
    Mock::given(method("GET"))
        .and(path("/v2/app/manifests/multi"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(list.to_string(), content_type))
        .mount(server)
        .await;
}

#[tokio::test]
async fn manifest_list_resolves_to_amd64_regardless_of_order() {
    let amd64 = image_manifest(b"amd64-config", b"amd64-layer");
    let amd64_digest = DigestUtils::compute_docker_digest(amd64.to_string().as_bytes());
    let arm64_digest = DigestUtils::compute_docker_digest(b"arm64");

    for entries in [
        vec![list_entry("arm64", &arm64_digest), list_entry("amd64", &amd64_digest)],
        vec![list_entry("amd64", &amd64_digest), list_entry("arm64", &arm64_digest)],
    ] {
        let server = MockServer::start().await;
        mount_list(&server, entries, DOCKER_MANIFEST_LIST_V2).await;
        Mock::given(method("GET"))
            .and(path(format!("/v2/app/manifests/{}", amd64_digest)))
            .respond_with(ResponseTemplate::new(200).set_body_raw(amd64.to_string(), DOCKER_MANIFEST_V2))
            .expect(1)
            .mount(&server)
            .await;

        let mut client = client_for(&server);
        let manifest = client.get_manifest("app", "multi").await.unwrap();
        assert_eq!(manifest.config.digest, DigestUtils::compute_docker_digest(b"amd64-config"));
    }
}

#[tokio::test]
async fn index_detected_by_content_type_without_amd64_fails() {
    let server = MockServer::start().await;
    mount_list(
        &server,
        vec![list_entry("arm64", &DigestUtils::compute_docker_digest(b"arm64"))],
        OCI_INDEX_V1,
    )
    .await;

    let mut client = client_for(&server);
    let err = client.get_manifest("app", "multi").await.unwrap_err();
    assert!(matches!(err, RegistryError::Resolution(_)));
}

#[tokio::test]
async fn raw_manifest_is_returned_unresolved_and_unchanged() {
    let server = MockServer::start().await;
    let body = "{ \"schemaVersion\" : 2,\n  \"manifests\": [] }";
    Mock::given(method("GET"))
        .and(path("/v2/app/manifests/multi"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, DOCKER_MANIFEST_LIST_V2))
        .expect(1)
        .mount(&server)
        .await;

    let mut client = client_for(&server);
    let raw = client.get_manifest_raw("app", "multi").await.unwrap();
    assert_eq!(raw.bytes, body.as_bytes());
    assert_eq!(raw.content_type, DOCKER_MANIFEST_LIST_V2);
    assert!(raw.is_list());
}

#[tokio::test]
async fn manifest_digest_and_put() {
    let server = MockServer::start().await;
    let digest = DigestUtils::compute_docker_digest(b"manifest");

    Mock::given(method("HEAD"))
        .and(path("/v2/app/manifests/v1"))
        .respond_with(ResponseTemplate::new(200).insert_header("Docker-Content-Digest", digest.as_str()))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/v2/app/manifests/v1"))
        .and(header("content-type", DOCKER_MANIFEST_V2))
        .and(body_bytes(b"manifest".to_vec()))
        .respond_with(ResponseTemplate::new(201).insert_header("Docker-Content-Digest", digest.as_str()))
        .expect(1)
        .mount(&server)
        .await;

    let mut client = client_for(&server);
    assert_eq!(client.get_manifest_digest("app", "v1").await.unwrap(), digest);
    let pushed = client
        .put_manifest("app", "v1", b"manifest", DOCKER_MANIFEST_V2)
        .await
        .unwrap();
    assert_eq!(pushed.as_deref(), Some(digest.as_str()));
}

#[tokio::test]
async fn unexpected_status_is_a_protocol_error_with_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/app/manifests/gone"))
        .respond_with(ResponseTemplate::new(404).set_body_string(r#"{"errors":[{"code":"MANIFEST_UNKNOWN"}]}"#))
        .mount(&server)
        .await;

    let mut client = client_for(&server);
    match client.get_manifest("app", "gone").await.unwrap_err() {
        RegistryError::Protocol { status, body, .. } => {
            assert_eq!(status, 404);
            assert!(body.contains("MANIFEST_UNKNOWN"));
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn download_writes_file_and_reports_final_progress() {
    let server = MockServer::start().await;
    let data = vec![7u8; 64 * 1024];
    let digest = DigestUtils::compute_docker_digest(&data);

    Mock::given(method("GET"))
        .and(path(format!("/v2/app/blobs/{}", digest)))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(data.clone()))
        .mount(&server)
        .await;

    let tmp = tempfile::tempdir().unwrap();
    let dest = tmp.path().join("nested/dir/blob");
    let mut calls = Vec::new();
    let mut on_progress = |done: u64, total: Option<u64>| calls.push((done, total));

    let mut client = client_for(&server);
    let written = client
        .download("app", &digest, &dest, Some(&mut on_progress))
        .await
        .unwrap();

    assert_eq!(written, data.len() as u64);
    assert_eq!(std::fs::read(&dest).unwrap(), data);
    assert!(!calls.is_empty());
    assert_eq!(calls.last().unwrap().0, data.len() as u64);
    assert_eq!(calls.last().unwrap().1, Some(data.len() as u64));
}

#[tokio::test]
async fn download_with_wrong_content_fails_and_cleans_up() {
    let server = MockServer::start().await;
    let digest = DigestUtils::compute_docker_digest(b"expected");

    Mock::given(method("GET"))
        .and(path(format!("/v2/app/blobs/{}", digest)))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"tampered".to_vec()))
        .mount(&server)
        .await;

    let tmp = tempfile::tempdir().unwrap();
    let dest = tmp.path().join("blob");
    let mut client = client_for(&server);
    let err = client.download("app", &digest, &dest, None).await.unwrap_err();
    assert!(matches!(err, RegistryError::Validation(_)));
    assert!(!dest.exists());
}

#[tokio::test]
async fn check_exists_maps_statuses() {
    let server = MockServer::start().await;
    let present = DigestUtils::compute_docker_digest(b"present");
    let absent = DigestUtils::compute_docker_digest(b"absent");
    let broken = DigestUtils::compute_docker_digest(b"broken");

    for (digest, status) in [(&present, 200), (&absent, 404), (&broken, 500)] {
        Mock::given(method("HEAD"))
            .and(path(format!("/v2/app/blobs/{}", digest)))
            .respond_with(ResponseTemplate::new(status))
            .mount(&server)
            .await;
    }

    let mut client = client_for(&server);
    assert!(client.check_exists("app", &present).await.unwrap());
    assert!(!client.check_exists("app", &absent).await.unwrap());
    assert!(client.check_exists("app", &broken).await.is_err());
}

fn blob_file(content: &[u8]) -> (tempfile::TempDir, std::path::PathBuf, String) {
    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("blob");
    std::fs::write(&source, content).unwrap();
    (tmp, source, DigestUtils::compute_docker_digest(content))
}

#[tokio::test]
async fn upload_appends_digest_to_relative_location() {
    let server = MockServer::start().await;
    let (_tmp, source, digest) = blob_file(b"layer-bytes");

    Mock::given(method("POST"))
        .and(path("/v2/app/blobs/uploads/"))
        .respond_with(ResponseTemplate::new(202).insert_header("Location", "/v2/app/blobs/uploads/session-1?_state=abc"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/v2/app/blobs/uploads/session-1"))
        .and(query_param("_state", "abc"))
        .and(query_param("digest", digest.as_str()))
        .and(header("content-length", "11"))
        .and(body_bytes(b"layer-bytes".to_vec()))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let mut client = client_for(&server);
    let outcome = client.upload("app", &digest, &source).await.unwrap();
    assert_eq!(outcome, UploadOutcome::Created);
}

#[tokio::test]
async fn upload_rejected_as_already_existing_counts_as_success() {
    let server = MockServer::start().await;
    let (_tmp, source, digest) = blob_file(b"dup");

    Mock::given(method("POST"))
        .and(path("/v2/app/blobs/uploads/"))
        .respond_with(ResponseTemplate::new(202).insert_header("Location", format!("{}/v2/app/blobs/uploads/s2", server.uri()).as_str()))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/v2/app/blobs/uploads/s2"))
        .respond_with(ResponseTemplate::new(400).set_body_string("blob already exists"))
        .mount(&server)
        .await;

    let mut client = client_for(&server);
    assert_eq!(
        client.upload("app", &digest, &source).await.unwrap(),
        UploadOutcome::AlreadyExists
    );
}

#[tokio::test]
async fn upload_failure_keeps_response_body() {
    let server = MockServer::start().await;
    let (_tmp, source, digest) = blob_file(b"bad");

    Mock::given(method("POST"))
        .and(path("/v2/app/blobs/uploads/"))
        .respond_with(ResponseTemplate::new(202).insert_header("Location", "/v2/app/blobs/uploads/s3"))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/v2/app/blobs/uploads/s3"))
        .respond_with(ResponseTemplate::new(400).set_body_string(r#"{"errors":[{"code":"DIGEST_INVALID"}]}"#))
        .mount(&server)
        .await;

    let mut client = client_for(&server);
    let err = client.upload("app", &digest, &source).await.unwrap_err();
    assert!(err.body().contains("DIGEST_INVALID"));
}

#[tokio::test]
async fn upload_if_missing_skips_present_blobs() {
    let server = MockServer::start().await;
    let (_tmp, source, digest) = blob_file(b"present");

    Mock::given(method("HEAD"))
        .and(path(format!("/v2/app/blobs/{}", digest)))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/app/blobs/uploads/"))
        .respond_with(ResponseTemplate::new(202))
        .expect(0)
        .mount(&server)
        .await;

    let mut client = client_for(&server);
    assert_eq!(
        client.upload_if_missing("app", &digest, &source).await.unwrap(),
        UploadOutcome::AlreadyExists
    );
}

#[tokio::test]
async fn upload_after_push_scope_challenge_resends_file_body() {
    let server = MockServer::start().await;
    let (_tmp, source, digest) = blob_file(b"streamed twice");

    Mock::given(method("POST"))
        .and(path("/v2/app/blobs/uploads/"))
        .respond_with(ResponseTemplate::new(202).insert_header("Location", "/v2/app/blobs/uploads/s4"))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/v2/app/blobs/uploads/s4"))
        .and(header("authorization", "Bearer push-token"))
        .and(body_bytes(b"streamed twice".to_vec()))
        .respond_with(ResponseTemplate::new(201))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/v2/app/blobs/uploads/s4"))
        .respond_with(ResponseTemplate::new(401).insert_header("WWW-Authenticate", bearer_challenge(&server).as_str()))
        .with_priority(5)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "push-token"})))
        .mount(&server)
        .await;

    let mut client = client_for(&server);
    assert_eq!(
        client.upload("app", &digest, &source).await.unwrap(),
        UploadOutcome::Created
    );
}
