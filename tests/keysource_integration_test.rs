//! End-to-end master key tests against mocked Keystone and Barbican

use barbican_keysource::{
    decrypt_multi_region, decrypt_multi_region_parallel, encrypt_multi_region, AuthConfig,
    AuthManager, CancellationToken, ClientConfig, Credentials, MasterKey, MultiRegionError,
    MultiRegionOptions,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::{
    matchers::{body_partial_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

const ID: &str = "550e8400-e29b-41d4-a716-446655440000";

fn fast_retries() -> ClientConfig {
    ClientConfig {
        max_retries: 1,
        initial_retry_delay: Duration::from_millis(5),
        max_retry_delay: Duration::from_millis(10),
        ..ClientConfig::default()
    }
}

/// Keystone that advertises `store_url` as the key manager for `region`
async fn mount_identity(server: &MockServer, region: &str, store_url: &str) {
    Mock::given(method("POST"))
        .and(path("/v3/auth/tokens"))
        .and(body_partial_json(json!({
            "auth": {
                "identity": {
                    "methods": ["password"],
                    "password": {"user": {"name": "u", "password": "p"}}
                },
                "scope": {"project": {"id": "proj"}}
            }
        })))
        .respond_with(
            ResponseTemplate::new(201)
                .insert_header("X-Subject-Token", "tok-1")
                .set_body_json(json!({
                    "token": {
                        "expires_at": "2099-01-01T00:00:00Z",
                        "project": {"id": "proj"},
                        "catalog": [{
                            "type": "key-manager",
                            "name": "barbican",
                            "endpoints": [
                                {"interface": "internal", "region": region, "url": "http://10.255.255.1:9311"},
                                {"interface": "public", "region": region, "url": store_url}
                            ]
                        }]
                    }
                })),
        )
        .mount(server)
        .await;
}

/// Barbican that stores one secret and serves it back
async fn mount_store(server: &MockServer, payload: &[u8]) {
    Mock::given(method("POST"))
        .and(path("/v1/secrets"))
        .and(header("X-Auth-Token", "tok-1"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "secret_ref": format!("{}/v1/secrets/{ID}", server.uri())
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/v1/secrets/{ID}/payload")))
        .and(header("X-Auth-Token", "tok-1"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(payload.to_vec()))
        .mount(server)
        .await;
}

fn auth_config(server: &MockServer) -> AuthConfig {
    AuthConfig::new(format!("{}/v3", server.uri()), Credentials::password("u", "p"))
        .with_project_id("proj")
}

#[tokio::test]
async fn test_encrypt_decrypt_round_trip_via_catalog() {
    let server = MockServer::start().await;
    mount_identity(&server, "RegionOne", &server.uri()).await;
    mount_store(&server, b"hello").await;

    let mut key = MasterKey::new(ID)
        .with_auth_config(auth_config(&server))
        .with_client_config(fast_retries());
    key.encrypt(b"hello").await.expect("encrypt");

    assert_eq!(
        key.encrypted_data_key(),
        format!("{}/v1/secrets/{ID}", server.uri()).as_bytes()
    );
    let data_key = key.decrypt().await.expect("decrypt");
    assert_eq!(data_key.as_slice(), b"hello");
}

#[tokio::test]
async fn test_shared_auth_manager_and_explicit_endpoint() {
    let identity = MockServer::start().await;
    let store = MockServer::start().await;
    mount_identity(&identity, "RegionOne", "http://unused.invalid:9311").await;
    mount_store(&store, b"dek").await;

    let manager = Arc::new(AuthManager::new(auth_config(&identity)).expect("auth manager"));
    let mut key = MasterKey::new(ID)
        .with_auth_manager(manager.clone())
        .with_endpoint(store.uri())
        .with_client_config(fast_retries());

    key.encrypt_if_needed(b"dek").await.expect("encrypt");
    let data_key = key.decrypt().await.expect("decrypt");
    assert_eq!(data_key.as_slice(), b"dek");
    assert_eq!(manager.stats().authentications(), 1);
}

#[tokio::test]
async fn test_region_qualified_ref_selects_catalog_region() {
    let server = MockServer::start().await;
    mount_identity(&server, "sjc3", &server.uri()).await;
    mount_store(&server, b"regional").await;

    let mut key = MasterKey::from_secret_ref(&format!("region:sjc3:{ID}"))
        .expect("valid ref")
        .with_auth_config(auth_config(&server).with_region("dfw3"))
        .with_client_config(fast_retries());
    assert_eq!(key.effective_region(), "sjc3");

    key.encrypt(b"regional").await.expect("encrypt");
    assert_eq!(key.decrypt().await.expect("decrypt").as_slice(), b"regional");
}

#[tokio::test]
async fn test_multi_region_partial_failure() {
    let healthy = MockServer::start().await;
    let broken = MockServer::start().await;
    mount_identity(&healthy, "sjc3", &healthy.uri()).await;
    mount_store(&healthy, b"dek").await;
    mount_identity(&broken, "dfw3", &broken.uri()).await;
    Mock::given(method("POST"))
        .and(path("/v1/secrets"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&broken)
        .await;

    let mut keys = vec![
        MasterKey::with_region(ID, "sjc3")
            .with_auth_config(auth_config(&healthy).with_region("sjc3"))
            .with_client_config(fast_retries()),
        MasterKey::with_region(ID, "dfw3")
            .with_auth_config(auth_config(&broken).with_region("dfw3"))
            .with_client_config(fast_retries()),
    ];

    let cancel = CancellationToken::new();
    let succeeded = encrypt_multi_region(&cancel, b"dek", &mut keys, MultiRegionOptions::default())
        .await
        .expect("one region is healthy");
    assert_eq!(succeeded, 1);
    assert!(keys[0].has_encrypted_key());
    assert!(!keys[1].has_encrypted_key());

    let data_key = decrypt_multi_region(&cancel, &keys).await.expect("failover");
    assert_eq!(data_key.as_slice(), b"dek");
    let data_key = decrypt_multi_region_parallel(&cancel, &keys, MultiRegionOptions::default())
        .await
        .expect("parallel");
    assert_eq!(data_key.as_slice(), b"dek");
}

#[tokio::test]
async fn test_multi_region_all_failed() {
    let server = MockServer::start().await;
    mount_identity(&server, "RegionOne", &server.uri()).await;
    Mock::given(method("POST"))
        .and(path("/v1/secrets"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let mut keys = vec![
        MasterKey::new(ID)
            .with_auth_config(auth_config(&server))
            .with_client_config(fast_retries()),
        MasterKey::new(ID)
            .with_auth_config(auth_config(&server))
            .with_client_config(fast_retries()),
    ];
    let err = encrypt_multi_region(
        &CancellationToken::new(),
        b"dek",
        &mut keys,
        MultiRegionOptions::default(),
    )
    .await
    .expect_err("every region fails");

    assert!(matches!(err, MultiRegionError::AllFailed { .. }));
    assert_eq!(err.failures().len(), 2);
    assert!(keys.iter().all(|k| !k.has_encrypted_key()));
}

#[tokio::test]
async fn test_cancelled_encrypt_is_timeout() {
    let server = MockServer::start().await;
    mount_identity(&server, "RegionOne", &server.uri()).await;
    Mock::given(method("POST"))
        .and(path("/v1/secrets"))
        .respond_with(ResponseTemplate::new(201).set_delay(Duration::from_secs(30)))
        .mount(&server)
        .await;

    let mut key = MasterKey::new(ID)
        .with_auth_config(auth_config(&server))
        .with_client_config(fast_retries());
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let _canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let err = key
        .encrypt_with(&cancel, b"dek")
        .await
        .expect_err("cancelled");
    assert_eq!(err.kind(), barbican_keysource::ErrorKind::Timeout);
    assert!(!key.has_encrypted_key());
}

#[tokio::test]
async fn test_parallel_decrypt_reuses_the_key_client() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v3/auth/tokens"))
        .respond_with(
            ResponseTemplate::new(201)
                .insert_header("X-Subject-Token", "tok-1")
                .set_body_json(json!({
                    "token": {"expires_at": "2099-01-01T00:00:00Z", "project": {"id": "proj"}}
                })),
        )
        .expect(1)
        .mount(&server)
        .await;
    mount_store(&server, b"dek").await;

    let mut key = MasterKey::new(ID)
        .with_auth_config(auth_config(&server))
        .with_endpoint(server.uri())
        .with_client_config(fast_retries());
    key.set_encrypted_data_key(format!("{}/v1/secrets/{ID}", server.uri()).as_bytes());
    let keys = vec![key];

    let cancel = CancellationToken::new();
    for _ in 0..3 {
        let data_key =
            decrypt_multi_region_parallel(&cancel, &keys, MultiRegionOptions::default())
                .await
                .expect("parallel");
        assert_eq!(data_key.as_slice(), b"dek");
    }
    for _ in 0..3 {
        let data_key = decrypt_multi_region(&cancel, &keys).await.expect("failover");
        assert_eq!(data_key.as_slice(), b"dek");
    }
    // The identity mock's expectation of one call is checked on drop.
}
