//! Key-manager store client
//!
//! [`StoreClient`] is the request executor for one Barbican endpoint. Every
//! call obtains a token from the shared [`AuthManager`], sends a single HTTP
//! request, and maps the response status onto the error taxonomy. The call
//! is wrapped in the client's [`RetryPolicy`]; a `401` drops the cached token
//! first so that the retry (or the next request) re-authenticates.
//!
//! # Example
//!
//! ```no_run
//! use barbican_keysource::{
//!     AuthConfig, AuthManager, Credentials, SecretMetadata, SecretStore, StoreClientBuilder,
//! };
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let auth = AuthConfig::new("https://keystone.example.com/v3", Credentials::password("u", "p"))
//!     .with_project_id("proj");
//! let client = StoreClientBuilder::new("https://kms.example.com:9311")
//!     .auth_manager(Arc::new(AuthManager::new(auth)?))
//!     .max_retries(5)
//!     .build()?;
//!
//! let cancel = CancellationToken::new();
//! let secret_ref = client
//!     .create(&cancel, b"data key", &SecretMetadata::named("Data Encryption Key"))
//!     .await?;
//! let payload = client.get_payload(&cancel, &secret_ref).await?;
//! assert_eq!(payload.as_slice(), b"data key");
//! # Ok(())
//! # }
//! ```

use crate::{
    auth::AuthManager,
    config::ClientConfig,
    endpoints::StoreEndpoints,
    errors::{Error, ErrorKind, Result},
    models::{
        SecretCreateRequest, SecretCreateResponse, SecretInfo, SecretMetadata,
        DEFAULT_CONTENT_TYPE, DEFAULT_SECRET_TYPE,
    },
    retry::RetryPolicy,
    sanitize,
    security::{CaCertificate, SecurityConfig, SecurityValidator},
    util::generate_request_id,
};
use async_trait::async_trait;
use base64::Engine;
use reqwest::{header::ACCEPT, Method, Response, StatusCode};
use secrecy::ExposeSecret;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn, Instrument, Span};
use zeroize::Zeroizing;

/// Name given to secrets created without one
pub const DEFAULT_SECRET_NAME: &str = "Data Encryption Key";

const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";
const PROJECT_ID_HEADER: &str = "X-Project-Id";
const REQUEST_ID_HEADER: &str = "X-Request-ID";
const JSON: &str = "application/json";
const OCTET_STREAM: &str = "application/octet-stream";

/// Store operations a master key needs
///
/// [`StoreClient`] is the network implementation; tests and embedders may
/// supply their own.
#[async_trait]
pub trait SecretStore: Send + Sync + std::fmt::Debug {
    /// Store `payload` and return the reference of the new secret
    async fn create(
        &self,
        cancel: &CancellationToken,
        payload: &[u8],
        metadata: &SecretMetadata,
    ) -> Result<String>;

    /// Fetch the raw payload of a secret
    async fn get_payload(
        &self,
        cancel: &CancellationToken,
        secret_ref: &str,
    ) -> Result<Zeroizing<Vec<u8>>>;

    /// Delete a secret
    async fn delete(&self, cancel: &CancellationToken, secret_ref: &str) -> Result<()>;

    /// `Ok(())` when the secret exists, a not-found error when it does not
    async fn exists(&self, cancel: &CancellationToken, secret_ref: &str) -> Result<()>;
}

/// Barbican client bound to one endpoint
///
/// Cheap to clone; clones share the connection pool and the token cache.
#[derive(Clone)]
pub struct StoreClient {
    http: reqwest::Client,
    auth: Arc<AuthManager>,
    endpoints: StoreEndpoints,
    config: ClientConfig,
    retry: RetryPolicy,
    validator: SecurityValidator,
    span: Span,
}

impl std::fmt::Debug for StoreClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreClient")
            .field("endpoint", &sanitize::url_credentials(self.endpoints.base_url()))
            .field("timeout", &self.config.timeout)
            .field("max_retries", &self.config.max_retries)
            .finish()
    }
}

impl StoreClient {
    pub(crate) fn new(
        endpoint: &str,
        auth: Arc<AuthManager>,
        config: ClientConfig,
        span: Span,
    ) -> Result<Self> {
        let security = SecurityConfig {
            insecure_skip_verify: config.insecure,
            ca_cert: config
                .ca_cert
                .as_deref()
                .filter(|v| !v.is_empty())
                .map(CaCertificate::from_setting),
            ..SecurityConfig::default()
        };
        let validator = SecurityValidator::new(security).with_span(span.clone());
        validator.check_endpoint_security(endpoint)?;
        let tls = validator.validate_and_create_tls_config()?;

        let builder = reqwest::Client::builder()
            .user_agent(crate::util::user_agent())
            .timeout(config.timeout)
            .pool_idle_timeout(config.idle_timeout)
            .pool_max_idle_per_host(config.max_idle_per_host);
        let http = tls
            .apply(builder)
            .build()
            .map_err(|e| Error::tls("Failed to create HTTP client").with_source(e))?;

        Ok(Self {
            http,
            auth,
            endpoints: StoreEndpoints::new(endpoint),
            retry: RetryPolicy::from_config(&config),
            config,
            validator,
            span,
        })
    }

    /// Versioned base URL of the store
    pub fn endpoint(&self) -> &str {
        self.endpoints.base_url()
    }

    /// The configuration in use
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The retry schedule derived from the configuration
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// The shared token source
    pub fn auth_manager(&self) -> &Arc<AuthManager> {
        &self.auth
    }

    /// Fetch the metadata of a secret
    pub async fn get_info(&self, cancel: &CancellationToken, secret_ref: &str) -> Result<SecretInfo> {
        let id = self.identifier(secret_ref)?;
        let response = self
            .execute(cancel, Method::GET, &self.endpoints.secret(&id), JSON, None)
            .await
            .map_err(|e| e.with_secret_ref(secret_ref))?;
        response.json().await.map_err(Error::from)
    }

    /// Create several secrets in parallel
    ///
    /// Results keep the input order; a failed slot is `None`. Fails only
    /// when every creation fails.
    pub async fn create_batch(
        &self,
        cancel: &CancellationToken,
        payloads: &[Vec<u8>],
        metadata: &[SecretMetadata],
    ) -> Result<Vec<Option<String>>> {
        if payloads.len() != metadata.len() {
            return Err(Error::validation("payload and metadata counts differ").with_details(
                format!("{} payloads, {} metadata entries", payloads.len(), metadata.len()),
            ));
        }
        self.run_batch("create", payloads.len(), |i| {
            let client = self.clone();
            let cancel = cancel.clone();
            let payload = payloads[i].clone();
            let metadata = metadata[i].clone();
            async move { client.create(&cancel, &payload, &metadata).await }
        })
        .await
    }

    /// Fetch several payloads in parallel
    ///
    /// Results keep the input order; a failed slot is `None`. Fails only
    /// when every retrieval fails.
    pub async fn get_payload_batch(
        &self,
        cancel: &CancellationToken,
        secret_refs: &[String],
    ) -> Result<Vec<Option<Zeroizing<Vec<u8>>>>> {
        self.run_batch("get_payload", secret_refs.len(), |i| {
            let client = self.clone();
            let cancel = cancel.clone();
            let secret_ref = secret_refs[i].clone();
            async move { client.get_payload(&cancel, &secret_ref).await }
        })
        .await
    }

    async fn run_batch<T, F, Fut>(
        &self,
        operation: &'static str,
        count: usize,
        make: F,
    ) -> Result<Vec<Option<T>>>
    where
        T: Send + 'static,
        F: Fn(usize) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let mut results: Vec<Option<T>> = (0..count).map(|_| None).collect();
        if count == 0 {
            return Ok(results);
        }

        let mut tasks = JoinSet::new();
        for i in 0..count {
            let fut = make(i);
            let _ = tasks.spawn(async move { (i, fut.await) }.instrument(self.span.clone()));
        }

        let mut last_error = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((i, Ok(value))) => results[i] = Some(value),
                Ok((i, Err(e))) => {
                    self.span
                        .in_scope(|| warn!(operation = operation, index = i, error = %e, "batch item failed"));
                    last_error = Some(e);
                }
                Err(e) => {
                    last_error = Some(Error::new(ErrorKind::Api, "batch task failed").with_source(e));
                }
            }
        }

        match last_error {
            Some(e) if results.iter().all(Option::is_none) => {
                Err(e.context(format!("all {count} batch {operation} operations failed")))
            }
            _ => Ok(results),
        }
    }

    fn identifier(&self, secret_ref: &str) -> Result<String> {
        self.validator.validate_secret_ref(secret_ref)?;
        crate::secret_ref::extract_identifier(secret_ref)
    }

    /// Send one request with retries
    async fn execute(
        &self,
        cancel: &CancellationToken,
        method: Method,
        url: &str,
        accept: &'static str,
        body: Option<&serde_json::Value>,
    ) -> Result<Response> {
        self.retry
            .run(cancel, || self.send_once(cancel, method.clone(), url, accept, body))
            .instrument(self.span.clone())
            .await
    }

    async fn send_once(
        &self,
        cancel: &CancellationToken,
        method: Method,
        url: &str,
        accept: &'static str,
        body: Option<&serde_json::Value>,
    ) -> Result<Response> {
        let token = self.auth.token(cancel).await?;
        let request_id = generate_request_id();

        let mut request = self
            .http
            .request(method.clone(), url)
            .header(AUTH_TOKEN_HEADER, token.token.expose_secret().as_str())
            .header(PROJECT_ID_HEADER, token.project_id.as_str())
            .header(ACCEPT, accept)
            .header(REQUEST_ID_HEADER, request_id.as_str());
        if let Some(body) = body {
            request = request.json(body);
        }

        trace!(%method, request_id = %request_id, "sending store request");
        let response = request.send().await.map_err(Error::from)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status == StatusCode::UNAUTHORIZED {
            self.auth.invalidate_token();
            return Err(Error::authentication("authentication failed (401)").with_status(401));
        }

        let body = response.text().await.unwrap_or_default();
        debug!(status = status.as_u16(), request_id = %request_id, "store request failed");
        Err(Error::from_store_status(status.as_u16(), &body))
    }
}

#[async_trait]
impl SecretStore for StoreClient {
    async fn create(
        &self,
        cancel: &CancellationToken,
        payload: &[u8],
        metadata: &SecretMetadata,
    ) -> Result<String> {
        if payload.is_empty() {
            return Err(Error::validation("payload must not be empty"));
        }

        let request = SecretCreateRequest {
            name: metadata
                .name
                .clone()
                .unwrap_or_else(|| DEFAULT_SECRET_NAME.to_string()),
            secret_type: metadata
                .secret_type
                .clone()
                .unwrap_or_else(|| DEFAULT_SECRET_TYPE.to_string()),
            payload_content_type: metadata
                .content_type
                .clone()
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            payload: base64::engine::general_purpose::STANDARD.encode(payload),
            payload_content_encoding: "base64",
            algorithm: metadata.algorithm.clone(),
            bit_length: metadata.bit_length,
            mode: metadata.mode.clone(),
            expiration: metadata.expiration,
            metadata: metadata.tags.clone(),
        };
        let body = serde_json::to_value(&request)?;

        let response = self
            .execute(cancel, Method::POST, &self.endpoints.secrets(), JSON, Some(&body))
            .await
            .map_err(|e| e.context("failed to create secret"))?;
        let created: SecretCreateResponse = response.json().await.map_err(Error::from)?;

        if !crate::secret_ref::is_valid(&created.secret_ref) {
            return Err(Error::api("store returned an invalid secret reference", None)
                .with_secret_ref(&created.secret_ref));
        }

        self.span.in_scope(|| {
            debug!(secret_ref = %sanitize::secret_ref(&created.secret_ref), "secret created")
        });
        Ok(created.secret_ref)
    }

    async fn get_payload(
        &self,
        cancel: &CancellationToken,
        secret_ref: &str,
    ) -> Result<Zeroizing<Vec<u8>>> {
        let id = self.identifier(secret_ref)?;
        let response = self
            .execute(cancel, Method::GET, &self.endpoints.payload(&id), OCTET_STREAM, None)
            .await
            .map_err(|e| e.with_secret_ref(secret_ref))?;
        let bytes = response.bytes().await.map_err(Error::from)?;

        self.span.in_scope(|| {
            debug!(secret_ref = %sanitize::secret_ref(secret_ref), size = bytes.len(), "payload retrieved")
        });
        Ok(Zeroizing::new(bytes.to_vec()))
    }

    async fn delete(&self, cancel: &CancellationToken, secret_ref: &str) -> Result<()> {
        let id = self.identifier(secret_ref)?;
        let _ = self
            .execute(cancel, Method::DELETE, &self.endpoints.secret(&id), JSON, None)
            .await
            .map_err(|e| e.with_secret_ref(secret_ref))?;

        self.span
            .in_scope(|| debug!(secret_ref = %sanitize::secret_ref(secret_ref), "secret deleted"));
        Ok(())
    }

    async fn exists(&self, cancel: &CancellationToken, secret_ref: &str) -> Result<()> {
        let id = self.identifier(secret_ref)?;
        let _ = self
            .execute(cancel, Method::GET, &self.endpoints.secret(&id), JSON, None)
            .await
            .map_err(|e| e.with_secret_ref(secret_ref))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthConfig, Credentials};
    use crate::config::StoreClientBuilder;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ID: &str = "550e8400-e29b-41d4-a716-446655440000";

    async fn mount_identity(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/v3/auth/tokens"))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("X-Subject-Token", "tok-1")
                    .set_body_json(json!({
                        "token": {"expires_at": "2099-01-01T00:00:00Z", "project": {"id": "proj"}}
                    })),
            )
            .mount(server)
            .await;
    }

    fn create_test_client(server: &MockServer, max_retries: u32) -> StoreClient {
        let auth = AuthConfig::new(format!("{}/v3", server.uri()), Credentials::password("u", "p"))
            .with_project_id("proj");
        StoreClientBuilder::new(server.uri())
            .auth_manager(Arc::new(AuthManager::new(auth).unwrap()))
            .max_retries(max_retries)
            .retry_delays(Duration::from_millis(1), Duration::from_millis(5))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_applies_defaults() {
        let server = MockServer::start().await;
        mount_identity(&server).await;
        Mock::given(method("POST"))
            .and(path("/v1/secrets"))
            .and(header("X-Auth-Token", "tok-1"))
            .and(header("X-Project-Id", "proj"))
            .and(body_partial_json(json!({
                "name": "Data Encryption Key",
                "secret_type": "opaque",
                "payload_content_type": "application/octet-stream",
                "payload": "aGVsbG8=",
                "payload_content_encoding": "base64"
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "secret_ref": format!("{}/v1/secrets/{ID}", server.uri())
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = create_test_client(&server, 0);
        let secret_ref = client
            .create(&CancellationToken::new(), b"hello", &SecretMetadata::default())
            .await
            .unwrap();
        assert!(secret_ref.ends_with(ID));
    }

    #[tokio::test]
    async fn test_create_rejects_empty_payload() {
        let server = MockServer::start().await;
        let client = create_test_client(&server, 0);
        let err = client
            .create(&CancellationToken::new(), b"", &SecretMetadata::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_get_payload_returns_raw_bytes() {
        let server = MockServer::start().await;
        mount_identity(&server).await;
        Mock::given(method("GET"))
            .and(path(format!("/v1/secrets/{ID}/payload")))
            .and(header("Accept", "application/octet-stream"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8, 1, 2, 255]))
            .mount(&server)
            .await;

        let client = create_test_client(&server, 0);
        let payload = client
            .get_payload(&CancellationToken::new(), &format!("region:sjc3:{ID}"))
            .await
            .unwrap();
        assert_eq!(payload.as_slice(), &[0u8, 1, 2, 255]);
    }

    #[tokio::test]
    async fn test_invalid_ref_never_hits_network() {
        let server = MockServer::start().await;
        let client = create_test_client(&server, 0);
        let cancel = CancellationToken::new();

        let err = client.get_payload(&cancel, "not-a-uuid").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
        let err = client.delete(&cancel, "").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_exists_maps_404() {
        let server = MockServer::start().await;
        mount_identity(&server).await;
        Mock::given(method("GET"))
            .and(path(format!("/v1/secrets/{ID}")))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let client = create_test_client(&server, 3);
        let err = client.exists(&CancellationToken::new(), ID).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.status_code(), Some(404));
        assert!(!err.to_string().contains(ID));
    }

    #[tokio::test]
    async fn test_delete_success() {
        let server = MockServer::start().await;
        mount_identity(&server).await;
        Mock::given(method("DELETE"))
            .and(path(format!("/v1/secrets/{ID}")))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = create_test_client(&server, 0);
        client.delete(&CancellationToken::new(), ID).await.unwrap();
    }

    #[tokio::test]
    async fn test_bad_request_message_is_surfaced() {
        let server = MockServer::start().await;
        mount_identity(&server).await;
        Mock::given(method("POST"))
            .and(path("/v1/secrets"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(json!({"error": {"message": "Provided object does not match schema"}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = create_test_client(&server, 3);
        let err = client
            .create(&CancellationToken::new(), b"k", &SecretMetadata::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.details().unwrap().contains("does not match schema"));
    }

    #[tokio::test]
    async fn test_unauthorized_invalidates_token_and_retries() {
        let server = MockServer::start().await;
        mount_identity(&server).await;
        Mock::given(method("GET"))
            .and(path(format!("/v1/secrets/{ID}/payload")))
            .respond_with(ResponseTemplate::new(401))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/v1/secrets/{ID}/payload")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".to_vec()))
            .mount(&server)
            .await;

        let client = create_test_client(&server, 2);
        let payload = client
            .get_payload(&CancellationToken::new(), ID)
            .await
            .unwrap();
        assert_eq!(payload.as_slice(), b"ok");
        assert_eq!(client.auth_manager().stats().invalidations(), 1);
        assert_eq!(client.auth_manager().stats().authentications(), 2);
    }

    #[tokio::test]
    async fn test_quota_is_not_retried() {
        let server = MockServer::start().await;
        mount_identity(&server).await;
        Mock::given(method("POST"))
            .and(path("/v1/secrets"))
            .respond_with(ResponseTemplate::new(413))
            .expect(1)
            .mount(&server)
            .await;

        let client = create_test_client(&server, 3);
        let err = client
            .create(&CancellationToken::new(), b"k", &SecretMetadata::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Quota);
    }

    #[tokio::test]
    async fn test_batch_partial_failure_keeps_order() {
        let server = MockServer::start().await;
        mount_identity(&server).await;
        let other = "6ba7b810-9dad-11d1-80b4-00c04fd430c8";
        Mock::given(method("GET"))
            .and(path(format!("/v1/secrets/{ID}/payload")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"first".to_vec()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/v1/secrets/{other}/payload")))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = create_test_client(&server, 0);
        let results = client
            .get_payload_batch(&CancellationToken::new(), &[other.to_string(), ID.to_string()])
            .await
            .unwrap();
        assert!(results[0].is_none());
        assert_eq!(results[1].as_deref().map(Vec::as_slice), Some(&b"first"[..]));
    }

    #[tokio::test]
    async fn test_batch_all_failed() {
        let server = MockServer::start().await;
        mount_identity(&server).await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = create_test_client(&server, 0);
        let err = client
            .get_payload_batch(&CancellationToken::new(), &[ID.to_string()])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_create_batch_count_mismatch() {
        let server = MockServer::start().await;
        let client = create_test_client(&server, 0);
        let err = client
            .create_batch(&CancellationToken::new(), &[b"a".to_vec()], &[])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_cancelled_before_request() {
        let server = MockServer::start().await;
        let client = create_test_client(&server, 3);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = client.exists(&cancel, ID).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }
}
