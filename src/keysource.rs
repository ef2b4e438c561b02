//! Barbican master keys
//!
//! A [`MasterKey`] wraps a data-encryption key by storing it as a Barbican
//! secret. "Encrypting" stores the data key and keeps the returned secret
//! reference as the encrypted form; "decrypting" fetches the payload back.
//!
//! The store client is built lazily on first use. Its endpoint comes from,
//! in order: an explicit [`with_endpoint`](MasterKey::with_endpoint), the
//! `key-manager` entry of the identity service catalog for the key's
//! effective region, or a host derived from the identity URL.

use crate::{
    auth::{AuthConfig, AuthManager, AuthSettings, DEFAULT_REGION},
    client::{SecretStore, StoreClient, DEFAULT_SECRET_NAME},
    config::{ClientConfig, StoreClientBuilder},
    endpoints::derive_store_endpoint,
    errors::{Error, Result},
    models::SecretMetadata,
    sanitize,
    secret_ref::SecretRef,
    security::SecurityValidator,
};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, Span};
use zeroize::Zeroizing;

/// Key type identifier
pub const KEY_TYPE_IDENTIFIER: &str = "barbican";

/// Age after which a data key should be rotated
pub const ROTATION_TTL: Duration = Duration::days(180);

/// A data key wrapped by a Barbican secret
#[derive(Clone)]
pub struct MasterKey {
    secret_ref: String,
    region: Option<String>,
    encrypted_key: String,
    created_at: OffsetDateTime,
    auth_config: Option<AuthConfig>,
    auth: Option<Arc<AuthManager>>,
    endpoint: Option<String>,
    client_config: ClientConfig,
    // Shared by clones, so fan-out copies reuse one client and token.
    store: Arc<OnceCell<Arc<dyn SecretStore>>>,
    span: Span,
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterKey")
            .field("secret_ref", &sanitize::secret_ref(&self.secret_ref))
            .field("region", &self.region)
            .field("encrypted", &!self.encrypted_key.is_empty())
            .field("created_at", &self.created_at)
            .finish()
    }
}

impl MasterKey {
    /// Create a key for `secret_ref`, created now
    ///
    /// The reference is not validated; use
    /// [`from_secret_ref`](Self::from_secret_ref) for untrusted input.
    pub fn new(secret_ref: impl Into<String>) -> Self {
        Self {
            secret_ref: secret_ref.into(),
            region: None,
            encrypted_key: String::new(),
            created_at: OffsetDateTime::now_utc(),
            auth_config: None,
            auth: None,
            endpoint: None,
            client_config: ClientConfig::default(),
            store: Arc::default(),
            span: tracing::debug_span!("barbican", component = "keysource"),
        }
    }

    /// Create a key pinned to a region
    pub fn with_region(secret_ref: impl Into<String>, region: impl Into<String>) -> Self {
        let mut key = Self::new(secret_ref);
        key.region = Some(region.into()).filter(|r: &String| !r.is_empty());
        key
    }

    /// Parse and validate a reference in any accepted form
    ///
    /// Surrounding whitespace is trimmed. A region-qualified reference sets
    /// the key's region.
    pub fn from_secret_ref(secret_ref: &str) -> Result<Self> {
        let secret_ref = secret_ref.trim();
        SecurityValidator::default().validate_secret_ref(secret_ref)?;
        let parsed = SecretRef::parse(secret_ref)?;

        let mut key = Self::new(secret_ref);
        key.region = parsed.region().map(str::to_owned);
        Ok(key)
    }

    /// Parse a comma-separated list of references
    ///
    /// An empty string yields no keys. One invalid entry rejects the list.
    pub fn from_secret_refs(secret_refs: &str) -> Result<Vec<Self>> {
        if secret_refs.is_empty() {
            return Ok(Vec::new());
        }
        secret_refs.split(',').map(Self::from_secret_ref).collect()
    }

    /// Authenticate with this configuration
    pub fn with_auth_config(mut self, config: AuthConfig) -> Self {
        self.auth_config = Some(config);
        self.store = Arc::default();
        self
    }

    /// Share an existing authentication manager
    pub fn with_auth_manager(mut self, auth: Arc<AuthManager>) -> Self {
        self.auth = Some(auth);
        self.store = Arc::default();
        self
    }

    /// Use this store endpoint instead of discovering one
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self.store = Arc::default();
        self
    }

    /// Tune the store client
    pub fn with_client_config(mut self, config: ClientConfig) -> Self {
        self.client_config = config;
        self.store = Arc::default();
        self
    }

    /// Use a ready-made store
    pub fn with_store(mut self, store: Arc<dyn SecretStore>) -> Self {
        self.store = Arc::new(OnceCell::new_with(Some(store)));
        self
    }

    /// Log under the given span
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Override the creation time
    pub fn with_created_at(mut self, created_at: OffsetDateTime) -> Self {
        self.created_at = created_at;
        self
    }

    /// The secret reference this key was created with
    pub fn secret_ref(&self) -> &str {
        &self.secret_ref
    }

    /// The region set on the key itself
    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    /// When the key was created
    pub fn created_at(&self) -> OffsetDateTime {
        self.created_at
    }

    /// The authentication configuration, if one was supplied
    pub fn auth_config(&self) -> Option<&AuthConfig> {
        self.auth_config
            .as_ref()
            .or_else(|| self.auth.as_ref().map(|auth| auth.config()))
    }

    /// Region requests for this key go to
    ///
    /// A region-qualified reference wins over the key's region, which wins
    /// over the authentication configuration's region.
    pub fn effective_region(&self) -> String {
        if let Ok(parsed) = SecretRef::parse(&self.secret_ref) {
            if let Some(region) = parsed.region() {
                return region.to_string();
            }
        }
        if let Some(region) = self.region.as_deref().filter(|r| !r.is_empty()) {
            return region.to_string();
        }
        self.auth_config()
            .map(|config| config.region.as_str())
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_REGION)
            .to_string()
    }

    /// Store `data_key` in Barbican and keep the reference
    pub async fn encrypt(&mut self, data_key: &[u8]) -> Result<()> {
        self.encrypt_with(&CancellationToken::new(), data_key).await
    }

    /// Like [`encrypt`](Self::encrypt), cancellable
    pub async fn encrypt_with(&mut self, cancel: &CancellationToken, data_key: &[u8]) -> Result<()> {
        let region = self.effective_region();
        let store = self
            .store(cancel)
            .await
            .map_err(|e| e.context("failed to create Barbican client").with_region(&region))?;

        let metadata = SecretMetadata::named(DEFAULT_SECRET_NAME)
            .with_tag("created_by", "barbican-keysource")
            .with_tag("purpose", "data_key_encryption");
        let secret_ref = store
            .create(cancel, data_key, &metadata)
            .await
            .map_err(|e| e.context("failed to encrypt data key with Barbican").with_region(&region))?;

        self.span.in_scope(|| {
            debug!(
                secret_ref = %sanitize::secret_ref(&secret_ref),
                region = %region,
                "data key encrypted and stored in Barbican"
            )
        });
        self.encrypted_key = secret_ref;
        Ok(())
    }

    /// Encrypt unless an encrypted key is already held
    pub async fn encrypt_if_needed(&mut self, data_key: &[u8]) -> Result<()> {
        if self.encrypted_key.is_empty() {
            self.encrypt(data_key).await
        } else {
            Ok(())
        }
    }

    /// The encrypted form of the data key (a secret reference)
    pub fn encrypted_data_key(&self) -> &[u8] {
        self.encrypted_key.as_bytes()
    }

    /// Replace the encrypted form of the data key
    pub fn set_encrypted_data_key(&mut self, enc: &[u8]) {
        self.encrypted_key = String::from_utf8_lossy(enc).into_owned();
    }

    /// Whether an encrypted data key is held
    pub fn has_encrypted_key(&self) -> bool {
        !self.encrypted_key.is_empty()
    }

    /// Fetch the data key back from Barbican
    pub async fn decrypt(&self) -> Result<Zeroizing<Vec<u8>>> {
        self.decrypt_with(&CancellationToken::new()).await
    }

    /// Like [`decrypt`](Self::decrypt), cancellable
    pub async fn decrypt_with(&self, cancel: &CancellationToken) -> Result<Zeroizing<Vec<u8>>> {
        if self.encrypted_key.is_empty() {
            return Err(Error::validation("No encrypted key to decrypt"));
        }
        let region = self.effective_region();
        let store = self
            .store(cancel)
            .await
            .map_err(|e| e.context("failed to create Barbican client").with_region(&region))?;

        let data_key = store
            .get_payload(cancel, &self.encrypted_key)
            .await
            .map_err(|e| e.context("failed to decrypt data key from Barbican").with_region(&region))?;

        self.span.in_scope(|| {
            debug!(
                secret_ref = %sanitize::secret_ref(&self.encrypted_key),
                region = %region,
                "data key decrypted from Barbican"
            )
        });
        Ok(data_key)
    }

    /// Whether the key is older than [`ROTATION_TTL`]
    pub fn needs_rotation(&self) -> bool {
        OffsetDateTime::now_utc() - self.created_at > ROTATION_TTL
    }

    /// Serializable view of the key
    pub fn to_map(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        let _ = out.insert("secret_ref".to_string(), self.secret_ref.clone());
        if let Some(region) = self.region.as_deref().filter(|r| !r.is_empty()) {
            let _ = out.insert("region".to_string(), region.to_string());
        }
        let created_at = self
            .created_at
            .to_offset(time::UtcOffset::UTC)
            .replace_nanosecond(0)
            .unwrap_or(self.created_at)
            .format(&Rfc3339)
            .unwrap_or_default();
        let _ = out.insert("created_at".to_string(), created_at);
        let _ = out.insert("enc".to_string(), self.encrypted_key.clone());
        out
    }

    /// Key type identifier, always `barbican`
    pub fn type_identifier(&self) -> &'static str {
        KEY_TYPE_IDENTIFIER
    }

    async fn store(&self, cancel: &CancellationToken) -> Result<Arc<dyn SecretStore>> {
        self.store
            .get_or_try_init(|| self.build_store(cancel))
            .await
            .cloned()
    }

    async fn build_store(&self, cancel: &CancellationToken) -> Result<Arc<dyn SecretStore>> {
        let auth = match (&self.auth, &self.auth_config) {
            (Some(auth), _) => auth.clone(),
            (None, Some(config)) => Arc::new(
                AuthManager::new(config.clone())
                    .map_err(|e| e.context("failed to initialize authentication manager"))?,
            ),
            (None, None) => {
                let config = AuthSettings::from_env()
                    .resolve()
                    .map_err(|e| e.context("no valid authentication configuration found"))?;
                Arc::new(
                    AuthManager::new(config)
                        .map_err(|e| e.context("failed to initialize authentication manager"))?,
                )
            }
        };

        let region = self.effective_region();
        let endpoint = match &self.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => self.discover_endpoint(cancel, &auth, &region).await?,
        };

        let mut config = self.client_config.clone();
        config.insecure |= auth.config().insecure;
        if config.ca_cert.is_none() {
            config.ca_cert = auth.config().ca_cert.clone();
        }

        let client: StoreClient = StoreClientBuilder::new(endpoint)
            .auth_manager(auth)
            .config(config)
            .span(self.span.clone())
            .build()?;
        Ok(Arc::new(client))
    }

    async fn discover_endpoint(
        &self,
        cancel: &CancellationToken,
        auth: &AuthManager,
        region: &str,
    ) -> Result<String> {
        // The catalog arrives with the token.
        let _ = auth.token(cancel).await?;
        if let Some(endpoint) = auth.catalog_endpoint(region) {
            self.span.in_scope(|| {
                debug!(region = %region, endpoint = %sanitize::endpoint(&endpoint), "using catalog endpoint")
            });
            return Ok(endpoint);
        }

        let endpoint = derive_store_endpoint(&auth.config().auth_url, region).map_err(|e| {
            e.context("failed to get Barbican endpoint")
                .with_region(region)
                .with_suggestions([
                    "Verify the region name is correct",
                    "Ensure the Barbican service is available in the specified region",
                ])
        })?;
        self.span.in_scope(|| {
            debug!(region = %region, endpoint = %sanitize::endpoint(&endpoint), "using derived endpoint")
        });
        Ok(endpoint)
    }
}

impl fmt::Display for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.region.as_deref().filter(|r| !r.is_empty()) {
            Some(region) if !self.secret_ref.starts_with("region:") => {
                write!(f, "region:{}:{}", region, self.secret_ref)
            }
            _ => f.write_str(&self.secret_ref),
        }
    }
}
