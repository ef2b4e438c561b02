//! Wire types for the identity and key-manager APIs
//!
//! # Key Types
//!
//! * [`SecretMetadata`] - Caller-supplied attributes of a stored secret
//! * [`SecretInfo`] - Secret metadata as reported by the store
//! * [`CatalogEntry`] - One service in the identity service catalog

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use time::OffsetDateTime;

/// Default secret type when metadata omits it
pub const DEFAULT_SECRET_TYPE: &str = "opaque";

/// Default payload content type when metadata omits it
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Attributes attached to a secret at creation
///
/// Every field is optional; the store client fills in `opaque` and
/// `application/octet-stream` for a missing type and content type.
///
/// # Example
///
/// ```
/// use barbican_keysource::SecretMetadata;
///
/// let metadata = SecretMetadata {
///     name: Some("Data Encryption Key".into()),
///     algorithm: Some("aes".into()),
///     bit_length: Some(256),
///     ..Default::default()
/// }
/// .with_tag("purpose", "data-encryption");
/// assert_eq!(metadata.tags["purpose"], "data-encryption");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecretMetadata {
    /// Logical name
    pub name: Option<String>,
    /// Barbican secret type (`opaque`, `symmetric`, ...)
    pub secret_type: Option<String>,
    /// Payload content type
    pub content_type: Option<String>,
    /// Algorithm hint
    pub algorithm: Option<String>,
    /// Key length hint in bits
    pub bit_length: Option<u32>,
    /// Cipher mode hint
    pub mode: Option<String>,
    /// Expiration instant
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub expiration: Option<OffsetDateTime>,
    /// Free-form key/value tags
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

impl SecretMetadata {
    /// Metadata with only a name set
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Add a tag
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.tags.insert(key.into(), value.into());
        self
    }
}

/// `POST /v1/secrets` body
#[derive(Debug, Serialize)]
pub(crate) struct SecretCreateRequest {
    pub name: String,
    pub secret_type: String,
    pub payload_content_type: String,
    pub payload: String,
    pub payload_content_encoding: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bit_length: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub expiration: Option<OffsetDateTime>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

/// `POST /v1/secrets` response
#[derive(Debug, Deserialize)]
pub(crate) struct SecretCreateResponse {
    pub secret_ref: String,
}

/// Secret metadata reported by `GET /v1/secrets/{id}`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SecretInfo {
    /// Full resource URI
    #[serde(default)]
    pub secret_ref: String,
    /// Logical name
    #[serde(default)]
    pub name: Option<String>,
    /// Lifecycle status (`ACTIVE`, ...)
    #[serde(default)]
    pub status: Option<String>,
    /// Barbican secret type
    #[serde(default)]
    pub secret_type: Option<String>,
    /// Algorithm hint
    #[serde(default)]
    pub algorithm: Option<String>,
    /// Key length hint in bits
    #[serde(default)]
    pub bit_length: Option<u32>,
    /// Cipher mode hint
    #[serde(default)]
    pub mode: Option<String>,
    /// Creation timestamp as reported
    #[serde(default)]
    pub created: Option<String>,
    /// Expiration timestamp as reported
    #[serde(default)]
    pub expiration: Option<String>,
    /// Available payload content types
    #[serde(default)]
    pub content_types: HashMap<String, String>,
}

/// Error body returned by the store
#[derive(Debug, Default, Deserialize)]
pub(crate) struct StoreErrorResponse {
    #[serde(default)]
    pub error: StoreErrorBody,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct StoreErrorBody {
    #[serde(default)]
    pub message: String,
}

/// One service in the identity service catalog
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CatalogEntry {
    /// Service type, `key-manager` for Barbican
    #[serde(rename = "type")]
    pub service_type: String,
    /// Service name
    #[serde(default)]
    pub name: Option<String>,
    /// Endpoints of this service
    #[serde(default)]
    pub endpoints: Vec<CatalogEndpoint>,
}

/// One endpoint of a catalog service
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CatalogEndpoint {
    /// `public`, `internal` or `admin`
    pub interface: String,
    /// Region name
    #[serde(default)]
    pub region: Option<String>,
    /// Region identifier
    #[serde(default)]
    pub region_id: Option<String>,
    /// Endpoint URL
    pub url: String,
}

impl CatalogEndpoint {
    /// Whether this endpoint serves the given region
    pub fn serves_region(&self, region: &str) -> bool {
        self.region.as_deref() == Some(region) || self.region_id.as_deref() == Some(region)
    }
}

// Identity request. The tagged `Identity` enum makes the credential methods
// mutually exclusive; the scope travels separately.

#[derive(Serialize)]
pub(crate) struct TokenRequest<'a> {
    pub auth: TokenRequestAuth<'a>,
}

#[derive(Serialize)]
pub(crate) struct TokenRequestAuth<'a> {
    pub identity: Identity<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<Scope<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
pub(crate) enum Identity<'a> {
    Password {
        methods: [&'static str; 1],
        password: PasswordIdentity<'a>,
    },
    ApplicationCredential {
        methods: [&'static str; 1],
        application_credential: ApplicationCredentialIdentity<'a>,
    },
    Token {
        methods: [&'static str; 1],
        token: TokenIdentity<'a>,
    },
}

#[derive(Serialize)]
pub(crate) struct PasswordIdentity<'a> {
    pub user: UserIdentity<'a>,
}

#[derive(Serialize)]
pub(crate) struct UserIdentity<'a> {
    pub name: &'a str,
    pub password: &'a str,
    pub domain: DomainRef<'a>,
}

#[derive(Serialize)]
pub(crate) struct ApplicationCredentialIdentity<'a> {
    pub id: &'a str,
    pub secret: &'a str,
}

#[derive(Serialize)]
pub(crate) struct TokenIdentity<'a> {
    pub id: &'a str,
}

#[derive(Serialize)]
pub(crate) struct Scope<'a> {
    pub project: ProjectRef<'a>,
}

#[derive(Serialize)]
#[serde(untagged)]
pub(crate) enum ProjectRef<'a> {
    Id { id: &'a str },
    Name { name: &'a str, domain: DomainRef<'a> },
}

#[derive(Serialize)]
#[serde(untagged)]
pub(crate) enum DomainRef<'a> {
    Id { id: &'a str },
    Name { name: &'a str },
}

/// Identity response body
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub token: TokenBody,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenBody {
    #[serde(default)]
    pub expires_at: String,
    #[serde(default)]
    pub project: Option<TokenProject>,
    #[serde(default)]
    pub catalog: Vec<CatalogEntry>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenProject {
    #[serde(default)]
    pub id: String,
}
