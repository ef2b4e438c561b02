//! Keystone authentication and token caching
//!
//! Credentials are described twice. [`AuthSettings`] is the raw, loosely
//! typed shape read from the environment or a config file, where several
//! methods may be present at once. [`AuthSettings::resolve`] turns it into an
//! [`AuthConfig`] whose [`Credentials`] enum holds exactly one method:
//!
//! 1. **Application credential** - self-scoped, no project needed
//! 2. **Token** - re-scoping an existing token
//! 3. **Password** - username and password in a domain
//!
//! [`AuthManager`] exchanges the credentials for a session token and keeps
//! it in a [`TokenCache`] until five minutes before the issuer's expiry.
//!
//! # Example
//!
//! ```no_run
//! use barbican_keysource::{AuthManager, AuthSettings};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AuthSettings::from_env().resolve()?;
//! let manager = AuthManager::new(config)?;
//!
//! let cancel = CancellationToken::new();
//! let token = manager.token(&cancel).await?;
//! println!("scoped to project {}", token.project_id);
//! # Ok(())
//! # }
//! ```

use crate::cache::{AuthStats, CachedToken, TokenCache};
use crate::errors::{Error, Result};
use crate::models::{
    ApplicationCredentialIdentity, DomainRef, Identity, PasswordIdentity, ProjectRef, Scope,
    TokenIdentity, TokenRequest, TokenRequestAuth, TokenResponse, UserIdentity,
};
use crate::sanitize;
use crate::security::{SecurityConfig, SecurityValidator};
use crate::util::header_str;
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn, Instrument, Span};

/// Region used when neither the key nor the settings name one
pub const DEFAULT_REGION: &str = "RegionOne";

/// Domain used when none is configured
pub const DEFAULT_DOMAIN: &str = "default";

/// Catalog service type of the key manager
pub const KEY_MANAGER_SERVICE: &str = "key-manager";

const SUBJECT_TOKEN_HEADER: &str = "x-subject-token";
const TOKEN_EXPIRY_MARGIN: Duration = Duration::minutes(5);
const FALLBACK_TOKEN_LIFETIME: Duration = Duration::hours(1);
const IDENTITY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);
const IDENTITY_IDLE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Raw authentication settings
///
/// Mirrors the `OS_*` environment variables. Any combination of fields may
/// be set; [`resolve`](Self::resolve) picks one credential method.
#[derive(Clone, Default)]
pub struct AuthSettings {
    /// Identity endpoint, e.g. `https://keystone.example.com:5000/v3`
    pub auth_url: String,
    /// Region name
    pub region: Option<String>,
    /// Project id scope
    pub project_id: Option<String>,
    /// Project name scope (needs a domain)
    pub project_name: Option<String>,
    /// Domain id for the user and project
    pub domain_id: Option<String>,
    /// Domain name for the user and project
    pub domain_name: Option<String>,
    /// Username for password authentication
    pub username: Option<String>,
    /// Password for password authentication
    pub password: Option<SecretString>,
    /// Application credential id
    pub application_credential_id: Option<String>,
    /// Application credential secret
    pub application_credential_secret: Option<SecretString>,
    /// Existing token
    pub token: Option<SecretString>,
    /// Skip TLS verification
    pub insecure: bool,
    /// CA bundle path or inline PEM
    pub ca_cert: Option<String>,
}

impl fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSettings")
            .field("auth_url", &sanitize::url_credentials(&self.auth_url))
            .field("region", &self.region)
            .field("project_id", &self.project_id)
            .field("project_name", &self.project_name)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "****"))
            .field("application_credential_id", &self.application_credential_id)
            .field(
                "application_credential_secret",
                &self.application_credential_secret.as_ref().map(|_| "****"),
            )
            .field("token", &self.token.as_ref().map(|_| "****"))
            .field("insecure", &self.insecure)
            .finish()
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

fn non_empty_secret(value: &Option<SecretString>) -> Option<&SecretString> {
    value.as_ref().filter(|v| !v.expose_secret().is_empty())
}

impl AuthSettings {
    /// Read the standard OpenStack environment variables
    ///
    /// `OS_INSECURE` accepts `true` or `1`. The region defaults to
    /// [`DEFAULT_REGION`].
    pub fn from_env() -> Self {
        fn var(name: &str) -> Option<String> {
            std::env::var(name).ok().filter(|v| !v.is_empty())
        }

        Self {
            auth_url: var("OS_AUTH_URL").unwrap_or_default(),
            region: Some(var("OS_REGION_NAME").unwrap_or_else(|| DEFAULT_REGION.to_string())),
            project_id: var("OS_PROJECT_ID"),
            project_name: var("OS_PROJECT_NAME"),
            domain_id: var("OS_DOMAIN_ID"),
            domain_name: var("OS_DOMAIN_NAME"),
            username: var("OS_USERNAME"),
            password: var("OS_PASSWORD").map(SecretString::new),
            application_credential_id: var("OS_APPLICATION_CREDENTIAL_ID"),
            application_credential_secret: var("OS_APPLICATION_CREDENTIAL_SECRET")
                .map(SecretString::new),
            token: var("OS_TOKEN").map(SecretString::new),
            insecure: matches!(var("OS_INSECURE").as_deref(), Some("true") | Some("1")),
            ca_cert: var("OS_CACERT"),
        }
    }

    /// Select one credential method and validate the scope
    ///
    /// When several methods are present the application credential wins over
    /// a token, which wins over a password; the losers are ignored with a
    /// warning.
    pub fn resolve(&self) -> Result<AuthConfig> {
        if self.auth_url.trim().is_empty() {
            return Err(Error::config("Authentication URL is required")
                .with_suggestions(["Set OS_AUTH_URL environment variable"]));
        }

        let domain = match (non_empty(&self.domain_id), non_empty(&self.domain_name)) {
            (Some(id), _) => Domain::Id(id.to_string()),
            (None, Some(name)) => Domain::Name(name.to_string()),
            (None, None) => Domain::default(),
        };

        let app_credential = match (
            non_empty(&self.application_credential_id),
            non_empty_secret(&self.application_credential_secret),
        ) {
            (Some(id), Some(secret)) => Some(Credentials::ApplicationCredential {
                id: id.to_string(),
                secret: secret.clone(),
            }),
            _ => None,
        };
        let token = non_empty_secret(&self.token).map(|t| Credentials::Token(t.clone()));
        let password = match (non_empty(&self.username), non_empty_secret(&self.password)) {
            (Some(username), Some(password)) => Some(Credentials::Password {
                username: username.to_string(),
                password: password.clone(),
                domain: domain.clone(),
            }),
            _ => None,
        };

        let present = [app_credential.is_some(), token.is_some(), password.is_some()]
            .iter()
            .filter(|p| **p)
            .count();
        let credentials = app_credential.or(token).or(password).ok_or_else(|| {
            Error::config("No valid authentication method provided").with_suggestions([
                "Set application credentials (OS_APPLICATION_CREDENTIAL_ID/OS_APPLICATION_CREDENTIAL_SECRET)",
                "Set token (OS_TOKEN)",
                "Set username/password (OS_USERNAME/OS_PASSWORD)",
            ])
        })?;
        if present > 1 {
            warn!(
                selected = credentials.method(),
                "multiple authentication methods configured; using the highest-precedence one"
            );
        }

        let project = match (non_empty(&self.project_id), non_empty(&self.project_name)) {
            (Some(id), _) => Some(ProjectScope::Id(id.to_string())),
            (None, Some(name)) => Some(ProjectScope::Name {
                name: name.to_string(),
                domain,
            }),
            (None, None) => None,
        };

        let config = AuthConfig {
            auth_url: self.auth_url.trim().to_string(),
            region: non_empty(&self.region).unwrap_or(DEFAULT_REGION).to_string(),
            credentials,
            project,
            insecure: self.insecure,
            ca_cert: non_empty(&self.ca_cert).map(str::to_string),
        };
        config.validate()?;
        Ok(config)
    }
}

/// User or project domain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Domain {
    /// Domain id
    Id(String),
    /// Domain name
    Name(String),
}

impl Default for Domain {
    fn default() -> Self {
        Domain::Name(DEFAULT_DOMAIN.to_string())
    }
}

impl Domain {
    fn wire(&self) -> DomainRef<'_> {
        match self {
            Domain::Id(id) => DomainRef::Id { id },
            Domain::Name(name) => DomainRef::Name { name },
        }
    }
}

/// Project the token is scoped to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectScope {
    /// Project id
    Id(String),
    /// Project name within a domain
    Name {
        /// Project name
        name: String,
        /// Owning domain
        domain: Domain,
    },
}

/// Exactly one credential method
#[derive(Clone)]
pub enum Credentials {
    /// Username and password
    Password {
        /// Username
        username: String,
        /// Password
        password: SecretString,
        /// User domain
        domain: Domain,
    },
    /// Application credential id and secret
    ApplicationCredential {
        /// Credential id
        id: String,
        /// Credential secret
        secret: SecretString,
    },
    /// Existing token
    Token(SecretString),
}

impl Credentials {
    /// Create password credentials in the default domain
    pub fn password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Credentials::Password {
            username: username.into(),
            password: SecretString::new(password.into()),
            domain: Domain::default(),
        }
    }

    /// Create application credentials
    pub fn application_credential(id: impl Into<String>, secret: impl Into<String>) -> Self {
        Credentials::ApplicationCredential {
            id: id.into(),
            secret: SecretString::new(secret.into()),
        }
    }

    /// Create token credentials
    pub fn token(token: impl Into<String>) -> Self {
        Credentials::Token(SecretString::new(token.into()))
    }

    /// Identity method name
    pub fn method(&self) -> &'static str {
        match self {
            Credentials::Password { .. } => "password",
            Credentials::ApplicationCredential { .. } => "application_credential",
            Credentials::Token(_) => "token",
        }
    }

    /// Whether these are password credentials
    pub fn is_password(&self) -> bool {
        matches!(self, Credentials::Password { .. })
    }

    /// Whether these credentials carry their own scope
    pub fn is_self_scoped(&self) -> bool {
        matches!(self, Credentials::ApplicationCredential { .. })
    }

    /// Replace every occurrence of the secret value in `text`
    pub(crate) fn scrub(&self, text: &str) -> String {
        let secret = match self {
            Credentials::Password { password, .. } => password,
            Credentials::ApplicationCredential { secret, .. } => secret,
            Credentials::Token(token) => token,
        }
        .expose_secret();
        if secret.is_empty() {
            return text.to_string();
        }
        text.replace(secret.as_str(), &sanitize::redact(secret))
    }

    fn identity(&self) -> Identity<'_> {
        match self {
            Credentials::Password {
                username,
                password,
                domain,
            } => Identity::Password {
                methods: ["password"],
                password: PasswordIdentity {
                    user: UserIdentity {
                        name: username,
                        password: password.expose_secret(),
                        domain: domain.wire(),
                    },
                },
            },
            Credentials::ApplicationCredential { id, secret } => Identity::ApplicationCredential {
                methods: ["application_credential"],
                application_credential: ApplicationCredentialIdentity {
                    id,
                    secret: secret.expose_secret(),
                },
            },
            Credentials::Token(token) => Identity::Token {
                methods: ["token"],
                token: TokenIdentity {
                    id: token.expose_secret(),
                },
            },
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Password {
                username, domain, ..
            } => f
                .debug_struct("Credentials::Password")
                .field("username", username)
                .field("password", &"****")
                .field("domain", domain)
                .finish(),
            Credentials::ApplicationCredential { id, .. } => f
                .debug_struct("Credentials::ApplicationCredential")
                .field("id", id)
                .field("secret", &"****")
                .finish(),
            Credentials::Token(_) => write!(f, "Credentials::Token(****)"),
        }
    }
}

/// Validated authentication configuration
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Identity endpoint
    pub auth_url: String,
    /// Region name
    pub region: String,
    /// The credential method
    pub credentials: Credentials,
    /// Project scope; required unless the credentials are self-scoped
    pub project: Option<ProjectScope>,
    /// Skip TLS verification
    pub insecure: bool,
    /// CA bundle path or inline PEM
    pub ca_cert: Option<String>,
}

impl AuthConfig {
    /// Create a configuration in the default region with no project scope
    pub fn new(auth_url: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            auth_url: auth_url.into(),
            region: DEFAULT_REGION.to_string(),
            credentials,
            project: None,
            insecure: false,
            ca_cert: None,
        }
    }

    /// Scope to a project id
    pub fn with_project_id(mut self, project_id: impl Into<String>) -> Self {
        self.project = Some(ProjectScope::Id(project_id.into()));
        self
    }

    /// Scope to a project
    pub fn with_project(mut self, project: ProjectScope) -> Self {
        self.project = Some(project);
        self
    }

    /// Set the region
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// Skip TLS verification
    pub fn with_insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    /// Trust an additional CA bundle (path or inline PEM)
    pub fn with_ca_cert(mut self, ca_cert: impl Into<String>) -> Self {
        self.ca_cert = Some(ca_cert.into());
        self
    }

    /// Check the URL and scope
    pub fn validate(&self) -> Result<()> {
        let url = self.auth_url.trim();
        if url.is_empty() {
            return Err(Error::config("Authentication URL is required")
                .with_suggestions(["Set OS_AUTH_URL environment variable"]));
        }
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(Error::config("Authentication URL must use http or https")
                .with_endpoint(url));
        }
        if self.project.is_none() && !self.credentials.is_self_scoped() {
            return Err(Error::config(
                "Project scope is required when not using application credentials",
            )
            .with_suggestions([
                "Set project ID (OS_PROJECT_ID)",
                "Set project name (OS_PROJECT_NAME)",
            ]));
        }
        Ok(())
    }

    fn token_request(&self) -> TokenRequest<'_> {
        let scope = if self.credentials.is_self_scoped() {
            None
        } else {
            self.project.as_ref().map(|project| Scope {
                project: match project {
                    ProjectScope::Id(id) => ProjectRef::Id { id },
                    ProjectScope::Name { name, domain } => ProjectRef::Name {
                        name,
                        domain: domain.wire(),
                    },
                },
            })
        };

        TokenRequest {
            auth: TokenRequestAuth {
                identity: self.credentials.identity(),
                scope,
            },
        }
    }
}

/// A session token and the project it is scoped to
#[derive(Debug, Clone)]
pub struct AuthToken {
    /// Opaque token value
    pub token: SecretString,
    /// Project id
    pub project_id: String,
}

impl From<&CachedToken> for AuthToken {
    fn from(cached: &CachedToken) -> Self {
        Self {
            token: cached.token.clone(),
            project_id: cached.project_id.clone(),
        }
    }
}

/// Obtains and caches identity-service tokens
///
/// Safe to share between tasks behind an `Arc`. Concurrent callers that miss
/// the cache may each authenticate; the last token written wins.
pub struct AuthManager {
    config: AuthConfig,
    http: reqwest::Client,
    cache: TokenCache,
    stats: AuthStats,
    span: Span,
}

impl fmt::Debug for AuthManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthManager")
            .field("auth_url", &sanitize::url_credentials(&self.config.auth_url))
            .field("region", &self.config.region)
            .field("method", &self.config.credentials.method())
            .field("token_expires_at", &self.cache.expires_at())
            .finish()
    }
}

impl AuthManager {
    /// Validate the configuration and build the identity HTTP client
    pub fn new(config: AuthConfig) -> Result<Self> {
        Self::with_span(
            config,
            tracing::debug_span!("barbican", component = "auth"),
        )
    }

    /// Like [`new`](Self::new), logging under the given span
    pub fn with_span(config: AuthConfig, span: Span) -> Result<Self> {
        config.validate()?;

        let validator = SecurityValidator::new(SecurityConfig::from_auth_config(&config))
            .with_span(span.clone());
        validator.check_endpoint_security(&config.auth_url)?;
        let tls = validator.validate_and_create_tls_config()?;

        let builder = reqwest::Client::builder()
            .user_agent(crate::util::user_agent())
            .timeout(IDENTITY_TIMEOUT)
            .pool_idle_timeout(IDENTITY_IDLE_TIMEOUT)
            .pool_max_idle_per_host(5);
        let http = tls
            .apply(builder)
            .build()
            .map_err(|e| Error::tls("Failed to create HTTP client").with_source(e))?;

        Ok(Self {
            config,
            http,
            cache: TokenCache::new(),
            stats: AuthStats::new(),
            span,
        })
    }

    /// The configuration in use
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Authentication statistics
    pub fn stats(&self) -> &AuthStats {
        &self.stats
    }

    /// The token cache
    pub fn cache(&self) -> &TokenCache {
        &self.cache
    }

    /// Expiry of the cached token (already reduced by the safety margin)
    pub fn token_expires_at(&self) -> Option<OffsetDateTime> {
        self.cache.expires_at()
    }

    /// Return a valid token, authenticating if the cache holds none
    pub async fn token(&self, cancel: &CancellationToken) -> Result<AuthToken> {
        if let Some(cached) = self.cache.get() {
            self.stats.record_hit();
            self.span.in_scope(|| trace!("using cached authentication token"));
            return Ok(AuthToken::from(&cached));
        }
        self.stats.record_miss();
        self.authenticate(cancel).await
    }

    /// Drop the cached token so the next call re-authenticates
    pub fn invalidate_token(&self) {
        if self.cache.invalidate() {
            self.stats.record_invalidation();
        }
        self.span.in_scope(|| debug!("authentication token invalidated"));
    }

    /// Authenticate now, replacing any cached token
    pub async fn authenticate(&self, cancel: &CancellationToken) -> Result<AuthToken> {
        self.stats.record_authentication();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::cancelled()),
            result = self.request_token().instrument(self.span.clone()) => result,
        };

        match outcome {
            Ok(cached) => {
                let token = AuthToken::from(&cached);
                self.cache.set(cached);
                Ok(token)
            }
            Err(e) => {
                self.stats.record_failure();
                Err(e)
            }
        }
    }

    /// Authenticate ahead of first use
    pub async fn prewarm(&self, cancel: &CancellationToken) -> Result<()> {
        let _ = self.token(cancel).await?;
        Ok(())
    }

    /// Re-authenticate when the cached token expires within `threshold`
    ///
    /// Returns whether a new token was fetched.
    pub async fn refresh_if_needed(
        &self,
        cancel: &CancellationToken,
        threshold: std::time::Duration,
    ) -> Result<bool> {
        let threshold = Duration::try_from(threshold)
            .map_err(|e| Error::config("refresh threshold is out of range").with_source(e))?;
        let needed = self
            .cache
            .get()
            .map_or(true, |cached| cached.expires_within(threshold));
        if needed {
            let _ = self.authenticate(cancel).await?;
        }
        Ok(needed)
    }

    /// Public key-manager endpoint for `region` from the cached catalog
    pub fn catalog_endpoint(&self, region: &str) -> Option<String> {
        self.cache.get()?.catalog.iter().find_map(|entry| {
            if entry.service_type != KEY_MANAGER_SERVICE {
                return None;
            }
            entry
                .endpoints
                .iter()
                .find(|ep| ep.interface == "public" && ep.serves_region(region))
                .map(|ep| ep.url.clone())
        })
    }

    async fn request_token(&self) -> Result<CachedToken> {
        let url = format!("{}/auth/tokens", self.config.auth_url.trim_end_matches('/'));
        debug!(
            auth_url = %sanitize::url_credentials(&url),
            method = self.config.credentials.method(),
            "sending authentication request"
        );

        let response = self
            .http
            .post(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&self.config.token_request())
            .send()
            .await
            .map_err(|e| Error::from(e).context("authentication request failed"))?;

        let status = response.status();
        let subject_token = header_str(response.headers(), SUBJECT_TOKEN_HEADER);
        let body = response
            .text()
            .await
            .map_err(|e| Error::from(e).context("failed to read authentication response"))?;

        if !status.is_success() {
            let body = self.config.credentials.scrub(&body);
            return Err(Error::from_identity_status(status.as_u16(), &body)
                .with_endpoint(&self.config.auth_url));
        }

        let token = subject_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::authentication("No authentication token received in response"))?;

        let parsed: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            Error::authentication("failed to parse authentication response").with_source(e)
        })?;

        let issued_expiry = match OffsetDateTime::parse(&parsed.token.expires_at, &Rfc3339) {
            Ok(expiry) => expiry,
            Err(_) => {
                warn!(
                    expires_at = %parsed.token.expires_at,
                    "failed to parse token expiration, assuming one hour"
                );
                OffsetDateTime::now_utc() + FALLBACK_TOKEN_LIFETIME
            }
        };

        let project_id = parsed
            .token
            .project
            .map(|p| p.id)
            .filter(|id| !id.is_empty())
            .or_else(|| match &self.config.project {
                Some(ProjectScope::Id(id)) => Some(id.clone()),
                _ => None,
            })
            .unwrap_or_default();

        debug!(expires_at = %issued_expiry, "authentication successful, token cached");
        Ok(CachedToken {
            token: SecretString::new(token),
            project_id,
            expires_at: issued_expiry - TOKEN_EXPIRY_MARGIN,
            catalog: parsed.token.catalog,
        })
    }
}
