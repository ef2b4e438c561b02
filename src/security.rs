//! TLS setup and pre-flight security checks
//!
//! [`SecurityValidator`] decides whether an HTTP client may be built at all:
//! it loads the configured CA bundle, applies the minimum TLS version and the
//! insecure flag, and warns about risky endpoints and credential choices.
//! Certificate-chain validation itself stays with the TLS backend.

use crate::auth::{AuthConfig, AuthSettings};
use crate::errors::{Error, Result};
use crate::sanitize;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, warn, Span};

/// Minimum TLS protocol version
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TlsVersion {
    /// TLS 1.0
    Tls10,
    /// TLS 1.1
    Tls11,
    /// TLS 1.2
    #[default]
    Tls12,
    /// TLS 1.3
    Tls13,
}

impl TlsVersion {
    fn as_reqwest(self) -> reqwest::tls::Version {
        match self {
            TlsVersion::Tls10 => reqwest::tls::Version::TLS_1_0,
            TlsVersion::Tls11 => reqwest::tls::Version::TLS_1_1,
            TlsVersion::Tls12 => reqwest::tls::Version::TLS_1_2,
            TlsVersion::Tls13 => reqwest::tls::Version::TLS_1_3,
        }
    }
}

/// Where a custom CA bundle comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaCertificate {
    /// PEM file on disk
    Path(PathBuf),
    /// Inline PEM content
    Pem(String),
}

impl CaCertificate {
    /// Interpret an `OS_CACERT`-style value: multi-line or PEM-armoured
    /// content is inline, anything else is a path
    pub fn from_setting(value: &str) -> Self {
        if value.contains('\n') || value.contains("-----BEGIN") {
            CaCertificate::Pem(value.to_string())
        } else {
            CaCertificate::Path(PathBuf::from(value))
        }
    }

    fn load(&self) -> Result<Vec<u8>> {
        match self {
            CaCertificate::Pem(pem) => Ok(pem.as_bytes().to_vec()),
            CaCertificate::Path(path) => std::fs::read(path).map_err(|e| {
                Error::tls("failed to read CA certificate file")
                    .with_details(path.display().to_string())
                    .with_source(e)
            }),
        }
    }
}

/// Security options
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    /// Disable certificate verification
    pub insecure_skip_verify: bool,
    /// Additional trusted roots
    pub ca_cert: Option<CaCertificate>,
    /// Lowest TLS version to negotiate
    pub min_tls_version: TlsVersion,
    /// Emit warnings for risky settings
    pub show_warnings: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            insecure_skip_verify: false,
            ca_cert: None,
            min_tls_version: TlsVersion::Tls12,
            show_warnings: true,
        }
    }
}

impl SecurityConfig {
    /// Derive security options from an authentication configuration
    pub fn from_auth_config(config: &AuthConfig) -> Self {
        Self {
            insecure_skip_verify: config.insecure,
            ca_cert: config
                .ca_cert
                .as_deref()
                .filter(|v| !v.is_empty())
                .map(CaCertificate::from_setting),
            ..Self::default()
        }
    }
}

/// Validated TLS options ready to apply to a `reqwest` client builder
#[derive(Debug, Clone)]
pub struct TlsSettings {
    accept_invalid_certs: bool,
    min_version: TlsVersion,
    root_certificates: Vec<reqwest::Certificate>,
}

impl TlsSettings {
    /// Whether certificate verification is disabled
    pub fn accepts_invalid_certs(&self) -> bool {
        self.accept_invalid_certs
    }

    /// Minimum negotiated TLS version
    pub fn min_version(&self) -> TlsVersion {
        self.min_version
    }

    /// Number of extra trusted roots
    pub fn root_certificate_count(&self) -> usize {
        self.root_certificates.len()
    }

    /// Apply to a client builder
    pub fn apply(&self, builder: reqwest::ClientBuilder) -> reqwest::ClientBuilder {
        let mut builder = builder
            .min_tls_version(self.min_version.as_reqwest())
            .danger_accept_invalid_certs(self.accept_invalid_certs);
        for cert in &self.root_certificates {
            builder = builder.add_root_certificate(cert.clone());
        }
        builder
    }
}

/// Runs TLS and configuration checks, logging into its own span
#[derive(Debug, Clone)]
pub struct SecurityValidator {
    config: SecurityConfig,
    span: Span,
}

impl SecurityValidator {
    /// Create a validator logging under a default `barbican` span
    pub fn new(config: SecurityConfig) -> Self {
        Self {
            config,
            span: tracing::debug_span!("barbican", component = "security"),
        }
    }

    /// Log under the given span instead
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// The options this validator enforces
    pub fn config(&self) -> &SecurityConfig {
        &self.config
    }

    /// Build TLS options from the configuration
    ///
    /// A CA bundle that cannot be read or holds no certificates is an error,
    /// never a silent fallback to the system roots.
    pub fn validate_and_create_tls_config(&self) -> Result<TlsSettings> {
        self.span.in_scope(|| {
            if self.config.insecure_skip_verify && self.config.show_warnings {
                warn!(
                    kind = "security_warning",
                    "TLS certificate verification is disabled; use only for testing"
                );
            }

            if self.config.min_tls_version < TlsVersion::Tls12 && self.config.show_warnings {
                warn!(
                    kind = "security_warning",
                    min_tls_version = ?self.config.min_tls_version,
                    "minimum TLS version is below TLS 1.2"
                );
            }

            let root_certificates = match &self.config.ca_cert {
                Some(ca) => {
                    let pem = ca.load()?;
                    let certs = reqwest::Certificate::from_pem_bundle(&pem).map_err(|e| {
                        Error::tls("failed to parse CA certificate").with_source(e)
                    })?;
                    if certs.is_empty() {
                        return Err(Error::tls("no certificates found in CA bundle"));
                    }
                    debug!(count = certs.len(), "loaded custom CA certificates");
                    certs
                }
                None => Vec::new(),
            };

            Ok(TlsSettings {
                accept_invalid_certs: self.config.insecure_skip_verify,
                min_version: self.config.min_tls_version,
                root_certificates,
            })
        })
    }

    /// Warn about plaintext or loopback endpoints
    pub fn check_endpoint_security(&self, endpoint: &str) -> Result<()> {
        if endpoint.trim().is_empty() {
            return Err(Error::config("endpoint is empty"));
        }
        if !self.config.show_warnings {
            return Ok(());
        }

        let lower = endpoint.to_lowercase();
        let shown = sanitize::endpoint(endpoint);
        self.span.in_scope(|| {
            if !lower.starts_with("https://") {
                warn!(
                    kind = "security_warning",
                    endpoint = %shown,
                    "endpoint does not use HTTPS; credentials and secrets travel in plaintext"
                );
            }
            if lower.contains("localhost") || lower.contains("127.0.0.1") || lower.contains("[::1]") {
                warn!(kind = "security_warning", endpoint = %shown, "endpoint points at localhost");
            }
        });
        Ok(())
    }

    /// Check that the settings name exactly one usable credential method
    pub fn validate_auth_config(&self, settings: &AuthSettings) -> Result<()> {
        let config = settings.resolve()?;
        self.check_endpoint_security(&config.auth_url)?;
        if self.config.show_warnings && config.credentials.is_password() {
            self.span.in_scope(|| {
                debug!(
                    kind = "security_warning",
                    "password authentication in use; application credentials are preferred"
                );
            });
        }
        Ok(())
    }

    /// Redact a field map for structured logging
    pub fn sanitize_for_logging(&self, fields: &HashMap<String, String>) -> HashMap<String, String> {
        fields
            .iter()
            .map(|(k, v)| (k.clone(), sanitize::field(k, v)))
            .collect()
    }

    /// Reject empty, malformed or control-character-bearing references
    pub fn validate_secret_ref(&self, secret_ref: &str) -> Result<()> {
        if secret_ref.is_empty() {
            return Err(Error::validation("secret reference is empty"));
        }
        if secret_ref.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(Error::secret_ref_format(secret_ref)
                .with_details("secret reference contains whitespace or control characters"));
        }
        crate::secret_ref::extract_identifier(secret_ref).map(|_| ())
    }
}

impl Default for SecurityValidator {
    fn default() -> Self {
        Self::new(SecurityConfig::default())
    }
}
