//! Error types and retry classification for the Barbican key source
//!
//! Every failure that crosses the crate boundary is an [`Error`] carrying one
//! of a closed set of [`ErrorKind`]s. Transport and protocol failures are
//! classified exactly once, where they happen (the request executor or the
//! token manager), and are only ever wrapped with extra context above that.
//!
//! Secret references, endpoints and free-form details are sanitized when they
//! are attached to an error, so rendering an error can never leak a full
//! secret identifier, an endpoint path, or URL-embedded credentials.
//!
//! # Example
//!
//! ```no_run
//! # use barbican_keysource::{ErrorKind, MasterKey};
//! # async fn example(key: &MasterKey) -> Result<(), Box<dyn std::error::Error>> {
//! match key.decrypt().await {
//!     Ok(data_key) => println!("recovered {} bytes", data_key.len()),
//!     Err(e) if e.kind() == ErrorKind::NotFound => println!("secret is gone"),
//!     Err(e) if e.is_retryable() => println!("transient failure: {e}"),
//!     Err(e) => return Err(e.into()),
//! }
//! # Ok(())
//! # }
//! ```

use crate::sanitize;
use std::error::Error as StdError;
use std::fmt;
use thiserror::Error;

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Substrings that mark an otherwise non-retryable failure as transient.
const RETRYABLE_MARKERS: &[&str] = &[
    "connection refused",
    "timeout",
    "temporary failure",
    "network is unreachable",
    "server error (5",
    "(502)",
    "(503)",
    "(504)",
];

/// Only consulted for errors that were never classified by this crate.
const UNTYPED_AUTH_MARKER: &str = "authentication failed (401)";

/// Error categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Credentials rejected or missing (401)
    Authentication,
    /// Authenticated but not permitted (403)
    Authorization,
    /// Malformed request or configuration value (400)
    Validation,
    /// Secret reference does not match any accepted format
    Format,
    /// Connection or transport failure
    Network,
    /// Deadline exceeded or operation cancelled
    Timeout,
    /// Service temporarily unavailable (5xx)
    Unavailable,
    /// Unexpected API response
    Api,
    /// Secret does not exist or is not visible (404)
    NotFound,
    /// Storage quota exceeded (413/507)
    Quota,
    /// TLS setup failure
    Tls,
    /// Security policy violation
    Security,
    /// Invalid client configuration
    Config,
}

impl ErrorKind {
    /// Stable lowercase name of the kind
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Authentication => "authentication",
            ErrorKind::Authorization => "authorization",
            ErrorKind::Validation => "validation",
            ErrorKind::Format => "format",
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::Api => "api",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Quota => "quota",
            ErrorKind::Tls => "tls",
            ErrorKind::Security => "security",
            ErrorKind::Config => "config",
        }
    }

    /// Kinds a human can usually fix by changing their setup
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            ErrorKind::Authentication
                | ErrorKind::Authorization
                | ErrorKind::Validation
                | ErrorKind::Config
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for the crate
///
/// Built with a kind-specific constructor (which attaches default remediation
/// suggestions) and refined with the `with_*` methods.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: String,
    details: Option<String>,
    suggestions: Vec<String>,
    status: Option<u16>,
    secret_ref: Option<String>,
    region: Option<String>,
    endpoint: Option<String>,
    source: Option<BoxError>,
}

impl Error {
    /// Create an error of the given kind with no suggestions attached
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
            suggestions: Vec::new(),
            status: None,
            secret_ref: None,
            region: None,
            endpoint: None,
            source: None,
        }
    }

    /// Credentials were rejected or could not be used
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authentication, message).with_suggestions([
            "Check your OpenStack credentials (OS_USERNAME, OS_PASSWORD, etc.)",
            "Verify the authentication URL (OS_AUTH_URL) is correct",
            "Ensure your user has access to the specified project",
            "Try using application credentials for better security",
        ])
    }

    /// The caller is authenticated but lacks permission
    pub fn authorization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authorization, message).with_suggestions([
            "Verify your user has the required Barbican permissions",
            "Check that you're accessing the correct project/tenant",
            "Contact your OpenStack administrator for access rights",
        ])
    }

    /// A request or configuration value failed validation
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message).with_suggestions([
            "Verify all required environment variables are set",
            "Ensure secret references are in the correct format",
        ])
    }

    /// A secret reference matched none of the accepted formats
    pub fn secret_ref_format(secret_ref: &str) -> Self {
        Self::new(ErrorKind::Format, "Invalid secret reference format")
            .with_secret_ref(secret_ref)
            .with_details("Secret reference must be a UUID, full URI, or regional format")
            .with_suggestions([
                "Use UUID format: xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx (lowercase hex)",
                "Use URI format: https://<barbican-host>/v1/secrets/<uuid>",
                "Use regional format: region:<name>:<uuid>",
            ])
    }

    /// Transport-level failure
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message).with_suggestions([
            "Check your network connectivity to the OpenStack endpoints",
            "Verify firewall rules allow access to Barbican (port 9311)",
            "Try again in a few moments if this is a temporary network issue",
        ])
    }

    /// Deadline exceeded
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message).with_suggestions([
            "Increase the timeout value in your configuration",
            "Check network latency to the OpenStack endpoints",
            "Verify the Barbican service is responding normally",
        ])
    }

    /// The caller cancelled the operation
    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Timeout, "operation cancelled")
    }

    /// Service temporarily unavailable
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, message).with_suggestions([
            "Wait a few moments and try again",
            "Check the OpenStack service status",
            "Try using a different region if available",
        ])
    }

    /// Unexpected API response
    pub fn api(message: impl Into<String>, status: Option<u16>) -> Self {
        let mut err = Self::new(ErrorKind::Api, message).with_suggestions([
            "Check the Barbican API documentation for this error code",
            "Verify your request parameters are correct",
        ]);
        err.status = status;
        err
    }

    /// Secret does not exist or is not visible to the caller
    pub fn not_found(secret_ref: &str) -> Self {
        let err = Self::new(ErrorKind::NotFound, "Secret not found or not accessible")
            .with_suggestions([
                "Verify the secret reference is correct",
                "Check that the secret exists in the specified region",
                "Confirm you're using the correct project/tenant",
            ]);
        if secret_ref.is_empty() {
            err
        } else {
            err.with_secret_ref(secret_ref)
        }
    }

    /// Storage quota exceeded
    pub fn quota(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Quota, message).with_suggestions([
            "Delete unused secrets to free up quota",
            "Contact your OpenStack administrator to increase quota",
        ])
    }

    /// TLS could not be set up
    pub fn tls(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Tls, message).with_suggestions([
            "Verify the server's TLS certificate is valid",
            "Check if you need to provide a custom CA certificate (OS_CACERT)",
            "Use OS_INSECURE=true only for testing",
        ])
    }

    /// Security policy violation
    pub fn security(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Security, message).with_suggestions([
            "Review your security configuration",
            "Ensure you're using secure authentication methods",
        ])
    }

    /// Invalid client configuration
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message).with_suggestions([
            "Verify all required environment variables are set",
            "Review the Barbican configuration documentation",
        ])
    }

    /// Map an identity-service rejection to the taxonomy
    pub(crate) fn from_identity_status(status: u16, body: &str) -> Self {
        let err = match status {
            401 => Error::authentication(format!("authentication failed with status {status}"))
                .with_suggestions(["Check that your user account is not disabled"]),
            403 => Error::authorization("Access denied"),
            400 => Error::validation("Invalid authentication request")
                .with_suggestions(["Check your authentication parameters"]),
            503 => Error::unavailable("Authentication service is unavailable"),
            _ => Error::api("Authentication failed", None),
        };
        err.with_status(status).with_details(body)
    }

    /// Map a secret-store response status to the taxonomy
    pub(crate) fn from_store_status(status: u16, body: &str) -> Self {
        let err = match status {
            404 => Error::not_found(""),
            403 => Error::authorization("Access forbidden"),
            400 => match serde_json::from_str::<crate::models::StoreErrorResponse>(body) {
                Ok(resp) if !resp.error.message.is_empty() => {
                    return Error::validation(resp.error.message).with_status(status)
                }
                _ => Error::validation("Bad request"),
            },
            429 => Error::api("Rate limit exceeded", None)
                .with_suggestions(["Wait before retrying", "Reduce request frequency"]),
            413 | 507 => Error::quota("Storage quota exceeded"),
            500..=599 => Error::unavailable("Server error"),
            _ => Error::api("Unexpected response status", None),
        };
        err.with_status(status).with_details(body)
    }

    /// Attach free-form details (sanitized)
    pub fn with_details(mut self, details: impl AsRef<str>) -> Self {
        let details = details.as_ref().trim();
        if !details.is_empty() {
            self.details = Some(sanitize::text(details));
        }
        self
    }

    /// Append remediation suggestions
    pub fn with_suggestions<I, S>(mut self, suggestions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.suggestions
            .extend(suggestions.into_iter().map(Into::into));
        self
    }

    /// Attach an HTTP status code
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Attach the underlying cause
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Attach the secret reference; only its redacted form is kept
    pub fn with_secret_ref(mut self, secret_ref: &str) -> Self {
        self.secret_ref = Some(sanitize::secret_ref(secret_ref));
        self
    }

    /// Attach the region
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Attach the endpoint; only scheme and host are kept
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = Some(sanitize::endpoint(endpoint));
        self
    }

    /// Wrap this error with extra context, keeping its kind and status
    ///
    /// The wrapped message and details become the new details; the wrapped
    /// error stays reachable through [`std::error::Error::source`].
    pub fn context(self, message: impl Into<String>) -> Self {
        let details = match &self.details {
            Some(details) => format!("{}: {details}", self.message),
            None => self.message.clone(),
        };
        Self {
            kind: self.kind,
            message: message.into(),
            details: Some(details),
            suggestions: self.suggestions.clone(),
            status: self.status,
            secret_ref: self.secret_ref.clone(),
            region: self.region.clone(),
            endpoint: self.endpoint.clone(),
            source: Some(Box::new(self)),
        }
    }

    /// Get the error kind
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Get the primary message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the sanitized details, if any
    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }

    /// Get the remediation suggestions
    pub fn suggestions(&self) -> &[String] {
        &self.suggestions
    }

    /// Get the HTTP status code, if any
    pub fn status_code(&self) -> Option<u16> {
        self.status
    }

    /// Get the redacted secret reference, if any
    pub fn secret_ref(&self) -> Option<&str> {
        self.secret_ref.as_deref()
    }

    /// Get the region, if any
    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    /// Get the redacted endpoint, if any
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    /// Check if the error is retryable
    ///
    /// Network, timeout and unavailable failures are transient. Authentication
    /// failures are retried because a cached token may expire between the
    /// validity check and its use. API errors are retried for 5xx statuses.
    /// Anything else is retried only when its rendered message carries a
    /// recognised transient marker.
    pub fn is_retryable(&self) -> bool {
        match self.kind {
            ErrorKind::Network
            | ErrorKind::Timeout
            | ErrorKind::Unavailable
            | ErrorKind::Authentication => true,
            ErrorKind::Api if self.status.is_some_and(|s| s >= 500) => true,
            _ => has_retryable_marker(&self.to_string()),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "barbican {} error", self.kind)?;
        if let Some(status) = self.status {
            write!(f, " ({status})")?;
        }
        write!(f, ": {}", self.message)?;
        if let Some(details) = &self.details {
            write!(f, ". Details: {details}")?;
        }
        if let Some(secret_ref) = &self.secret_ref {
            write!(f, ". Secret: {secret_ref}")?;
        }
        if let Some(region) = &self.region {
            write!(f, ". Region: {region}")?;
        }
        if let Some(endpoint) = &self.endpoint {
            write!(f, ". Endpoint: {endpoint}")?;
        }
        if !self.suggestions.is_empty() {
            write!(f, ". Suggestions: {}", self.suggestions.join("; "))?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

/// Classify any error for retry, including errors this crate did not create
pub fn is_retryable_error(err: &(dyn StdError + 'static)) -> bool {
    if let Some(err) = err.downcast_ref::<Error>() {
        return err.is_retryable();
    }
    let message = err.to_string();
    has_retryable_marker(&message) || message.to_lowercase().contains(UNTYPED_AUTH_MARKER)
}

fn has_retryable_marker(message: &str) -> bool {
    let message = message.to_lowercase();
    RETRYABLE_MARKERS.iter().any(|m| message.contains(m))
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        // The URL path can carry a secret identifier.
        let err = err.without_url();
        if err.is_timeout() {
            Error::timeout("request timed out").with_source(err)
        } else if err.is_connect() {
            Error::network("connection failed").with_source(err)
        } else if err.is_decode() {
            Error::api("failed to decode response", None).with_source(err)
        } else if err.is_builder() {
            Error::config("failed to build request").with_source(err)
        } else {
            Error::network("HTTP request failed").with_source(err)
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::api("failed to parse response", None).with_source(err)
    }
}

/// Multi-region operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Storing the data key
    Encrypt,
    /// Retrieving the data key
    Decrypt,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Encrypt => f.write_str("encrypt"),
            Operation::Decrypt => f.write_str("decrypt"),
        }
    }
}

/// One key's failure inside a multi-region operation
#[derive(Debug)]
pub struct RegionFailure {
    /// Position of the key in the caller's slice
    pub index: usize,
    /// Effective region of the key
    pub region: String,
    /// What went wrong
    pub error: Error,
}

impl fmt::Display for RegionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "region {}: {}", self.region, self.error)
    }
}

/// Aggregate failure of a multi-region operation
#[derive(Debug, Error)]
pub enum MultiRegionError {
    /// The key list was empty
    #[error("no master keys provided for multi-region {0}")]
    NoKeys(Operation),
    /// None of the keys holds an encrypted data key
    #[error("no master keys have encrypted data")]
    NoEncryptedKeys,
    /// Every key failed
    #[error("failed to {operation} in any region: {}", join_failures(.failures))]
    AllFailed {
        /// Which operation failed
        operation: Operation,
        /// One entry per attempted key
        failures: Vec<RegionFailure>,
    },
}

impl MultiRegionError {
    /// Per-key failures, empty unless every key failed
    pub fn failures(&self) -> &[RegionFailure] {
        match self {
            MultiRegionError::AllFailed { failures, .. } => failures,
            _ => &[],
        }
    }
}

fn join_failures(failures: &[RegionFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "550e8400-e29b-41d4-a716-446655440000";

    #[test]
    fn test_error_kind_names() {
        assert_eq!(ErrorKind::NotFound.as_str(), "not_found");
        assert_eq!(ErrorKind::Config.to_string(), "config");
        assert!(ErrorKind::Authentication.is_user_facing());
        assert!(!ErrorKind::Network.is_user_facing());
    }

    #[test]
    fn test_user_facing_kinds_carry_suggestions() {
        for err in [
            Error::authentication("x"),
            Error::authorization("x"),
            Error::validation("x"),
            Error::config("x"),
        ] {
            assert!(err.kind().is_user_facing());
            assert!(!err.suggestions().is_empty(), "{err}");
        }
    }

    #[test]
    fn test_error_is_retryable() {
        assert!(Error::network("down").is_retryable());
        assert!(Error::timeout("slow").is_retryable());
        assert!(Error::unavailable("busy").is_retryable());
        assert!(Error::authentication("expired").is_retryable());
        assert!(Error::api("boom", Some(502)).is_retryable());

        assert!(!Error::api("rate limited", Some(429)).is_retryable());
        assert!(!Error::validation("bad").is_retryable());
        assert!(!Error::not_found(ID).is_retryable());
        assert!(!Error::quota("full").is_retryable());
        assert!(!Error::secret_ref_format("nope").is_retryable());
        assert!(!Error::tls("bad cert").is_retryable());
        assert!(!Error::security("policy").is_retryable());
        assert!(!Error::config("missing").is_retryable());
    }

    #[test]
    fn test_retryable_marker_in_message() {
        let err = Error::validation("upstream said: connection refused");
        assert!(err.is_retryable());

        let err = Error::config("x").with_details("gateway returned (503)");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_untyped_errors_use_markers() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "Connection refused by peer");
        assert!(is_retryable_error(&io));

        let io = std::io::Error::new(std::io::ErrorKind::Other, "authentication failed (401)");
        assert!(is_retryable_error(&io));

        let io = std::io::Error::new(std::io::ErrorKind::Other, "permission denied");
        assert!(!is_retryable_error(&io));

        let typed = Error::not_found(ID);
        assert!(!is_retryable_error(&typed));
    }

    #[test]
    fn test_display_redacts_secret_ref() {
        let uri = format!("https://barbican.example.com:9311/v1/secrets/{ID}");
        let rendered = Error::not_found(&uri).to_string();
        assert!(!rendered.contains(ID));
        assert!(rendered.contains("Secret: ***40000"));
        assert!(!rendered.contains("barbican.example.com:9311/v1"));
    }

    #[test]
    fn test_details_are_scrubbed() {
        let err = Error::api("failed", Some(500))
            .with_details(format!("secret {ID} at https://user:pw@host/v1 failed"));
        let rendered = err.to_string();
        assert!(!rendered.contains(ID));
        assert!(!rendered.contains("user:pw"));
        assert!(rendered.contains("***@host"));
    }

    #[test]
    fn test_endpoint_is_reduced() {
        let err = Error::network("down").with_endpoint("https://kms.example.com:9311/v1/secrets");
        assert_eq!(err.endpoint(), Some("https://kms.example.com:9311/***"));
    }

    #[test]
    fn test_context_preserves_kind_and_chain() {
        let inner = Error::not_found(ID).with_status(404);
        let outer = inner.context("failed to decrypt data key");

        assert_eq!(outer.kind(), ErrorKind::NotFound);
        assert_eq!(outer.status_code(), Some(404));
        assert_eq!(outer.secret_ref(), Some("***40000"));
        assert_eq!(outer.details(), Some("Secret not found or not accessible"));

        let source = outer.source().expect("source");
        let inner = source.downcast_ref::<Error>().expect("typed source");
        assert_eq!(inner.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_nested_context_keeps_inner_details() {
        let err = Error::from_store_status(400, r#"{"error":{"message":"bad"}}"#)
            .with_details("field 'algorithm' does not match schema")
            .context("request failed after 1 attempt(s)")
            .context("failed to create secret");

        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.message(), "failed to create secret");
        let details = err.details().expect("details");
        assert!(details.starts_with("request failed after 1 attempt(s): bad: "));
        assert!(details.contains("does not match schema"));
        assert!(err.to_string().contains("does not match schema"));
    }

    #[test]
    fn test_store_status_mapping() {
        assert_eq!(Error::from_store_status(404, "").kind(), ErrorKind::NotFound);
        assert_eq!(Error::from_store_status(403, "").kind(), ErrorKind::Authorization);
        assert_eq!(Error::from_store_status(429, "").kind(), ErrorKind::Api);
        assert_eq!(Error::from_store_status(413, "").kind(), ErrorKind::Quota);
        assert_eq!(Error::from_store_status(507, "").kind(), ErrorKind::Quota);
        assert_eq!(Error::from_store_status(500, "").kind(), ErrorKind::Unavailable);
        assert_eq!(Error::from_store_status(504, "").kind(), ErrorKind::Unavailable);
        assert_eq!(Error::from_store_status(418, "").kind(), ErrorKind::Api);

        let body = r#"{"error": {"code": 400, "message": "Invalid payload", "title": "Bad Request"}}"#;
        let err = Error::from_store_status(400, body);
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.message(), "Invalid payload");
        assert_eq!(err.status_code(), Some(400));
    }

    #[test]
    fn test_identity_status_mapping() {
        assert_eq!(Error::from_identity_status(401, "").kind(), ErrorKind::Authentication);
        assert_eq!(Error::from_identity_status(403, "").kind(), ErrorKind::Authorization);
        assert_eq!(Error::from_identity_status(400, "").kind(), ErrorKind::Validation);
        assert_eq!(Error::from_identity_status(503, "").kind(), ErrorKind::Unavailable);
        let err = Error::from_identity_status(500, "");
        assert_eq!(err.kind(), ErrorKind::Api);
        assert_eq!(err.status_code(), Some(500));
    }

    #[test]
    fn test_multi_region_error_lists_failures() {
        let err = MultiRegionError::AllFailed {
            operation: Operation::Encrypt,
            failures: vec![
                RegionFailure {
                    index: 0,
                    region: "sjc3".into(),
                    error: Error::unavailable("Server error"),
                },
                RegionFailure {
                    index: 1,
                    region: "dfw3".into(),
                    error: Error::network("down"),
                },
            ],
        };
        let rendered = err.to_string();
        assert!(rendered.starts_with("failed to encrypt in any region"));
        assert!(rendered.contains("region sjc3"));
        assert!(rendered.contains("region dfw3"));
        assert_eq!(err.failures().len(), 2);
    }
}
