//! OpenStack Barbican master keys for Rust
//!
//! Stores and retrieves data-encryption keys as Barbican secrets,
//! authenticating against Keystone and failing over between regions.
//!
//! # Features
//!
//! - Async/await support with tokio runtime
//! - Keystone token caching with a five-minute safety margin
//! - Password, application-credential and token authentication
//! - Automatic retries with exponential backoff, honouring cancellation
//! - Service-catalog endpoint discovery per region
//! - Multi-region encryption with parallel or failover decryption
//! - Secret references and credentials redacted from errors and logs
//! - Decrypted payloads zeroized on drop
//!
//! # Example
//!
//! ```no_run
//! use barbican_keysource::{AuthConfig, Credentials, MasterKey};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let auth = AuthConfig::new("https://keystone.example.com:5000/v3", Credentials::password("u", "p"))
//!         .with_project_id("proj")
//!         .with_region("sjc3");
//!
//!     let mut key = MasterKey::from_secret_ref("region:sjc3:550e8400-e29b-41d4-a716-446655440000")?
//!         .with_auth_config(auth);
//!     key.encrypt(b"data encryption key").await?;
//!
//!     let data_key = key.decrypt().await?;
//!     assert_eq!(data_key.as_slice(), b"data encryption key");
//!     Ok(())
//! }
//! ```

#![deny(
    missing_docs,
    missing_debug_implementations,
    unsafe_code,
    unused_results
)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod auth;
mod cache;
mod client;
mod config;
mod endpoints;
mod errors;
mod keysource;
mod models;
mod multi_region;
mod retry;
/// Redaction helpers for logs and error messages
pub mod sanitize;
/// Secret reference parsing
pub mod secret_ref;
mod security;
mod util;

pub use auth::{
    AuthConfig, AuthManager, AuthSettings, AuthToken, Credentials, Domain, ProjectScope,
    DEFAULT_DOMAIN, DEFAULT_REGION, KEY_MANAGER_SERVICE,
};
pub use cache::{AuthStats, CachedToken, TokenCache};
pub use client::{SecretStore, StoreClient, DEFAULT_SECRET_NAME};
pub use config::{ClientConfig, StoreClientBuilder, UsagePattern};
pub use endpoints::{derive_store_endpoint, API_VERSION_PATH, DEFAULT_STORE_PORT};
pub use errors::{
    is_retryable_error, Error, ErrorKind, MultiRegionError, Operation, RegionFailure, Result,
};
pub use keysource::{MasterKey, KEY_TYPE_IDENTIFIER, ROTATION_TTL};
pub use models::{
    CatalogEndpoint, CatalogEntry, SecretInfo, SecretMetadata, DEFAULT_CONTENT_TYPE,
    DEFAULT_SECRET_TYPE,
};
pub use multi_region::{
    decrypt_multi_region, decrypt_multi_region_parallel, encrypt_multi_region,
    group_keys_by_region, regions_from_keys, validate_multi_region_keys, MultiRegionOptions,
    MultiRegionResult,
};
pub use retry::RetryPolicy;
pub use secret_ref::{RefFormat, SecretRef};
pub use security::{CaCertificate, SecurityConfig, SecurityValidator, TlsSettings, TlsVersion};

// Re-export commonly used types
pub use secrecy::SecretString;
pub use tokio_util::sync::CancellationToken;
pub use zeroize::Zeroizing;

/// Crate version, matches Cargo.toml version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default request timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Default number of retries after the first attempt
pub const DEFAULT_RETRIES: u32 = 3;
