//! Key-manager URL construction

use crate::auth::DEFAULT_REGION;
use crate::errors::{Error, Result};
use url::{Host, Url};

/// API version segment every store endpoint ends with
pub const API_VERSION_PATH: &str = "/v1";

/// Default key-manager port
pub const DEFAULT_STORE_PORT: u16 = 9311;

/// Endpoint builder
#[derive(Debug, Clone)]
pub(crate) struct StoreEndpoints {
    base_url: String,
}

impl StoreEndpoints {
    /// Create a builder; `/v1` is appended unless already present
    pub fn new(endpoint: &str) -> Self {
        let trimmed = endpoint.trim().trim_end_matches('/');
        let base_url = if trimmed.ends_with(API_VERSION_PATH) {
            trimmed.to_string()
        } else {
            format!("{trimmed}{API_VERSION_PATH}")
        };
        Self { base_url }
    }

    /// Versioned base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn secrets(&self) -> String {
        self.url("/secrets")
    }

    pub fn secret(&self, id: &str) -> String {
        self.url(&format!("/secrets/{id}"))
    }

    pub fn payload(&self, id: &str) -> String {
        self.url(&format!("/secrets/{id}/payload"))
    }
}

/// Derive a regional key-manager endpoint from the identity URL
///
/// Used when the service catalog has no entry for the region. Given
/// `https://keystone.example.com:5000/v3` and region `sjc3` this yields
/// `https://barbican-sjc3.example.com:9311`. A host that already names the
/// region, or an IP address, is kept as is; a single-label host gets the
/// region appended (`https://keystone-sjc3:9311`).
pub fn derive_store_endpoint(auth_url: &str, region: &str) -> Result<String> {
    let url = Url::parse(auth_url.trim()).map_err(|e| {
        Error::config("invalid authentication URL")
            .with_endpoint(auth_url)
            .with_source(e)
    })?;
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| Error::config("authentication URL has no host").with_endpoint(auth_url))?;
    let region = if region.is_empty() { DEFAULT_REGION } else { region };
    let scheme = url.scheme();

    let is_ip = matches!(url.host(), Some(Host::Ipv4(_)) | Some(Host::Ipv6(_)));
    let store_host = if is_ip || host.contains(region) {
        host.to_string()
    } else {
        match host.split_once('.') {
            Some((_, parent)) if !parent.is_empty() => format!("barbican-{region}.{parent}"),
            _ => format!("{host}-{region}"),
        }
    };

    Ok(format!("{scheme}://{store_host}:{DEFAULT_STORE_PORT}"))
}
