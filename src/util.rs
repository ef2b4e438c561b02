//! Utility functions

const USER_AGENT_PREFIX: &str = "barbican-keysource-rust";

/// Extract header value as string
pub fn header_str(headers: &http::HeaderMap, name: &str) -> Option<String> {
    headers.get(name)?.to_str().ok().map(|s| s.to_string())
}

/// Generate a new request ID
pub fn generate_request_id() -> String {
    format!("bks-{}", uuid::Uuid::new_v4())
}

/// User agent sent with every request
pub fn user_agent() -> String {
    format!("{}/{}", USER_AGENT_PREFIX, crate::VERSION)
}
