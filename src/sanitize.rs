//! Redaction helpers
//!
//! The same rules apply to error rendering and to structured log fields:
//!
//! - a secret identifier longer than 10 characters keeps only its last 5
//!   characters behind [`REDACTED`]
//! - an endpoint keeps its scheme and host, the path is replaced
//! - a credential-like field keeps its first and last character
//! - `user:pass@` in a URL becomes `***@`

use regex::{Captures, Regex};
use std::sync::OnceLock;

/// Redaction marker
pub const REDACTED: &str = "***";

/// Field-name fragments that mark a value as a credential
pub const CREDENTIAL_PATTERNS: &[&str] = &["password", "secret", "token", "credential", "key", "auth"];

const URL_FIELD_PATTERNS: &[&str] = &["url", "endpoint", "uri"];

fn uuid_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}")
            .expect("identifier pattern is a valid regex")
    })
}

fn basic_auth_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(https?://)[^/\s@]+@").expect("basic-auth pattern is a valid regex")
    })
}

/// Redact a secret reference for display
///
/// Recognised references are reduced to their identifier's tail. Anything
/// else is fully redacted, since its shape says nothing about what it holds.
pub fn secret_ref(value: &str) -> String {
    if value.is_empty() {
        return String::new();
    }
    match crate::secret_ref::capture_identifier(value) {
        Some(id) => identifier(id),
        None => REDACTED.to_string(),
    }
}

/// Redact a bare identifier
pub fn identifier(id: &str) -> String {
    let chars: Vec<char> = id.chars().collect();
    if chars.len() > 10 {
        let tail: String = chars[chars.len() - 5..].iter().collect();
        format!("{REDACTED}{tail}")
    } else {
        REDACTED.to_string()
    }
}

/// Reduce an endpoint URL to `scheme://host/***`
pub fn endpoint(value: &str) -> String {
    if value.is_empty() {
        return String::new();
    }
    let Some((scheme, rest)) = value.split_once("://") else {
        return REDACTED.to_string();
    };
    if !scheme.eq_ignore_ascii_case("http") && !scheme.eq_ignore_ascii_case("https") {
        return REDACTED.to_string();
    }
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
    if host.is_empty() {
        return REDACTED.to_string();
    }
    format!("{scheme}://{host}/{REDACTED}")
}

/// Redact a credential value, keeping its first and last character
pub fn redact(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    match chars.len() {
        0 => String::new(),
        1..=4 => REDACTED.to_string(),
        n => format!("{}{REDACTED}{}", chars[0], chars[n - 1]),
    }
}

/// Strip basic-auth credentials embedded in URLs
pub fn url_credentials(value: &str) -> String {
    basic_auth_pattern()
        .replace_all(value, "${1}***@")
        .into_owned()
}

/// Scrub free-form text: identifiers and URL credentials
pub fn text(value: &str) -> String {
    let stripped = url_credentials(value);
    uuid_pattern()
        .replace_all(&stripped, |caps: &Captures<'_>| identifier(&caps[0]))
        .into_owned()
}

/// Whether a field name looks like it holds a credential
pub fn is_credential_field(name: &str) -> bool {
    let name = name.to_lowercase();
    CREDENTIAL_PATTERNS.iter().any(|p| name.contains(p))
}

/// Redact a named field according to its name
///
/// Credential-like names win over URL-like ones, so `auth_url` is redacted
/// outright.
pub fn field(name: &str, value: &str) -> String {
    if is_credential_field(name) {
        return redact(value);
    }
    let lower = name.to_lowercase();
    if URL_FIELD_PATTERNS.iter().any(|p| lower.contains(p)) {
        return url_credentials(value);
    }
    value.to_string()
}
