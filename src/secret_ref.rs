//! Secret reference parsing
//!
//! Three textual forms address a stored secret:
//!
//! | Form | Example |
//! |---|---|
//! | bare identifier | `550e8400-e29b-41d4-a716-446655440000` |
//! | resource URI | `https://barbican.example.com:9311/v1/secrets/550e8400-…` |
//! | region-qualified | `region:sjc3:550e8400-…` |
//!
//! Validation and extraction share one grammar, so a reference is valid
//! exactly when an identifier can be extracted from it.

use crate::errors::{Error, Result};
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Length of a canonical secret identifier
pub const IDENTIFIER_LEN: usize = 36;

const REGION_PREFIX: &str = "region:";

fn grammar() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?:(?:https?://[^/]+/v1/secrets/)|(?:region:[^:]+:))?([0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12})$",
        )
        .expect("secret reference grammar is a valid regex")
    })
}

pub(crate) fn capture_identifier(value: &str) -> Option<&str> {
    if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return None;
    }
    grammar()
        .captures(value)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Check whether a reference matches one of the accepted forms
pub fn is_valid(value: &str) -> bool {
    capture_identifier(value).is_some()
}

/// Extract the canonical identifier from any accepted form
pub fn extract_identifier(value: &str) -> Result<String> {
    capture_identifier(value)
        .map(str::to_owned)
        .ok_or_else(|| Error::secret_ref_format(value))
}

/// Which textual form a reference was written in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefFormat {
    /// Bare identifier
    Identifier,
    /// Full resource URI
    Uri,
    /// `region:<name>:<identifier>`
    Regional,
}

/// A validated secret reference
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SecretRef {
    raw: String,
    identifier: String,
    region: Option<String>,
    format: RefFormat,
}

impl SecretRef {
    /// Parse and validate a reference
    pub fn parse(value: &str) -> Result<Self> {
        let identifier = extract_identifier(value)?;
        let (format, region) = if let Some(rest) = value.strip_prefix(REGION_PREFIX) {
            let region = rest.split_once(':').map(|(region, _)| region.to_string());
            (RefFormat::Regional, region)
        } else if value.len() == IDENTIFIER_LEN {
            (RefFormat::Identifier, None)
        } else {
            (RefFormat::Uri, None)
        };

        Ok(Self {
            raw: value.to_string(),
            identifier,
            region,
            format,
        })
    }

    /// The canonical 36-character identifier
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Region embedded in a region-qualified reference
    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    /// The form the reference was written in
    pub fn format(&self) -> RefFormat {
        self.format
    }

    /// Whether the reference carries its own region
    pub fn is_regional(&self) -> bool {
        self.format == RefFormat::Regional
    }

    /// The reference as originally written
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for SecretRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for SecretRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl fmt::Debug for SecretRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretRef")
            .field("identifier", &crate::sanitize::identifier(&self.identifier))
            .field("region", &self.region)
            .field("format", &self.format)
            .finish()
    }
}
