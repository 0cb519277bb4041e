//! Resource identity used for deduplication and cache lookup.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use url::Url;

/// Errors raised while building a [`ResourceKey`] from user input.
#[derive(Debug, Error)]
pub enum KeyError {
    /// The input could not be parsed as an absolute URL.
    #[error("invalid URL '{input}': {source}")]
    InvalidUrl {
        /// The rejected input.
        input: String,
        /// The underlying parse error.
        #[source]
        source: url::ParseError,
    },
}

/// Opaque identity of a requested resource (canonically its source URL).
///
/// Equality and hashing define request identity: two requests with equal keys
/// share one download, one cache entry and one delivery cycle. Cloning is
/// cheap (reference counted).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey(Arc<str>);

impl ResourceKey {
    /// Creates a key from an arbitrary identifier without validation.
    #[must_use]
    pub fn new(value: impl AsRef<str>) -> Self {
        Self(Arc::from(value.as_ref()))
    }

    /// Parses and normalizes an absolute URL into a key.
    ///
    /// Normalization follows the WHATWG URL rules (lowercased scheme and host,
    /// default ports dropped), so `HTTPS://Example.com:443/a.png` and
    /// `https://example.com/a.png` produce the same key.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::InvalidUrl`] if `input` is not an absolute URL.
    pub fn parse_url(input: &str) -> Result<Self, KeyError> {
        let url = Url::parse(input.trim()).map_err(|source| KeyError::InvalidUrl {
            input: input.to_string(),
            source,
        })?;
        Ok(Self::from(url))
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Interprets the key as a URL, if it is one.
    #[must_use]
    pub fn to_url(&self) -> Option<Url> {
        Url::parse(&self.0).ok()
    }
}

impl From<Url> for ResourceKey {
    fn from(url: Url) -> Self {
        Self(Arc::from(String::from(url)))
    }
}

impl From<&str> for ResourceKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ResourceKey {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl AsRef<str> for ResourceKey {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
