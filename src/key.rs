//! Validated cache keys.
//!
//! [`BoxKey`] is the join key across local sources, the in-flight registry,
//! and the journal. Keys are constrained to `[a-z0-9_-]{1,120}` so they are
//! safe to embed in file names and in the journal's `key:timestamp` line
//! format (no `:` can ever appear in a key).

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use crate::{DataboxError, Result};

static KEY_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^[a-z0-9_-]{1,120}$").expect("key pattern is valid"));

/// A validated string identifier for one logical cached resource.
///
/// Equality and hashing are value-based on the raw string.
///
/// ```rust
/// # use databox::BoxKey;
/// let key = BoxKey::new("user-profile_42")?;
/// assert_eq!(key.as_str(), "user-profile_42");
/// assert!(BoxKey::new("Not Valid!").is_err());
/// # Ok::<(), databox::DataboxError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BoxKey(String);

impl BoxKey {
    /// Validate and wrap a key string.
    ///
    /// Returns [`DataboxError::InvalidKey`] when the string does not match
    /// `[a-z0-9_-]{1,120}`.
    pub fn new(key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        if KEY_PATTERN.is_match(&key) {
            Ok(Self(key))
        } else {
            Err(DataboxError::InvalidKey { key })
        }
    }

    /// The raw key string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BoxKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for BoxKey {
    type Err = DataboxError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<&str> for BoxKey {
    type Error = DataboxError;

    fn try_from(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl AsRef<str> for BoxKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
