//! Secure types for handling secret content.
//!
//! [`SecretValue`] is the content of one secret revision; [`SecretString`]
//! wraps single sensitive strings such as backend tokens. Neither type can
//! leak its value through `Debug`, `Display` or serialization, and both
//! overwrite their memory when dropped.

use crate::errors::{Result, SecretplaneError};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Placeholder written wherever a sensitive value would otherwise appear.
pub const REDACTED: &str = "[REDACTED]";

static CONTENT_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z](-?[a-z0-9]){2,}$").expect("valid content key regex"));

/// A string wrapper that redacts its contents in Debug, Display, and serialization.
///
/// Deserialization accepts the real value so tokens can be read from backend
/// configuration. Use [`SecretString::expose_secret`] where the raw value is
/// actually needed (request headers, provider clients).
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretString(String);

impl Serialize for SecretString {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(REDACTED)
    }
}

impl<'de> Deserialize<'de> for SecretString {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Ok(SecretString(value))
    }
}

impl SecretString {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Exposes the underlying value. Never log the result.
    pub fn expose_secret(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretString({})", REDACTED)
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl PartialEq for SecretString {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for SecretString {}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Content of a secret revision: key to base64-encoded value.
///
/// A value is well formed when it has at least one entry, every key matches
/// `^[a-z](-?[a-z0-9]){2,}$` and every value is valid standard base64.
/// Construction through [`SecretValue::new`] enforces this; values read
/// back from a backend are re-checked with [`SecretValue::validate`] before
/// being written anywhere else.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretValue(BTreeMap<String, String>);

impl SecretValue {
    /// Build a value from already-encoded data, validating it.
    pub fn new(data: BTreeMap<String, String>) -> Result<Self> {
        let value = Self(data);
        value.validate()?;
        Ok(value)
    }

    /// Build a value from raw bytes per key, encoding them.
    pub fn from_plain<K, V>(data: impl IntoIterator<Item = (K, V)>) -> Result<Self>
    where
        K: Into<String>,
        V: AsRef<[u8]>,
    {
        let encoded =
            data.into_iter().map(|(k, v)| (k.into(), STANDARD.encode(v.as_ref()))).collect();
        Self::new(encoded)
    }

    /// Wrap data read from storage without validating; callers validate
    /// before moving it elsewhere.
    pub fn from_stored(data: BTreeMap<String, String>) -> Self {
        Self(data)
    }

    /// Check the well-formedness rules.
    pub fn validate(&self) -> Result<()> {
        if self.0.is_empty() {
            return Err(SecretplaneError::not_valid_field("secret content is empty", "content"));
        }
        for (key, value) in &self.0 {
            if !CONTENT_KEY.is_match(key) {
                return Err(SecretplaneError::not_valid_field(
                    format!("secret content key {:?} is not valid", key),
                    "content",
                ));
            }
            if STANDARD.decode(value).is_err() {
                return Err(SecretplaneError::not_valid_field(
                    format!("secret content for key {:?} is not valid base64", key),
                    "content",
                ));
            }
        }
        Ok(())
    }

    /// Exposes the encoded data. Never log the result.
    pub fn expose(&self) -> &BTreeMap<String, String> {
        &self.0
    }

    /// Decoded bytes for one key.
    pub fn decoded(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.0.get(key) {
            Some(encoded) => STANDARD.decode(encoded).map(Some).map_err(|_| {
                SecretplaneError::not_valid_field(
                    format!("secret content for key {:?} is not valid base64", key),
                    "content",
                )
            }),
            None => Ok(None),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Drop for SecretValue {
    fn drop(&mut self) {
        for value in self.0.values_mut() {
            value.zeroize();
        }
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.0.keys().map(|k| (k, REDACTED))).finish()
    }
}
