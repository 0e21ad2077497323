//! Secret URIs
//!
//! A secret is addressed as `secret:<id>` where `<id>` is 20 lowercase
//! base32hex characters. Secrets consumed across models carry their source
//! model: `secret://<model-uuid>/<id>`.

use crate::errors::{Result, SecretplaneError};
use once_cell::sync::Lazy;
use rand::RngCore;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const SCHEME: &str = "secret";
const ID_LEN: usize = 20;
const BASE32HEX: &[u8; 32] = b"0123456789abcdefghijklmnopqrstuv";

static SECRET_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9a-v]{20}$").expect("valid secret id regex"));

/// Globally unique, immutable secret address
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SecretUri {
    id: String,
    source_model: Option<String>,
}

impl SecretUri {
    /// Generate a new URI with a random id
    pub fn generate() -> Self {
        let mut bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { id: encode_base32hex(&bytes), source_model: None }
    }

    /// Build a URI from an existing id
    pub fn from_id(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if !SECRET_ID.is_match(&id) {
            return Err(SecretplaneError::not_valid_field(
                format!("secret id {:?} is not valid", id),
                "uri",
            ));
        }
        Ok(Self { id, source_model: None })
    }

    /// Attach the model the secret originates from
    pub fn with_source_model(mut self, model_uuid: impl Into<String>) -> Self {
        self.source_model = Some(model_uuid.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source_model(&self) -> Option<&str> {
        self.source_model.as_deref()
    }

    /// Short form without the source model, used as the storage key
    pub fn short(&self) -> String {
        format!("{}:{}", SCHEME, self.id)
    }
}

/// Lowercase RFC 4648 base32hex without padding.
fn encode_base32hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(ID_LEN);
    let mut buffer: u32 = 0;
    let mut bits = 0;
    for &byte in bytes {
        buffer = (buffer << 8) | u32::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(BASE32HEX[((buffer >> bits) & 0x1f) as usize] as char);
        }
    }
    if bits > 0 {
        out.push(BASE32HEX[((buffer << (5 - bits)) & 0x1f) as usize] as char);
    }
    out
}

impl fmt::Display for SecretUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source_model {
            Some(model) => write!(f, "{}://{}/{}", SCHEME, model, self.id),
            None => write!(f, "{}:{}", SCHEME, self.id),
        }
    }
}

impl FromStr for SecretUri {
    type Err = SecretplaneError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid =
            || SecretplaneError::not_valid_field(format!("secret URI {:?} is not valid", s), "uri");

        let rest = s.strip_prefix("secret:").ok_or_else(invalid)?;
        if let Some(qualified) = rest.strip_prefix("//") {
            let (model, id) = qualified.split_once('/').ok_or_else(invalid)?;
            if uuid::Uuid::parse_str(model).is_err() {
                return Err(invalid());
            }
            return Self::from_id(id).map(|uri| uri.with_source_model(model)).map_err(|_| invalid());
        }
        Self::from_id(rest).map_err(|_| invalid())
    }
}

impl TryFrom<String> for SecretUri {
    type Error = SecretplaneError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<SecretUri> for String {
    fn from(uri: SecretUri) -> Self {
        uri.to_string()
    }
}
