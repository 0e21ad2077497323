//! Secret metadata and revisions
//!
//! A secret is addressed by a [`SecretUri`] and owned by a model,
//! application or unit. Each revision holds its content either inline or as
//! a [`ValueRef`] into a secret backend, never both.

use super::id::BackendId;
use super::tag::{Tag, TagKind};
use super::uri::SecretUri;
use crate::errors::{Result, SecretplaneError};
use crate::secrets::types::SecretValue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How often the owner is asked to rotate a secret
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RotatePolicy {
    #[default]
    Never,
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    Yearly,
}

impl RotatePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Never => "never",
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Quarterly => "quarterly",
            Self::Yearly => "yearly",
        }
    }
}

impl FromStr for RotatePolicy {
    type Err = SecretplaneError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" | "never" => Ok(Self::Never),
            "hourly" => Ok(Self::Hourly),
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            "quarterly" => Ok(Self::Quarterly),
            "yearly" => Ok(Self::Yearly),
            other => Err(SecretplaneError::not_valid(format!(
                "secret rotate policy {:?} not valid",
                other
            ))),
        }
    }
}

impl fmt::Display for RotatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Secret metadata, shared by all revisions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretMetadata {
    pub uri: SecretUri,
    pub model_uuid: String,
    pub owner: Tag,
    pub label: Option<String>,
    pub rotate_policy: RotatePolicy,
    pub auto_prune: bool,
    pub description: Option<String>,
    pub latest_revision: i64,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

impl SecretMetadata {
    /// Owners are models, applications or units.
    pub fn validate_owner(owner: &Tag) -> Result<()> {
        match owner.kind() {
            TagKind::Model | TagKind::Application | TagKind::Unit => owner.validate(),
            TagKind::Relation => Err(SecretplaneError::not_valid_field(
                format!("secret owner {} not valid", owner),
                "owner",
            )),
        }
    }
}

/// Pointer to content held by a secret backend
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValueRef {
    pub backend_id: BackendId,
    pub revision_id: String,
}

impl ValueRef {
    pub fn new(backend_id: BackendId, revision_id: impl Into<String>) -> Self {
        Self { backend_id, revision_id: revision_id.into() }
    }
}

impl fmt::Display for ValueRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.backend_id, self.revision_id)
    }
}

/// Where a revision's content lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevisionContent {
    /// Stored with the revision record
    Inline(SecretValue),
    /// Stored in a secret backend
    External(ValueRef),
}

impl RevisionContent {
    pub fn value_ref(&self) -> Option<&ValueRef> {
        match self {
            Self::External(value_ref) => Some(value_ref),
            Self::Inline(_) => None,
        }
    }

    pub fn is_inline(&self) -> bool {
        matches!(self, Self::Inline(_))
    }
}

/// One immutable version of a secret's content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretRevision {
    pub uri: SecretUri,
    pub revision: i64,
    pub obsolete: bool,
    pub pending_delete: bool,
    pub create_time: DateTime<Utc>,
    pub expire_time: Option<DateTime<Utc>>,
    pub content: RevisionContent,
}

impl SecretRevision {
    /// True when the content is already held by `backend_id`.
    pub fn stored_in(&self, backend_id: &BackendId) -> bool {
        self.content.value_ref().is_some_and(|r| &r.backend_id == backend_id)
    }
}

/// Parameters for creating a secret with its first revision
#[derive(Debug, Clone)]
pub struct CreateSecretParams {
    pub uri: SecretUri,
    pub model_uuid: String,
    pub owner: Tag,
    pub label: Option<String>,
    pub rotate_policy: RotatePolicy,
    pub auto_prune: bool,
    pub description: Option<String>,
    pub content: RevisionContent,
    pub expire_time: Option<DateTime<Utc>>,
}

impl CreateSecretParams {
    pub fn new(
        uri: SecretUri,
        model_uuid: impl Into<String>,
        owner: Tag,
        content: RevisionContent,
    ) -> Self {
        Self {
            uri,
            model_uuid: model_uuid.into(),
            owner,
            label: None,
            rotate_policy: RotatePolicy::Never,
            auto_prune: false,
            description: None,
            content,
            expire_time: None,
        }
    }
}
