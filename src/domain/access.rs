//! Secret access roles and grants

use super::tag::{Tag, TagKind};
use super::uri::SecretUri;
use crate::errors::{Result, SecretplaneError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Access level on a secret, ordered `none < view < rotate < manage`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    None,
    View,
    Rotate,
    Manage,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::View => "view",
            Self::Rotate => "rotate",
            Self::Manage => "manage",
        }
    }

    /// True when this role is at least `other`.
    pub fn allows(&self, other: Role) -> bool {
        *self >= other
    }
}

impl FromStr for Role {
    type Err = SecretplaneError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" | "" => Ok(Self::None),
            "view" => Ok(Self::View),
            "rotate" => Ok(Self::Rotate),
            "manage" => Ok(Self::Manage),
            other => {
                Err(SecretplaneError::not_valid_field(format!("role {:?} not valid", other), "role"))
            }
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted grant: `subject` may act with `role` on `uri` within `scope`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SecretAccessGrant {
    pub uri: SecretUri,
    pub subject: Tag,
    pub scope: Tag,
    pub role: Role,
}

/// Grant/revoke target
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccessParams {
    pub subject: Tag,
    pub scope: Tag,
}

impl AccessParams {
    pub fn new(subject: Tag, scope: Tag) -> Self {
        Self { subject, scope }
    }

    /// Subjects are units, applications or models; scopes are relations,
    /// applications or models.
    pub fn validate(&self) -> Result<()> {
        match self.subject.kind() {
            TagKind::Unit | TagKind::Application | TagKind::Model => self.subject.validate()?,
            TagKind::Relation => {
                return Err(SecretplaneError::not_valid_field(
                    format!("access subject {} not valid", self.subject),
                    "subject",
                ))
            }
        }
        match self.scope.kind() {
            TagKind::Relation | TagKind::Application | TagKind::Model => self.scope.validate(),
            TagKind::Unit => Err(SecretplaneError::not_valid_field(
                format!("access scope {} not valid", self.scope),
                "scope",
            )),
        }
    }
}
