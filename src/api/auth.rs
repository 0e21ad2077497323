//! Caller identity for facade calls
//!
//! The transport authenticates the caller and hands the facades an
//! [`AuthContext`]: the authenticated entity, whether it currently leads
//! its application, and the scopes it holds.

use crate::domain::Tag;
use crate::errors::{Result, SecretplaneError};
use std::collections::HashSet;

/// Controller administrators manage secret backends
pub const CONTROLLER_ADMIN_SCOPE: &str = "controller:admin";

/// Controller agents drive migration and token rotation
pub const CONTROLLER_AGENT_SCOPE: &str = "controller:agent";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub principal: String,
    pub entity: Option<Tag>,
    pub is_leader: bool,
    scopes: HashSet<String>,
}

impl AuthContext {
    pub fn new(principal: impl Into<String>, scopes: Vec<String>) -> Self {
        Self {
            principal: principal.into(),
            entity: None,
            is_leader: false,
            scopes: scopes.into_iter().collect(),
        }
    }

    pub fn controller_admin(principal: impl Into<String>) -> Self {
        Self::new(principal, vec![CONTROLLER_ADMIN_SCOPE.to_string()])
    }

    pub fn controller_agent(principal: impl Into<String>) -> Self {
        Self::new(principal, vec![CONTROLLER_AGENT_SCOPE.to_string()])
    }

    /// A unit, application or model agent acting as itself
    pub fn entity(tag: Tag) -> Self {
        Self { principal: tag.to_string(), entity: Some(tag), is_leader: false, scopes: HashSet::new() }
    }

    pub fn with_leadership(mut self, is_leader: bool) -> Self {
        self.is_leader = is_leader;
        self
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.contains(scope)
    }

    pub fn is_controller_admin(&self) -> bool {
        self.has_scope(CONTROLLER_ADMIN_SCOPE)
    }

    pub fn is_controller_agent(&self) -> bool {
        self.has_scope(CONTROLLER_AGENT_SCOPE)
    }
}

pub fn require_controller_admin(context: &AuthContext) -> Result<()> {
    if context.is_controller_admin() {
        Ok(())
    } else {
        Err(SecretplaneError::permission_denied(format!(
            "{} is not a controller administrator",
            context.principal
        )))
    }
}

pub fn require_controller_agent(context: &AuthContext) -> Result<()> {
    if context.is_controller_agent() {
        Ok(())
    } else {
        Err(SecretplaneError::permission_denied(format!(
            "{} is not a controller agent",
            context.principal
        )))
    }
}
