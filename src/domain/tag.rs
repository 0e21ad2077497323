//! Entity tags
//!
//! Secret owners, grant subjects and grant scopes are all addressed by tags
//! with canonical string forms:
//!
//! - `model-<uuid>`
//! - `application-<name>`
//! - `unit-<application>-<number>` (unit name `<application>/<number>`)
//! - `relation-<app>.<endpoint>#<app>.<endpoint>` (key `app:endpoint app:endpoint`)

use crate::errors::{Result, SecretplaneError};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

static APPLICATION_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z][a-z0-9]*(-[a-z0-9]*[a-z][a-z0-9]*)*$").expect("valid application regex")
});

static ENDPOINT_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9]*(-[a-z0-9]+)*$").expect("valid endpoint regex"));

/// Kind of entity a tag refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagKind {
    Model,
    Application,
    Unit,
    Relation,
}

impl TagKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Model => "model",
            Self::Application => "application",
            Self::Unit => "unit",
            Self::Relation => "relation",
        }
    }
}

impl fmt::Display for TagKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed reference to a model, application, unit or relation
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Tag {
    /// Model UUID
    Model(String),
    /// Application name
    Application(String),
    /// Unit name, e.g. `wordpress/0`
    Unit(String),
    /// Relation key, e.g. `wordpress:db mysql:server`
    Relation(String),
}

impl Tag {
    pub fn model(uuid: impl Into<String>) -> Self {
        Self::Model(uuid.into())
    }

    pub fn application(name: impl Into<String>) -> Self {
        Self::Application(name.into())
    }

    pub fn unit(name: impl Into<String>) -> Self {
        Self::Unit(name.into())
    }

    pub fn relation(key: impl Into<String>) -> Self {
        Self::Relation(key.into())
    }

    pub fn kind(&self) -> TagKind {
        match self {
            Self::Model(_) => TagKind::Model,
            Self::Application(_) => TagKind::Application,
            Self::Unit(_) => TagKind::Unit,
            Self::Relation(_) => TagKind::Relation,
        }
    }

    /// The entity id: uuid, application name, unit name or relation key
    pub fn id(&self) -> &str {
        match self {
            Self::Model(id) | Self::Application(id) | Self::Unit(id) | Self::Relation(id) => id,
        }
    }

    /// The application a unit or application tag belongs to
    pub fn application_name(&self) -> Option<&str> {
        match self {
            Self::Application(name) => Some(name),
            Self::Unit(name) => name.split_once('/').map(|(app, _)| app),
            _ => None,
        }
    }

    /// Applications participating in a relation, in key order
    pub fn relation_applications(&self) -> Vec<&str> {
        match self {
            Self::Relation(key) => key
                .split_whitespace()
                .filter_map(|endpoint| endpoint.split_once(':').map(|(app, _)| app))
                .collect(),
            _ => vec![],
        }
    }

    /// Validate the id for the tag's kind
    pub fn validate(&self) -> Result<()> {
        let valid = match self {
            Self::Model(uuid) => uuid::Uuid::parse_str(uuid).is_ok(),
            Self::Application(name) => APPLICATION_NAME.is_match(name),
            Self::Unit(name) => valid_unit_name(name),
            Self::Relation(key) => valid_relation_key(key),
        };
        if valid {
            Ok(())
        } else {
            Err(SecretplaneError::not_valid(format!(
                "{:?} is not a valid {} tag",
                self.to_string(),
                self.kind()
            )))
        }
    }
}

fn valid_unit_name(name: &str) -> bool {
    match name.split_once('/') {
        Some((app, number)) => {
            APPLICATION_NAME.is_match(app)
                && !number.is_empty()
                && number.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}

fn valid_relation_key(key: &str) -> bool {
    let endpoints: Vec<&str> = key.split_whitespace().collect();
    if endpoints.is_empty() || endpoints.len() > 2 {
        return false;
    }
    endpoints.iter().all(|endpoint| match endpoint.split_once(':') {
        Some((app, name)) => APPLICATION_NAME.is_match(app) && ENDPOINT_NAME.is_match(name),
        None => false,
    })
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Model(uuid) => write!(f, "model-{}", uuid),
            Self::Application(name) => write!(f, "application-{}", name),
            Self::Unit(name) => write!(f, "unit-{}", name.replace('/', "-")),
            Self::Relation(key) => {
                let encoded: Vec<String> =
                    key.split_whitespace().map(|endpoint| endpoint.replace(':', ".")).collect();
                write!(f, "relation-{}", encoded.join("#"))
            }
        }
    }
}

impl FromStr for Tag {
    type Err = SecretplaneError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || SecretplaneError::not_valid(format!("{:?} is not a valid tag", s));

        let (kind, rest) = s.split_once('-').ok_or_else(invalid)?;
        let tag = match kind {
            "model" => Self::Model(rest.to_string()),
            "application" => Self::Application(rest.to_string()),
            "unit" => {
                let (app, number) = rest.rsplit_once('-').ok_or_else(invalid)?;
                Self::Unit(format!("{}/{}", app, number))
            }
            "relation" => {
                let endpoints: Vec<String> = rest
                    .split('#')
                    .map(|endpoint| {
                        endpoint
                            .split_once('.')
                            .map(|(app, name)| format!("{}:{}", app, name))
                            .ok_or_else(invalid)
                    })
                    .collect::<Result<_>>()?;
                Self::Relation(endpoints.join(" "))
            }
            _ => return Err(invalid()),
        };
        tag.validate().map_err(|_| invalid())?;
        Ok(tag)
    }
}

impl TryFrom<String> for Tag {
    type Error = SecretplaneError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Tag> for String {
    fn from(tag: Tag) -> Self {
        tag.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_unit_tag_round_trip() {
        let tag: Tag = "unit-wordpress-0".parse().unwrap();
        assert_eq!(tag, Tag::unit("wordpress/0"));
        assert_eq!(tag.application_name(), Some("wordpress"));
        assert_eq!(tag.to_string(), "unit-wordpress-0");
    }

    #[test]
    fn test_hyphenated_application_unit() {
        let tag: Tag = "unit-mysql-router-12".parse().unwrap();
        assert_eq!(tag.id(), "mysql-router/12");
        assert_eq!(tag.application_name(), Some("mysql-router"));
    }

    #[test]
    fn test_relation_tag() {
        let tag = Tag::relation("wordpress:db mysql:server");
        assert_eq!(tag.to_string(), "relation-wordpress.db#mysql.server");
        assert_eq!(tag.relation_applications(), vec!["wordpress", "mysql"]);

        let parsed: Tag = "relation-wordpress.db#mysql.server".parse().unwrap();
        assert_eq!(parsed, tag);
    }

    #[test]
    fn test_peer_relation_tag() {
        let parsed: Tag = "relation-wordpress.cluster".parse().unwrap();
        assert_eq!(parsed, Tag::relation("wordpress:cluster"));
    }

    #[test]
    fn test_model_tag_requires_uuid() {
        assert!("model-not-a-uuid".parse::<Tag>().is_err());
        let uuid = uuid::Uuid::new_v4().to_string();
        let tag: Tag = format!("model-{}", uuid).parse().unwrap();
        assert_eq!(tag.kind(), TagKind::Model);
        assert_eq!(tag.id(), uuid);
    }

    #[test]
    fn test_invalid_tags() {
        for bad in ["", "unit-", "unit-wordpress", "bogus-foo", "application-Word", "relation-x"] {
            assert!(bad.parse::<Tag>().is_err(), "{:?} should not parse", bad);
        }
    }

    #[test]
    fn test_serde_as_string() {
        let tag = Tag::unit("wordpress/0");
        let json = serde_json::to_string(&tag).unwrap();
        assert_eq!(json, "\"unit-wordpress-0\"");
        let back: Tag = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tag);
    }

    proptest! {
        #[test]
        fn unit_tags_parse_back(app in "[a-z][a-z0-9]{0,8}(-[a-z][a-z0-9]{0,4}){0,2}", n in 0u32..10_000) {
            let tag = Tag::unit(format!("{}/{}", app, n));
            let parsed: Tag = tag.to_string().parse().unwrap();
            prop_assert_eq!(parsed, tag);
        }
    }
}
