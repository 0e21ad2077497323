//! Migration task bookkeeping
//!
//! A task tracks the migration of all revisions owned by one secret owner
//! within a model. Tasks are keyed by `(model, owner)`.

use super::tag::Tag;
use crate::errors::{Result, SecretplaneError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Scheduled,
    Failed,
    Completed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Failed => "failed",
            Self::Completed => "completed",
        }
    }
}

impl FromStr for TaskState {
    type Err = SecretplaneError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "scheduled" => Ok(Self::Scheduled),
            "failed" => Ok(Self::Failed),
            "completed" => Ok(Self::Completed),
            other => Err(SecretplaneError::internal(format!("unknown task state {:?}", other))),
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationTask {
    pub model_uuid: String,
    pub owner: Tag,
    pub state: TaskState,
    /// Number of passes that have failed for this task
    pub attempts: i64,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Event published when a task changes state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskEvent {
    pub model_uuid: String,
    pub owner: Tag,
    pub state: TaskState,
}
