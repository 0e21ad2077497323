//! Structured concurrency for long-running loops
//!
//! Every child loop receives a child of the supervisor's
//! [`CancellationToken`]. The first child to fail cancels all others, and
//! its error becomes the supervisor's result. Children returning `Ok`
//! simply finish.

use crate::errors::{Result, SecretplaneError};
use std::future::Future;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub struct Supervisor {
    name: &'static str,
    token: CancellationToken,
    children: JoinSet<(String, Result<()>)>,
}

impl Supervisor {
    pub fn new(name: &'static str) -> Self {
        Self { name, token: CancellationToken::new(), children: JoinSet::new() }
    }

    /// Supervise under an existing parent token.
    pub fn with_parent(name: &'static str, parent: &CancellationToken) -> Self {
        Self { name, token: parent.child_token(), children: JoinSet::new() }
    }

    /// Token cancelled when the supervisor stops.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Start a child loop. The closure receives the child's cancellation token.
    pub fn spawn<F, Fut>(&mut self, child_name: impl Into<String>, start: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let child_name = child_name.into();
        let fut = start(self.token.child_token());
        info!(supervisor = self.name, child = %child_name, "Starting supervised loop");
        self.children.spawn(async move { (child_name, fut.await) });
    }

    /// Ask every child to stop.
    pub fn kill(&self) {
        self.token.cancel();
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Wait for all children. Returns the first child error, after
    /// cancelling and joining the rest.
    pub async fn wait(mut self) -> Result<()> {
        let mut first_error: Option<SecretplaneError> = None;

        while let Some(joined) = self.children.join_next().await {
            let (child, result) = match joined {
                Ok(outcome) => outcome,
                Err(join_error) => (
                    "unknown".to_string(),
                    Err(SecretplaneError::internal(format!("supervised task failed: {}", join_error))),
                ),
            };

            match result {
                Ok(()) => info!(supervisor = self.name, child = %child, "Supervised loop stopped"),
                Err(e) if first_error.is_none() => {
                    error!(supervisor = self.name, child = %child, error = %e, "Supervised loop failed, stopping siblings");
                    self.token.cancel();
                    first_error = Some(e);
                }
                Err(e) => {
                    warn!(supervisor = self.name, child = %child, error = %e, "Supervised loop failed after shutdown began");
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
