//! Backend token rotation worker
//!
//! Keeps the next trigger time of every backend with a rotation interval,
//! sleeps until the earliest and rotates that backend's token. Failed
//! rotations are retried after a fixed delay.

use super::backend_service::SecretBackendService;
use crate::domain::{BackendId, RotationChange};
use crate::errors::{Result, SecretplaneError};
use crate::runtime::Notifier;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct TokenRotationWorker {
    service: Arc<SecretBackendService>,
    notifier: Notifier,
    retry_delay: Duration,
}

#[derive(Debug, Default)]
struct Schedule {
    due: HashMap<BackendId, (String, DateTime<Utc>)>,
}

impl Schedule {
    fn apply(&mut self, change: RotationChange) {
        match change.next_trigger_time {
            Some(at) => {
                debug!(backend = %change.name, next_trigger_time = %at, "Backend rotation scheduled");
                self.due.insert(change.id, (change.name, at));
            }
            None => {
                debug!(backend = %change.name, "Backend rotation cancelled");
                self.due.remove(&change.id);
            }
        }
    }

    fn earliest(&self) -> Option<(BackendId, DateTime<Utc>)> {
        self.due.iter().min_by_key(|(_, (_, at))| *at).map(|(id, (_, at))| (id.clone(), *at))
    }
}

impl TokenRotationWorker {
    pub fn new(service: Arc<SecretBackendService>, notifier: Notifier, retry_delay: Duration) -> Self {
        Self { service, notifier, retry_delay }
    }

    pub async fn run(self, token: CancellationToken) -> Result<()> {
        let mut changes = self.notifier.backend_rotation.subscribe(());
        let mut schedule = Schedule::default();
        for change in self.service.rotation_schedule().await? {
            schedule.apply(change);
        }
        info!(backends = schedule.due.len(), "Token rotation worker started");

        loop {
            let next = schedule.earliest();
            let wait = next
                .as_ref()
                .map(|(_, at)| (*at - Utc::now()).to_std().unwrap_or(Duration::ZERO));
            let timer = async {
                match wait {
                    Some(wait) => tokio::time::sleep(wait).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = token.cancelled() => {
                    debug!("Token rotation worker stopping");
                    return Ok(());
                }
                change = changes.next() => match change {
                    Some(change) => schedule.apply(change),
                    None => return Err(SecretplaneError::watcher_closed("backend rotation")),
                },
                _ = timer => {
                    if let Some((id, _)) = next {
                        self.rotate(&id, &mut schedule).await;
                    }
                }
            }
        }
    }

    async fn rotate(&self, id: &BackendId, schedule: &mut Schedule) {
        match self.service.rotate_backend_token(id).await {
            Ok(backend) => {
                schedule.apply(RotationChange {
                    id: backend.id,
                    name: backend.name,
                    next_trigger_time: backend.next_rotate_time,
                });
            }
            Err(e) if e.is_not_found() || e.is_not_supported() => {
                warn!(backend_id = %id, error = %e, "Dropping backend from rotation schedule");
                schedule.due.remove(id);
            }
            Err(e) => {
                error!(backend_id = %id, error = %e, retry_in_secs = self.retry_delay.as_secs(), "Backend token rotation failed");
                if let Some(entry) = schedule.due.get_mut(id) {
                    entry.1 = chrono::Duration::from_std(self.retry_delay)
                        .map(|delay| Utc::now() + delay)
                        .unwrap_or_else(|_| Utc::now());
                }
            }
        }
    }
}
