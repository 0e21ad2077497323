//! Integration tests for secret content migration between backends

mod common;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::fixtures::{content, TestController, MODEL_UUID};
use secretplane::domain::{
    BackendId, CreateSecretParams, RevisionContent, SecretMetadata, SecretRevision, SecretUri,
    Tag, TaskState, ValueRef,
};
use secretplane::errors::{Result, SecretplaneError};
use secretplane::migration::{
    FixedLeadership, LeadershipTracker, MigrationCoordinator, MigrationWorker,
};
use secretplane::runtime::Supervisor;
use secretplane::secrets::TokenRotationWorker;
use secretplane::storage::{BackendReference, SecretRepository};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(15);

fn worker(t: &TestController, owner: Tag, leader: bool) -> MigrationWorker {
    worker_with(t, owner, t.controller.store.secrets.clone(), Arc::new(FixedLeadership(leader)))
}

fn worker_with(
    t: &TestController,
    owner: Tag,
    secrets: Arc<dyn SecretRepository>,
    leadership: Arc<dyn LeadershipTracker>,
) -> MigrationWorker {
    MigrationWorker::new(
        MODEL_UUID,
        owner,
        secrets,
        t.controller.store.tasks.clone(),
        t.controller.router.clone(),
        leadership,
        t.controller.notifier.clone(),
    )
    .unwrap()
}

/// Leadership that tests can hand over while the worker runs
#[derive(Default)]
struct SwitchableLeadership {
    leader: AtomicBool,
    changed: Notify,
}

impl SwitchableLeadership {
    fn set(&self, leader: bool) {
        self.leader.store(leader, Ordering::SeqCst);
        self.changed.notify_one();
    }
}

#[async_trait]
impl LeadershipTracker for SwitchableLeadership {
    async fn is_leader(&self, _unit: &Tag) -> Result<bool> {
        Ok(self.leader.load(Ordering::SeqCst))
    }

    async fn changed(&self) {
        self.changed.notified().await
    }
}

/// Secret store where another writer switches the revision to the same
/// location just before this writer's compare-and-swap.
struct ConcurrentlySwitched(Arc<dyn SecretRepository>);

#[async_trait]
impl SecretRepository for ConcurrentlySwitched {
    async fn create_secret(&self, params: CreateSecretParams) -> Result<SecretMetadata> {
        self.0.create_secret(params).await
    }

    async fn add_revision(
        &self,
        uri: &SecretUri,
        content: RevisionContent,
        expire_time: Option<DateTime<Utc>>,
    ) -> Result<SecretRevision> {
        self.0.add_revision(uri, content, expire_time).await
    }

    async fn get_secret(&self, uri: &SecretUri) -> Result<Option<SecretMetadata>> {
        self.0.get_secret(uri).await
    }

    async fn get_revision(&self, uri: &SecretUri, revision: i64) -> Result<Option<SecretRevision>> {
        self.0.get_revision(uri, revision).await
    }

    async fn list_revisions(&self, uri: &SecretUri) -> Result<Vec<SecretRevision>> {
        self.0.list_revisions(uri).await
    }

    async fn list_owned(&self, model_uuid: &str, owner: &Tag) -> Result<Vec<SecretMetadata>> {
        self.0.list_owned(model_uuid, owner).await
    }

    async fn owners_needing_migration(
        &self,
        model_uuid: &str,
        active_backend: &BackendId,
    ) -> Result<Vec<Tag>> {
        self.0.owners_needing_migration(model_uuid, active_backend).await
    }

    async fn change_revision_backend(
        &self,
        uri: &SecretUri,
        revision: i64,
        from: &ValueRef,
        to: &ValueRef,
    ) -> Result<()> {
        self.0.change_revision_backend(uri, revision, from, to).await?;
        Err(SecretplaneError::conflict(
            format!("content of {} revision {} changed during migration", uri, revision),
            "secret revision",
        ))
    }

    async fn list_backend_references(&self, backend_id: &BackendId) -> Result<Vec<BackendReference>> {
        self.0.list_backend_references(backend_id).await
    }
}

async fn wait_for_subscriber<F>(subscribed: F)
where
    F: Fn() -> bool,
{
    tokio::time::timeout(WAIT, async {
        while !subscribed() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("loop subscribed");
}

fn coordinator(t: &TestController) -> MigrationCoordinator {
    MigrationCoordinator::new(
        MODEL_UUID,
        t.controller.scheduler.clone(),
        t.controller.store.tasks.clone(),
        t.controller.notifier.clone(),
        &t.controller.config.migration,
    )
}

#[tokio::test]
async fn test_internal_to_vault_migrates_unit_owned_revision() {
    let t = TestController::new("migration_scenario").await;
    let uri = SecretUri::from_id("9m4e2mr0ui3e8a215n4g").unwrap();
    let owner = Tag::unit("wordpress/0");
    t.create_secret(&uri, owner.clone(), 3).await;
    let internal = t.controller.service.get_secret_backend_by_name("internal").await.unwrap();
    assert_eq!(t.value_ref(&uri, 3).await.backend_id, internal.id);

    let vault1 = t.add_vault("vault1").await;
    let mut completed = t.controller.notifier.tasks_completed.subscribe(MODEL_UUID.to_string());

    let mut supervisor = Supervisor::new("test");
    let c = coordinator(&t);
    supervisor.spawn("coordinator", |token| c.run(token));
    let w = worker(&t, owner.clone(), false);
    supervisor.spawn("worker", |token| w.run(token));

    t.set_model_backend("vault1").await;

    let event = tokio::time::timeout(WAIT, completed.next())
        .await
        .expect("migration should complete")
        .expect("stream open");
    assert_eq!(event.owner, owner);
    assert_eq!(event.state, TaskState::Completed);

    let migrated = t.value_ref(&uri, 3).await;
    assert_eq!(migrated.backend_id, vault1.id);
    assert_eq!(migrated.revision_id, "9m4e2mr0ui3e8a215n4g-3");
    let read = t.controller.router.get_content(MODEL_UUID, &migrated).await.unwrap();
    assert_eq!(read, content(3));
    for revision in 1..=3 {
        assert_eq!(t.value_ref(&uri, revision).await.backend_id, vault1.id);
    }

    supervisor.kill();
    tokio::time::timeout(WAIT, supervisor.wait()).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_migration_of_revision_already_in_active_backend_is_noop() {
    let t = TestController::new("migration_idempotent").await;
    let vault1 = t.add_vault("vault1").await;
    t.set_model_backend("vault1").await;
    let uri = SecretUri::generate();
    t.create_secret(&uri, Tag::unit("wordpress/0"), 2).await;
    let before = t.value_ref(&uri, 2).await;
    let saves = t.vault.saves();

    let moved = worker(&t, Tag::unit("wordpress/0"), false)
        .migrate_owned(&Tag::unit("wordpress/0"))
        .await
        .unwrap();

    assert_eq!(moved, 0);
    assert_eq!(t.vault.saves(), saves);
    assert_eq!(t.vault.deletes(), 0);
    assert_eq!(t.value_ref(&uri, 2).await, before);
    assert_eq!(before.backend_id, vault1.id);
}

#[tokio::test]
async fn test_second_pass_after_migration_is_noop() {
    let t = TestController::new("migration_second_pass").await;
    let uri = SecretUri::generate();
    let owner = Tag::unit("wordpress/0");
    t.create_secret(&uri, owner.clone(), 2).await;
    t.add_vault("vault1").await;
    t.set_model_backend("vault1").await;

    let w = worker(&t, owner.clone(), false);
    assert_eq!(w.migrate_owned(&owner).await.unwrap(), 2);
    let after_first = (t.value_ref(&uri, 1).await, t.value_ref(&uri, 2).await);
    let saves = t.vault.saves();

    assert_eq!(w.migrate_owned(&owner).await.unwrap(), 0);
    assert_eq!(t.vault.saves(), saves);
    assert_eq!((t.value_ref(&uri, 1).await, t.value_ref(&uri, 2).await), after_first);
}

#[tokio::test]
async fn test_failed_write_leaves_reference_on_source() {
    let t = TestController::new("migration_safety").await;
    let uri = SecretUri::generate();
    let owner = Tag::unit("wordpress/0");
    t.create_secret(&uri, owner.clone(), 1).await;
    let source = t.value_ref(&uri, 1).await;

    t.add_vault("vault1").await;
    t.set_model_backend("vault1").await;
    t.vault.set_fail_save(true);

    let err = worker(&t, owner.clone(), false).migrate_owned(&owner).await.unwrap_err();
    assert!(err.to_string().contains("injected save failure"), "{}", err);

    assert_eq!(t.value_ref(&uri, 1).await, source);
    let read = t.controller.router.get_content(MODEL_UUID, &source).await.unwrap();
    assert_eq!(read, content(1));
    assert!(t.vault.content.is_empty());
}

#[tokio::test]
async fn test_migration_back_to_internal_removes_old_copies() {
    let t = TestController::new("migration_back").await;
    t.add_vault("vault1").await;
    t.set_model_backend("vault1").await;
    let uri = SecretUri::generate();
    let owner = Tag::unit("wordpress/0");
    t.create_secret(&uri, owner.clone(), 2).await;
    assert_eq!(t.vault.content.len(), 2);

    t.set_model_backend("internal").await;
    assert_eq!(worker(&t, owner.clone(), false).migrate_owned(&owner).await.unwrap(), 2);

    let internal = t.controller.service.get_secret_backend_by_name("internal").await.unwrap();
    let moved = t.value_ref(&uri, 2).await;
    assert_eq!(moved.backend_id, internal.id);
    assert_eq!(t.controller.router.get_content(MODEL_UUID, &moved).await.unwrap(), content(2));
    assert!(t.vault.content.is_empty());
}

#[tokio::test]
async fn test_application_secrets_follow_leadership() {
    let t = TestController::new("migration_leadership").await;
    let uri = SecretUri::generate();
    let app = Tag::application("wordpress");
    t.create_secret(&uri, app.clone(), 1).await;
    let vault1 = t.add_vault("vault1").await;
    let mut completed = t.controller.notifier.tasks_completed.subscribe(MODEL_UUID.to_string());

    let mut supervisor = Supervisor::new("test");
    let c = coordinator(&t);
    supervisor.spawn("coordinator", |token| c.run(token));
    let follower = worker(&t, Tag::unit("wordpress/1"), false);
    supervisor.spawn("follower", |token| follower.run(token));
    let leader = worker(&t, Tag::unit("wordpress/0"), true);
    supervisor.spawn("leader", |token| leader.run(token));

    t.set_model_backend("vault1").await;

    tokio::time::timeout(WAIT, async {
        while let Some(event) = completed.next().await {
            if event.owner == app && event.state == TaskState::Completed {
                return;
            }
        }
    })
    .await
    .expect("application task completed");
    assert_eq!(t.value_ref(&uri, 1).await.backend_id, vault1.id);

    supervisor.kill();
    tokio::time::timeout(WAIT, supervisor.wait()).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_failed_task_is_retried_after_backoff() {
    let t = TestController::new("migration_retry").await;
    let uri = SecretUri::generate();
    let owner = Tag::unit("wordpress/0");
    t.create_secret(&uri, owner.clone(), 1).await;
    let vault1 = t.add_vault("vault1").await;
    t.vault.set_fail_save(true);

    let mut failed = t.controller.notifier.tasks_failed.subscribe(MODEL_UUID.to_string());
    let mut completed = t.controller.notifier.tasks_completed.subscribe(MODEL_UUID.to_string());

    let mut supervisor = Supervisor::new("test");
    let c = coordinator(&t);
    supervisor.spawn("coordinator", |token| c.run(token));
    let w = worker(&t, owner.clone(), false);
    supervisor.spawn("worker", |token| w.run(token));

    t.set_model_backend("vault1").await;

    let event = tokio::time::timeout(WAIT, failed.next()).await.unwrap().unwrap();
    assert_eq!(event.state, TaskState::Failed);
    let task = t.controller.store.tasks.get(MODEL_UUID, &owner).await.unwrap().unwrap();
    assert!(task.last_error.unwrap_or_default().contains("injected save failure"));

    t.vault.set_fail_save(false);
    let event = tokio::time::timeout(WAIT, completed.next()).await.unwrap().unwrap();
    assert_eq!(event.owner, owner);
    assert_eq!(t.value_ref(&uri, 1).await.backend_id, vault1.id);

    supervisor.kill();
    tokio::time::timeout(WAIT, supervisor.wait()).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_model_owned_secrets_migrated_by_controller_loops() {
    let t = TestController::new("migration_model_owner").await;
    let uri = SecretUri::generate();
    let model_tag = Tag::model(MODEL_UUID);
    t.create_secret(&uri, model_tag.clone(), 1).await;
    let vault1 = t.add_vault("vault1").await;
    let mut completed = t.controller.notifier.tasks_completed.subscribe(MODEL_UUID.to_string());

    let shutdown = tokio_util::sync::CancellationToken::new();
    let supervisor = t.controller.spawn_loops(&shutdown).unwrap();
    assert_eq!(supervisor.len(), 3);

    t.set_model_backend("vault1").await;

    let event = tokio::time::timeout(WAIT, completed.next()).await.unwrap().unwrap();
    assert_eq!(event.owner, model_tag);
    assert_eq!(t.value_ref(&uri, 1).await.backend_id, vault1.id);

    shutdown.cancel();
    tokio::time::timeout(WAIT, supervisor.wait()).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_worker_rejects_application_owner() {
    let t = TestController::new("migration_worker_owner").await;
    let result = MigrationWorker::new(
        MODEL_UUID,
        Tag::application("wordpress"),
        t.controller.store.secrets.clone(),
        t.controller.store.tasks.clone(),
        t.controller.router.clone(),
        Arc::new(FixedLeadership(true)),
        t.controller.notifier.clone(),
    );
    assert!(result.err().map(|e| e.is_not_valid()).unwrap_or(false));
}

#[tokio::test]
async fn test_unknown_model_backend_is_skipped_by_coordinator() {
    let t = TestController::new("migration_unknown_backend").await;
    t.create_secret(&SecretUri::generate(), Tag::unit("wordpress/0"), 1).await;

    let mut supervisor = Supervisor::new("test");
    let c = coordinator(&t);
    supervisor.spawn("coordinator", |token| c.run(token));

    t.set_model_backend("vault-missing").await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(t.controller.store.tasks.list(MODEL_UUID, None).await.unwrap().is_empty());
    supervisor.kill();
    tokio::time::timeout(WAIT, supervisor.wait()).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_unit_gaining_leadership_migrates_application_secrets() {
    let t = TestController::new("migration_leadership_gained").await;
    let uri = SecretUri::generate();
    let app = Tag::application("wordpress");
    t.create_secret(&uri, app.clone(), 1).await;
    let internal = t.value_ref(&uri, 1).await.backend_id;
    let vault1 = t.add_vault("vault1").await;
    let mut completed = t.controller.notifier.tasks_completed.subscribe(MODEL_UUID.to_string());

    let leadership = Arc::new(SwitchableLeadership::default());
    let mut supervisor = Supervisor::new("test");
    let c = coordinator(&t);
    supervisor.spawn("coordinator", |token| c.run(token));
    let w = worker_with(
        &t,
        Tag::unit("wordpress/0"),
        t.controller.store.secrets.clone(),
        leadership.clone(),
    );
    supervisor.spawn("worker", |token| w.run(token));

    t.set_model_backend("vault1").await;

    tokio::time::timeout(WAIT, async {
        loop {
            let task = t.controller.store.tasks.get(MODEL_UUID, &app).await.unwrap();
            if task.map(|task| task.state == TaskState::Scheduled).unwrap_or(false) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("application task scheduled");

    // Not the leader yet: the application's content stays put
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(t.value_ref(&uri, 1).await.backend_id, internal);

    leadership.set(true);

    tokio::time::timeout(WAIT, async {
        while let Some(event) = completed.next().await {
            if event.owner == app && event.state == TaskState::Completed {
                return;
            }
        }
    })
    .await
    .expect("application task completed");
    assert_eq!(t.value_ref(&uri, 1).await.backend_id, vault1.id);

    supervisor.kill();
    tokio::time::timeout(WAIT, supervisor.wait()).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_concurrent_switch_to_same_location_keeps_content() {
    let t = TestController::new("migration_concurrent_switch").await;
    let uri = SecretUri::generate();
    let owner = Tag::unit("wordpress/0");
    t.create_secret(&uri, owner.clone(), 1).await;
    let vault1 = t.add_vault("vault1").await;
    t.set_model_backend("vault1").await;

    let secrets = Arc::new(ConcurrentlySwitched(t.controller.store.secrets.clone()));
    let w = worker_with(&t, owner.clone(), secrets, Arc::new(FixedLeadership(false)));
    assert_eq!(w.migrate_owned(&owner).await.unwrap(), 1);

    let moved = t.value_ref(&uri, 1).await;
    assert_eq!(moved.backend_id, vault1.id);
    assert_eq!(t.vault.deletes(), 0);
    assert_eq!(t.controller.router.get_content(MODEL_UUID, &moved).await.unwrap(), content(1));
}

#[tokio::test]
async fn test_loops_stop_with_watcher_closed_when_streams_close() {
    let t = TestController::new("migration_streams_closed").await;
    let notifier = t.controller.notifier.clone();
    let owner = Tag::unit("wordpress/0");

    let c = coordinator(&t);
    let coordinator_run = tokio::spawn(c.run(CancellationToken::new()));
    let w = worker(&t, owner.clone(), false);
    let worker_run = tokio::spawn(w.run(CancellationToken::new()));
    let rotation = TokenRotationWorker::new(
        t.controller.service.clone(),
        notifier.clone(),
        t.controller.config.rotation.retry_delay(),
    );
    let rotation_run = tokio::spawn(rotation.run(CancellationToken::new()));

    let model = MODEL_UUID.to_string();
    let key = (model.clone(), owner);
    wait_for_subscriber(|| {
        notifier.tasks_failed.subscriber_count(&model) > 0
            && notifier.tasks_scheduled.subscriber_count(&key) > 0
            && notifier.backend_rotation.subscriber_count(&()) > 0
    })
    .await;

    notifier.close_all();

    for handle in [coordinator_run, worker_run, rotation_run] {
        let result = tokio::time::timeout(WAIT, handle).await.unwrap().unwrap();
        assert!(matches!(result, Err(SecretplaneError::WatcherClosed { .. })), "{:?}", result);
    }
}

#[tokio::test]
async fn test_failure_burst_reschedules_once() {
    let t = TestController::new("migration_failure_burst").await;
    let notifier = t.controller.notifier.clone();
    let tasks = t.controller.store.tasks.clone();
    let owners = [Tag::unit("wordpress/0"), Tag::unit("mediawiki/0")];
    tasks.schedule(MODEL_UUID, &owners).await.unwrap();
    let mut scheduled: Vec<_> = owners
        .iter()
        .map(|owner| notifier.tasks_scheduled.subscribe((MODEL_UUID.to_string(), owner.clone())))
        .collect();

    let mut supervisor = Supervisor::new("test");
    let c = coordinator(&t);
    supervisor.spawn("coordinator", |token| c.run(token));
    let model = MODEL_UUID.to_string();
    wait_for_subscriber(|| notifier.tasks_failed.subscriber_count(&model) > 0).await;

    tasks.fail(MODEL_UUID, &owners[0], "backend down").await.unwrap();
    tasks.fail(MODEL_UUID, &owners[1], "backend down").await.unwrap();
    tasks.fail(MODEL_UUID, &owners[0], "backend still down").await.unwrap();

    // Backoff is one second; wait well past a second retry window
    tokio::time::sleep(Duration::from_millis(2500)).await;

    for watcher in scheduled.iter_mut() {
        assert_eq!(watcher.drain_pending().len(), 1);
    }
    let listed = tasks.list(MODEL_UUID, Some(TaskState::Scheduled)).await.unwrap();
    assert_eq!(listed.len(), 2);

    supervisor.kill();
    tokio::time::timeout(WAIT, supervisor.wait()).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_task_at_max_attempts_stays_failed() {
    let t = TestController::new("migration_max_attempts").await;
    let notifier = t.controller.notifier.clone();
    let tasks = t.controller.store.tasks.clone();
    let exhausted = Tag::unit("wordpress/0");
    let retried = Tag::unit("mediawiki/0");
    tasks.schedule(MODEL_UUID, &[exhausted.clone(), retried.clone()]).await.unwrap();
    let mut exhausted_scheduled =
        notifier.tasks_scheduled.subscribe((MODEL_UUID.to_string(), exhausted.clone()));

    let mut supervisor = Supervisor::new("test");
    let c = coordinator(&t);
    supervisor.spawn("coordinator", |token| c.run(token));
    let model = MODEL_UUID.to_string();
    wait_for_subscriber(|| notifier.tasks_failed.subscriber_count(&model) > 0).await;

    let max_attempts = t.controller.config.migration.max_attempts;
    for attempt in 0..max_attempts {
        tasks.fail(MODEL_UUID, &exhausted, &format!("attempt {}", attempt)).await.unwrap();
    }
    tasks.fail(MODEL_UUID, &retried, "once").await.unwrap();

    tokio::time::sleep(Duration::from_millis(2500)).await;

    let task = tasks.get(MODEL_UUID, &exhausted).await.unwrap().unwrap();
    assert_eq!(task.state, TaskState::Failed);
    assert_eq!(task.attempts, i64::from(max_attempts));
    assert!(exhausted_scheduled.drain_pending().is_empty());

    let task = tasks.get(MODEL_UUID, &retried).await.unwrap().unwrap();
    assert_eq!(task.state, TaskState::Scheduled);

    supervisor.kill();
    tokio::time::timeout(WAIT, supervisor.wait()).await.unwrap().unwrap();
}
