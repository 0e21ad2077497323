//! Integration tests for the backend token rotation worker

mod common;

use common::fixtures::TestController;
use secretplane::domain::{RotationChange, SecretBackend, UpdateSecretBackendParams};
use secretplane::runtime::Supervisor;
use secretplane::secrets::TokenRotationWorker;
use serde_json::json;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(15);

async fn vault_with_interval(t: &TestController) -> SecretBackend {
    let vault1 = t.add_vault("vault1").await;
    let params = UpdateSecretBackendParams {
        token_rotate_interval: Some(Some(Duration::from_secs(3600))),
        ..UpdateSecretBackendParams::new(vault1.id)
    };
    t.controller.service.update_secret_backend(params, true, &[]).await.unwrap()
}

fn start_worker(t: &TestController) -> Supervisor {
    let worker = TokenRotationWorker::new(
        t.controller.service.clone(),
        t.controller.notifier.clone(),
        t.controller.config.rotation.retry_delay(),
    );
    let mut supervisor = Supervisor::new("test");
    supervisor.spawn("token-rotation", |token| worker.run(token));
    supervisor
}

/// Announce the backend as due now once the worker is listening
async fn trigger_now(t: &TestController, backend: &SecretBackend) {
    let change = RotationChange {
        id: backend.id.clone(),
        name: backend.name.clone(),
        next_trigger_time: Some(chrono::Utc::now()),
    };
    tokio::time::timeout(WAIT, async {
        while t.controller.notifier.backend_rotation.publish(&(), change.clone()) == 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("rotation worker subscribed");
}

async fn wait_for_refreshes(t: &TestController, count: usize) {
    tokio::time::timeout(WAIT, async {
        while t.vault.refreshes() < count {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("token refreshed");
}

#[tokio::test]
async fn test_due_backend_token_is_rotated() {
    let t = TestController::new("rotation_due").await;
    let vault1 = vault_with_interval(&t).await;
    let supervisor = start_worker(&t);

    trigger_now(&t, &vault1).await;
    wait_for_refreshes(&t, 1).await;

    let rotated = tokio::time::timeout(WAIT, async {
        loop {
            let backend = t.controller.service.get_secret_backend(&vault1.id).await.unwrap();
            if backend.config.get("token") == Some(&json!("refreshed-1")) {
                return backend;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("rotated token saved");

    let next = rotated.next_rotate_time.expect("next rotation scheduled");
    assert!(next > chrono::Utc::now() + chrono::Duration::minutes(50));
    assert_eq!(t.vault.refreshes(), 1);

    supervisor.kill();
    tokio::time::timeout(WAIT, supervisor.wait()).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_failed_rotation_is_retried() {
    let t = TestController::new("rotation_retry").await;
    let vault1 = vault_with_interval(&t).await;
    t.vault.set_fail_refresh(true);
    let supervisor = start_worker(&t);

    trigger_now(&t, &vault1).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(t.vault.refreshes(), 0);
    let unchanged = t.controller.service.get_secret_backend(&vault1.id).await.unwrap();
    assert_eq!(unchanged.config.get("token"), Some(&json!("s.root")));

    t.vault.set_fail_refresh(false);
    wait_for_refreshes(&t, 1).await;

    supervisor.kill();
    tokio::time::timeout(WAIT, supervisor.wait()).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_rotation_of_unsupported_backend_is_rejected() {
    let t = TestController::new("rotation_unsupported").await;
    let internal = t.controller.service.get_secret_backend_by_name("internal").await.unwrap();

    let err = t.controller.service.rotate_backend_token(&internal.id).await.unwrap_err();
    assert!(err.is_not_supported());
}
