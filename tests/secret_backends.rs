//! Integration tests for the secret backend registry service

mod common;

use common::fixtures::{TestController, CONTROLLER_UUID};
use common::test_db::TestDatabase;
use secretplane::domain::{
    BackendFilter, BackendStatus, CreateSecretBackendParams, SecretUri, Tag,
    UpdateSecretBackendParams,
};
use secretplane::errors::SecretplaneError;
use secretplane::secrets::{NoCloudCredentials, REDACTED};
use secretplane::startup::Controller;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn vault_params(name: &str) -> CreateSecretBackendParams {
    CreateSecretBackendParams {
        name: name.to_string(),
        backend_type: "vault".to_string(),
        config: json!({"endpoint": "http://127.0.0.1:1", "token": "s.3Xk9vTqL"})
            .as_object()
            .cloned()
            .unwrap(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_create_then_get_by_name_round_trips() {
    let t = TestController::new("backend_round_trip").await;
    let service = &t.controller.service;

    let created = service.create_secret_backend(vault_params("vault1"), false).await.unwrap();
    let fetched = service.get_secret_backend_by_name("vault1").await.unwrap();

    assert_eq!(fetched, created);
    assert_eq!(fetched.backend_type, "vault");
    assert_eq!(fetched.config.get("token"), Some(&json!("s.3Xk9vTqL")));
    assert!(!fetched.id.as_str().is_empty());
}

#[tokio::test]
async fn test_reserved_names_are_not_valid() {
    let t = TestController::new("backend_reserved").await;

    for name in ["internal", "auto"] {
        let err = t.controller.service.create_secret_backend(vault_params(name), true).await.unwrap_err();
        assert!(err.is_not_valid(), "{} should be reserved: {}", name, err);
    }
}

#[tokio::test]
async fn test_duplicate_name_already_exists() {
    let t = TestController::new("backend_duplicate").await;
    t.add_vault("vault1").await;

    let err = t.controller.service.create_secret_backend(vault_params("vault1"), true).await.unwrap_err();
    assert!(matches!(err, SecretplaneError::AlreadyExists { .. }), "{}", err);
}

#[tokio::test]
async fn test_unreachable_backend_rejected_unless_forced() {
    let t = TestController::new("backend_ping").await;
    t.vault.set_fail_ping(true);

    let err = t.controller.service.create_secret_backend(vault_params("vault1"), false).await.unwrap_err();
    assert!(matches!(err, SecretplaneError::Backend { .. }), "{}", err);
    assert!(t.controller.service.get_secret_backend_by_name("vault1").await.unwrap_err().is_not_found());

    t.controller.service.create_secret_backend(vault_params("vault1"), true).await.unwrap();
}

#[tokio::test]
async fn test_internal_backend_exists_and_is_protected() {
    let t = TestController::new("backend_internal").await;
    let service = &t.controller.service;

    let internal = service.get_secret_backend_by_name("internal").await.unwrap();
    assert_eq!(internal.id.as_str(), CONTROLLER_UUID);
    assert_eq!(internal.backend_type, "controller");

    let again = service.ensure_internal_backend(CONTROLLER_UUID).await.unwrap();
    assert_eq!(again.id, internal.id);

    assert!(service.delete_secret_backend(&internal.id, true).await.unwrap_err().is_not_valid());
    let update = UpdateSecretBackendParams {
        name_change: Some("renamed".into()),
        ..UpdateSecretBackendParams::new(internal.id.clone())
    };
    assert!(service.update_secret_backend(update, true, &[]).await.unwrap_err().is_not_valid());
}

#[tokio::test]
async fn test_controller_type_cannot_be_created() {
    let t = TestController::new("backend_controller_type").await;
    let params = CreateSecretBackendParams {
        name: "another-internal".into(),
        backend_type: "controller".into(),
        ..Default::default()
    };
    let err = t.controller.service.create_secret_backend(params, true).await.unwrap_err();
    assert!(err.is_not_valid(), "{}", err);
}

#[tokio::test]
async fn test_unknown_backend_type_not_supported() {
    let t = TestController::new("backend_unknown_type").await;
    let params = CreateSecretBackendParams {
        name: "aws1".into(),
        backend_type: "aws-secrets-manager".into(),
        ..Default::default()
    };
    let err = t.controller.service.create_secret_backend(params, true).await.unwrap_err();
    assert!(err.is_not_supported(), "{}", err);
}

#[tokio::test]
async fn test_delete_referenced_backend_conflicts_unless_forced() {
    let t = TestController::new("backend_delete_guard").await;
    let vault1 = t.add_vault("vault1").await;
    t.set_model_backend("vault1").await;
    let uri = SecretUri::generate();
    t.create_secret(&uri, Tag::unit("wordpress/0"), 1).await;
    assert_eq!(t.value_ref(&uri, 1).await.backend_id, vault1.id);

    let err = t.controller.service.delete_secret_backend(&vault1.id, false).await.unwrap_err();
    assert!(err.is_conflict(), "{}", err);
    assert!(t.controller.service.get_secret_backend(&vault1.id).await.is_ok());

    t.controller.service.delete_secret_backend(&vault1.id, true).await.unwrap();
    assert!(t.controller.service.get_secret_backend(&vault1.id).await.unwrap_err().is_not_found());
    // Without purge the content stays where it was
    assert!(t.vault.stored(&t.value_ref(&uri, 1).await.revision_id).is_some());
}

#[tokio::test]
async fn test_forced_delete_purges_content_when_configured() {
    let mut config = common::fixtures::test_config();
    config.secret_backends.purge_on_forced_delete = true;
    let t = TestController::with_config("backend_purge", config).await;
    let vault1 = t.add_vault("vault1").await;
    t.set_model_backend("vault1").await;
    let uri = SecretUri::generate();
    t.create_secret(&uri, Tag::unit("wordpress/0"), 2).await;
    assert_eq!(t.vault.content.len(), 2);

    t.controller.service.delete_secret_backend(&vault1.id, true).await.unwrap();
    assert!(t.vault.content.is_empty());
}

#[tokio::test]
async fn test_unreferenced_backend_deletes_without_force() {
    let t = TestController::new("backend_delete_unused").await;
    let vault1 = t.add_vault("vault1").await;
    t.controller.service.delete_secret_backend(&vault1.id, false).await.unwrap();
    assert!(t.controller.service.get_secret_backend_by_name("vault1").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_update_merges_config_and_resets_keys() {
    let t = TestController::new("backend_update").await;
    let vault1 = t.add_vault("vault1").await;
    let service = &t.controller.service;

    let update = UpdateSecretBackendParams {
        name_change: Some("vault-primary".into()),
        config: json!({"namespace": "team-a"}).as_object().cloned().unwrap(),
        ..UpdateSecretBackendParams::new(vault1.id.clone())
    };
    let updated = service.update_secret_backend(update, true, &[]).await.unwrap();
    assert_eq!(updated.name, "vault-primary");
    assert_eq!(updated.config.get("namespace"), Some(&json!("team-a")));
    assert_eq!(updated.config.get("token"), Some(&json!("s.root")));

    let reset = service
        .update_secret_backend(
            UpdateSecretBackendParams::new(vault1.id.clone()),
            true,
            &["namespace".to_string()],
        )
        .await
        .unwrap();
    assert!(!reset.config.contains_key("namespace"));

    let err = service
        .update_secret_backend(
            UpdateSecretBackendParams::new(vault1.id.clone()),
            true,
            &["no-such-key".to_string()],
        )
        .await
        .unwrap_err();
    assert!(err.is_not_valid());

    let conflicting = UpdateSecretBackendParams {
        config: json!({"token": "s.new"}).as_object().cloned().unwrap(),
        ..UpdateSecretBackendParams::new(vault1.id.clone())
    };
    let err = service
        .update_secret_backend(conflicting, true, &["token".to_string()])
        .await
        .unwrap_err();
    assert!(err.is_not_valid());
}

#[tokio::test]
async fn test_rotate_interval_validation() {
    let t = TestController::new("backend_rotate_interval").await;
    let vault1 = t.add_vault("vault1").await;
    let service = &t.controller.service;

    let too_short = UpdateSecretBackendParams {
        token_rotate_interval: Some(Some(Duration::from_secs(30))),
        ..UpdateSecretBackendParams::new(vault1.id.clone())
    };
    assert!(service.update_secret_backend(too_short, true, &[]).await.unwrap_err().is_not_valid());

    let hourly = UpdateSecretBackendParams {
        token_rotate_interval: Some(Some(Duration::from_secs(3600))),
        ..UpdateSecretBackendParams::new(vault1.id.clone())
    };
    let updated = service.update_secret_backend(hourly, true, &[]).await.unwrap();
    assert_eq!(updated.token_rotate_interval, Some(Duration::from_secs(3600)));
    assert!(updated.next_rotate_time.is_some());

    let schedule = service.rotation_schedule().await.unwrap();
    assert_eq!(schedule.len(), 1);
    assert_eq!(schedule[0].id, vault1.id);

    let cleared = UpdateSecretBackendParams {
        token_rotate_interval: Some(None),
        ..UpdateSecretBackendParams::new(vault1.id.clone())
    };
    let updated = service.update_secret_backend(cleared, true, &[]).await.unwrap();
    assert_eq!(updated.token_rotate_interval, None);
    assert!(service.rotation_schedule().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_rotate_backend_token_refreshes_config() {
    let t = TestController::new("backend_rotate_token").await;
    let vault1 = t.add_vault("vault1").await;

    let rotated = t.controller.service.rotate_backend_token(&vault1.id).await.unwrap();
    assert_eq!(rotated.config.get("token"), Some(&json!("refreshed-1")));
    assert_eq!(t.vault.refreshes(), 1);

    let internal = t.controller.service.get_secret_backend_by_name("internal").await.unwrap();
    let err = t.controller.service.rotate_backend_token(&internal.id).await.unwrap_err();
    assert!(err.is_not_supported());
}

#[tokio::test]
async fn test_list_reports_counts_and_health() {
    let t = TestController::new("backend_list_counts").await;
    t.add_vault("vault1").await;
    t.set_model_backend("vault1").await;
    t.create_secret(&SecretUri::generate(), Tag::unit("wordpress/0"), 3).await;

    let listed = t
        .controller
        .service
        .list_secret_backends(&BackendFilter::names(["vault1"]), false)
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].num_secrets, 3);
    assert_eq!(listed[0].status, BackendStatus::Active);

    t.vault.set_fail_ping(true);
    let listed = t
        .controller
        .service
        .list_secret_backends(&BackendFilter::names(["vault1"]), false)
        .await
        .unwrap();
    assert_eq!(listed[0].status, BackendStatus::Error);
    assert!(listed[0].message.as_deref().unwrap_or_default().contains("injected ping failure"));
}

/// Uses the built-in vault provider; no vault is reachable, so the backend
/// is registered with `force`.
#[tokio::test]
async fn test_listed_vault_backend_config_is_redacted() {
    let db = TestDatabase::new("backend_list_redacted").await;
    let mut config = common::fixtures::test_config();
    config.secret_backends.call_timeout_seconds = 2;
    let controller =
        Controller::assemble(config, db.pool.clone(), Arc::new(NoCloudCredentials)).await.unwrap();

    controller.service.create_secret_backend(vault_params("vault1"), true).await.unwrap();

    let listed = controller.service.list_secret_backends(&BackendFilter::all(), false).await.unwrap();
    let vault1 = listed.iter().find(|b| b.name == "vault1").expect("vault1 listed");
    assert_eq!(vault1.config.get("token"), Some(&json!(REDACTED)));
    assert_eq!(vault1.config.get("endpoint"), Some(&json!("http://127.0.0.1:1")));
    assert_eq!(vault1.config.get("mount-path"), Some(&json!("secrets")));
    assert!(listed.iter().any(|b| b.name == "internal"));

    let revealed = controller
        .service
        .list_secret_backends(&BackendFilter::names(["vault1"]), true)
        .await
        .unwrap();
    assert_eq!(revealed[0].config.get("token"), Some(&json!("s.3Xk9vTqL")));
}

#[tokio::test]
async fn test_rename_of_backend_named_by_model_conflicts() {
    let t = TestController::new("backend_rename_in_use").await;
    let service = &t.controller.service;
    let vault1 = t.add_vault("vault1").await;
    t.set_model_backend("vault1").await;

    let rename = UpdateSecretBackendParams {
        name_change: Some("vault2".to_string()),
        ..UpdateSecretBackendParams::new(vault1.id.clone())
    };
    let err = service.update_secret_backend(rename.clone(), true, &[]).await.unwrap_err();
    assert!(err.is_conflict(), "{}", err);
    assert!(err.to_string().contains("wordpress-model"), "{}", err);
    assert_eq!(service.get_secret_backend(&vault1.id).await.unwrap().name, "vault1");

    // Keeping the same name is not a rename
    let same = UpdateSecretBackendParams {
        name_change: Some("vault1".to_string()),
        ..UpdateSecretBackendParams::new(vault1.id.clone())
    };
    service.update_secret_backend(same, true, &[]).await.unwrap();

    t.set_model_backend("internal").await;
    let renamed = service.update_secret_backend(rename, true, &[]).await.unwrap();
    assert_eq!(renamed.name, "vault2");
}
