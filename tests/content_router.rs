//! Integration tests for the content router's cached backend configuration

mod common;

use common::fixtures::{content, test_config, TestController, MODEL_UUID};
use secretplane::domain::SecretUri;
use std::sync::Arc;

/// A controller whose router keeps config for the default five minutes
async fn cached_controller(prefix: &str) -> TestController {
    let mut config = test_config();
    config.secret_backends.cache_ttl_seconds = 300;
    TestController::with_config(prefix, config).await
}

#[tokio::test]
async fn test_config_is_cached_within_ttl() {
    let t = cached_controller("router_cache_hit").await;
    let router = &t.controller.router;

    let first = router.backend_config_info(MODEL_UUID).await.unwrap();
    let second = router.backend_config_info(MODEL_UUID).await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}

#[tokio::test]
async fn test_model_backend_change_routes_new_content_to_new_backend() {
    let t = cached_controller("router_cache_config_change").await;
    let vault1 = t.add_vault("vault1").await;
    let internal = t.controller.service.get_secret_backend_by_name("internal").await.unwrap();
    let router = &t.controller.router;

    let uri = SecretUri::generate();
    let before = router.save_content(MODEL_UUID, &uri, 1, &content(1)).await.unwrap();
    assert_eq!(before.backend_id, internal.id);

    t.set_model_backend("vault1").await;

    let after = router.save_content(MODEL_UUID, &uri, 2, &content(2)).await.unwrap();
    assert_eq!(after.backend_id, vault1.id);
    assert_eq!(router.backend_config_info(MODEL_UUID).await.unwrap().active_id, vault1.id);
}

#[tokio::test]
async fn test_model_upsert_changing_backend_notifies_and_refreshes() {
    let t = cached_controller("router_cache_upsert").await;
    let vault1 = t.add_vault("vault1").await;
    let router = &t.controller.router;
    let models = &t.controller.store.models;
    let mut changes = t.controller.notifier.model_config.subscribe(MODEL_UUID.to_string());

    let internal_id = router.backend_config_info(MODEL_UUID).await.unwrap().active_id.clone();

    // Saving an unchanged config is not a change
    let mut model = models.get(MODEL_UUID).await.unwrap().unwrap();
    models.upsert(&model).await.unwrap();
    assert!(changes.drain_pending().is_empty());
    assert_eq!(router.backend_config_info(MODEL_UUID).await.unwrap().active_id, internal_id);

    model.secret_backend = "vault1".to_string();
    models.upsert(&model).await.unwrap();
    assert_eq!(changes.drain_pending().len(), 1);
    assert_eq!(router.backend_config_info(MODEL_UUID).await.unwrap().active_id, vault1.id);
}
