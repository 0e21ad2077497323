//! Integration tests for secret access grants

mod common;

use common::fixtures::{TestController, MODEL_UUID};
use secretplane::domain::{AccessParams, Role, SecretUri, Tag};
use secretplane::secrets::AccessControlEvaluator;

async fn setup(prefix: &str) -> (TestController, SecretUri) {
    let t = TestController::new(prefix).await;
    let uri = SecretUri::generate();
    t.create_secret(&uri, Tag::application("mysql"), 1).await;
    (t, uri)
}

fn evaluator(t: &TestController) -> &AccessControlEvaluator {
    &t.controller.evaluator
}

#[tokio::test]
async fn test_grant_then_revoke_round_trip() {
    let (t, uri) = setup("access_round_trip").await;
    let params = AccessParams::new(Tag::unit("wordpress/0"), Tag::application("wordpress"));

    evaluator(&t).grant_secret_access(&uri, &params, Role::View).await.unwrap();
    assert_eq!(evaluator(&t).get_secret_access(&uri, &params).await.unwrap(), Role::View);

    evaluator(&t).revoke_secret_access(&uri, &params).await.unwrap();
    assert_eq!(evaluator(&t).get_secret_access(&uri, &params).await.unwrap(), Role::None);

    // Revoking again is not an error
    evaluator(&t).revoke_secret_access(&uri, &params).await.unwrap();
}

#[tokio::test]
async fn test_role_overwrites_rather_than_stacks() {
    let (t, uri) = setup("access_overwrite").await;
    let params = AccessParams::new(Tag::unit("wordpress/0"), Tag::application("wordpress"));

    evaluator(&t).grant_secret_access(&uri, &params, Role::View).await.unwrap();
    evaluator(&t).grant_secret_access(&uri, &params, Role::Manage).await.unwrap();

    let grants = evaluator(&t).get_secret_grants(&uri, Role::View).await.unwrap();
    assert_eq!(grants.len(), 1);
    assert_eq!(grants[0].role, Role::Manage);
    assert_eq!(evaluator(&t).get_secret_access(&uri, &params).await.unwrap(), Role::Manage);

    evaluator(&t).grant_secret_access(&uri, &params, Role::View).await.unwrap();
    assert_eq!(evaluator(&t).get_secret_access(&uri, &params).await.unwrap(), Role::View);
}

#[tokio::test]
async fn test_relation_scoped_grant_listed() {
    let (t, uri) = setup("access_relation_scope").await;
    let subject = Tag::unit("wordpress/0");
    let scope = Tag::relation("wordpress:db mysql:server");

    evaluator(&t)
        .grant_secret_access(&uri, &AccessParams::new(subject.clone(), scope.clone()), Role::View)
        .await
        .unwrap();

    let grants = evaluator(&t).get_secret_grants(&uri, Role::View).await.unwrap();
    assert!(grants.iter().any(|g| g.subject == subject && g.scope == scope && g.role == Role::View));

    assert!(evaluator(&t).get_secret_grants(&uri, Role::Manage).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_grant_none_and_missing_secret_rejected() {
    let (t, uri) = setup("access_invalid").await;
    let params = AccessParams::new(Tag::unit("wordpress/0"), Tag::application("wordpress"));

    let err = evaluator(&t).grant_secret_access(&uri, &params, Role::None).await.unwrap_err();
    assert!(err.is_not_valid());

    let missing = SecretUri::generate();
    let err = evaluator(&t).grant_secret_access(&missing, &params, Role::View).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_unit_inherits_application_grant() {
    let (t, uri) = setup("access_unit_inherits").await;
    let scope = Tag::application("wordpress");
    evaluator(&t)
        .grant_secret_access(&uri, &AccessParams::new(Tag::application("wordpress"), scope.clone()), Role::View)
        .await
        .unwrap();

    let unit = AccessParams::new(Tag::unit("wordpress/3"), scope);
    assert_eq!(evaluator(&t).get_secret_access(&uri, &unit).await.unwrap(), Role::View);
}

#[tokio::test]
async fn test_effective_role_combines_ownership_and_grants() {
    let (t, uri) = setup("access_effective").await;
    let e = evaluator(&t);

    assert_eq!(e.effective_role(&uri, &Tag::application("mysql"), false).await.unwrap(), Role::Manage);
    assert_eq!(e.effective_role(&uri, &Tag::unit("mysql/0"), true).await.unwrap(), Role::Manage);
    assert_eq!(e.effective_role(&uri, &Tag::unit("mysql/1"), false).await.unwrap(), Role::View);
    assert_eq!(e.effective_role(&uri, &Tag::unit("wordpress/0"), false).await.unwrap(), Role::None);

    e.grant_secret_access(
        &uri,
        &AccessParams::new(Tag::unit("wordpress/0"), Tag::relation("wordpress:db mysql:server")),
        Role::View,
    )
    .await
    .unwrap();
    assert_eq!(e.effective_role(&uri, &Tag::unit("wordpress/0"), false).await.unwrap(), Role::View);

    // A model-wide grant applies to every consumer in the model
    e.grant_secret_access(
        &uri,
        &AccessParams::new(Tag::model(MODEL_UUID), Tag::model(MODEL_UUID)),
        Role::Rotate,
    )
    .await
    .unwrap();
    assert_eq!(e.effective_role(&uri, &Tag::unit("mediawiki/0"), false).await.unwrap(), Role::Rotate);
}
