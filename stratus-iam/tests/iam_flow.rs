//! End-to-end identity flows against an in-memory store.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use stratus_core::{ErrorKind, OpContext};
use stratus_db::Database;
use stratus_db::model::IamBinding;
use stratus_iam::{
    CreateServiceAccountRequest, CustomRoleRequest, DEFAULT_ETAG, IamService, SetPolicyRequest,
    seed_predefined_roles,
};

async fn service() -> IamService {
    let db = Database::in_memory().await.unwrap();
    seed_predefined_roles(&db).await.unwrap();
    IamService::new(db)
}

fn account_req(id: &str) -> CreateServiceAccountRequest {
    CreateServiceAccountRequest {
        account_id: id.to_string(),
        display_name: Some("Test account".to_string()),
        description: None,
    }
}

#[tokio::test]
async fn service_account_lifecycle() {
    let iam = service().await;
    let ctx = OpContext::background();

    let account =
        iam.create_service_account(&ctx, "demo-proj", account_req("build-bot")).await.unwrap();
    assert_eq!(account.email, "build-bot@demo-proj.iam.gserviceaccount.com");
    assert_eq!(account.unique_id.len(), 21);
    assert_eq!(account.unique_id, account.oauth2_client_id);
    assert!(!account.disabled);

    let err =
        iam.create_service_account(&ctx, "demo-proj", account_req("build-bot")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);

    let listed = iam.list_service_accounts(&ctx, "demo-proj").await.unwrap();
    assert_eq!(listed.len(), 1);

    let disabled =
        iam.set_service_account_disabled(&ctx, &account.email, true).await.unwrap();
    assert!(disabled.disabled);

    iam.delete_service_account(&ctx, &account.email).await.unwrap();
    let err = iam.get_service_account(&ctx, &account.email).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn invalid_account_ids_are_rejected() {
    let iam = service().await;
    let ctx = OpContext::background();
    for bad in ["short", "UPPER-case", "ends-with-dash-"] {
        let err = iam.create_service_account(&ctx, "p", account_req(bad)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument, "{bad}");
    }
}

#[tokio::test]
async fn keys_are_minted_with_mock_credentials() {
    let iam = service().await;
    let ctx = OpContext::background();
    let account = iam.create_service_account(&ctx, "p", account_req("key-tester")).await.unwrap();

    let key = iam.create_key(&ctx, &account.email).await.unwrap();
    assert_eq!(key.algorithm, "KEY_ALG_RSA_2048");
    assert!(key.valid_before > key.valid_after);

    let decoded = BASE64.decode(&key.private_key_data).unwrap();
    let doc: serde_json::Value = serde_json::from_slice(&decoded).unwrap();
    assert_eq!(doc["client_email"], account.email.as_str());
    assert!(doc["private_key"].as_str().unwrap().contains("MOCK"));

    assert_eq!(iam.list_keys(&ctx, &account.email).await.unwrap().len(), 1);
    iam.delete_key(&ctx, &account.email, &key.id).await.unwrap();
    assert!(iam.list_keys(&ctx, &account.email).await.unwrap().is_empty());

    // Deleting the account removes any remaining keys with it.
    iam.create_key(&ctx, &account.email).await.unwrap();
    iam.delete_service_account(&ctx, &account.email).await.unwrap();
}

#[tokio::test]
async fn policy_etag_compare_and_swap() {
    let iam = service().await;
    let ctx = OpContext::background();

    let initial = iam.get_iam_policy(&ctx, "projects/p").await.unwrap();
    assert_eq!(initial.etag, DEFAULT_ETAG);
    assert!(initial.bindings().unwrap().is_empty());

    let bindings = vec![IamBinding {
        role: "roles/viewer".to_string(),
        members: vec!["user:alice@example.com".to_string()],
        condition: None,
    }];
    let set = iam
        .set_iam_policy(
            &ctx,
            "projects/p",
            SetPolicyRequest { bindings: bindings.clone(), etag: Some(initial.etag.clone()) },
        )
        .await
        .unwrap();
    assert_ne!(set.etag, DEFAULT_ETAG);
    assert_eq!(set.version, 1);

    // A writer with the stale etag loses.
    let err = iam
        .set_iam_policy(
            &ctx,
            "projects/p",
            SetPolicyRequest { bindings: bindings.clone(), etag: Some(DEFAULT_ETAG.to_string()) },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Aborted);

    // Retrying with the fresh etag succeeds and bumps the version.
    let fresh = iam.get_iam_policy(&ctx, "projects/p").await.unwrap();
    let set_again = iam
        .set_iam_policy(
            &ctx,
            "projects/p",
            SetPolicyRequest { bindings, etag: Some(fresh.etag) },
        )
        .await
        .unwrap();
    assert_eq!(set_again.version, 2);
}

#[tokio::test]
async fn set_then_get_round_trips_bindings_verbatim() {
    let iam = service().await;
    let ctx = OpContext::background();
    let bindings = vec![IamBinding {
        role: "roles/storage.objectViewer".to_string(),
        members: vec!["serviceAccount:sa@p.iam.gserviceaccount.com".to_string(), "allUsers".to_string()],
        condition: Some(serde_json::json!({"expression": "request.time < timestamp('2030-01-01T00:00:00Z')"})),
    }];
    iam.set_iam_policy(&ctx, "b/demo", SetPolicyRequest { bindings: bindings.clone(), etag: None })
        .await
        .unwrap();
    let stored = iam.get_iam_policy(&ctx, "b/demo").await.unwrap();
    assert_eq!(stored.bindings().unwrap(), bindings);
}

#[tokio::test]
async fn test_permissions_intersects_with_bound_roles() {
    let iam = service().await;
    let ctx = OpContext::background().with_caller("user:dev@example.com");

    iam.set_iam_policy(
        &ctx,
        "projects/p",
        SetPolicyRequest {
            bindings: vec![IamBinding {
                role: "roles/storage.objectViewer".to_string(),
                members: vec!["user:dev@example.com".to_string()],
                condition: None,
            }],
            etag: None,
        },
    )
    .await
    .unwrap();

    let held = iam
        .test_iam_permissions(
            &ctx,
            "projects/p",
            &[
                "storage.objects.get".to_string(),
                "storage.objects.delete".to_string(),
            ],
        )
        .await
        .unwrap();
    assert_eq!(held, vec!["storage.objects.get".to_string()]);

    // Unknown caller holds nothing.
    let anon = OpContext::background();
    let held = iam
        .test_iam_permissions(&anon, "projects/p", &["storage.objects.get".to_string()])
        .await
        .unwrap();
    assert!(held.is_empty());
}

#[tokio::test]
async fn custom_roles_soft_delete_and_undelete() {
    let iam = service().await;
    let ctx = OpContext::background();

    let role = iam
        .create_custom_role(
            &ctx,
            "p",
            CustomRoleRequest {
                role_id: "deployer".to_string(),
                title: Some("Deployer".to_string()),
                included_permissions: vec!["compute.instances.start".to_string()],
                stage: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(role.name, "projects/p/roles/deployer");

    iam.delete_custom_role(&ctx, "p", "deployer").await.unwrap();
    let err = iam.get_role(&ctx, "projects/p/roles/deployer").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(iam.list_custom_roles(&ctx, "p", true).await.unwrap().len(), 1);
    assert!(iam.list_custom_roles(&ctx, "p", false).await.unwrap().is_empty());

    iam.undelete_custom_role(&ctx, "p", "deployer").await.unwrap();
    let back = iam.get_role(&ctx, "projects/p/roles/deployer").await.unwrap();
    assert_eq!(back.title, "Deployer");
}

#[tokio::test]
async fn predefined_roles_are_seeded_once() {
    let iam = service().await;
    let ctx = OpContext::background();
    // Seeding again must not duplicate or error.
    seed_predefined_roles(iam_db(&iam)).await.unwrap();
    let listed = iam.list_predefined_roles(&ctx).await.unwrap();
    assert_eq!(listed.len(), 7);
    assert!(listed.iter().any(|r| r.name == "roles/storage.admin"));
}

// Accessor shim: the service owns its Database; tests re-seed through it.
fn iam_db(iam: &IamService) -> &Database {
    iam.database()
}
