//! IAM API subset.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use stratus_core::StratusError;
use stratus_db::model::IamBinding;
use stratus_iam::{CreateServiceAccountRequest, CustomRoleRequest, SetPolicyRequest};

use super::request_ctx;
use crate::error::ApiError;
use crate::state::AppState;
use crate::wire;

type ApiResult<T> = Result<T, ApiError>;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/v1/projects/{project}/serviceAccounts",
            get(list_accounts).post(create_account),
        )
        .route(
            "/v1/projects/{project}/serviceAccounts/{email}",
            get(get_account).delete(delete_account).post(account_action),
        )
        .route(
            "/v1/projects/{project}/serviceAccounts/{email}/keys",
            get(list_keys).post(create_key),
        )
        .route(
            "/v1/projects/{project}/serviceAccounts/{email}/keys/{key}",
            get(get_key).delete(delete_key),
        )
        .route("/v1/roles", get(list_roles))
        .route("/v1/roles/{role}", get(get_predefined_role))
        .route(
            "/v1/projects/{project}/roles",
            get(list_custom_roles).post(create_custom_role),
        )
        .route(
            "/v1/projects/{project}/roles/{role}",
            get(get_custom_role)
                .patch(patch_custom_role)
                .delete(delete_custom_role)
                .post(role_action),
        )
        // `POST /v1/projects/p:getIamPolicy` and friends: the verb rides in
        // the final path segment. Parameter names match the sibling routes
        // so the segments share one router node.
        .route("/v1/projects/{project}", post(project_policy_verb))
        .route("/v1/b/{bucket}", post(bucket_policy_verb))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateAccountBody {
    account_id: String,
    #[serde(default)]
    service_account: AccountDetails,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct AccountDetails {
    display_name: Option<String>,
    description: Option<String>,
}

async fn create_account(
    State(state): State<AppState>,
    Path(project): Path<String>,
    Json(body): Json<CreateAccountBody>,
) -> ApiResult<Json<Value>> {
    let ctx = request_ctx();
    let account = state
        .iam
        .create_service_account(
            &ctx,
            &project,
            CreateServiceAccountRequest {
                account_id: body.account_id,
                display_name: body.service_account.display_name,
                description: body.service_account.description,
            },
        )
        .await?;
    Ok(Json(wire::service_account(&account)))
}

async fn list_accounts(
    State(state): State<AppState>,
    Path(project): Path<String>,
) -> ApiResult<Json<Value>> {
    let ctx = request_ctx();
    let accounts = state.iam.list_service_accounts(&ctx, &project).await?;
    Ok(Json(json!({
        "accounts": accounts.iter().map(wire::service_account).collect::<Vec<_>>(),
    })))
}

async fn get_account(
    State(state): State<AppState>,
    Path((_project, email)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let ctx = request_ctx();
    let account = state.iam.get_service_account(&ctx, &email).await?;
    Ok(Json(wire::service_account(&account)))
}

async fn delete_account(
    State(state): State<AppState>,
    Path((_project, email)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let ctx = request_ctx();
    state.iam.delete_service_account(&ctx, &email).await?;
    Ok(Json(json!({})))
}

/// `POST .../serviceAccounts/{email}:enable` and `:disable`.
async fn account_action(
    State(state): State<AppState>,
    Path((_project, email_action)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let ctx = request_ctx();
    let Some((email, action)) = email_action.split_once(':') else {
        return Err(ApiError(StratusError::invalid_argument(format!(
            "unsupported POST target '{email_action}'"
        ))));
    };
    let disabled = match action {
        "enable" => false,
        "disable" => true,
        other => {
            return Err(ApiError(StratusError::invalid_argument(format!(
                "unsupported service account action '{other}'"
            ))));
        }
    };
    let account = state.iam.set_service_account_disabled(&ctx, email, disabled).await?;
    Ok(Json(wire::service_account(&account)))
}

async fn create_key(
    State(state): State<AppState>,
    Path((_project, email)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let ctx = request_ctx();
    let key = state.iam.create_key(&ctx, &email).await?;
    // Creation is the only response carrying the downloadable blob.
    Ok(Json(wire::service_account_key(&key, true)))
}

async fn list_keys(
    State(state): State<AppState>,
    Path((_project, email)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let ctx = request_ctx();
    let keys = state.iam.list_keys(&ctx, &email).await?;
    Ok(Json(json!({
        "keys": keys.iter().map(|k| wire::service_account_key(k, false)).collect::<Vec<_>>(),
    })))
}

async fn get_key(
    State(state): State<AppState>,
    Path((_project, email, key)): Path<(String, String, String)>,
) -> ApiResult<Json<Value>> {
    let ctx = request_ctx();
    let key = state.iam.get_key(&ctx, &email, &key).await?;
    Ok(Json(wire::service_account_key(&key, false)))
}

async fn delete_key(
    State(state): State<AppState>,
    Path((_project, email, key)): Path<(String, String, String)>,
) -> ApiResult<Json<Value>> {
    let ctx = request_ctx();
    state.iam.delete_key(&ctx, &email, &key).await?;
    Ok(Json(json!({})))
}

async fn list_roles(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let ctx = request_ctx();
    let roles = state.iam.list_predefined_roles(&ctx).await?;
    Ok(Json(json!({
        "roles": roles.iter().map(wire::role).collect::<Vec<_>>(),
    })))
}

async fn get_predefined_role(
    State(state): State<AppState>,
    Path(role): Path<String>,
) -> ApiResult<Json<Value>> {
    let ctx = request_ctx();
    let role = state.iam.get_role(&ctx, &format!("roles/{role}")).await?;
    Ok(Json(wire::role(&role)))
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ListRolesQuery {
    #[serde(default)]
    show_deleted: bool,
}

async fn list_custom_roles(
    State(state): State<AppState>,
    Path(project): Path<String>,
    Query(query): Query<ListRolesQuery>,
) -> ApiResult<Json<Value>> {
    let ctx = request_ctx();
    let roles = state.iam.list_custom_roles(&ctx, &project, query.show_deleted).await?;
    Ok(Json(json!({
        "roles": roles.iter().map(wire::role).collect::<Vec<_>>(),
    })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateRoleBody {
    role_id: String,
    #[serde(default)]
    role: RoleDetails,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RoleDetails {
    title: Option<String>,
    #[serde(default)]
    included_permissions: Vec<String>,
    stage: Option<String>,
}

async fn create_custom_role(
    State(state): State<AppState>,
    Path(project): Path<String>,
    Json(body): Json<CreateRoleBody>,
) -> ApiResult<Json<Value>> {
    let ctx = request_ctx();
    let role = state
        .iam
        .create_custom_role(
            &ctx,
            &project,
            CustomRoleRequest {
                role_id: body.role_id,
                title: body.role.title,
                included_permissions: body.role.included_permissions,
                stage: body.role.stage,
            },
        )
        .await?;
    Ok(Json(wire::role(&role)))
}

async fn get_custom_role(
    State(state): State<AppState>,
    Path((project, role)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let ctx = request_ctx();
    let role = state.iam.get_role(&ctx, &format!("projects/{project}/roles/{role}")).await?;
    Ok(Json(wire::role(&role)))
}

async fn patch_custom_role(
    State(state): State<AppState>,
    Path((project, role)): Path<(String, String)>,
    Json(body): Json<RoleDetails>,
) -> ApiResult<Json<Value>> {
    let ctx = request_ctx();
    let role = state
        .iam
        .patch_custom_role(
            &ctx,
            &project,
            CustomRoleRequest {
                role_id: role,
                title: body.title,
                included_permissions: body.included_permissions,
                stage: body.stage,
            },
        )
        .await?;
    Ok(Json(wire::role(&role)))
}

async fn delete_custom_role(
    State(state): State<AppState>,
    Path((project, role)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let ctx = request_ctx();
    let role = state.iam.delete_custom_role(&ctx, &project, &role).await?;
    Ok(Json(wire::role(&role)))
}

/// `POST .../roles/{role}:undelete`.
async fn role_action(
    State(state): State<AppState>,
    Path((project, role_action)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let ctx = request_ctx();
    let Some((role, action)) = role_action.split_once(':') else {
        return Err(ApiError(StratusError::invalid_argument(format!(
            "unsupported POST target '{role_action}'"
        ))));
    };
    if action != "undelete" {
        return Err(ApiError(StratusError::invalid_argument(format!(
            "unsupported role action '{action}'"
        ))));
    }
    let role = state.iam.undelete_custom_role(&ctx, &project, role).await?;
    Ok(Json(wire::role(&role)))
}

#[derive(Deserialize, Default)]
struct PolicyBody {
    #[serde(default)]
    policy: PolicyDocument,
    #[serde(default)]
    permissions: Vec<String>,
}

#[derive(Deserialize, Default)]
struct PolicyDocument {
    #[serde(default)]
    bindings: Vec<IamBinding>,
    etag: Option<String>,
}

/// `POST /v1/projects/{project}:{verb}` → resource `projects/{project}`.
async fn project_policy_verb(
    State(state): State<AppState>,
    Path(resource_verb): Path<String>,
    body: Option<Json<PolicyBody>>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    policy_verb(state, "projects", &resource_verb, body.map(|Json(b)| b)).await
}

/// `POST /v1/b/{bucket}:{verb}` → resource `b/{bucket}`.
async fn bucket_policy_verb(
    State(state): State<AppState>,
    Path(resource_verb): Path<String>,
    body: Option<Json<PolicyBody>>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    policy_verb(state, "b", &resource_verb, body.map(|Json(b)| b)).await
}

async fn policy_verb(
    state: AppState,
    collection: &str,
    resource_verb: &str,
    body: Option<PolicyBody>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let ctx = request_ctx();
    let Some((resource_id, verb)) = resource_verb.split_once(':') else {
        return Err(ApiError(StratusError::invalid_argument(format!(
            "expected '{{resource}}:verb', got '{resource_verb}'"
        ))));
    };
    let resource = format!("{collection}/{resource_id}");
    let body = body.unwrap_or_default();

    match verb {
        "getIamPolicy" => {
            let policy = state.iam.get_iam_policy(&ctx, &resource).await?;
            Ok((StatusCode::OK, Json(wire::policy(&policy))))
        }
        "setIamPolicy" => {
            let policy = state
                .iam
                .set_iam_policy(
                    &ctx,
                    &resource,
                    SetPolicyRequest {
                        bindings: body.policy.bindings,
                        etag: body.policy.etag,
                    },
                )
                .await?;
            Ok((StatusCode::OK, Json(wire::policy(&policy))))
        }
        "testIamPermissions" => {
            let held = state.iam.test_iam_permissions(&ctx, &resource, &body.permissions).await?;
            Ok((StatusCode::OK, Json(json!({ "permissions": held }))))
        }
        other => Err(ApiError(StratusError::invalid_argument(format!(
            "unsupported verb ':{other}'"
        )))),
    }
}
