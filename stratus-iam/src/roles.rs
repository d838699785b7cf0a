//! Predefined and custom roles.

use std::sync::LazyLock;

use regex::Regex;
use stratus_core::{OpContext, Result, StratusError};
use stratus_db::Database;
use stratus_db::error::db_err;
use stratus_db::model::RoleRow;
use stratus_db::repo::{projects, roles};

use crate::IamService;

static ROLE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9_.]{2,63}$").unwrap());

/// The seven predefined roles, with their permission sets.
const PREDEFINED: &[(&str, &str, &[&str])] = &[
    (
        "roles/owner",
        "Owner",
        &["storage.buckets.*", "storage.objects.*", "compute.instances.*", "iam.serviceAccounts.*", "resourcemanager.projects.*"],
    ),
    (
        "roles/editor",
        "Editor",
        &["storage.buckets.get", "storage.buckets.list", "storage.objects.*", "compute.instances.*", "iam.serviceAccounts.get", "iam.serviceAccounts.list"],
    ),
    (
        "roles/viewer",
        "Viewer",
        &["storage.buckets.get", "storage.buckets.list", "storage.objects.get", "storage.objects.list", "compute.instances.get", "compute.instances.list", "iam.serviceAccounts.get", "iam.serviceAccounts.list"],
    ),
    (
        "roles/storage.admin",
        "Storage Admin",
        &["storage.buckets.*", "storage.objects.*"],
    ),
    (
        "roles/storage.objectAdmin",
        "Storage Object Admin",
        &["storage.objects.create", "storage.objects.delete", "storage.objects.get", "storage.objects.list", "storage.objects.update"],
    ),
    (
        "roles/storage.objectCreator",
        "Storage Object Creator",
        &["storage.objects.create"],
    ),
    (
        "roles/storage.objectViewer",
        "Storage Object Viewer",
        &["storage.objects.get", "storage.objects.list"],
    ),
];

/// Seed the predefined roles. Idempotent; runs at every startup.
pub async fn seed_predefined_roles(db: &Database) -> Result<()> {
    let mut tx = db.begin().await?;
    for (name, title, permissions) in PREDEFINED {
        let row = RoleRow {
            name: name.to_string(),
            title: title.to_string(),
            included_permissions_json: serde_json::to_string(permissions)
                .map_err(|e| StratusError::internal(format!("serialize permissions: {e}")))?,
            stage: "GA".to_string(),
            is_custom: false,
            project_id: None,
            deleted: false,
        };
        roles::insert_if_absent(&mut tx, &row).await?;
    }
    tx.commit().await.map_err(db_err)?;
    Ok(())
}

/// Inputs for creating or patching a custom role.
#[derive(Debug, Clone)]
pub struct CustomRoleRequest {
    pub role_id: String,
    pub title: Option<String>,
    pub included_permissions: Vec<String>,
    pub stage: Option<String>,
}

impl IamService {
    pub async fn get_role(&self, ctx: &OpContext, name: &str) -> Result<RoleRow> {
        ctx.check()?;
        let mut conn = self.acquire().await?;
        match roles::get(&mut conn, name).await? {
            Some(role) if !role.deleted => Ok(role),
            _ => Err(StratusError::not_found("role", name)),
        }
    }

    pub async fn list_predefined_roles(&self, ctx: &OpContext) -> Result<Vec<RoleRow>> {
        ctx.check()?;
        let mut conn = self.acquire().await?;
        roles::list_predefined(&mut conn).await
    }

    pub async fn list_custom_roles(
        &self,
        ctx: &OpContext,
        project: &str,
        show_deleted: bool,
    ) -> Result<Vec<RoleRow>> {
        ctx.check()?;
        let mut conn = self.acquire().await?;
        roles::list_custom(&mut conn, project, show_deleted).await
    }

    pub async fn create_custom_role(
        &self,
        ctx: &OpContext,
        project: &str,
        req: CustomRoleRequest,
    ) -> Result<RoleRow> {
        ctx.check()?;
        if !ROLE_ID.is_match(&req.role_id) {
            return Err(StratusError::invalid_argument(format!(
                "role id '{}' must be 3-64 letters, digits, underscores or periods",
                req.role_id
            )));
        }
        let name = custom_role_name(project, &req.role_id);
        let row = RoleRow {
            name: name.clone(),
            title: req.title.unwrap_or_else(|| req.role_id.clone()),
            included_permissions_json: serde_json::to_string(&req.included_permissions)
                .map_err(|e| StratusError::internal(format!("serialize permissions: {e}")))?,
            stage: req.stage.unwrap_or_else(|| "GA".to_string()),
            is_custom: true,
            project_id: Some(project.to_string()),
            deleted: false,
        };

        let mut tx = self.database().begin().await?;
        projects::ensure(&mut tx, project).await?;
        if roles::get(&mut tx, &name).await?.is_some() {
            return Err(StratusError::already_exists("role", &name));
        }
        roles::insert(&mut tx, &row).await?;
        tx.commit().await.map_err(db_err)?;
        Ok(row)
    }

    pub async fn patch_custom_role(
        &self,
        ctx: &OpContext,
        project: &str,
        req: CustomRoleRequest,
    ) -> Result<RoleRow> {
        ctx.check()?;
        let name = custom_role_name(project, &req.role_id);
        let mut tx = self.database().begin().await?;
        let Some(mut row) = roles::get(&mut tx, &name).await? else {
            return Err(StratusError::not_found("role", &name));
        };
        if row.deleted {
            return Err(StratusError::failed_precondition(format!(
                "role '{name}' is deleted; undelete it first"
            )));
        }
        if let Some(title) = req.title {
            row.title = title;
        }
        if !req.included_permissions.is_empty() {
            row.included_permissions_json = serde_json::to_string(&req.included_permissions)
                .map_err(|e| StratusError::internal(format!("serialize permissions: {e}")))?;
        }
        if let Some(stage) = req.stage {
            row.stage = stage;
        }
        roles::update(&mut tx, &row).await?;
        tx.commit().await.map_err(db_err)?;
        Ok(row)
    }

    /// Soft delete: the role stays listable with `show_deleted` and can be
    /// undeleted.
    pub async fn delete_custom_role(
        &self,
        ctx: &OpContext,
        project: &str,
        role_id: &str,
    ) -> Result<RoleRow> {
        self.set_role_deleted(ctx, project, role_id, true).await
    }

    pub async fn undelete_custom_role(
        &self,
        ctx: &OpContext,
        project: &str,
        role_id: &str,
    ) -> Result<RoleRow> {
        self.set_role_deleted(ctx, project, role_id, false).await
    }

    async fn set_role_deleted(
        &self,
        ctx: &OpContext,
        project: &str,
        role_id: &str,
        deleted: bool,
    ) -> Result<RoleRow> {
        ctx.check()?;
        let name = custom_role_name(project, role_id);
        let mut tx = self.database().begin().await?;
        if !roles::set_deleted(&mut tx, &name, deleted).await? {
            return Err(StratusError::not_found("role", &name));
        }
        let row = roles::get(&mut tx, &name)
            .await?
            .ok_or_else(|| StratusError::not_found("role", &name))?;
        tx.commit().await.map_err(db_err)?;
        Ok(row)
    }
}

fn custom_role_name(project: &str, role_id: &str) -> String {
    format!("projects/{project}/roles/{role_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predefined_table_is_exactly_seven() {
        assert_eq!(PREDEFINED.len(), 7);
        assert!(PREDEFINED.iter().all(|(name, _, perms)| {
            name.starts_with("roles/") && !perms.is_empty()
        }));
    }

    #[test]
    fn role_id_shape() {
        assert!(ROLE_ID.is_match("myRole"));
        assert!(ROLE_ID.is_match("role_1.beta"));
        assert!(!ROLE_ID.is_match("ab"));
        assert!(!ROLE_ID.is_match("has-hyphen"));
        assert!(!ROLE_ID.is_match("1leading"));
    }
}
