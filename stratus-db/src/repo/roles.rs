//! Role rows: predefined roles seeded at startup plus project-scoped
//! custom roles with soft delete.

use sqlx::SqliteConnection;
use stratus_core::Result;

use crate::error::db_err;
use crate::model::RoleRow;

pub async fn insert(conn: &mut SqliteConnection, role: &RoleRow) -> Result<()> {
    sqlx::query(
        "INSERT INTO roles (name, title, included_permissions_json, stage,
            is_custom, project_id, deleted)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&role.name)
    .bind(&role.title)
    .bind(&role.included_permissions_json)
    .bind(&role.stage)
    .bind(role.is_custom)
    .bind(&role.project_id)
    .bind(role.deleted)
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

/// Idempotent seeding insert for predefined roles.
pub async fn insert_if_absent(conn: &mut SqliteConnection, role: &RoleRow) -> Result<()> {
    sqlx::query(
        "INSERT OR IGNORE INTO roles (name, title, included_permissions_json, stage,
            is_custom, project_id, deleted)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&role.name)
    .bind(&role.title)
    .bind(&role.included_permissions_json)
    .bind(&role.stage)
    .bind(role.is_custom)
    .bind(&role.project_id)
    .bind(role.deleted)
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

pub async fn get(conn: &mut SqliteConnection, name: &str) -> Result<Option<RoleRow>> {
    sqlx::query_as::<_, RoleRow>("SELECT * FROM roles WHERE name = ?")
        .bind(name)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err)
}

pub async fn list_predefined(conn: &mut SqliteConnection) -> Result<Vec<RoleRow>> {
    sqlx::query_as::<_, RoleRow>(
        "SELECT * FROM roles WHERE is_custom = 0 AND deleted = 0 ORDER BY name",
    )
    .fetch_all(&mut *conn)
    .await
    .map_err(db_err)
}

/// Custom roles of a project. Soft-deleted rows are listed only when
/// `show_deleted` is set, matching the public API.
pub async fn list_custom(
    conn: &mut SqliteConnection,
    project_id: &str,
    show_deleted: bool,
) -> Result<Vec<RoleRow>> {
    let sql = if show_deleted {
        "SELECT * FROM roles WHERE project_id = ? AND is_custom = 1 ORDER BY name"
    } else {
        "SELECT * FROM roles WHERE project_id = ? AND is_custom = 1 AND deleted = 0 ORDER BY name"
    };
    sqlx::query_as::<_, RoleRow>(sql)
        .bind(project_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(db_err)
}

pub async fn update(conn: &mut SqliteConnection, role: &RoleRow) -> Result<()> {
    sqlx::query(
        "UPDATE roles SET title = ?, included_permissions_json = ?, stage = ?, deleted = ?
         WHERE name = ?",
    )
    .bind(&role.title)
    .bind(&role.included_permissions_json)
    .bind(&role.stage)
    .bind(role.deleted)
    .bind(&role.name)
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

pub async fn set_deleted(
    conn: &mut SqliteConnection,
    name: &str,
    deleted: bool,
) -> Result<bool> {
    let result = sqlx::query("UPDATE roles SET deleted = ? WHERE name = ? AND is_custom = 1")
        .bind(deleted)
        .bind(name)
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
    Ok(result.rows_affected() > 0)
}
