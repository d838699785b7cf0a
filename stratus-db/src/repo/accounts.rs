//! Service accounts and their keys.

use sqlx::SqliteConnection;
use stratus_core::Result;

use crate::error::db_err;
use crate::model::{ServiceAccountKeyRow, ServiceAccountRow};

pub async fn insert(conn: &mut SqliteConnection, account: &ServiceAccountRow) -> Result<()> {
    sqlx::query(
        "INSERT INTO service_accounts (email, project_id, display_name, description,
            unique_id, oauth2_client_id, disabled, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&account.email)
    .bind(&account.project_id)
    .bind(&account.display_name)
    .bind(&account.description)
    .bind(&account.unique_id)
    .bind(&account.oauth2_client_id)
    .bind(account.disabled)
    .bind(account.created_at)
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

pub async fn get(conn: &mut SqliteConnection, email: &str) -> Result<Option<ServiceAccountRow>> {
    sqlx::query_as::<_, ServiceAccountRow>("SELECT * FROM service_accounts WHERE email = ?")
        .bind(email)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err)
}

pub async fn list_by_project(
    conn: &mut SqliteConnection,
    project_id: &str,
) -> Result<Vec<ServiceAccountRow>> {
    sqlx::query_as::<_, ServiceAccountRow>(
        "SELECT * FROM service_accounts WHERE project_id = ? ORDER BY email",
    )
    .bind(project_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(db_err)
}

pub async fn set_disabled(
    conn: &mut SqliteConnection,
    email: &str,
    disabled: bool,
) -> Result<()> {
    sqlx::query("UPDATE service_accounts SET disabled = ? WHERE email = ?")
        .bind(disabled)
        .bind(email)
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
    Ok(())
}

pub async fn update_display(
    conn: &mut SqliteConnection,
    email: &str,
    display_name: Option<&str>,
    description: Option<&str>,
) -> Result<()> {
    sqlx::query("UPDATE service_accounts SET display_name = ?, description = ? WHERE email = ?")
        .bind(display_name)
        .bind(description)
        .bind(email)
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
    Ok(())
}

pub async fn delete(conn: &mut SqliteConnection, email: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM service_accounts WHERE email = ?")
        .bind(email)
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
    Ok(result.rows_affected() > 0)
}

pub async fn insert_key(conn: &mut SqliteConnection, key: &ServiceAccountKeyRow) -> Result<()> {
    sqlx::query(
        "INSERT INTO service_account_keys (id, service_account_email, algorithm,
            private_key_data, valid_after, valid_before)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&key.id)
    .bind(&key.service_account_email)
    .bind(&key.algorithm)
    .bind(&key.private_key_data)
    .bind(key.valid_after)
    .bind(key.valid_before)
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

pub async fn get_key(
    conn: &mut SqliteConnection,
    email: &str,
    id: &str,
) -> Result<Option<ServiceAccountKeyRow>> {
    sqlx::query_as::<_, ServiceAccountKeyRow>(
        "SELECT * FROM service_account_keys WHERE service_account_email = ? AND id = ?",
    )
    .bind(email)
    .bind(id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(db_err)
}

pub async fn list_keys(
    conn: &mut SqliteConnection,
    email: &str,
) -> Result<Vec<ServiceAccountKeyRow>> {
    sqlx::query_as::<_, ServiceAccountKeyRow>(
        "SELECT * FROM service_account_keys WHERE service_account_email = ? ORDER BY valid_after",
    )
    .bind(email)
    .fetch_all(&mut *conn)
    .await
    .map_err(db_err)
}

pub async fn delete_key(conn: &mut SqliteConnection, email: &str, id: &str) -> Result<bool> {
    let result =
        sqlx::query("DELETE FROM service_account_keys WHERE service_account_email = ? AND id = ?")
            .bind(email)
            .bind(id)
            .execute(&mut *conn)
            .await
            .map_err(db_err)?;
    Ok(result.rows_affected() > 0)
}
