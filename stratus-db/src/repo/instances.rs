//! Instance and operation rows.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use stratus_core::Result;

use crate::error::db_err;
use crate::model::{InstanceRow, InstanceState, OperationRow};

pub async fn insert(conn: &mut SqliteConnection, instance: &InstanceRow) -> Result<()> {
    sqlx::query(
        "INSERT INTO instances (id, name, project_id, zone, machine_type, image, cpu,
            memory_mb, state, container_id, network_id, subnet_id, internal_ip,
            metadata_json, labels_json, tags_json, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&instance.id)
    .bind(&instance.name)
    .bind(&instance.project_id)
    .bind(&instance.zone)
    .bind(&instance.machine_type)
    .bind(&instance.image)
    .bind(instance.cpu)
    .bind(instance.memory_mb)
    .bind(instance.state)
    .bind(&instance.container_id)
    .bind(&instance.network_id)
    .bind(&instance.subnet_id)
    .bind(&instance.internal_ip)
    .bind(&instance.metadata_json)
    .bind(&instance.labels_json)
    .bind(&instance.tags_json)
    .bind(instance.created_at)
    .bind(instance.updated_at)
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

pub async fn get_by_name(
    conn: &mut SqliteConnection,
    project_id: &str,
    zone: &str,
    name: &str,
) -> Result<Option<InstanceRow>> {
    sqlx::query_as::<_, InstanceRow>(
        "SELECT * FROM instances WHERE project_id = ? AND zone = ? AND name = ?",
    )
    .bind(project_id)
    .bind(zone)
    .bind(name)
    .fetch_optional(&mut *conn)
    .await
    .map_err(db_err)
}

pub async fn get(conn: &mut SqliteConnection, id: &str) -> Result<Option<InstanceRow>> {
    sqlx::query_as::<_, InstanceRow>("SELECT * FROM instances WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err)
}

pub async fn list_by_zone(
    conn: &mut SqliteConnection,
    project_id: &str,
    zone: &str,
) -> Result<Vec<InstanceRow>> {
    sqlx::query_as::<_, InstanceRow>(
        "SELECT * FROM instances WHERE project_id = ? AND zone = ? ORDER BY name",
    )
    .bind(project_id)
    .bind(zone)
    .fetch_all(&mut *conn)
    .await
    .map_err(db_err)
}

/// Every instance row, for the reconciler's full pass.
pub async fn list_all(conn: &mut SqliteConnection) -> Result<Vec<InstanceRow>> {
    sqlx::query_as::<_, InstanceRow>("SELECT * FROM instances ORDER BY created_at")
        .fetch_all(&mut *conn)
        .await
        .map_err(db_err)
}

pub async fn set_state(
    conn: &mut SqliteConnection,
    id: &str,
    state: InstanceState,
    container_id: Option<&str>,
    updated_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("UPDATE instances SET state = ?, container_id = ?, updated_at = ? WHERE id = ?")
        .bind(state)
        .bind(container_id)
        .bind(updated_at)
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
    Ok(())
}

pub async fn delete(conn: &mut SqliteConnection, id: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM instances WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
    Ok(result.rows_affected() > 0)
}

pub async fn count_by_network(conn: &mut SqliteConnection, network_id: &str) -> Result<i64> {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM instances WHERE network_id = ?")
        .bind(network_id)
        .fetch_one(&mut *conn)
        .await
        .map_err(db_err)
}

pub async fn insert_operation(conn: &mut SqliteConnection, op: &OperationRow) -> Result<()> {
    sqlx::query(
        "INSERT INTO operations (id, name, op_type, target_link, status, progress,
            project_id, scope, insert_time, start_time, end_time, error)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&op.id)
    .bind(&op.name)
    .bind(&op.op_type)
    .bind(&op.target_link)
    .bind(op.status)
    .bind(op.progress)
    .bind(&op.project_id)
    .bind(&op.scope)
    .bind(op.insert_time)
    .bind(op.start_time)
    .bind(op.end_time)
    .bind(&op.error)
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

pub async fn get_operation(
    conn: &mut SqliteConnection,
    project_id: &str,
    scope: &str,
    name: &str,
) -> Result<Option<OperationRow>> {
    sqlx::query_as::<_, OperationRow>(
        "SELECT * FROM operations WHERE project_id = ? AND scope = ? AND name = ?",
    )
    .bind(project_id)
    .bind(scope)
    .bind(name)
    .fetch_optional(&mut *conn)
    .await
    .map_err(db_err)
}

pub async fn list_operations(
    conn: &mut SqliteConnection,
    project_id: &str,
    scope: &str,
) -> Result<Vec<OperationRow>> {
    sqlx::query_as::<_, OperationRow>(
        "SELECT * FROM operations WHERE project_id = ? AND scope = ? ORDER BY insert_time DESC",
    )
    .bind(project_id)
    .bind(scope)
    .fetch_all(&mut *conn)
    .await
    .map_err(db_err)
}
