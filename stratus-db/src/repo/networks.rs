//! Network and subnet rows.
//!
//! IP allocation is a single `UPDATE ... RETURNING` so the offset handout
//! serializes on the row: two concurrent allocations in the same subnet
//! always observe distinct offsets.

use sqlx::SqliteConnection;
use stratus_core::Result;

use crate::error::db_err;
use crate::model::{NetworkRow, SubnetRow};

pub async fn insert(conn: &mut SqliteConnection, network: &NetworkRow) -> Result<()> {
    sqlx::query(
        "INSERT INTO networks (id, name, project_id, auto_create_subnetworks, cidr_range,
            host_network_id, host_network_name, routing_mode, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&network.id)
    .bind(&network.name)
    .bind(&network.project_id)
    .bind(network.auto_create_subnetworks)
    .bind(&network.cidr_range)
    .bind(&network.host_network_id)
    .bind(&network.host_network_name)
    .bind(&network.routing_mode)
    .bind(network.created_at)
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

pub async fn get_by_name(
    conn: &mut SqliteConnection,
    project_id: &str,
    name: &str,
) -> Result<Option<NetworkRow>> {
    sqlx::query_as::<_, NetworkRow>(
        "SELECT * FROM networks WHERE project_id = ? AND name = ?",
    )
    .bind(project_id)
    .bind(name)
    .fetch_optional(&mut *conn)
    .await
    .map_err(db_err)
}

pub async fn get(conn: &mut SqliteConnection, id: &str) -> Result<Option<NetworkRow>> {
    sqlx::query_as::<_, NetworkRow>("SELECT * FROM networks WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err)
}

pub async fn list_by_project(
    conn: &mut SqliteConnection,
    project_id: &str,
) -> Result<Vec<NetworkRow>> {
    sqlx::query_as::<_, NetworkRow>(
        "SELECT * FROM networks WHERE project_id = ? ORDER BY name",
    )
    .bind(project_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(db_err)
}

pub async fn delete(conn: &mut SqliteConnection, id: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM networks WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
    Ok(result.rows_affected() > 0)
}

pub async fn insert_subnet(conn: &mut SqliteConnection, subnet: &SubnetRow) -> Result<()> {
    sqlx::query(
        "INSERT INTO subnets (id, name, network_id, region, ip_cidr_range, gateway_ip,
            next_available_ip, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&subnet.id)
    .bind(&subnet.name)
    .bind(&subnet.network_id)
    .bind(&subnet.region)
    .bind(&subnet.ip_cidr_range)
    .bind(&subnet.gateway_ip)
    .bind(subnet.next_available_ip)
    .bind(subnet.created_at)
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

pub async fn get_subnet(conn: &mut SqliteConnection, id: &str) -> Result<Option<SubnetRow>> {
    sqlx::query_as::<_, SubnetRow>("SELECT * FROM subnets WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err)
}

/// Subnets are addressed by `(project, region, name)` on the wire.
pub async fn get_subnet_by_name(
    conn: &mut SqliteConnection,
    project_id: &str,
    region: &str,
    name: &str,
) -> Result<Option<SubnetRow>> {
    sqlx::query_as::<_, SubnetRow>(
        "SELECT s.* FROM subnets s
         JOIN networks n ON n.id = s.network_id
         WHERE n.project_id = ? AND s.region = ? AND s.name = ?",
    )
    .bind(project_id)
    .bind(region)
    .bind(name)
    .fetch_optional(&mut *conn)
    .await
    .map_err(db_err)
}

pub async fn list_subnets_by_network(
    conn: &mut SqliteConnection,
    network_id: &str,
) -> Result<Vec<SubnetRow>> {
    sqlx::query_as::<_, SubnetRow>(
        "SELECT * FROM subnets WHERE network_id = ? ORDER BY region, name",
    )
    .bind(network_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(db_err)
}

pub async fn list_subnets_by_project(
    conn: &mut SqliteConnection,
    project_id: &str,
) -> Result<Vec<SubnetRow>> {
    sqlx::query_as::<_, SubnetRow>(
        "SELECT s.* FROM subnets s
         JOIN networks n ON n.id = s.network_id
         WHERE n.project_id = ?
         ORDER BY s.region, s.name",
    )
    .bind(project_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(db_err)
}

pub async fn delete_subnet(conn: &mut SqliteConnection, id: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM subnets WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
    Ok(result.rows_affected() > 0)
}

pub async fn delete_subnets_by_network(
    conn: &mut SqliteConnection,
    network_id: &str,
) -> Result<u64> {
    let result = sqlx::query("DELETE FROM subnets WHERE network_id = ?")
        .bind(network_id)
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
    Ok(result.rows_affected())
}

/// Hand out the next offset of the subnet and advance the cursor in one
/// statement. Returns the offset that was taken. The caller converts it
/// to an address and decides whether the subnet is exhausted.
pub async fn take_next_ip_offset(conn: &mut SqliteConnection, subnet_id: &str) -> Result<i64> {
    let next: i64 = sqlx::query_scalar(
        "UPDATE subnets SET next_available_ip = next_available_ip + 1
         WHERE id = ?
         RETURNING next_available_ip - 1",
    )
    .bind(subnet_id)
    .fetch_one(&mut *conn)
    .await
    .map_err(db_err)?;
    Ok(next)
}
