//! Firewall and route rows.

use sqlx::SqliteConnection;
use stratus_core::Result;

use crate::error::db_err;
use crate::model::{FirewallRow, RouteRow};

pub async fn insert(conn: &mut SqliteConnection, rule: &FirewallRow) -> Result<()> {
    sqlx::query(
        "INSERT INTO firewall_rules (id, name, network_id, direction, priority,
            source_ranges_json, destination_ranges_json, source_tags_json, target_tags_json,
            allowed_json, denied_json, disabled, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&rule.id)
    .bind(&rule.name)
    .bind(&rule.network_id)
    .bind(&rule.direction)
    .bind(rule.priority)
    .bind(&rule.source_ranges_json)
    .bind(&rule.destination_ranges_json)
    .bind(&rule.source_tags_json)
    .bind(&rule.target_tags_json)
    .bind(&rule.allowed_json)
    .bind(&rule.denied_json)
    .bind(rule.disabled)
    .bind(rule.created_at)
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

/// Firewall names are unique process-wide, so lookup needs no project.
pub async fn get_by_name(conn: &mut SqliteConnection, name: &str) -> Result<Option<FirewallRow>> {
    sqlx::query_as::<_, FirewallRow>("SELECT * FROM firewall_rules WHERE name = ?")
        .bind(name)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err)
}

pub async fn list_by_project(
    conn: &mut SqliteConnection,
    project_id: &str,
) -> Result<Vec<FirewallRow>> {
    sqlx::query_as::<_, FirewallRow>(
        "SELECT f.* FROM firewall_rules f
         JOIN networks n ON n.id = f.network_id
         WHERE n.project_id = ?
         ORDER BY f.name",
    )
    .bind(project_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(db_err)
}

pub async fn delete(conn: &mut SqliteConnection, id: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM firewall_rules WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
    Ok(result.rows_affected() > 0)
}

pub async fn insert_route(conn: &mut SqliteConnection, route: &RouteRow) -> Result<()> {
    sqlx::query(
        "INSERT INTO routes (id, name, network_id, dest_range, priority, next_hop_gateway,
            next_hop_ip, next_hop_instance, next_hop_network, description)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&route.id)
    .bind(&route.name)
    .bind(&route.network_id)
    .bind(&route.dest_range)
    .bind(route.priority)
    .bind(&route.next_hop_gateway)
    .bind(&route.next_hop_ip)
    .bind(&route.next_hop_instance)
    .bind(&route.next_hop_network)
    .bind(&route.description)
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

pub async fn get_route_by_name(
    conn: &mut SqliteConnection,
    project_id: &str,
    name: &str,
) -> Result<Option<RouteRow>> {
    sqlx::query_as::<_, RouteRow>(
        "SELECT r.* FROM routes r
         JOIN networks n ON n.id = r.network_id
         WHERE n.project_id = ? AND r.name = ?",
    )
    .bind(project_id)
    .bind(name)
    .fetch_optional(&mut *conn)
    .await
    .map_err(db_err)
}

pub async fn list_routes_by_project(
    conn: &mut SqliteConnection,
    project_id: &str,
) -> Result<Vec<RouteRow>> {
    sqlx::query_as::<_, RouteRow>(
        "SELECT r.* FROM routes r
         JOIN networks n ON n.id = r.network_id
         WHERE n.project_id = ?
         ORDER BY r.name",
    )
    .bind(project_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(db_err)
}

pub async fn delete_route(conn: &mut SqliteConnection, id: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM routes WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
    Ok(result.rows_affected() > 0)
}

pub async fn delete_routes_by_network(
    conn: &mut SqliteConnection,
    network_id: &str,
) -> Result<u64> {
    let result = sqlx::query("DELETE FROM routes WHERE network_id = ?")
        .bind(network_id)
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
    Ok(result.rows_affected())
}

pub async fn delete_firewalls_by_network(
    conn: &mut SqliteConnection,
    network_id: &str,
) -> Result<u64> {
    let result = sqlx::query("DELETE FROM firewall_rules WHERE network_id = ?")
        .bind(network_id)
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
    Ok(result.rows_affected())
}
