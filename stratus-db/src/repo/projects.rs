//! Project rows. Projects are created lazily: the first resource created
//! under an unknown project id brings the project into existence.

use chrono::Utc;
use sqlx::SqliteConnection;
use stratus_core::Result;

use crate::error::db_err;
use crate::model::ProjectRow;

pub async fn get(conn: &mut SqliteConnection, id: &str) -> Result<Option<ProjectRow>> {
    sqlx::query_as::<_, ProjectRow>("SELECT * FROM projects WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err)
}

/// Fetch the project, creating it on first reference.
pub async fn ensure(conn: &mut SqliteConnection, id: &str) -> Result<ProjectRow> {
    if let Some(existing) = get(&mut *conn, id).await? {
        return Ok(existing);
    }
    let row = ProjectRow {
        id: id.to_string(),
        name: id.to_string(),
        number: project_number(id),
        created_at: Utc::now(),
    };
    sqlx::query("INSERT OR IGNORE INTO projects (id, name, number, created_at) VALUES (?, ?, ?, ?)")
        .bind(&row.id)
        .bind(&row.name)
        .bind(row.number)
        .bind(row.created_at)
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
    // A concurrent creator may have won the insert; re-read either way.
    Ok(get(&mut *conn, id).await?.unwrap_or(row))
}

pub async fn delete(conn: &mut SqliteConnection, id: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM projects WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
    Ok(result.rows_affected() > 0)
}

/// A stable 12-digit project number derived from the id.
fn project_number(id: &str) -> i64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in id.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    100_000_000_000 + (hash % 900_000_000_000) as i64
}
