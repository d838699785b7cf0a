//! Resumable-upload sessions and signed-URL tokens. Both are process-wide
//! rows with explicit expiry lifecycles rather than project-owned
//! resources.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use stratus_core::Result;

use crate::error::db_err;
use crate::model::{ResumableSessionRow, SignedUrlRow};

pub async fn insert(conn: &mut SqliteConnection, session: &ResumableSessionRow) -> Result<()> {
    sqlx::query(
        "INSERT INTO resumable_sessions (id, bucket_id, object_name, content_type, temp_path,
            total_size, bytes_received, if_generation_match, if_metageneration_match, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&session.id)
    .bind(&session.bucket_id)
    .bind(&session.object_name)
    .bind(&session.content_type)
    .bind(&session.temp_path)
    .bind(session.total_size)
    .bind(session.bytes_received)
    .bind(session.if_generation_match)
    .bind(session.if_metageneration_match)
    .bind(session.created_at)
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

pub async fn get(conn: &mut SqliteConnection, id: &str) -> Result<Option<ResumableSessionRow>> {
    sqlx::query_as::<_, ResumableSessionRow>("SELECT * FROM resumable_sessions WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err)
}

pub async fn set_bytes_received(
    conn: &mut SqliteConnection,
    id: &str,
    bytes_received: i64,
) -> Result<()> {
    sqlx::query("UPDATE resumable_sessions SET bytes_received = ? WHERE id = ?")
        .bind(bytes_received)
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
    Ok(())
}

pub async fn delete(conn: &mut SqliteConnection, id: &str) -> Result<()> {
    sqlx::query("DELETE FROM resumable_sessions WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
    Ok(())
}

/// Sessions started before `cutoff`, for the TTL sweep.
pub async fn list_older_than(
    conn: &mut SqliteConnection,
    cutoff: DateTime<Utc>,
) -> Result<Vec<ResumableSessionRow>> {
    sqlx::query_as::<_, ResumableSessionRow>(
        "SELECT * FROM resumable_sessions WHERE created_at < ?",
    )
    .bind(cutoff)
    .fetch_all(&mut *conn)
    .await
    .map_err(db_err)
}

pub async fn insert_signed_url(conn: &mut SqliteConnection, row: &SignedUrlRow) -> Result<()> {
    sqlx::query(
        "INSERT INTO signed_url_tokens (token, bucket, object, method, expires_at)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&row.token)
    .bind(&row.bucket)
    .bind(&row.object)
    .bind(&row.method)
    .bind(row.expires_at)
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

pub async fn get_signed_url(
    conn: &mut SqliteConnection,
    token: &str,
) -> Result<Option<SignedUrlRow>> {
    sqlx::query_as::<_, SignedUrlRow>("SELECT * FROM signed_url_tokens WHERE token = ?")
        .bind(token)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err)
}

pub async fn delete_expired_signed_urls(
    conn: &mut SqliteConnection,
    now: DateTime<Utc>,
) -> Result<u64> {
    let result = sqlx::query("DELETE FROM signed_url_tokens WHERE expires_at < ?")
        .bind(now)
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
    Ok(result.rows_affected())
}
