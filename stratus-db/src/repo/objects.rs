//! Object and version rows.
//!
//! The UNIQUE constraint on `(object_id, generation)` is the linearization
//! point for concurrent uploads to the same name: both writers compute the
//! next generation inside their transaction, and the loser's insert
//! surfaces a conflict that the service retries.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use stratus_core::Result;

use crate::error::db_err;
use crate::model::{ObjectRow, VersionRow};

pub async fn get(
    conn: &mut SqliteConnection,
    bucket_id: &str,
    name: &str,
) -> Result<Option<ObjectRow>> {
    sqlx::query_as::<_, ObjectRow>("SELECT * FROM objects WHERE bucket_id = ? AND name = ?")
        .bind(bucket_id)
        .bind(name)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err)
}

pub async fn insert(conn: &mut SqliteConnection, object: &ObjectRow) -> Result<()> {
    sqlx::query(
        "INSERT INTO objects (id, bucket_id, name, current_generation, generation_seq,
            content_type, storage_class, size, md5, crc32c, storage_path, deleted,
            created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&object.id)
    .bind(&object.bucket_id)
    .bind(&object.name)
    .bind(object.current_generation)
    .bind(object.generation_seq)
    .bind(&object.content_type)
    .bind(&object.storage_class)
    .bind(object.size)
    .bind(&object.md5)
    .bind(&object.crc32c)
    .bind(&object.storage_path)
    .bind(object.deleted)
    .bind(object.created_at)
    .bind(object.updated_at)
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

pub async fn update(conn: &mut SqliteConnection, object: &ObjectRow) -> Result<()> {
    sqlx::query(
        "UPDATE objects SET current_generation = ?, generation_seq = ?, content_type = ?,
            storage_class = ?, size = ?, md5 = ?, crc32c = ?, storage_path = ?, deleted = ?,
            updated_at = ?
         WHERE id = ?",
    )
    .bind(object.current_generation)
    .bind(object.generation_seq)
    .bind(&object.content_type)
    .bind(&object.storage_class)
    .bind(object.size)
    .bind(&object.md5)
    .bind(&object.crc32c)
    .bind(&object.storage_path)
    .bind(object.deleted)
    .bind(object.updated_at)
    .bind(&object.id)
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

pub async fn delete(conn: &mut SqliteConnection, id: &str) -> Result<()> {
    sqlx::query("DELETE FROM objects WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
    Ok(())
}

/// All object rows under a prefix, soft-deleted included.
pub async fn list_all(
    conn: &mut SqliteConnection,
    bucket_id: &str,
    prefix: &str,
) -> Result<Vec<ObjectRow>> {
    sqlx::query_as::<_, ObjectRow>(
        "SELECT * FROM objects
         WHERE bucket_id = ? AND name >= ? AND name < ?
         ORDER BY name",
    )
    .bind(bucket_id)
    .bind(prefix)
    .bind(prefix_upper_bound(prefix))
    .fetch_all(&mut *conn)
    .await
    .map_err(db_err)
}

/// Exclusive upper bound for a prefix range scan. The empty prefix scans
/// the whole bucket.
fn prefix_upper_bound(prefix: &str) -> String {
    if prefix.is_empty() {
        return "\u{10FFFF}".to_string();
    }
    let mut bytes = prefix.as_bytes().to_vec();
    while let Some(last) = bytes.pop() {
        if last < 0xff {
            bytes.push(last + 1);
            break;
        }
    }
    if bytes.is_empty() {
        "\u{10FFFF}".to_string()
    } else {
        // The increment can land mid-UTF-8; lossy round-trip keeps the
        // bound usable for the TEXT comparison.
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

/// A version row joined with the owning object's listing-relevant columns.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct NamedVersion {
    pub object_name: String,
    pub object_storage_class: Option<String>,
    pub object_updated_at: chrono::DateTime<chrono::Utc>,
    #[sqlx(flatten)]
    pub version: VersionRow,
}

/// Live (current-generation) versions under a prefix, lexicographic by name.
pub async fn list_live_named_versions(
    conn: &mut SqliteConnection,
    bucket_id: &str,
    prefix: &str,
) -> Result<Vec<NamedVersion>> {
    sqlx::query_as::<_, NamedVersion>(
        "SELECT o.name AS object_name, o.storage_class AS object_storage_class,
                o.updated_at AS object_updated_at, v.*
         FROM object_versions v
         JOIN objects o ON o.id = v.object_id
         WHERE o.bucket_id = ? AND o.deleted = 0 AND v.generation = o.current_generation
           AND o.name >= ? AND o.name < ?
         ORDER BY o.name",
    )
    .bind(bucket_id)
    .bind(prefix)
    .bind(prefix_upper_bound(prefix))
    .fetch_all(&mut *conn)
    .await
    .map_err(db_err)
}

/// Every non-deleted version under a prefix, `(name asc, generation desc)`.
pub async fn list_all_named_versions(
    conn: &mut SqliteConnection,
    bucket_id: &str,
    prefix: &str,
) -> Result<Vec<NamedVersion>> {
    sqlx::query_as::<_, NamedVersion>(
        "SELECT o.name AS object_name, o.storage_class AS object_storage_class,
                o.updated_at AS object_updated_at, v.*
         FROM object_versions v
         JOIN objects o ON o.id = v.object_id
         WHERE o.bucket_id = ? AND v.deleted_at IS NULL
           AND o.name >= ? AND o.name < ?
         ORDER BY o.name, v.generation DESC",
    )
    .bind(bucket_id)
    .bind(prefix)
    .bind(prefix_upper_bound(prefix))
    .fetch_all(&mut *conn)
    .await
    .map_err(db_err)
}

pub async fn insert_version(conn: &mut SqliteConnection, version: &VersionRow) -> Result<()> {
    sqlx::query(
        "INSERT INTO object_versions (id, object_id, generation, storage_path, size,
            md5, crc32c, content_type, created_at, deleted_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&version.id)
    .bind(&version.object_id)
    .bind(version.generation)
    .bind(&version.storage_path)
    .bind(version.size)
    .bind(&version.md5)
    .bind(&version.crc32c)
    .bind(&version.content_type)
    .bind(version.created_at)
    .bind(version.deleted_at)
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

pub async fn get_version(
    conn: &mut SqliteConnection,
    object_id: &str,
    generation: i64,
) -> Result<Option<VersionRow>> {
    sqlx::query_as::<_, VersionRow>(
        "SELECT * FROM object_versions WHERE object_id = ? AND generation = ?",
    )
    .bind(object_id)
    .bind(generation)
    .fetch_optional(&mut *conn)
    .await
    .map_err(db_err)
}

/// Versions of one object, newest first. Soft-deleted rows included; the
/// caller filters on `deleted_at` when it only wants live history.
pub async fn list_versions(
    conn: &mut SqliteConnection,
    object_id: &str,
) -> Result<Vec<VersionRow>> {
    sqlx::query_as::<_, VersionRow>(
        "SELECT * FROM object_versions WHERE object_id = ? ORDER BY generation DESC",
    )
    .bind(object_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(db_err)
}

pub async fn mark_version_deleted(
    conn: &mut SqliteConnection,
    id: &str,
    when: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("UPDATE object_versions SET deleted_at = ? WHERE id = ?")
        .bind(when)
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
    Ok(())
}

pub async fn delete_version(conn: &mut SqliteConnection, id: &str) -> Result<()> {
    sqlx::query("DELETE FROM object_versions WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
    Ok(())
}

/// Live versions of the same object newer than `generation`.
pub async fn count_newer_live(
    conn: &mut SqliteConnection,
    object_id: &str,
    generation: i64,
) -> Result<i64> {
    sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM object_versions
         WHERE object_id = ? AND generation > ? AND deleted_at IS NULL",
    )
    .bind(object_id)
    .bind(generation)
    .fetch_one(&mut *conn)
    .await
    .map_err(db_err)
}

/// Every payload path referenced by any version row of the bucket. The GC
/// sweep removes disk files not in this set.
pub async fn list_referenced_paths(
    conn: &mut SqliteConnection,
    bucket_id: &str,
) -> Result<Vec<String>> {
    sqlx::query_scalar::<_, String>(
        "SELECT v.storage_path FROM object_versions v
         JOIN objects o ON o.id = v.object_id
         WHERE o.bucket_id = ?",
    )
    .bind(bucket_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(db_err)
}
