//! Bucket rows. Bucket names are unique across the whole store; the
//! UNIQUE constraint on `name` is the arbiter when two creates race.

use sqlx::SqliteConnection;
use stratus_core::Result;

use crate::error::db_err;
use crate::model::BucketRow;

pub async fn insert(conn: &mut SqliteConnection, bucket: &BucketRow) -> Result<()> {
    sqlx::query(
        "INSERT INTO buckets (id, name, project_id, location, storage_class,
            versioning_enabled, lifecycle_rules_json, metageneration, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&bucket.id)
    .bind(&bucket.name)
    .bind(&bucket.project_id)
    .bind(&bucket.location)
    .bind(&bucket.storage_class)
    .bind(bucket.versioning_enabled)
    .bind(&bucket.lifecycle_rules_json)
    .bind(bucket.metageneration)
    .bind(bucket.created_at)
    .bind(bucket.updated_at)
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

pub async fn get(conn: &mut SqliteConnection, id: &str) -> Result<Option<BucketRow>> {
    sqlx::query_as::<_, BucketRow>("SELECT * FROM buckets WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err)
}

pub async fn get_by_name(conn: &mut SqliteConnection, name: &str) -> Result<Option<BucketRow>> {
    sqlx::query_as::<_, BucketRow>("SELECT * FROM buckets WHERE name = ?")
        .bind(name)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err)
}

pub async fn list_by_project(
    conn: &mut SqliteConnection,
    project_id: &str,
) -> Result<Vec<BucketRow>> {
    sqlx::query_as::<_, BucketRow>(
        "SELECT * FROM buckets WHERE project_id = ? ORDER BY name",
    )
    .bind(project_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(db_err)
}

/// Buckets that carry at least one lifecycle rule; the lifecycle worker
/// scans only these.
pub async fn list_with_lifecycle(conn: &mut SqliteConnection) -> Result<Vec<BucketRow>> {
    sqlx::query_as::<_, BucketRow>(
        "SELECT * FROM buckets WHERE lifecycle_rules_json NOT IN ('', '[]') ORDER BY name",
    )
    .fetch_all(&mut *conn)
    .await
    .map_err(db_err)
}

pub async fn list_all(conn: &mut SqliteConnection) -> Result<Vec<BucketRow>> {
    sqlx::query_as::<_, BucketRow>("SELECT * FROM buckets ORDER BY name")
        .fetch_all(&mut *conn)
        .await
        .map_err(db_err)
}

/// Persist metadata mutations (versioning, lifecycle, class). The caller
/// bumps `metageneration` before calling.
pub async fn update(conn: &mut SqliteConnection, bucket: &BucketRow) -> Result<()> {
    sqlx::query(
        "UPDATE buckets SET storage_class = ?, versioning_enabled = ?,
            lifecycle_rules_json = ?, metageneration = ?, updated_at = ?
         WHERE id = ?",
    )
    .bind(&bucket.storage_class)
    .bind(bucket.versioning_enabled)
    .bind(&bucket.lifecycle_rules_json)
    .bind(bucket.metageneration)
    .bind(bucket.updated_at)
    .bind(&bucket.id)
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

pub async fn delete(conn: &mut SqliteConnection, id: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM buckets WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
    Ok(result.rows_affected() > 0)
}

/// Object rows under the bucket, soft-deleted ones included.
pub async fn count_objects(conn: &mut SqliteConnection, bucket_id: &str) -> Result<i64> {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM objects WHERE bucket_id = ?")
        .bind(bucket_id)
        .fetch_one(&mut *conn)
        .await
        .map_err(db_err)
}

/// Version rows under the bucket, historical ones included.
pub async fn count_versions(conn: &mut SqliteConnection, bucket_id: &str) -> Result<i64> {
    sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM object_versions v
         JOIN objects o ON o.id = v.object_id
         WHERE o.bucket_id = ?",
    )
    .bind(bucket_id)
    .fetch_one(&mut *conn)
    .await
    .map_err(db_err)
}
