//! IAM policy rows. The etag compare-and-swap lives in the service; this
//! module only reads and replaces rows inside the caller's transaction.

use sqlx::SqliteConnection;
use stratus_core::Result;

use crate::error::db_err;
use crate::model::PolicyRow;

pub async fn get(
    conn: &mut SqliteConnection,
    resource_name: &str,
) -> Result<Option<PolicyRow>> {
    sqlx::query_as::<_, PolicyRow>("SELECT * FROM iam_policies WHERE resource_name = ?")
        .bind(resource_name)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err)
}

pub async fn upsert(conn: &mut SqliteConnection, policy: &PolicyRow) -> Result<()> {
    sqlx::query(
        "INSERT INTO iam_policies (resource_name, version, etag, bindings_json)
         VALUES (?, ?, ?, ?)
         ON CONFLICT(resource_name) DO UPDATE SET
            version = excluded.version,
            etag = excluded.etag,
            bindings_json = excluded.bindings_json",
    )
    .bind(&policy.resource_name)
    .bind(policy.version)
    .bind(&policy.etag)
    .bind(&policy.bindings_json)
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;
    Ok(())
}
