//! Long-running-operation records. The emulator completes every mutation
//! synchronously, so operations are born `DONE`; the rows exist for API
//! shape compatibility and as an audit trail of failures.

use chrono::Utc;
use sqlx::SqliteConnection;
use stratus_core::{OpContext, Result, StratusError};
use stratus_db::model::{OperationRow, OperationStatus};
use stratus_db::repo::instances as ops_repo;
use uuid::Uuid;

use crate::ComputeService;

/// Build a finished operation row. `scope` is the URL scope segment
/// (`global`, `zones/{zone}` or `regions/{region}`).
pub(crate) fn done_operation(
    project: &str,
    scope: &str,
    op_type: &str,
    target_link: &str,
    error: Option<String>,
) -> OperationRow {
    let now = Utc::now();
    let id = Uuid::new_v4();
    OperationRow {
        id: id.to_string(),
        name: format!("operation-{}", id.simple()),
        op_type: op_type.to_string(),
        target_link: target_link.to_string(),
        status: OperationStatus::Done,
        progress: 100,
        project_id: project.to_string(),
        scope: scope.to_string(),
        insert_time: now,
        start_time: Some(now),
        end_time: Some(now),
        error,
    }
}

/// Insert the row inside the caller's transaction.
pub(crate) async fn record(
    conn: &mut SqliteConnection,
    operation: &OperationRow,
) -> Result<()> {
    ops_repo::insert_operation(conn, operation).await
}

impl ComputeService {
    pub async fn get_operation(
        &self,
        ctx: &OpContext,
        project: &str,
        scope: &str,
        name: &str,
    ) -> Result<OperationRow> {
        ctx.check()?;
        let mut conn = self.acquire().await?;
        ops_repo::get_operation(&mut conn, project, scope, name)
            .await?
            .ok_or_else(|| StratusError::not_found("operation", name))
    }

    pub async fn list_operations(
        &self,
        ctx: &OpContext,
        project: &str,
        scope: &str,
    ) -> Result<Vec<OperationRow>> {
        ctx.check()?;
        let mut conn = self.acquire().await?;
        ops_repo::list_operations(&mut conn, project, scope).await
    }
}
