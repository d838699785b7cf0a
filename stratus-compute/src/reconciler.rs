//! The reconciler: a periodic loop converging instance rows with what the
//! container runtime actually reports.
//!
//! It never creates anything. Observed container state flows into the
//! database; containers nothing claims are removed; rows that lost their
//! container and sat in a non-terminal state past a grace period are
//! terminated.

use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use stratus_core::{ErrorKind, OpContext, Result};
use stratus_db::error::db_err;
use stratus_db::model::{InstanceRow, InstanceState};
use stratus_db::repo::instances;
use stratus_runtime::{ContainerStatus, managed_filter};

use crate::ComputeService;

/// Rows without a container older than this are declared terminated.
const MISSING_CONTAINER_GRACE_SECS: i64 = 60;

/// What one pass did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileStats {
    /// Rows whose state was updated to match the runtime.
    pub converged: u64,
    /// Rows deleted because their container is gone.
    pub rows_removed: u64,
    /// Unclaimed containers removed.
    pub orphans_removed: u64,
    /// Container-less rows pushed to TERMINATED after the grace period.
    pub stale_terminated: u64,
}

/// Periodic convergence over one [`ComputeService`].
#[derive(Clone)]
pub struct Reconciler {
    service: ComputeService,
    interval: StdDuration,
}

impl Reconciler {
    pub fn new(service: ComputeService, interval: StdDuration) -> Self {
        Self { service, interval }
    }

    /// Run forever. Spawn on the runtime; aborting the task stops the loop.
    pub async fn run(self) {
        let ctx = OpContext::background();
        loop {
            tokio::time::sleep(self.interval).await;
            match self.tick(&ctx).await {
                Ok(stats) if stats == ReconcileStats::default() => {
                    tracing::debug!("reconcile tick: converged, nothing to do");
                }
                Ok(stats) => {
                    tracing::info!(?stats, "reconcile tick repaired drift");
                }
                Err(err) if err.kind() == ErrorKind::Unavailable => {
                    tracing::debug!(error = %err, "runtime unreachable; skipping reconcile tick");
                }
                Err(err) => {
                    tracing::warn!(error = %err, "reconcile tick failed");
                }
            }
        }
    }

    /// One full pass.
    pub async fn tick(&self, ctx: &OpContext) -> Result<ReconcileStats> {
        let mut stats = ReconcileStats::default();

        let containers =
            self.service.runtime().list_containers(ctx, &managed_filter()).await?;
        let rows = {
            let mut conn = self.service.acquire().await?;
            instances::list_all(&mut conn).await?
        };

        for row in &rows {
            ctx.check()?;
            self.converge_row(ctx, row, &mut stats).await?;
        }

        // Containers the emulator owns but no row claims are orphans.
        let claimed: Vec<&str> =
            rows.iter().filter_map(|r| r.container_id.as_deref()).collect();
        for container in containers {
            if !claimed.contains(&container.id.as_str()) {
                tracing::warn!(container = %container.id, name = %container.name, "removing orphan container");
                match self.service.runtime().container_remove(ctx, &container.id).await {
                    Ok(()) => stats.orphans_removed += 1,
                    Err(err) if err.kind() == ErrorKind::NotFound => {}
                    Err(err) => {
                        tracing::warn!(container = %container.id, error = %err, "orphan removal failed");
                    }
                }
            }
        }

        Ok(stats)
    }

    async fn converge_row(
        &self,
        ctx: &OpContext,
        row: &InstanceRow,
        stats: &mut ReconcileStats,
    ) -> Result<()> {
        match &row.container_id {
            Some(container_id) => {
                let observed = match self.service.runtime().container_inspect(ctx, container_id).await
                {
                    Ok(info) => Some(info.status),
                    Err(err) if err.kind() == ErrorKind::NotFound => None,
                    Err(err) => return Err(err),
                };

                match observed {
                    // Removed out-of-band: the row goes too.
                    None => {
                        let mut tx = self.service.database().begin().await?;
                        // Re-read inside the transaction so a concurrent
                        // API mutation is not overwritten blindly.
                        if let Some(fresh) = instances::get(&mut tx, &row.id).await? {
                            if fresh.container_id.as_deref() == Some(container_id.as_str()) {
                                instances::delete(&mut tx, &fresh.id).await?;
                                tx.commit().await.map_err(db_err)?;
                                stats.rows_removed += 1;
                                tracing::warn!(instance = %row.name, "container vanished; row removed");
                            }
                        }
                    }
                    Some(status) => {
                        let desired = map_status(status);
                        if desired != row.state {
                            let mut tx = self.service.database().begin().await?;
                            if let Some(fresh) = instances::get(&mut tx, &row.id).await? {
                                if fresh.container_id.as_deref() == Some(container_id.as_str())
                                    && fresh.state == row.state
                                {
                                    instances::set_state(
                                        &mut tx,
                                        &fresh.id,
                                        desired,
                                        Some(container_id),
                                        Utc::now(),
                                    )
                                    .await?;
                                    tx.commit().await.map_err(db_err)?;
                                    stats.converged += 1;
                                    tracing::info!(
                                        instance = %row.name,
                                        from = row.state.as_str(),
                                        to = desired.as_str(),
                                        "converged instance state"
                                    );
                                }
                            }
                        }
                    }
                }
            }
            None => {
                let non_terminal = matches!(
                    row.state,
                    InstanceState::Provisioning | InstanceState::Running | InstanceState::Stopping
                );
                let stale = Utc::now() - row.updated_at
                    > Duration::seconds(MISSING_CONTAINER_GRACE_SECS);
                if non_terminal && stale {
                    let mut tx = self.service.database().begin().await?;
                    if let Some(fresh) = instances::get(&mut tx, &row.id).await? {
                        if fresh.container_id.is_none() && fresh.state == row.state {
                            instances::set_state(
                                &mut tx,
                                &fresh.id,
                                InstanceState::Terminated,
                                None,
                                Utc::now(),
                            )
                            .await?;
                            tx.commit().await.map_err(db_err)?;
                            stats.stale_terminated += 1;
                            tracing::warn!(instance = %row.name, "no container materialized; terminated");
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Observed container status to the instance state it implies.
fn map_status(status: ContainerStatus) -> InstanceState {
    match status {
        ContainerStatus::Running => InstanceState::Running,
        ContainerStatus::Created => InstanceState::Provisioning,
        ContainerStatus::Exited | ContainerStatus::Dead => InstanceState::Terminated,
        ContainerStatus::Removing => InstanceState::Stopping,
    }
}
