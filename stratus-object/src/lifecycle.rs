//! The lifecycle worker: rule evaluation, session TTL sweep, signed-URL
//! sweep, and the payload garbage sweep.
//!
//! One periodic task, single-threaded within itself, operating on a
//! consistent snapshot per tick. It never races uploads: the payload sweep
//! only removes files past a grace window, so a payload written ahead of a
//! still-uncommitted transaction survives.

use std::collections::HashSet;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use stratus_core::{OpContext, Result};
use stratus_db::error::db_err;
use stratus_db::model::{LifecycleActionType, LifecycleCondition, VersionRow};
use stratus_db::repo::{buckets, objects, sessions};

use crate::upload::Preconditions;
use crate::{DeleteObjectRequest, StorageService};

/// Resumable sessions older than this many hours are swept.
pub const SESSION_TTL_HOURS: i64 = 24;

/// Unreferenced payload files younger than this are left alone; their
/// commit may still be in flight.
const GC_GRACE_SECS: u64 = 3600;

/// What one tick did, for logs and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleStats {
    pub versions_deleted: u64,
    pub classes_rewritten: u64,
    pub sessions_swept: u64,
    pub tokens_swept: u64,
    pub blobs_swept: u64,
}

/// Periodic lifecycle enforcement over one [`StorageService`].
#[derive(Clone)]
pub struct LifecycleWorker {
    service: StorageService,
    interval: StdDuration,
}

impl LifecycleWorker {
    pub fn new(service: StorageService, interval: StdDuration) -> Self {
        Self { service, interval }
    }

    /// Run forever. Spawn on the runtime; aborting the task stops the loop.
    pub async fn run(self) {
        let ctx = OpContext::background();
        loop {
            tokio::time::sleep(self.interval).await;
            match self.tick(&ctx).await {
                Ok(stats) if stats == LifecycleStats::default() => {
                    tracing::debug!("lifecycle tick: nothing to do");
                }
                Ok(stats) => {
                    tracing::info!(?stats, "lifecycle tick applied changes");
                }
                Err(err) => {
                    tracing::warn!(error = %err, "lifecycle tick failed; will retry next interval");
                }
            }
        }
    }

    /// One full pass: rules, then expired sessions and tokens, then the
    /// payload sweep.
    pub async fn tick(&self, ctx: &OpContext) -> Result<LifecycleStats> {
        let mut stats = LifecycleStats::default();
        self.apply_rules(ctx, &mut stats).await?;
        self.sweep_sessions(ctx, &mut stats).await?;
        self.sweep_tokens(&mut stats).await?;
        self.sweep_blobs(&mut stats).await?;
        Ok(stats)
    }

    async fn apply_rules(&self, ctx: &OpContext, stats: &mut LifecycleStats) -> Result<()> {
        let targets = {
            let mut conn = self.service.acquire().await?;
            buckets::list_with_lifecycle(&mut conn).await?
        };

        for bucket in targets {
            ctx.check()?;
            let rules = bucket.lifecycle_rules()?;
            if rules.is_empty() {
                continue;
            }
            let candidates = {
                let mut conn = self.service.acquire().await?;
                objects::list_all_named_versions(&mut conn, &bucket.id, "").await?
            };

            for named in candidates {
                let newer = {
                    let mut conn = self.service.acquire().await?;
                    objects::count_newer_live(
                        &mut conn,
                        &named.version.object_id,
                        named.version.generation,
                    )
                    .await?
                };

                for rule in &rules {
                    if !condition_matches(&rule.condition, &named.object_name, &named.version, newer)
                    {
                        continue;
                    }
                    match rule.action.action_type {
                        LifecycleActionType::Delete => {
                            // The current version of a versioned bucket is
                            // soft-deleted; anything else goes hard.
                            let is_current = {
                                let mut conn = self.service.acquire().await?;
                                objects::get(&mut conn, &bucket.id, &named.object_name)
                                    .await?
                                    .and_then(|o| o.current_generation)
                                    == Some(named.version.generation)
                            };
                            let generation = if is_current && bucket.versioning_enabled {
                                None
                            } else {
                                Some(named.version.generation)
                            };
                            self.service
                                .delete_object(
                                    ctx,
                                    DeleteObjectRequest {
                                        bucket: bucket.name.clone(),
                                        object: named.object_name.clone(),
                                        generation,
                                        preconditions: Preconditions::default(),
                                    },
                                )
                                .await?;
                            stats.versions_deleted += 1;
                            break; // This version is gone; no further rules.
                        }
                        LifecycleActionType::SetStorageClass => {
                            let Some(class) = rule.action.storage_class.clone() else {
                                continue;
                            };
                            let mut tx = self.service.database().begin().await?;
                            if let Some(mut object) =
                                objects::get(&mut tx, &bucket.id, &named.object_name).await?
                            {
                                if object.storage_class.as_deref() != Some(class.as_str()) {
                                    object.storage_class = Some(class);
                                    object.updated_at = Utc::now();
                                    objects::update(&mut tx, &object).await?;
                                    tx.commit().await.map_err(db_err)?;
                                    stats.classes_rewritten += 1;
                                }
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    async fn sweep_sessions(&self, ctx: &OpContext, stats: &mut LifecycleStats) -> Result<()> {
        let cutoff = Utc::now() - Duration::hours(SESSION_TTL_HOURS);
        let stale = {
            let mut conn = self.service.acquire().await?;
            sessions::list_older_than(&mut conn, cutoff).await?
        };
        for session in stale {
            ctx.check()?;
            let mut tx = self.service.database().begin().await?;
            sessions::delete(&mut tx, &session.id).await?;
            tx.commit().await.map_err(db_err)?;
            self.service.blobs().remove(&session.temp_path).await?;
            stats.sessions_swept += 1;
        }
        Ok(())
    }

    async fn sweep_tokens(&self, stats: &mut LifecycleStats) -> Result<()> {
        let mut conn = self.service.acquire().await?;
        stats.tokens_swept += sessions::delete_expired_signed_urls(&mut conn, Utc::now()).await?;
        Ok(())
    }

    /// Remove payload files no version row references, skipping anything
    /// inside the grace window.
    async fn sweep_blobs(&self, stats: &mut LifecycleStats) -> Result<()> {
        let bucket_rows = {
            let mut conn = self.service.acquire().await?;
            buckets::list_all(&mut conn).await?
        };
        let grace = StdDuration::from_secs(GC_GRACE_SECS);

        for bucket in bucket_rows {
            let referenced: HashSet<String> = {
                let mut conn = self.service.acquire().await?;
                objects::list_referenced_paths(&mut conn, &bucket.id).await?.into_iter().collect()
            };
            for rel in self.service.blobs().list_bucket_blobs(&bucket.id).await? {
                if referenced.contains(&rel) {
                    continue;
                }
                let age = self
                    .service
                    .blobs()
                    .modified(&rel)
                    .await
                    .ok()
                    .and_then(|m| m.elapsed().ok());
                if age.is_some_and(|a| a > grace) {
                    tracing::warn!(path = %rel, "sweeping orphaned payload");
                    self.service.blobs().remove(&rel).await?;
                    stats.blobs_swept += 1;
                }
            }
        }
        Ok(())
    }
}

/// All present conditions must hold.
fn condition_matches(
    condition: &LifecycleCondition,
    object_name: &str,
    version: &VersionRow,
    newer_versions: i64,
) -> bool {
    let now = Utc::now();
    if let Some(age_days) = condition.age {
        if now - version.created_at < Duration::days(age_days) {
            return false;
        }
    }
    if let Some(created_before) = condition.created_before {
        if version.created_at >= created_before {
            return false;
        }
    }
    if let Some(required_newer) = condition.num_newer_versions {
        if newer_versions < required_newer {
            return false;
        }
    }
    if let Some(prefixes) = &condition.matches_prefix {
        if !prefixes.iter().any(|p| object_name.starts_with(p)) {
            return false;
        }
    }
    true
}
