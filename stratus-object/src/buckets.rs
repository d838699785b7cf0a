//! Bucket CRUD.

use chrono::Utc;
use stratus_core::{OpContext, Result, StratusError};
use stratus_db::error::db_err;
use stratus_db::model::{BucketRow, LifecycleRule};
use stratus_db::repo::{buckets, objects, projects};
use uuid::Uuid;

use crate::upload::Preconditions;
use crate::{StorageService, validate};

/// Inputs for bucket creation.
#[derive(Debug, Clone)]
pub struct CreateBucketRequest {
    pub name: String,
    pub location: Option<String>,
    pub storage_class: Option<String>,
    pub versioning_enabled: bool,
    pub lifecycle_rules: Vec<LifecycleRule>,
}

/// Metadata mutations; absent fields keep their value.
#[derive(Debug, Clone, Default)]
pub struct PatchBucketRequest {
    pub storage_class: Option<String>,
    pub versioning_enabled: Option<bool>,
    pub lifecycle_rules: Option<Vec<LifecycleRule>>,
    pub if_metageneration_match: Option<i64>,
}

impl StorageService {
    /// Create a bucket. Names are unique across the whole store; a racing
    /// creator loses on the unique constraint.
    pub async fn create_bucket(
        &self,
        ctx: &OpContext,
        project: &str,
        req: CreateBucketRequest,
    ) -> Result<BucketRow> {
        ctx.check()?;
        validate::bucket_name(&req.name)?;

        let now = Utc::now();
        let mut row = BucketRow {
            id: Uuid::new_v4().to_string(),
            name: req.name.clone(),
            project_id: project.to_string(),
            location: req.location.unwrap_or_else(|| "US-CENTRAL1".to_string()),
            storage_class: req.storage_class.unwrap_or_else(|| "STANDARD".to_string()),
            versioning_enabled: req.versioning_enabled,
            lifecycle_rules_json: String::new(),
            metageneration: 1,
            created_at: now,
            updated_at: now,
        };
        row.set_lifecycle_rules(&req.lifecycle_rules)?;

        let mut tx = self.database().begin().await?;
        projects::ensure(&mut tx, project).await?;
        if buckets::get_by_name(&mut tx, &req.name).await?.is_some() {
            return Err(StratusError::already_exists("bucket", &req.name));
        }
        buckets::insert(&mut tx, &row).await?;
        tx.commit().await.map_err(db_err)?;

        tracing::info!(bucket = %row.name, project, "bucket created");
        Ok(row)
    }

    pub async fn get_bucket(&self, ctx: &OpContext, name: &str) -> Result<BucketRow> {
        ctx.check()?;
        let mut conn = self.acquire().await?;
        buckets::get_by_name(&mut conn, name)
            .await?
            .ok_or_else(|| StratusError::not_found("bucket", name))
    }

    pub async fn list_buckets(&self, ctx: &OpContext, project: &str) -> Result<Vec<BucketRow>> {
        ctx.check()?;
        let mut conn = self.acquire().await?;
        buckets::list_by_project(&mut conn, project).await
    }

    /// Apply metadata mutations and bump the metageneration.
    pub async fn patch_bucket(
        &self,
        ctx: &OpContext,
        name: &str,
        req: PatchBucketRequest,
    ) -> Result<BucketRow> {
        ctx.check()?;
        let mut tx = self.database().begin().await?;
        let Some(mut row) = buckets::get_by_name(&mut tx, name).await? else {
            return Err(StratusError::not_found("bucket", name));
        };
        if let Some(expected) = req.if_metageneration_match {
            if row.metageneration != expected {
                return Err(StratusError::precondition_failed(format!(
                    "bucket '{name}' is at metageneration {}, expected {expected}",
                    row.metageneration
                )));
            }
        }
        if let Some(class) = req.storage_class {
            row.storage_class = class;
        }
        if let Some(enabled) = req.versioning_enabled {
            row.versioning_enabled = enabled;
        }
        if let Some(rules) = req.lifecycle_rules {
            row.set_lifecycle_rules(&rules)?;
        }
        row.metageneration += 1;
        row.updated_at = Utc::now();
        buckets::update(&mut tx, &row).await?;
        tx.commit().await.map_err(db_err)?;
        Ok(row)
    }

    /// Delete a bucket. Refuses while any object or version rows remain
    /// unless `force` is set, in which case every object goes through the
    /// version-aware delete path first.
    pub async fn delete_bucket(&self, ctx: &OpContext, name: &str, force: bool) -> Result<()> {
        ctx.check()?;

        if force {
            self.purge_bucket_objects(ctx, name).await?;
        }

        let mut tx = self.database().begin().await?;
        let Some(row) = buckets::get_by_name(&mut tx, name).await? else {
            return Err(StratusError::not_found("bucket", name));
        };
        let remaining =
            buckets::count_objects(&mut tx, &row.id).await? + buckets::count_versions(&mut tx, &row.id).await?;
        if remaining > 0 {
            return Err(StratusError::failed_precondition(format!(
                "bucket '{name}' is not empty ({remaining} rows); delete objects first or force"
            ))
            .with_reason("bucketNotEmpty"));
        }
        buckets::delete(&mut tx, &row.id).await?;
        tx.commit().await.map_err(db_err)?;

        // Payload directory goes last; leftovers are the GC sweep's job.
        self.blobs().remove_bucket_dir(&row.id).await?;
        tracing::info!(bucket = name, "bucket deleted");
        Ok(())
    }

    /// Force-delete path: run every object (current and historical) through
    /// the version-aware delete.
    async fn purge_bucket_objects(&self, ctx: &OpContext, bucket_name: &str) -> Result<()> {
        let bucket = self.get_bucket(ctx, bucket_name).await?;
        let object_rows = {
            let mut conn = self.acquire().await?;
            objects::list_all(&mut conn, &bucket.id, "").await?
        };
        for object in object_rows {
            ctx.check()?;
            let versions = {
                let mut conn = self.acquire().await?;
                objects::list_versions(&mut conn, &object.id).await?
            };
            for version in versions {
                self.delete_object(
                    ctx,
                    crate::DeleteObjectRequest {
                        bucket: bucket_name.to_string(),
                        object: object.name.clone(),
                        generation: Some(version.generation),
                        preconditions: Preconditions::default(),
                    },
                )
                .await?;
            }
        }
        Ok(())
    }
}
