//! The upload pipeline: write → hash → commit → cleanup.
//!
//! The payload is streamed to its final blob path first; the database
//! transaction that makes it visible commits afterwards; superseded
//! payloads are removed only once that commit succeeded. A failure at any
//! stage deletes what the failed upload wrote and leaves the previous
//! generation untouched.

use sqlx::SqliteConnection;
use stratus_blob::{BlobStore, WriteSummary};
use stratus_core::{ErrorKind, OpContext, Result, StratusError};
use stratus_db::error::db_err;
use stratus_db::model::{BucketRow, ObjectRow, VersionRow};
use stratus_db::repo::objects;
use tokio::io::AsyncRead;
use uuid::Uuid;

use crate::{ObjectMeta, StorageService, validate};

/// How many times a commit that lost a generation race is retried before
/// the conflict surfaces.
const COMMIT_RETRIES: u32 = 3;

/// `if-*-match` guards evaluated inside the commit transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Preconditions {
    /// `0` means "only if no live generation exists"; any other value must
    /// equal the current generation.
    pub if_generation_match: Option<i64>,
    pub if_metageneration_match: Option<i64>,
}

impl Preconditions {
    /// Evaluate against the bucket and the object's live generation.
    pub(crate) fn check(&self, bucket: &BucketRow, current: Option<i64>) -> Result<()> {
        if let Some(expected) = self.if_metageneration_match {
            if bucket.metageneration != expected {
                return Err(StratusError::precondition_failed(format!(
                    "bucket '{}' is at metageneration {}, expected {expected}",
                    bucket.name, bucket.metageneration
                )));
            }
        }
        if let Some(expected) = self.if_generation_match {
            match (expected, current) {
                (0, None) => {}
                (0, Some(live)) => {
                    return Err(StratusError::precondition_failed(format!(
                        "object already exists at generation {live}, expected none"
                    )));
                }
                (want, Some(live)) if want == live => {}
                (want, live) => {
                    return Err(StratusError::precondition_failed(format!(
                        "object generation is {}, expected {want}",
                        live.map_or_else(|| "absent".to_string(), |g| g.to_string())
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Inputs for a media upload.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub bucket: String,
    pub name: String,
    pub content_type: Option<String>,
    pub preconditions: Preconditions,
}

impl StorageService {
    /// Simple (media) upload: stream the body, then commit a new
    /// generation.
    pub async fn upload_object(
        &self,
        ctx: &OpContext,
        req: UploadRequest,
        body: impl AsyncRead + Unpin,
    ) -> Result<ObjectMeta> {
        ctx.check()?;
        validate::object_name(&req.name)?;
        let bucket = self.get_bucket(ctx, &req.bucket).await?;

        let payload_rel = BlobStore::blob_rel(&bucket.id, &Uuid::new_v4().to_string());
        let summary = self.blobs().write(ctx, &payload_rel, body).await?;

        let content_type =
            req.content_type.as_deref().unwrap_or("application/octet-stream");
        match self
            .commit_with_retry(ctx, &req.bucket, &req.name, &payload_rel, &summary, content_type, &req.preconditions)
            .await
        {
            Ok(meta) => Ok(meta),
            Err(err) => {
                // The new payload never became visible; take it back out.
                self.remove_payload_best_effort(&payload_rel).await;
                Err(err)
            }
        }
    }

    /// Post-failure and post-commit payload removal never masks the
    /// operation's own result; a leftover file is the garbage sweep's job.
    pub(crate) async fn remove_payload_best_effort(&self, rel: &str) {
        if let Err(err) = self.blobs().remove(rel).await {
            tracing::warn!(path = rel, error = %err, "payload cleanup failed; sweep will retry");
        }
    }

    /// Commit loop shared by media uploads, resumable finalize and copy.
    /// The payload already sits at `payload_rel`.
    pub(crate) async fn commit_with_retry(
        &self,
        ctx: &OpContext,
        bucket_name: &str,
        object_name: &str,
        payload_rel: &str,
        summary: &WriteSummary,
        content_type: &str,
        preconditions: &Preconditions,
    ) -> Result<ObjectMeta> {
        let mut attempt = 0;
        loop {
            ctx.check()?;
            match self
                .commit_once(bucket_name, object_name, payload_rel, summary, content_type, preconditions)
                .await
            {
                Ok((meta, superseded)) => {
                    for rel in superseded {
                        self.remove_payload_best_effort(&rel).await;
                    }
                    return Ok(meta);
                }
                Err(err) if err.is_retryable() && attempt < COMMIT_RETRIES => {
                    attempt += 1;
                    tracing::debug!(
                        bucket = bucket_name,
                        object = object_name,
                        attempt,
                        "retrying commit after write conflict"
                    );
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn commit_once(
        &self,
        bucket_name: &str,
        object_name: &str,
        payload_rel: &str,
        summary: &WriteSummary,
        content_type: &str,
        preconditions: &Preconditions,
    ) -> Result<(ObjectMeta, Vec<String>)> {
        let mut tx = self.database().begin().await?;
        let Some(bucket) = stratus_db::repo::buckets::get_by_name(&mut tx, bucket_name).await?
        else {
            return Err(StratusError::not_found("bucket", bucket_name));
        };
        let (object, version, superseded) = commit_version(
            &mut tx,
            &bucket,
            object_name,
            payload_rel,
            summary,
            content_type,
            preconditions,
        )
        .await?;
        tx.commit().await.map_err(db_err)?;
        Ok((ObjectMeta::from_rows(&bucket, &object, &version), superseded))
    }
}

/// Insert the next generation of `object_name` inside the caller's
/// transaction.
///
/// Returns the payload paths the commit superseded; the caller removes
/// them only after the transaction commits. A generation collision with a
/// concurrent writer surfaces as a retryable conflict.
pub(crate) async fn commit_version(
    tx: &mut SqliteConnection,
    bucket: &BucketRow,
    object_name: &str,
    payload_rel: &str,
    summary: &WriteSummary,
    content_type: &str,
    preconditions: &Preconditions,
) -> Result<(ObjectRow, VersionRow, Vec<String>)> {
    let existing = objects::get(&mut *tx, &bucket.id, object_name).await?;
    let current = existing.as_ref().and_then(|o| o.current_generation);
    preconditions.check(bucket, current)?;

    let now = chrono::Utc::now();
    let mut superseded = Vec::new();

    let object = match existing {
        None => {
            let object = ObjectRow {
                id: Uuid::new_v4().to_string(),
                bucket_id: bucket.id.clone(),
                name: object_name.to_string(),
                current_generation: Some(1),
                generation_seq: 1,
                content_type: content_type.to_string(),
                storage_class: None,
                size: summary.size,
                md5: summary.md5_hex.clone(),
                crc32c: summary.crc32c_b64.clone(),
                storage_path: payload_rel.to_string(),
                deleted: false,
                created_at: now,
                updated_at: now,
            };
            objects::insert(&mut *tx, &object).await.map_err(as_write_conflict)?;
            object
        }
        Some(mut object) => {
            object.generation_seq += 1;
            object.current_generation = Some(object.generation_seq);
            object.content_type = content_type.to_string();
            object.size = summary.size;
            object.md5 = summary.md5_hex.clone();
            object.crc32c = summary.crc32c_b64.clone();
            object.storage_path = payload_rel.to_string();
            object.deleted = false;
            object.updated_at = now;
            objects::update(&mut *tx, &object).await?;

            // Versioning off: the superseded generation's row goes away and
            // its payload is scheduled for post-commit removal. Versioning
            // on: the row stays as live history.
            if let Some(previous) = current {
                if !bucket.versioning_enabled {
                    if let Some(old) = objects::get_version(&mut *tx, &object.id, previous).await? {
                        objects::delete_version(&mut *tx, &old.id).await?;
                        superseded.push(old.storage_path);
                    }
                }
            }
            object
        }
    };

    let version = VersionRow {
        id: Uuid::new_v4().to_string(),
        object_id: object.id.clone(),
        generation: object.generation_seq,
        storage_path: payload_rel.to_string(),
        size: summary.size,
        md5: summary.md5_hex.clone(),
        crc32c: summary.crc32c_b64.clone(),
        content_type: content_type.to_string(),
        created_at: now,
        deleted_at: None,
    };
    objects::insert_version(&mut *tx, &version).await.map_err(as_write_conflict)?;

    Ok((object, version, superseded))
}

/// A unique-constraint loss inside the commit path means a concurrent
/// writer took the same generation (or created the same object row); the
/// whole transaction is safe to retry.
fn as_write_conflict(err: StratusError) -> StratusError {
    if err.kind() == ErrorKind::AlreadyExists {
        StratusError::aborted("concurrent write to the same object").with_reason("writeConflict")
    } else {
        err
    }
}
