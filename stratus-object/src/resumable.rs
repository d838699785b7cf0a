//! Resumable uploads: initiate, offset-checked chunks, finalize.
//!
//! The session accumulates bytes in a temp file; finalize renames it to
//! its final payload path and runs the same commit path as a simple
//! upload, with the preconditions captured at initiate time. Stale
//! sessions are swept by the lifecycle worker.

use chrono::Utc;
use stratus_blob::BlobStore;
use stratus_core::{OpContext, Result, StratusError};
use stratus_db::error::db_err;
use stratus_db::model::ResumableSessionRow;
use stratus_db::repo::sessions;
use uuid::Uuid;

use crate::upload::Preconditions;
use crate::{ObjectMeta, StorageService, validate};

/// Inputs for starting a resumable session.
#[derive(Debug, Clone)]
pub struct InitiateUploadRequest {
    pub bucket: String,
    pub name: String,
    pub content_type: Option<String>,
    /// Declared total size, when the client knows it up front.
    pub total_size: Option<i64>,
    pub preconditions: Preconditions,
}

/// Parsed `Content-Range` of one chunk: `bytes {start}-{end}/{total|*}`,
/// or `bytes */{total}` to query/finalize without new bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub total: Option<i64>,
}

impl ContentRange {
    pub fn parse(header: &str) -> Result<Self> {
        let spec = header
            .trim()
            .strip_prefix("bytes ")
            .ok_or_else(|| invalid(format!("malformed Content-Range '{header}'")))?;
        let (range_part, total_part) = spec
            .split_once('/')
            .ok_or_else(|| invalid(format!("malformed Content-Range '{header}'")))?;

        let total = match total_part {
            "*" => None,
            raw => Some(
                raw.parse::<i64>()
                    .map_err(|_| invalid(format!("bad total in Content-Range '{header}'")))?,
            ),
        };

        if range_part == "*" {
            return Ok(Self { start: None, end: None, total });
        }
        let (start_raw, end_raw) = range_part
            .split_once('-')
            .ok_or_else(|| invalid(format!("malformed Content-Range '{header}'")))?;
        let start = start_raw
            .parse::<i64>()
            .map_err(|_| invalid(format!("bad start in Content-Range '{header}'")))?;
        let end = end_raw
            .parse::<i64>()
            .map_err(|_| invalid(format!("bad end in Content-Range '{header}'")))?;
        if end < start {
            return Err(invalid(format!("inverted Content-Range '{header}'")));
        }
        Ok(Self { start: Some(start), end: Some(end), total })
    }
}

/// What a chunk call produced.
#[derive(Debug)]
pub enum ChunkOutcome {
    /// The chunk did not start at the persisted offset; nothing advanced.
    /// The client resumes from `persisted_offset`.
    RangeMismatch { persisted_offset: i64 },
    /// Bytes accepted; more expected.
    MoreExpected { persisted_offset: i64 },
    /// The session completed and the object committed.
    Finalized(Box<ObjectMeta>),
}

impl StorageService {
    /// Open a resumable session. The bucket must exist; the object name is
    /// validated here so a doomed session never starts.
    pub async fn initiate_upload(
        &self,
        ctx: &OpContext,
        req: InitiateUploadRequest,
    ) -> Result<ResumableSessionRow> {
        ctx.check()?;
        validate::object_name(&req.name)?;
        let bucket = self.get_bucket(ctx, &req.bucket).await?;

        let id = Uuid::new_v4().simple().to_string();
        let session = ResumableSessionRow {
            id: id.clone(),
            bucket_id: bucket.id,
            object_name: req.name,
            content_type: req
                .content_type
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            temp_path: BlobStore::tmp_rel(&id),
            total_size: req.total_size,
            bytes_received: 0,
            if_generation_match: req.preconditions.if_generation_match,
            if_metageneration_match: req.preconditions.if_metageneration_match,
            created_at: Utc::now(),
        };

        let mut tx = self.database().begin().await?;
        sessions::insert(&mut tx, &session).await?;
        tx.commit().await.map_err(db_err)?;
        tracing::debug!(session = %session.id, object = %session.object_name, "resumable session opened");
        Ok(session)
    }

    /// Accept one chunk. Offsets must be contiguous: a chunk that does not
    /// start exactly at `bytes_received` changes nothing and reports the
    /// current offset back.
    pub async fn upload_chunk(
        &self,
        ctx: &OpContext,
        session_id: &str,
        range: ContentRange,
        chunk: &[u8],
    ) -> Result<ChunkOutcome> {
        ctx.check()?;
        let session = self.get_session(session_id).await?;

        // `bytes */N` carries no new data: report or finalize.
        let (Some(start), Some(end)) = (range.start, range.end) else {
            if let Some(total) = range.total {
                if session.bytes_received == total {
                    return self.finalize_session(ctx, session).await.map(|meta| {
                        ChunkOutcome::Finalized(Box::new(meta))
                    });
                }
            }
            return Ok(ChunkOutcome::MoreExpected { persisted_offset: session.bytes_received });
        };

        if start != session.bytes_received {
            return Ok(ChunkOutcome::RangeMismatch { persisted_offset: session.bytes_received });
        }
        let expected_len = (end - start + 1) as usize;
        if chunk.len() != expected_len {
            return Err(invalid(format!(
                "Content-Range promises {expected_len} bytes but the body has {}",
                chunk.len()
            )));
        }
        if let (Some(total), Some(declared)) = (range.total, session.total_size) {
            if total != declared {
                return Err(invalid(format!(
                    "total size changed mid-session: {declared} then {total}"
                )));
            }
        }

        self.blobs().append(ctx, &session.temp_path, chunk).await?;
        let new_offset = end + 1;
        {
            let mut tx = self.database().begin().await?;
            sessions::set_bytes_received(&mut tx, &session.id, new_offset).await?;
            tx.commit().await.map_err(db_err)?;
        }

        if let Some(total) = range.total.or(session.total_size) {
            if new_offset == total {
                let mut finished = session;
                finished.bytes_received = new_offset;
                return self
                    .finalize_session(ctx, finished)
                    .await
                    .map(|meta| ChunkOutcome::Finalized(Box::new(meta)));
            }
        }
        Ok(ChunkOutcome::MoreExpected { persisted_offset: new_offset })
    }

    /// Current persisted offset of a session (status probe).
    pub async fn upload_status(&self, ctx: &OpContext, session_id: &str) -> Result<i64> {
        ctx.check()?;
        Ok(self.get_session(session_id).await?.bytes_received)
    }

    /// Drop a session and its temp file.
    pub async fn abort_upload(&self, ctx: &OpContext, session_id: &str) -> Result<()> {
        ctx.check()?;
        let session = self.get_session(session_id).await?;
        let mut tx = self.database().begin().await?;
        sessions::delete(&mut tx, &session.id).await?;
        tx.commit().await.map_err(db_err)?;
        self.blobs().remove(&session.temp_path).await?;
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Result<ResumableSessionRow> {
        let mut conn = self.acquire().await?;
        sessions::get(&mut conn, session_id)
            .await?
            .ok_or_else(|| StratusError::not_found("resumable session", session_id))
    }

    /// Hash the temp file, move it into place, and run the shared commit
    /// path with the preconditions captured at initiate time.
    async fn finalize_session(
        &self,
        ctx: &OpContext,
        session: ResumableSessionRow,
    ) -> Result<ObjectMeta> {
        let summary = self.blobs().summarize(ctx, &session.temp_path).await?;
        if let Some(declared) = session.total_size {
            if summary.size != declared {
                return Err(invalid(format!(
                    "session received {} bytes but declared {declared}",
                    summary.size
                )));
            }
        }

        // The session stores the bucket id; the commit path wants the name.
        let bucket_name = {
            let mut conn = self.acquire().await?;
            stratus_db::repo::buckets::get(&mut conn, &session.bucket_id)
                .await?
                .ok_or_else(|| StratusError::not_found("bucket", &session.bucket_id))?
                .name
        };

        let payload_rel = BlobStore::blob_rel(&session.bucket_id, &Uuid::new_v4().to_string());
        self.blobs().rename(&session.temp_path, &payload_rel).await?;

        let preconditions = Preconditions {
            if_generation_match: session.if_generation_match,
            if_metageneration_match: session.if_metageneration_match,
        };
        let committed = self
            .commit_with_retry(
                ctx,
                &bucket_name,
                &session.object_name,
                &payload_rel,
                &summary,
                &session.content_type,
                &preconditions,
            )
            .await;

        let meta = match committed {
            Ok(meta) => meta,
            Err(err) => {
                self.remove_payload_best_effort(&payload_rel).await;
                return Err(err);
            }
        };

        let mut tx = self.database().begin().await?;
        sessions::delete(&mut tx, &session.id).await?;
        tx.commit().await.map_err(db_err)?;
        tracing::debug!(session = %session.id, object = %session.object_name, "resumable session finalized");
        Ok(meta)
    }
}

fn invalid(message: impl Into<String>) -> StratusError {
    StratusError::invalid_argument(message)
}
